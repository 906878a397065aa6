//! Sprite renderer: draws the body and head layers as textured quads.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use wgpu::util::DeviceExt;

use crate::error::{Result, StageError};
use crate::params::LayerLayout;
use crate::stage::SceneFrame;

/// Per-layer uniform (quad transform into clip space)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SpriteUniforms {
    pub transform: [[f32; 4]; 4],
}

/// Transform for a unit quad centred on the origin.
///
/// `height` and `center_y` are in viewport heights relative to the container
/// centre; `container_offset` pushes the whole container down by that many
/// viewport heights. Positive `degrees` turn clockwise on screen.
pub fn layer_transform(
    viewport_aspect: f32,
    image_aspect: f32,
    height: f32,
    center_y: f32,
    container_offset: f32,
    degrees: i32,
) -> Mat4 {
    let aspect_fix = Mat4::from_scale(Vec3::new(1.0 / viewport_aspect.max(f32::EPSILON), 1.0, 1.0));
    let place = Mat4::from_translation(Vec3::new(0.0, 2.0 * (center_y - container_offset), 0.0));
    let spin = Mat4::from_rotation_z(-(degrees as f32).to_radians());
    let size = Mat4::from_scale(Vec3::new(2.0 * height * image_aspect, 2.0 * height, 1.0));
    aspect_fix * place * spin * size
}

struct LayerSlot {
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

struct SpriteTexture {
    bind_group: wgpu::BindGroup,
    aspect: f32,
}

/// Owns the wgpu device, the sprite pipeline and a cache of layer images
pub struct SpriteRenderer {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    head: LayerSlot,
    body: LayerSlot,
    textures: HashMap<String, SpriteTexture>,
    missing: HashSet<String>,
    asset_root: PathBuf,
    layout: LayerLayout,
}

impl SpriteRenderer {
    pub async fn new(
        window: Arc<winit::window::Window>,
        asset_root: PathBuf,
        layout: LayerLayout,
    ) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| StageError::Render(format!("Failed to create surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| StageError::Render("Failed to find suitable GPU adapter".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Stage Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| StageError::Render(format!("Failed to request device: {}", e)))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| StageError::Render("Surface reports no formats".to_string()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Sprite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("sprite.wgsl").into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sprite Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sprite Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sprite Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sprite Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Sprite Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let head = Self::layer_slot(&device, &uniform_layout, "Head");
        let body = Self::layer_slot(&device, &uniform_layout, "Body");

        Ok(Self {
            surface,
            device,
            queue,
            config,
            pipeline,
            texture_layout,
            sampler,
            head,
            body,
            textures: HashMap::new(),
            missing: HashSet::new(),
            asset_root,
            layout,
        })
    }

    fn layer_slot(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, name: &str) -> LayerSlot {
        let uniforms = SpriteUniforms {
            transform: Mat4::IDENTITY.to_cols_array_2d(),
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Uniform Buffer", name)),
            contents: bytemuck::cast_slice(&[uniforms]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Uniform Bind Group", name)),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        LayerSlot {
            uniform_buffer,
            bind_group,
        }
    }

    /// Load images ahead of their first use
    pub fn preload<'a>(&mut self, references: impl IntoIterator<Item = &'a str>) {
        for reference in references {
            self.ensure_texture(reference);
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Reconfigure after the surface was lost or went stale
    pub fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
    }

    fn ensure_texture(&mut self, reference: &str) {
        if self.textures.contains_key(reference) || self.missing.contains(reference) {
            return;
        }
        match self.load_texture(reference) {
            Ok(texture) => {
                log::debug!("Loaded image {}", reference);
                self.textures.insert(reference.to_string(), texture);
            }
            Err(e) => {
                // Remember the failure so a bad path is reported once, not every frame
                log::warn!("{}", e);
                self.missing.insert(reference.to_string());
            }
        }
    }

    fn load_texture(&self, reference: &str) -> Result<SpriteTexture> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Err(StageError::Render(format!(
                "Remote image {} is not supported, place it under the asset root",
                reference
            )));
        }

        let path = self.asset_root.join(reference.trim_start_matches('/'));
        let rgba = image::open(&path)
            .map_err(|e| StageError::Render(format!("Failed to load {}: {}", path.display(), e)))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(reference),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(reference),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        Ok(SpriteTexture {
            bind_group,
            aspect: width as f32 / height.max(1) as f32,
        })
    }

    /// Draw one scene frame (body first, head on top)
    pub fn render(&mut self, frame: &SceneFrame) -> std::result::Result<(), wgpu::SurfaceError> {
        for image in [&frame.body_image, &frame.head_image].into_iter().flatten() {
            self.ensure_texture(image);
        }

        let viewport_aspect = self.config.width as f32 / self.config.height as f32;
        let body = frame.body_image.as_deref().and_then(|r| self.textures.get(r));
        let head = frame.head_image.as_deref().and_then(|r| self.textures.get(r));

        if let Some(texture) = body {
            let transform = layer_transform(
                viewport_aspect,
                texture.aspect,
                self.layout.body_height,
                self.layout.body_center_y,
                frame.avatar_offset,
                frame.body_degrees,
            );
            self.write_transform(&self.body.uniform_buffer, transform);
        }
        if let Some(texture) = head {
            let transform = layer_transform(
                viewport_aspect,
                texture.aspect,
                self.layout.head_height,
                self.layout.head_center_y,
                frame.avatar_offset,
                frame.head_degrees,
            );
            self.write_transform(&self.head.uniform_buffer, transform);
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Stage Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Stage Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            for (slot, texture) in [(&self.body, body), (&self.head, head)] {
                let Some(texture) = texture else {
                    continue;
                };
                render_pass.set_bind_group(0, &slot.bind_group, &[]);
                render_pass.set_bind_group(1, &texture.bind_group, &[]);
                render_pass.draw(0..6, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    fn write_transform(&self, buffer: &wgpu::Buffer, transform: Mat4) {
        let uniforms = SpriteUniforms {
            transform: transform.to_cols_array_2d(),
        };
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&[uniforms]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_upright_quad_keeps_its_size() {
        let m = layer_transform(1.0, 1.0, 0.5, 0.0, 0.0, 0);
        assert!(close(
            m.transform_point3(Vec3::new(0.5, 0.5, 0.0)),
            Vec3::new(0.5, 0.5, 0.0)
        ));
    }

    #[test]
    fn test_positive_degrees_turn_clockwise() {
        let m = layer_transform(1.0, 1.0, 0.5, 0.0, 0.0, 90);
        assert!(close(
            m.transform_point3(Vec3::new(0.5, 0.0, 0.0)),
            Vec3::new(0.0, -0.5, 0.0)
        ));
    }

    #[test]
    fn test_wide_viewport_squeezes_x() {
        let m = layer_transform(2.0, 1.0, 0.5, 0.0, 0.0, 0);
        let corner = m.transform_point3(Vec3::new(0.5, 0.5, 0.0));
        assert!((corner.x - 0.25).abs() < 1e-5);
        assert!((corner.y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_hidden_container_is_below_viewport() {
        let layout = LayerLayout::default();
        for (height, center) in [
            (layout.head_height, layout.head_center_y),
            (layout.body_height, layout.body_center_y),
        ] {
            let m = layer_transform(0.75, 1.0, height, center, 1.0, 0);
            let top = m.transform_point3(Vec3::new(0.0, 0.5, 0.0));
            assert!(top.y < -1.0, "layer still visible at y={}", top.y);
        }
    }
}
