//! Agentstage - a talking avatar that sways to its own voice
//!
//! The conversation server pushes events over a JSON-lines channel; each
//! audio event shows the agent, plays the clip and rocks its head and body
//! with the clip's loudness until playback ends.

use anyhow::Context;
use clap::Parser;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use agentstage::audio::{AudioBuffer, CpalOutput};
use agentstage::cli::Args;
use agentstage::controller::{AgentPlaybackController, PlaybackNotice, PlaybackTicket};
use agentstage::error::StageError;
use agentstage::gateway::{Ack, InboundEvent, PresentationGateway};
use agentstage::params::Settings;
use agentstage::rendering::SpriteRenderer;
use agentstage::stage::SceneState;
use agentstage::transport;

/// Everything that reaches the event loop from other threads
enum StageEvent {
    Remote(InboundEvent, Option<Ack>),
    Decoded(PlaybackTicket, Result<AudioBuffer, StageError>),
    Playback(PlaybackNotice),
}

/// Main application state
struct App {
    settings: Settings,
    runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<StageEvent>,

    scene: Arc<SceneState>,
    gateway: PresentationGateway<CpalOutput>,

    window: Option<Arc<Window>>,
    renderer: Option<SpriteRenderer>,
}

impl App {
    fn new(
        settings: Settings,
        runtime: tokio::runtime::Runtime,
        proxy: EventLoopProxy<StageEvent>,
    ) -> anyhow::Result<Self> {
        let scene = Arc::new(SceneState::new(settings.stage.transition()));
        let output = CpalOutput::open_default().context("Failed to open audio output")?;

        let notice_proxy = Mutex::new(proxy.clone());
        let controller = AgentPlaybackController::new(
            &settings,
            scene.clone(),
            output,
            Arc::new(move |notice: PlaybackNotice| {
                if let Ok(proxy) = notice_proxy.lock() {
                    // Fails only once the event loop is gone
                    let _ = proxy.send_event(StageEvent::Playback(notice));
                }
            }),
        );

        Ok(Self {
            settings,
            runtime,
            proxy,
            scene,
            gateway: PresentationGateway::new(controller),
            window: None,
            renderer: None,
        })
    }

    /// Start the event channel on the background runtime
    fn listen(&self) {
        let addr = self.settings.transport.listen.clone();
        let proxy = Mutex::new(self.proxy.clone());
        let sink: transport::EventSink = Arc::new(move |event: InboundEvent, ack: Option<Ack>| {
            if let Ok(proxy) = proxy.lock() {
                let _ = proxy.send_event(StageEvent::Remote(event, ack));
            }
        });

        self.runtime.spawn(async move {
            match transport::bind(&addr).await {
                Ok(listener) => transport::serve(listener, sink).await,
                Err(e) => log::error!("Event channel unavailable: {}", e),
            }
        });
    }

    fn spawn_decode(&self, ticket: PlaybackTicket) {
        let decoder = self.gateway.controller().decoder().clone();
        let proxy = self.proxy.clone();
        self.runtime.spawn(async move {
            let result = decoder.decode(&ticket.reference).await;
            let _ = proxy.send_event(StageEvent::Decoded(ticket, result));
        });
    }

    fn render_frame(&mut self) {
        // Visualization first so this frame shows this frame's rotation
        self.gateway.controller_mut().tick_frame();

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let frame = self.scene.frame(Instant::now());
        match renderer.render(&frame) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => renderer.reconfigure(),
            Err(e) => log::warn!("Render error: {:?}", e),
        }
    }
}

impl ApplicationHandler<StageEvent> for App {
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = Window::default_attributes()
            .with_title("Agentstage")
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.settings.stage.window_width,
                self.settings.stage.window_height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        let renderer = pollster::block_on(SpriteRenderer::new(
            Arc::clone(&window),
            self.settings.audio.asset_root.clone(),
            self.settings.stage.layout,
        ));
        let mut renderer = match renderer {
            Ok(renderer) => renderer,
            Err(e) => {
                log::error!("{}", e);
                event_loop.exit();
                return;
            }
        };
        renderer.preload(self.settings.roster.image_refs());

        log::info!("Agentstage is running, press ESC to quit");

        self.window = Some(window);
        self.renderer = Some(renderer);
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: StageEvent) {
        match event {
            StageEvent::Remote(event, ack) => {
                if let Some(ticket) = self.gateway.receive(event, ack) {
                    self.spawn_decode(ticket);
                }
            }
            StageEvent::Decoded(ticket, result) => {
                let outcome = self.gateway.controller_mut().complete(ticket, result);
                log::debug!("Playback outcome: {:?}", outcome);
            }
            StageEvent::Playback(notice) => {
                self.gateway.controller_mut().handle_notice(notice);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.render_frame(),
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.init_logging();

    let settings = args.load_settings().context("Failed to load settings")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let event_loop = EventLoop::<StageEvent>::with_user_event()
        .build()
        .context("Failed to create event loop")?;

    let mut app = App::new(settings, runtime, event_loop.create_proxy())?;
    app.listen();

    event_loop.run_app(&mut app).context("Event loop failed")?;
    Ok(())
}
