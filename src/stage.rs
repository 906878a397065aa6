//! View layer the controller and visualization loop draw through.
//!
//! [`Stage`] is the small surface the playback logic needs: swap an image,
//! rotate a layer, slide a container. [`SceneState`] is the in-process
//! implementation the renderer reads every frame.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The two rotating layers of the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Head,
    Body,
}

/// A slidable container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerId {
    /// The speaking avatar driven by playback
    Avatar,
    /// A per-agent container addressed by wire id. Its placement is tracked
    /// for the event flow but the sprite renderer does not draw it.
    Agent(i64),
}

/// Container target position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Top edge at the top of the viewport
    Visible,
    /// Pushed one full viewport height down, out of view
    Hidden,
}

impl Placement {
    /// Distance of the container's top edge below the viewport top, in viewport heights
    pub fn offset(self) -> f32 {
        match self {
            Placement::Visible => 0.0,
            Placement::Hidden => 1.0,
        }
    }
}

/// View operations the playback logic depends on
pub trait Stage: Send + Sync {
    /// Set the image source of a layer
    fn set_image(&self, layer: Layer, image: &str);

    /// Apply a rotation transform (degrees, clockwise)
    fn rotate(&self, layer: Layer, degrees: i32);

    /// Animate a container towards a placement
    fn move_container(&self, container: ContainerId, placement: Placement);
}

/// A timed slide between two offsets
#[derive(Debug, Clone, Copy)]
struct Slide {
    from: f32,
    target: Placement,
    started: Instant,
}

impl Slide {
    fn resting(target: Placement) -> Self {
        Self {
            from: target.offset(),
            target,
            started: Instant::now(),
        }
    }

    fn offset_at(&self, now: Instant, duration: Duration) -> f32 {
        let to = self.target.offset();
        if duration.is_zero() {
            return to;
        }
        let elapsed = now.saturating_duration_since(self.started).as_secs_f32();
        let progress = (elapsed / duration.as_secs_f32()).min(1.0);
        self.from + (to - self.from) * swing(progress)
    }
}

/// Ease-in-out curve used for container slides
pub fn swing(progress: f32) -> f32 {
    0.5 - (progress * PI).cos() / 2.0
}

#[derive(Debug, Default)]
struct Scene {
    images: HashMap<Layer, String>,
    rotations: HashMap<Layer, i32>,
    containers: HashMap<ContainerId, Slide>,
}

/// Everything the renderer needs for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFrame {
    pub head_image: Option<String>,
    pub body_image: Option<String>,
    pub head_degrees: i32,
    pub body_degrees: i32,
    /// Avatar container offset, in viewport heights below the top
    pub avatar_offset: f32,
}

/// Retained scene: layer images, rotations and container slides
pub struct SceneState {
    scene: Mutex<Scene>,
    transition: Duration,
}

impl SceneState {
    pub fn new(transition: Duration) -> Self {
        Self {
            scene: Mutex::new(Scene::default()),
            transition,
        }
    }

    fn with_scene<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> R {
        let mut scene = match self.scene.lock() {
            Ok(scene) => scene,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut scene)
    }

    pub fn image(&self, layer: Layer) -> Option<String> {
        self.with_scene(|scene| scene.images.get(&layer).cloned())
    }

    pub fn rotation(&self, layer: Layer) -> i32 {
        self.with_scene(|scene| scene.rotations.get(&layer).copied().unwrap_or(0))
    }

    /// Where a container is headed (containers never moved read as hidden)
    pub fn placement(&self, container: ContainerId) -> Placement {
        self.with_scene(|scene| {
            scene
                .containers
                .get(&container)
                .map(|slide| slide.target)
                .unwrap_or(Placement::Hidden)
        })
    }

    /// Current container offset, mid-slide if a transition is running
    pub fn offset(&self, container: ContainerId, now: Instant) -> f32 {
        let transition = self.transition;
        self.with_scene(|scene| {
            scene
                .containers
                .get(&container)
                .map(|slide| slide.offset_at(now, transition))
                .unwrap_or(Placement::Hidden.offset())
        })
    }

    pub fn frame(&self, now: Instant) -> SceneFrame {
        let transition = self.transition;
        self.with_scene(|scene| SceneFrame {
            head_image: scene.images.get(&Layer::Head).cloned(),
            body_image: scene.images.get(&Layer::Body).cloned(),
            head_degrees: scene.rotations.get(&Layer::Head).copied().unwrap_or(0),
            body_degrees: scene.rotations.get(&Layer::Body).copied().unwrap_or(0),
            avatar_offset: scene
                .containers
                .get(&ContainerId::Avatar)
                .map(|slide| slide.offset_at(now, transition))
                .unwrap_or(Placement::Hidden.offset()),
        })
    }
}

impl Stage for SceneState {
    fn set_image(&self, layer: Layer, image: &str) {
        self.with_scene(|scene| {
            scene.images.insert(layer, image.to_string());
        });
    }

    fn rotate(&self, layer: Layer, degrees: i32) {
        self.with_scene(|scene| {
            scene.rotations.insert(layer, degrees);
        });
    }

    fn move_container(&self, container: ContainerId, placement: Placement) {
        let now = Instant::now();
        let transition = self.transition;
        self.with_scene(|scene| {
            let slide = scene
                .containers
                .entry(container)
                .or_insert_with(|| Slide::resting(Placement::Hidden));

            if slide.target == placement {
                return;
            }
            *slide = Slide {
                from: slide.offset_at(now, transition),
                target: placement,
                started: now,
            };
        });
        log::debug!("Container {:?} -> {:?}", container, placement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swing_endpoints() {
        assert!(swing(0.0).abs() < 1e-6);
        assert!((swing(0.5) - 0.5).abs() < 1e-6);
        assert!((swing(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_containers_start_hidden() {
        let scene = SceneState::new(Duration::from_millis(500));
        assert_eq!(scene.placement(ContainerId::Avatar), Placement::Hidden);
        assert_eq!(scene.offset(ContainerId::Agent(3), Instant::now()), 1.0);
    }

    #[test]
    fn test_slide_reaches_target_after_transition() {
        let scene = SceneState::new(Duration::from_millis(500));
        scene.move_container(ContainerId::Avatar, Placement::Visible);

        let later = Instant::now() + Duration::from_millis(600);
        assert_eq!(scene.placement(ContainerId::Avatar), Placement::Visible);
        assert_eq!(scene.offset(ContainerId::Avatar, later), 0.0);
        assert_eq!(scene.frame(later).avatar_offset, 0.0);
    }

    #[test]
    fn test_zero_transition_jumps() {
        let scene = SceneState::new(Duration::ZERO);
        scene.move_container(ContainerId::Agent(1), Placement::Visible);
        assert_eq!(scene.offset(ContainerId::Agent(1), Instant::now()), 0.0);
    }

    #[test]
    fn test_hide_without_show_is_idempotent() {
        let scene = SceneState::new(Duration::from_millis(500));
        scene.move_container(ContainerId::Agent(2), Placement::Hidden);
        scene.move_container(ContainerId::Agent(2), Placement::Hidden);
        assert_eq!(scene.placement(ContainerId::Agent(2)), Placement::Hidden);
        assert_eq!(scene.offset(ContainerId::Agent(2), Instant::now()), 1.0);
    }

    #[test]
    fn test_layers_record_images_and_rotation() {
        let scene = SceneState::new(Duration::ZERO);
        scene.set_image(Layer::Head, "head.png");
        scene.rotate(Layer::Head, 42);
        scene.rotate(Layer::Body, 17);

        let frame = scene.frame(Instant::now());
        assert_eq!(frame.head_image.as_deref(), Some("head.png"));
        assert_eq!(frame.body_image, None);
        assert_eq!((frame.head_degrees, frame.body_degrees), (42, 17));
        assert_eq!(scene.rotation(Layer::Body), 17);
    }
}
