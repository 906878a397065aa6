//! Audio-reactive rotation loop for the head and body layers.

use std::sync::Arc;

use crate::audio::AnalyzerHandle;
use crate::frame::{FrameHandle, FrameScheduler};
use crate::motion::map_to_rotation;
use crate::stage::{Layer, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Idle → Running → Idle. At most one frame task exists at a time.
#[derive(Default)]
pub struct VisualizationLoop {
    handle: Option<FrameHandle>,
}

impl VisualizationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoopState {
        match &self.handle {
            Some(handle) if !handle.is_cancelled() => LoopState::Running,
            _ => LoopState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Rotate both layers from the analyzer on every frame.
    ///
    /// Starting while running replaces the previous task.
    pub fn start(
        &mut self,
        scheduler: &mut FrameScheduler,
        analyzer: AnalyzerHandle,
        stage: Arc<dyn Stage>,
    ) {
        if self.is_running() {
            log::debug!("Visualization already running, restarting");
            self.stop();
        }

        let handle = scheduler.schedule(move || {
            // A busy analyzer skips this frame rather than stalling it
            let Ok(mut analyzer) = analyzer.try_lock() else {
                return;
            };
            let rotation = map_to_rotation(analyzer.snapshot());
            stage.rotate(Layer::Head, rotation.head);
            stage.rotate(Layer::Body, rotation.body);
        });
        self.handle = Some(handle);
    }

    /// Cancel the next scheduled frame
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}
