//! Playback sessions: one clip, one agent, one visualization loop.
//!
//! `play` runs in two halves so hosts that cannot await on their event loop
//! can decode elsewhere:
//!
//! 1. [`AgentPlaybackController::begin`] applies the agent's images, slides the
//!    avatar into view and hands back a [`PlaybackTicket`].
//! 2. [`AgentPlaybackController::complete`] takes the ticket plus the decode
//!    result, wires the analyzer into playback and starts the loop.
//!
//! Playback end arrives as a [`PlaybackNotice`] from the audio thread and is
//! fed back through [`AgentPlaybackController::handle_notice`].

use std::sync::Arc;

use crate::audio::{
    ActivePlayback, AmplitudeAnalyzer, AnalyzerHandle, AudioBuffer, AudioDecoder, AudioOutput,
    PlaybackSource,
};
use crate::error::StageError;
use crate::frame::FrameScheduler;
use crate::motion::RotationPair;
use crate::params::{AgentProfile, AnalyzerConfig, DecodeFailurePolicy, Roster, Settings};
use crate::stage::{ContainerId, Layer, Placement, Stage};
use crate::visualizer::{LoopState, VisualizationLoop};

/// Identifies one begin → complete → end cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Messages from the playback graph back to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackNotice {
    Ended(SessionId),
}

/// Delivers notices to wherever the controller lives (called from the audio thread)
pub type NoticeSink = Arc<dyn Fn(PlaybackNotice) + Send + Sync>;

/// A playback that has been shown but not yet decoded
#[derive(Debug, Clone)]
pub struct PlaybackTicket {
    pub session: SessionId,
    pub agent: AgentProfile,
    pub reference: String,
}

/// Result of completing a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Started(SessionId),
    /// Fetch, decode or output failed; nothing plays
    Failed,
    /// A newer `begin` replaced this ticket before it completed
    Superseded,
}

/// The active clip and the handles it owns. It exists only while the clip plays.
pub struct PlaybackSession {
    id: SessionId,
    agent_id: usize,
    audio: Arc<AudioBuffer>,
    analyzer: AnalyzerHandle,
    playback: Box<dyn ActivePlayback>,
}

impl PlaybackSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn agent_id(&self) -> usize {
        self.agent_id
    }

    pub fn audio(&self) -> &AudioBuffer {
        &self.audio
    }

    pub fn analyzer(&self) -> &AnalyzerHandle {
        &self.analyzer
    }
}

/// Orchestrates agent playback over a stage and an audio output
pub struct AgentPlaybackController<O: AudioOutput> {
    roster: Roster,
    analyzer_config: AnalyzerConfig,
    failure_policy: DecodeFailurePolicy,
    decoder: AudioDecoder,
    stage: Arc<dyn Stage>,
    output: O,
    notices: NoticeSink,
    scheduler: FrameScheduler,
    visualizer: VisualizationLoop,
    session: Option<PlaybackSession>,
    pending: Option<SessionId>,
    next_id: u64,
}

impl<O: AudioOutput> AgentPlaybackController<O> {
    pub fn new(settings: &Settings, stage: Arc<dyn Stage>, output: O, notices: NoticeSink) -> Self {
        Self {
            roster: settings.roster.clone(),
            analyzer_config: settings.analyzer.clone(),
            failure_policy: settings.audio.decode_failure,
            decoder: AudioDecoder::new(settings.audio.clone()),
            stage,
            output,
            notices,
            scheduler: FrameScheduler::new(),
            visualizer: VisualizationLoop::new(),
            session: None,
            pending: None,
            next_id: 0,
        }
    }

    pub fn stage(&self) -> &Arc<dyn Stage> {
        &self.stage
    }

    pub fn decoder(&self) -> &AudioDecoder {
        &self.decoder
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    /// True from a successful `complete` until the clip ends or is superseded
    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    pub fn visualizer_state(&self) -> LoopState {
        self.visualizer.state()
    }

    /// Advance the visualization by one display frame
    pub fn tick_frame(&mut self) {
        self.scheduler.tick();
    }

    /// Decode and play a clip for an agent (zero-based id, clamped to the roster)
    pub async fn play(&mut self, agent_id: i64, reference: &str) -> PlaybackOutcome {
        let Some(ticket) = self.begin(agent_id, reference) else {
            return PlaybackOutcome::Failed;
        };
        let decoder = self.decoder.clone();
        let result = decoder.decode(&ticket.reference).await;
        self.complete(ticket, result)
    }

    /// Show the agent and issue a ticket for its clip.
    ///
    /// Any active session is torn down first; earlier tickets become stale.
    pub fn begin(&mut self, agent_id: i64, reference: &str) -> Option<PlaybackTicket> {
        let Some(agent) = self.roster.resolve(agent_id) else {
            log::error!("Roster is empty, cannot play {}", reference);
            return None;
        };

        if let Some(previous) = self.session.take() {
            log::info!(
                "Agent {} superseding session {:?} of agent {}",
                agent.id,
                previous.id,
                previous.agent_id
            );
            self.teardown(previous);
        }

        if let Some(variant) = agent.primary_variant() {
            self.stage.set_image(Layer::Head, &variant.head);
            self.stage.set_image(Layer::Body, &variant.body);
        }
        self.stage
            .move_container(ContainerId::Avatar, Placement::Visible);

        let session = SessionId(self.next_id);
        self.next_id += 1;
        self.pending = Some(session);

        log::info!("Agent {} speaking {} ({:?})", agent.id, reference, session);
        Some(PlaybackTicket {
            session,
            agent,
            reference: reference.to_string(),
        })
    }

    /// Start playback of a decoded ticket
    pub fn complete(
        &mut self,
        ticket: PlaybackTicket,
        decoded: Result<AudioBuffer, StageError>,
    ) -> PlaybackOutcome {
        if self.pending != Some(ticket.session) {
            log::info!(
                "Discarding {} for {:?}: superseded",
                ticket.reference,
                ticket.session
            );
            return PlaybackOutcome::Superseded;
        }
        self.pending = None;

        let audio = match decoded {
            Ok(buffer) => Arc::new(buffer),
            Err(e) => return self.abort(&ticket, e),
        };

        let mut source = PlaybackSource::new(Arc::clone(&audio), self.output.sample_rate());
        let analyzer = AmplitudeAnalyzer::attach(&self.analyzer_config, &mut source).into_handle();

        let notices = Arc::clone(&self.notices);
        let id = ticket.session;
        let playback = match self
            .output
            .start(source, Box::new(move || notices(PlaybackNotice::Ended(id))))
        {
            Ok(playback) => playback,
            Err(e) => return self.abort(&ticket, e),
        };

        log::info!(
            "Playing {} for agent {} ({:.2}s)",
            ticket.reference,
            ticket.agent.id,
            audio.duration().as_secs_f32()
        );

        let session = PlaybackSession {
            id,
            agent_id: ticket.agent.id,
            audio,
            analyzer,
            playback,
        };
        self.visualizer.start(
            &mut self.scheduler,
            Arc::clone(session.analyzer()),
            Arc::clone(&self.stage),
        );
        self.session = Some(session);
        PlaybackOutcome::Started(id)
    }

    /// React to the playback graph
    pub fn handle_notice(&mut self, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::Ended(id) => {
                let is_current = self.session.as_ref().is_some_and(|s| s.id == id);
                if !is_current {
                    log::debug!("Ignoring end of stale {:?}", id);
                    return;
                }
                if let Some(session) = self.session.take() {
                    log::info!("Agent {} finished speaking", session.agent_id);
                    self.stage
                        .move_container(ContainerId::Avatar, Placement::Hidden);
                    self.teardown(session);
                }
            }
        }
    }

    fn abort(&mut self, ticket: &PlaybackTicket, error: StageError) -> PlaybackOutcome {
        log::warn!(
            "Playback for agent {} aborted: {}",
            ticket.agent.id,
            error
        );
        if self.failure_policy == DecodeFailurePolicy::Hide {
            self.stage
                .move_container(ContainerId::Avatar, Placement::Hidden);
        }
        PlaybackOutcome::Failed
    }

    /// Stop the loop and audio, and return both layers upright
    fn teardown(&mut self, mut session: PlaybackSession) {
        self.visualizer.stop();
        session.playback.stop();
        self.stage.rotate(Layer::Head, RotationPair::REST.head);
        self.stage.rotate(Layer::Body, RotationPair::REST.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EndCallback;
    use crate::error::Result;
    use crate::stage::SceneState;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Output that never touches a device; ends are triggered by hand
    #[derive(Clone, Default)]
    struct ManualOutput {
        ends: Arc<Mutex<Vec<EndCallback>>>,
        fail: bool,
    }

    struct ManualPlayback;

    impl ActivePlayback for ManualPlayback {
        fn stop(&mut self) {}
    }

    impl AudioOutput for ManualOutput {
        fn sample_rate(&self) -> u32 {
            48000
        }

        fn start(&self, _source: PlaybackSource, on_end: EndCallback) -> Result<Box<dyn ActivePlayback>> {
            if self.fail {
                return Err(StageError::Output("no device".to_string()));
            }
            self.ends.lock().unwrap().push(on_end);
            Ok(Box::new(ManualPlayback))
        }
    }

    struct Harness {
        controller: AgentPlaybackController<ManualOutput>,
        scene: Arc<SceneState>,
        notices: Arc<Mutex<Vec<PlaybackNotice>>>,
        output: ManualOutput,
    }

    fn harness(policy: DecodeFailurePolicy) -> Harness {
        let mut settings = Settings::default();
        settings.audio.decode_failure = policy;
        let scene = Arc::new(SceneState::new(Duration::ZERO));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let output = ManualOutput::default();
        let controller = AgentPlaybackController::new(
            &settings,
            scene.clone(),
            output.clone(),
            Arc::new(move |notice: PlaybackNotice| sink.lock().unwrap().push(notice)),
        );
        Harness {
            controller,
            scene,
            notices,
            output,
        }
    }

    fn tone() -> AudioBuffer {
        AudioBuffer::new(vec![0.5; 4800], 1, 48000)
    }

    fn finish_playback(h: &mut Harness) {
        let ends: Vec<EndCallback> = h.output.ends.lock().unwrap().drain(..).collect();
        for end in ends {
            end();
        }
        let notices: Vec<PlaybackNotice> = h.notices.lock().unwrap().drain(..).collect();
        for notice in notices {
            h.controller.handle_notice(notice);
        }
    }

    #[test]
    fn test_begin_shows_agent_assets() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let ticket = h.controller.begin(7, "/a.mp3").unwrap();

        assert_eq!(ticket.agent.id, 0);
        assert_eq!(h.scene.image(Layer::Head).as_deref(), Some("/static/img/eldrin-2.png"));
        assert_eq!(h.scene.image(Layer::Body).as_deref(), Some("/static/img/eldrin-1.png"));
        assert_eq!(h.scene.placement(ContainerId::Avatar), Placement::Visible);
        assert!(!h.controller.is_playing());
    }

    #[test]
    fn test_complete_starts_session_and_loop() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let ticket = h.controller.begin(0, "/a.mp3").unwrap();
        let outcome = h.controller.complete(ticket, Ok(tone()));

        assert!(matches!(outcome, PlaybackOutcome::Started(_)));
        assert!(h.controller.is_playing());
        assert_eq!(h.controller.visualizer_state(), LoopState::Running);
        assert_eq!(h.controller.session().unwrap().audio().frames(), 4800);
    }

    #[test]
    fn test_end_resets_everything() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let ticket = h.controller.begin(0, "/a.mp3").unwrap();
        h.controller.complete(ticket, Ok(tone()));

        // Simulate a loud frame just before the end
        h.scene.rotate(Layer::Head, 69);
        h.scene.rotate(Layer::Body, 29);
        finish_playback(&mut h);
        h.controller.tick_frame();

        assert!(!h.controller.is_playing());
        assert!(h.controller.session().is_none());
        assert_eq!(h.controller.visualizer_state(), LoopState::Idle);
        assert_eq!(h.scene.rotation(Layer::Head), 0);
        assert_eq!(h.scene.rotation(Layer::Body), 0);
        assert_eq!(h.scene.placement(ContainerId::Avatar), Placement::Hidden);
    }

    #[test]
    fn test_decode_failure_keeps_avatar_visible_by_default() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let ticket = h.controller.begin(0, "/a.mp3").unwrap();
        let err = StageError::Decode {
            reference: "/a.mp3".to_string(),
            reason: "garbage".to_string(),
        };

        assert_eq!(h.controller.complete(ticket, Err(err)), PlaybackOutcome::Failed);
        assert!(!h.controller.is_playing());
        assert_eq!(h.controller.visualizer_state(), LoopState::Idle);
        assert!(h.output.ends.lock().unwrap().is_empty());
        assert_eq!(h.scene.placement(ContainerId::Avatar), Placement::Visible);
    }

    #[test]
    fn test_decode_failure_hides_when_configured() {
        let mut h = harness(DecodeFailurePolicy::Hide);
        let ticket = h.controller.begin(0, "/a.mp3").unwrap();
        let err = StageError::ResourceFetch {
            reference: "/a.mp3".to_string(),
            reason: "404".to_string(),
        };

        assert_eq!(h.controller.complete(ticket, Err(err)), PlaybackOutcome::Failed);
        assert_eq!(h.scene.placement(ContainerId::Avatar), Placement::Hidden);
    }

    #[test]
    fn test_output_failure_aborts() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        h.controller.output.fail = true;
        let ticket = h.controller.begin(0, "/a.mp3").unwrap();

        assert_eq!(h.controller.complete(ticket, Ok(tone())), PlaybackOutcome::Failed);
        assert_eq!(h.controller.visualizer_state(), LoopState::Idle);
    }

    #[test]
    fn test_newer_begin_supersedes_pending_ticket() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let first = h.controller.begin(0, "/first.mp3").unwrap();
        let second = h.controller.begin(0, "/second.mp3").unwrap();

        assert_eq!(
            h.controller.complete(first, Ok(tone())),
            PlaybackOutcome::Superseded
        );
        assert!(matches!(
            h.controller.complete(second, Ok(tone())),
            PlaybackOutcome::Started(_)
        ));
        assert_eq!(h.output.ends.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_new_session_tears_down_active_one() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let first = h.controller.begin(0, "/first.mp3").unwrap();
        let first_id = match h.controller.complete(first, Ok(tone())) {
            PlaybackOutcome::Started(id) => id,
            other => panic!("unexpected {:?}", other),
        };

        let second = h.controller.begin(0, "/second.mp3").unwrap();
        assert!(!h.controller.is_playing());
        assert_eq!(h.controller.visualizer_state(), LoopState::Idle);
        h.controller.complete(second, Ok(tone()));

        // The old clip's end must not stop the new one
        h.controller.handle_notice(PlaybackNotice::Ended(first_id));
        assert!(h.controller.is_playing());
        assert_eq!(h.controller.visualizer_state(), LoopState::Running);
        assert_eq!(h.scene.placement(ContainerId::Avatar), Placement::Visible);
    }

    #[tokio::test]
    async fn test_play_with_missing_file_fails_cleanly() {
        let mut h = harness(DecodeFailurePolicy::KeepVisible);
        let outcome = h.controller.play(1, "/definitely/missing.wav").await;

        assert_eq!(outcome, PlaybackOutcome::Failed);
        assert!(!h.controller.is_playing());
        assert_eq!(h.scene.placement(ContainerId::Avatar), Placement::Visible);
    }
}
