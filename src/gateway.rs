//! Remote presentation events and their effect on the stage.

use serde::Deserialize;
use serde_json::Value;

use crate::audio::AudioOutput;
use crate::controller::{AgentPlaybackController, PlaybackOutcome, PlaybackTicket};
use crate::error::{Result, StageError};
use crate::stage::{ContainerId, Placement};

/// Events pushed by the conversation server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `start_agent`: slide the agent's container into view
    AgentShown { agent_id: i64 },
    /// `agent_audio`: a clip is ready for a (1-based) agent
    AudioReady { agent_id: i64, audio: String },
    /// `clear_agent`: slide the agent's container out of view
    AgentCleared { agent_id: i64 },
}

#[derive(Deserialize)]
struct AgentPayload {
    agent_id: i64,
}

#[derive(Deserialize)]
struct AudioPayload {
    agent_id: i64,
    audio: String,
}

impl InboundEvent {
    /// Decode a named wire event. Unknown names yield `Ok(None)`.
    pub fn from_wire(name: &str, data: Value) -> Result<Option<Self>> {
        let payload_error =
            |e: serde_json::Error| StageError::Transport(format!("Bad {} payload: {}", name, e));

        let event = match name {
            "start_agent" => {
                let payload: AgentPayload = serde_json::from_value(data).map_err(payload_error)?;
                InboundEvent::AgentShown {
                    agent_id: payload.agent_id,
                }
            }
            "agent_audio" => {
                let payload: AudioPayload = serde_json::from_value(data).map_err(payload_error)?;
                InboundEvent::AudioReady {
                    agent_id: payload.agent_id,
                    audio: payload.audio,
                }
            }
            "clear_agent" => {
                let payload: AgentPayload = serde_json::from_value(data).map_err(payload_error)?;
                InboundEvent::AgentCleared {
                    agent_id: payload.agent_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Receipt callback supplied by the sender
pub struct Ack(Box<dyn FnOnce() + Send>);

impl Ack {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(callback))
    }

    pub fn send(self) {
        (self.0)()
    }
}

/// Wire agent ids are 1-based; roster indices are 0-based
pub fn wire_to_index(agent_id: i64) -> i64 {
    agent_id.saturating_sub(1).max(0)
}

/// Routes inbound events to the controller and the stage
pub struct PresentationGateway<O: AudioOutput> {
    controller: AgentPlaybackController<O>,
}

impl<O: AudioOutput> PresentationGateway<O> {
    pub fn new(controller: AgentPlaybackController<O>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &AgentPlaybackController<O> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AgentPlaybackController<O> {
        &mut self.controller
    }

    /// Apply an event and acknowledge it.
    ///
    /// `AudioReady` returns the ticket whose clip the caller must decode and
    /// hand to [`AgentPlaybackController::complete`].
    pub fn receive(&mut self, event: InboundEvent, ack: Option<Ack>) -> Option<PlaybackTicket> {
        log::debug!("Received {:?}", event);

        let ticket = match event {
            InboundEvent::AgentShown { agent_id } => {
                self.controller
                    .stage()
                    .move_container(ContainerId::Agent(agent_id), Placement::Visible);
                None
            }
            InboundEvent::AudioReady { agent_id, audio } => {
                self.controller.begin(wire_to_index(agent_id), &audio)
            }
            InboundEvent::AgentCleared { agent_id } => {
                self.controller
                    .stage()
                    .move_container(ContainerId::Agent(agent_id), Placement::Hidden);
                None
            }
        };

        if let Some(ack) = ack {
            ack.send();
        }
        ticket
    }

    /// Apply an event, awaiting the decode inline when it carries audio
    pub async fn dispatch(&mut self, event: InboundEvent, ack: Option<Ack>) -> Option<PlaybackOutcome> {
        let ticket = self.receive(event, ack)?;
        let decoder = self.controller.decoder().clone();
        let decoded = decoder.decode(&ticket.reference).await;
        Some(self.controller.complete(ticket, decoded))
    }
}
