//! JSON-lines event channel.
//!
//! Each line is `{"event": <name>, "data": <payload>, "ack": <optional id>}`.
//! When `ack` is present, `{"ack": <id>}` is written back once the event has
//! been handled.

use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::{Result, StageError};
use crate::gateway::{Ack, InboundEvent};

/// Longest accepted frame in bytes; longer lines are skipped up to their newline
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where decoded events go (must be callable from the network runtime)
pub type EventSink = Arc<dyn Fn(InboundEvent, Option<Ack>) + Send + Sync>;

#[derive(Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    data: Value,
    ack: Option<u64>,
}

/// Parse one line into an event and its ack id (`Ok(None)` for unknown events)
pub fn parse_line(line: &str) -> Result<Option<(InboundEvent, Option<u64>)>> {
    let frame: WireFrame = serde_json::from_str(line)
        .map_err(|e| StageError::Transport(format!("Malformed frame: {}", e)))?;

    match InboundEvent::from_wire(&frame.event, frame.data)? {
        Some(event) => Ok(Some((event, frame.ack))),
        None => {
            log::debug!("Ignoring event {}", frame.event);
            Ok(None)
        }
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| StageError::Transport(format!("Failed to listen on {}: {}", addr, e)))?;
    log::info!("Event channel listening on {}", addr);
    Ok(listener)
}

/// Accept connections forever, feeding their events into `sink`
pub async fn serve(listener: TcpListener, sink: EventSink) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Out of descriptors or an aborted handshake; retry once things settle
                log::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        log::info!("Event channel connected: {}", peer);

        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            handle_connection(stream, sink).await;
            log::info!("Event channel disconnected: {}", peer);
        });
    }
}

async fn handle_connection(stream: TcpStream, sink: EventSink) {
    let (reader, mut writer) = stream.into_split();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<u64>();

    tokio::spawn(async move {
        while let Some(id) = ack_rx.recv().await {
            let line = format!("{}\n", json!({ "ack": id }));
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                log::warn!("Failed to send ack {}: {}", id, e);
                break;
            }
        }
    });

    let mut frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match parse_line(&line) {
                Ok(Some((event, ack_id))) => {
                    let ack = ack_id.map(|id| {
                        let ack_tx = ack_tx.clone();
                        Ack::new(move || {
                            // Receiver gone means the peer hung up; nothing to tell
                            let _ = ack_tx.send(id);
                        })
                    });
                    sink(event, ack);
                }
                Ok(None) => {}
                Err(e) => log::warn!("{}", e),
            },
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                log::warn!("Dropping frame longer than {} bytes", MAX_FRAME_LEN);
            }
            Err(LinesCodecError::Io(e)) => {
                log::warn!("Event channel read error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_parse_line_with_ack() {
        let parsed =
            parse_line(r#"{"event":"clear_agent","data":{"agent_id":2},"ack":7}"#).unwrap();
        assert_eq!(
            parsed,
            Some((InboundEvent::AgentCleared { agent_id: 2 }, Some(7)))
        );
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("not json").is_err());
        assert_eq!(
            parse_line(r#"{"event":"agent_message","data":{"text":"hi"}}"#).unwrap(),
            None
        );
    }

    async fn start_server() -> (SocketAddr, Arc<Mutex<Vec<InboundEvent>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);
        let sink: EventSink = Arc::new(move |event: InboundEvent, ack: Option<Ack>| {
            seen.lock().unwrap().push(event);
            if let Some(ack) = ack {
                ack.send();
            }
        });
        tokio::spawn(serve(listener, sink));
        (addr, received)
    }

    #[tokio::test]
    async fn test_events_flow_and_acks_return() {
        let (addr, received) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"event\":\"start_agent\",\"data\":{\"agent_id\":1},\"ack\":42}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"ack":42}"#);
        assert_eq!(
            received.lock().unwrap().clone(),
            vec![InboundEvent::AgentShown { agent_id: 1 }]
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped() {
        let (addr, received) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut payload = vec![b'x'; MAX_FRAME_LEN + 1024];
        payload.push(b'\n');
        payload.extend_from_slice(b"{\"event\":\"clear_agent\",\"data\":{\"agent_id\":3},\"ack\":5}\n");
        writer.write_all(&payload).await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"ack":5}"#);
        assert_eq!(
            received.lock().unwrap().clone(),
            vec![InboundEvent::AgentCleared { agent_id: 3 }]
        );
    }

    #[tokio::test]
    async fn test_listener_outlives_dropped_peers() {
        let (addr, received) = start_server().await;

        // A peer that connects and vanishes without sending anything
        drop(TcpStream::connect(addr).await.unwrap());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"event\":\"start_agent\",\"data\":{\"agent_id\":2},\"ack\":9}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"ack":9}"#);
        assert_eq!(
            received.lock().unwrap().clone(),
            vec![InboundEvent::AgentShown { agent_id: 2 }]
        );
    }
}
