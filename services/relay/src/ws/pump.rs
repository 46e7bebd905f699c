//! The two concurrent tracks of a live connection.
//!
//! The outbound track drains agent turn events and writes frames to the
//! client; the inbound track reads client frames and feeds the agent's input
//! queue. Each track runs until its own source ends or fails and reports
//! that outcome; tearing down the peer is the session manager's job.

use super::{
    SharedSink,
    codec::{self, AUDIO_PCM, InboundMessage, OutboundEvent, ProtocolError},
    error::RelayError,
    session::send_frame,
};
use axum::extract::ws::Message;
use futures_util::{Sink, Stream, StreamExt};
use pairlive_core::live::{Blob, Content, LiveRequestQueue, TurnEvent, TurnEventStream};
use std::fmt::Display;
use tracing::{debug, error, info};

/// Identifies one of the two tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Inbound,
    Outbound,
}

/// Decides which frame, if any, a turn event produces.
///
/// Turn-control events short-circuit content inspection. Only the first
/// content part is looked at. Non-partial text is the backend's aggregate of
/// chunks already sent and is suppressed.
pub fn classify(event: &TurnEvent) -> Option<OutboundEvent> {
    if event.turn_complete || event.interrupted {
        return Some(OutboundEvent::TurnControl {
            turn_complete: event.turn_complete,
            interrupted: event.interrupted,
        });
    }

    let part = event.first_part()?;
    if let Some(blob) = &part.inline_data {
        if blob.mime_type.starts_with(AUDIO_PCM) && !blob.data.is_empty() {
            return Some(OutboundEvent::AudioChunk(blob.data.clone()));
        }
    }
    match &part.text {
        Some(text) if !text.is_empty() && event.partial => Some(OutboundEvent::TextChunk {
            text: text.clone(),
            partial: true,
        }),
        _ => None,
    }
}

/// Agent → client. Ends when the event stream ends or on the first error.
pub async fn run_outbound<S>(events: TurnEventStream, sink: SharedSink<S>) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let result = drain_events(events, &sink).await;
    match &result {
        Ok(()) => info!("Agent event stream ended."),
        Err(e) => error!(error = %e, "Agent-to-client track failed."),
    }
    result
}

async fn drain_events<S>(mut events: TurnEventStream, sink: &SharedSink<S>) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(event) = events.next().await {
        let event = event.map_err(RelayError::Backend)?;
        let Some(outbound) = classify(&event) else {
            continue;
        };
        let frame = codec::encode(&outbound)?;
        send_frame(sink, frame).await?;

        match &outbound {
            OutboundEvent::AudioChunk(data) => {
                debug!(bytes = data.len(), "[AGENT TO CLIENT] audio/pcm")
            }
            OutboundEvent::TextChunk { text, .. } => debug!(%text, "[AGENT TO CLIENT] text/plain"),
            OutboundEvent::TurnControl {
                turn_complete,
                interrupted,
            } => debug!(turn_complete, interrupted, "[AGENT TO CLIENT] turn control"),
        }
    }
    Ok(())
}

/// Client → agent. Ends when the client closes or on the first bad frame.
pub async fn run_inbound<R, E>(stream: R, queue: LiveRequestQueue) -> Result<(), RelayError>
where
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display,
{
    let result = forward_frames(stream, &queue).await;
    match &result {
        Ok(()) => info!("Client stopped sending."),
        Err(e) => error!(error = %e, "Client-to-agent track failed."),
    }
    result
}

async fn forward_frames<R, E>(mut stream: R, queue: &LiveRequestQueue) -> Result<(), RelayError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| RelayError::Transport(e.to_string()))?;
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Client sent close frame.");
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Binary(_) => return Err(ProtocolError::NonTextFrame.into()),
        };

        match codec::decode(text.as_str())? {
            InboundMessage::Text(text) => {
                debug!(%text, "[CLIENT TO AGENT] text/plain");
                queue.send_content(Content::user_text(text));
            }
            InboundMessage::Audio(data) => {
                debug!(bytes = data.len(), "[CLIENT TO AGENT] audio/pcm");
                queue.send_realtime(Blob {
                    mime_type: AUDIO_PCM.to_string(),
                    data,
                });
            }
        }
    }
    Ok(())
}
