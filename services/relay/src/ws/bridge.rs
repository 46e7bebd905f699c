//! Lets tools push their side-channel events to the connected client.

use super::{SharedSink, codec::encode_tool_event, session::send_frame};
use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::Sink;
use pairlive_core::tools::{ToolEvent, ToolEventPublisher};
use std::fmt::Display;
use tracing::{debug, warn};

/// Publishes tool events on one connection, next to the outbound track.
///
/// Delivery is best effort: a closed connection never fails the tool.
pub struct ToolBridge<S> {
    sink: SharedSink<S>,
}

impl<S> ToolBridge<S> {
    pub fn new(sink: SharedSink<S>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> ToolEventPublisher for ToolBridge<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    async fn publish(&self, event: ToolEvent) {
        let frame = match encode_tool_event(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "Failed to encode tool event.");
                return;
            }
        };
        match send_frame(&self.sink, frame).await {
            Ok(()) => debug!(kind = event.kind(), "[TOOL TO CLIENT]"),
            Err(e) => warn!(kind = event.kind(), error = %e, "Dropped tool event; client is gone."),
        }
    }
}
