//! Live Agent Contract
//!
//! The boundary between the relay and whatever agent backend drives a live
//! conversation. A backend consumes a [`LiveRequestQueue`] and produces a lazy
//! stream of [`TurnEvent`]s. The relay never looks behind this boundary.

use crate::{profile::AgentSpec, session::Session, tools::ToolSet};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::debug;

/// A raw binary payload tagged with its mime type (e.g. PCM audio).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime_type: String,
    pub data: Bytes,
}

/// One part of a content message. Either text, inline binary data, or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    pub text: Option<String>,
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn from_blob(blob: Blob) -> Self {
        Self {
            text: None,
            inline_data: Some(blob),
        }
    }
}

/// A content message exchanged with the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Content {
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    /// Builds a completed user message holding a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::from_text(text)],
        }
    }

    /// Builds a model message from the given parts.
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
        }
    }
}

/// A single event of a live turn as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnEvent {
    pub turn_complete: bool,
    pub interrupted: bool,
    /// Set on streamed fragments; unset on the aggregated final content.
    pub partial: bool,
    pub content: Option<Content>,
}

impl TurnEvent {
    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Default::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Default::default()
        }
    }

    pub fn partial(content: Content) -> Self {
        Self {
            partial: true,
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn complete(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Default::default()
        }
    }

    /// The first part of the attached content, if any.
    pub fn first_part(&self) -> Option<&Part> {
        self.content.as_ref().and_then(|c| c.parts.first())
    }
}

/// The lazy, non-restartable sequence of turn events for one session.
pub type TurnEventStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// The modality the backend should answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

/// Per-session run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub response_modality: ResponseModality,
}

impl RunConfig {
    /// Selects `AUDIO` responses for audio connections and `TEXT` otherwise.
    pub fn for_audio(is_audio: bool) -> Self {
        let response_modality = if is_audio {
            ResponseModality::Audio
        } else {
            ResponseModality::Text
        };
        Self { response_modality }
    }
}

/// Requests flowing from the relay into the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveRequest {
    /// A completed message (e.g. a typed user turn).
    Content(Content),
    /// A raw realtime chunk such as microphone audio.
    Realtime(Blob),
    /// No further input will follow.
    Close,
}

/// Receiving half of a [`LiveRequestQueue`], owned by the backend.
pub type LiveRequestReceiver = mpsc::UnboundedReceiver<LiveRequest>;

/// Append-only input queue for one live session.
///
/// Sending never blocks. Clones share the same underlying channel and close flag.
#[derive(Debug, Clone)]
pub struct LiveRequestQueue {
    tx: mpsc::UnboundedSender<LiveRequest>,
    closed: Arc<AtomicBool>,
}

impl LiveRequestQueue {
    pub fn new() -> (Self, LiveRequestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn send_content(&self, content: Content) {
        self.push(LiveRequest::Content(content));
    }

    pub fn send_realtime(&self, blob: Blob) {
        self.push(LiveRequest::Realtime(blob));
    }

    /// Signals end of input. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.tx.send(LiveRequest::Close).is_err() {
            debug!("Live request queue closed after its receiver was dropped.");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, request: LiveRequest) {
        if self.is_closed() {
            debug!("Dropping live request sent after close.");
            return;
        }
        // The backend may already be gone; the request is simply lost in that case.
        let _ = self.tx.send(request);
    }
}

/// An agent backend able to run live, bidirectional sessions.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Starts a live run for `session` and returns its event stream.
    ///
    /// The backend owns `requests` for the lifetime of the run. Tool calls made
    /// by the model are dispatched through `tools`.
    async fn run_live(
        &self,
        session: &Session,
        agent: &AgentSpec,
        tools: ToolSet,
        requests: LiveRequestReceiver,
        run_config: RunConfig,
    ) -> Result<TurnEventStream>;
}
