//! Manages the WebSocket connection lifecycle of one live agent session.

use super::{
    SharedSink,
    bridge::ToolBridge,
    error::RelayError,
    pump::{self, Track},
};
use crate::state::AppState;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use pairlive_core::{
    live::{AgentBackend, LiveRequestQueue, RunConfig},
    profile::{AgentProfile, AgentSpec},
    session::{Session, SessionRegistry},
    tools::{PairToolService, ToolConfig, ToolEventPublisher, ToolSet},
};
use serde::Deserialize;
use std::{fmt::Display, sync::Arc};
use tokio::{
    sync::Mutex,
    task::{JoinError, JoinHandle},
};
use tracing::{Instrument, error, info, instrument, warn};

/// Query parameters accepted on the WebSocket upgrade request.
#[derive(Deserialize, Debug, Default)]
pub struct ConnectParams {
    /// `"true"` selects audio responses; anything else selects text.
    pub is_audio: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let is_audio = params.is_audio.as_deref() == Some("true");
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, is_audio))
}

#[instrument(name = "ws_session", skip_all, fields(client_id = %client_id, is_audio = is_audio))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: String, is_audio: bool) {
    let (socket_tx, socket_rx) = socket.split();
    match state
        .sessions
        .serve_connection(socket_tx, socket_rx, client_id, is_audio)
        .await
    {
        Ok(TrackExit {
            track,
            result: Ok(()),
        }) => info!(?track, "Relay finished."),
        Ok(TrackExit {
            track,
            result: Err(e),
        }) => error!(?track, error = %e, "Relay track failed."),
        Err(e) => error!(error = %e, "Live session could not be established."),
    }
}

/// Which track ended first, and how.
#[derive(Debug)]
pub struct TrackExit {
    pub track: Track,
    pub result: Result<(), RelayError>,
}

/// Runs live sessions, one per accepted connection.
pub struct SessionManager {
    app_name: String,
    backend: Arc<dyn AgentBackend>,
    registry: Arc<SessionRegistry>,
    profile: AgentProfile,
    tool_config: Arc<ToolConfig>,
}

impl SessionManager {
    pub fn new(
        app_name: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
        registry: Arc<SessionRegistry>,
        profile: AgentProfile,
        tool_config: Arc<ToolConfig>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            backend,
            registry,
            profile,
            tool_config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Owns one connection from accept to teardown.
    ///
    /// Returns the first track to finish, or the error that prevented the
    /// tracks from starting. Either way the session is released before
    /// returning.
    pub async fn serve_connection<S, R, E>(
        &self,
        socket_tx: S,
        socket_rx: R,
        client_id: String,
        is_audio: bool,
    ) -> Result<TrackExit, RelayError>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + 'static,
    {
        info!(%client_id, is_audio, "Client connected.");
        let sink: SharedSink<S> = Arc::new(Mutex::new(socket_tx));
        let session = self.registry.create_session(&self.app_name, &client_id).await;
        let agent = self.profile.spec();

        let bridge: Arc<dyn ToolEventPublisher> = Arc::new(ToolBridge::new(sink.clone()));
        let tool_service =
            PairToolService::new(session.state.clone(), Some(bridge), self.tool_config.clone());

        let outcome = match ToolSet::start(tool_service, &agent).await {
            Ok((tools, tools_handle)) => {
                let outcome = self
                    .relay(&session, &agent, tools, sink, socket_rx, is_audio)
                    .await;
                tools_handle.shutdown().await;
                outcome
            }
            Err(e) => Err(RelayError::Backend(e.context("Failed to start the tool service"))),
        };

        self.registry.remove(session.id).await;
        let active_sessions = self.registry.len().await;
        info!(%client_id, active_sessions, "Client disconnected.");
        outcome
    }

    async fn relay<S, R, E>(
        &self,
        session: &Session,
        agent: &AgentSpec,
        tools: ToolSet,
        sink: SharedSink<S>,
        socket_rx: R,
        is_audio: bool,
    ) -> Result<TrackExit, RelayError>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + 'static,
    {
        let (queue, requests) = LiveRequestQueue::new();
        let run_config = RunConfig::for_audio(is_audio);
        let span = tracing::Span::current();

        // The client is read while the backend connects, so leaving during
        // setup ends the connection. Early input is buffered in the queue.
        let mut inbound =
            tokio::spawn(pump::run_inbound(socket_rx, queue.clone()).instrument(span.clone()));

        let started = tokio::select! {
            biased;
            started = self.backend.run_live(session, agent, tools, requests, run_config) => started,
            joined = &mut inbound => {
                info!("Client left before the live session was ready.");
                queue.close();
                return Ok(TrackExit { track: Track::Inbound, result: flatten(joined) });
            }
        };
        let events = match started {
            Ok(events) => events,
            Err(e) => {
                cancel_track(Track::Inbound, inbound).await;
                queue.close();
                return Err(RelayError::Backend(e));
            }
        };

        let outbound = tokio::spawn(pump::run_outbound(events, sink).instrument(span));
        let exit = race_tracks(outbound, inbound).await;
        queue.close();
        Ok(exit)
    }
}

/// Waits for the first track to finish, then cancels the other one.
///
/// The cancelled track is awaited before returning, so no task outlives the
/// connection.
pub async fn race_tracks(
    mut outbound: JoinHandle<Result<(), RelayError>>,
    mut inbound: JoinHandle<Result<(), RelayError>>,
) -> TrackExit {
    let (track, joined) = tokio::select! {
        joined = &mut outbound => (Track::Outbound, joined),
        joined = &mut inbound => (Track::Inbound, joined),
    };
    match track {
        Track::Outbound => cancel_track(Track::Inbound, inbound).await,
        Track::Inbound => cancel_track(Track::Outbound, outbound).await,
    }

    TrackExit {
        track,
        result: flatten(joined),
    }
}

/// Aborts a track and waits until its task is gone.
async fn cancel_track(track: Track, handle: JoinHandle<Result<(), RelayError>>) {
    handle.abort();
    match handle.await {
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(?track, error = %e, "Cancelled track panicked."),
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(?track, error = %e, "Cancelled track had already failed."),
    }
}

fn flatten(joined: Result<Result<(), RelayError>, JoinError>) -> Result<(), RelayError> {
    joined.unwrap_or_else(|e| Err(RelayError::Panicked(e.to_string())))
}

/// Serializes a frame onto the connection's shared write half.
pub(crate) async fn send_frame<S>(sink: &SharedSink<S>, frame: String) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    sink.lock()
        .await
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))
}
