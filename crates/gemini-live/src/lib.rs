//! Gemini Live backend for the relay.
//!
//! Implements [`AgentBackend`] over the Gemini Live `BidiGenerateContent`
//! WebSocket API. Each run opens its own upstream connection, performs the
//! setup handshake, and then hands off to a background task that proxies
//! queue requests upstream and turns server messages into [`TurnEvent`]s.

pub mod turn;
pub mod types;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, Stream, StreamExt};
use pairlive_core::{
    live::{
        self, AgentBackend, LiveRequest, LiveRequestReceiver, RunConfig, TurnEvent,
        TurnEventStream,
    },
    profile::AgentSpec,
    session::Session,
    tools::ToolSet,
};
use serde_json::{Map, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{Instrument, debug, error, info, warn};
use turn::TurnAssembler;
use types::{ClientMessage, ServerMessage};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
/// Sample rate of the PCM16 audio the client records.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Connection settings for the Gemini Live API.
#[derive(Clone, Debug)]
pub struct GeminiLiveConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl GeminiLiveConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

pub struct GeminiLiveBackend {
    config: GeminiLiveConfig,
}

impl GeminiLiveBackend {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentBackend for GeminiLiveBackend {
    async fn run_live(
        &self,
        session: &Session,
        agent: &AgentSpec,
        tools: ToolSet,
        requests: LiveRequestReceiver,
        run_config: RunConfig,
    ) -> Result<TurnEventStream> {
        let url = format!("{}?key={}", self.config.endpoint, self.config.api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(session_id = %session.id, model = %self.config.model, "Connected to Gemini Live.");
        let (mut upstream_tx, mut upstream_rx) = ws_stream.split();

        let declarations = tools.declarations().await?;
        let setup = build_setup(
            &self.config.model,
            agent,
            declarations,
            tools.web_search(),
            &run_config,
        );
        upstream_tx
            .send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
            .await?;
        wait_for_setup(&mut upstream_rx).await?;
        info!(session_id = %session.id, "Gemini Live setup is complete.");

        let (events_tx, events_rx) = mpsc::channel(64);
        let span = tracing::info_span!("gemini_live", session_id = %session.id);
        tokio::spawn(drive(upstream_tx, upstream_rx, requests, events_tx, tools).instrument(span));

        Ok(Box::pin(ReceiverStream::new(events_rx)))
    }
}

/// Runs [`pump`] to completion. A failure becomes the stream's last item.
async fn drive<T, R, E>(
    upstream_tx: T,
    upstream_rx: R,
    requests: LiveRequestReceiver,
    events_tx: mpsc::Sender<Result<TurnEvent>>,
    tools: ToolSet,
) where
    T: futures_util::Sink<WsMessage> + Unpin,
    T::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    if let Err(e) = pump(upstream_tx, upstream_rx, requests, &events_tx, &tools).await {
        error!(error = ?e, "Gemini Live connection failed.");
        let _ = events_tx.send(Err(e)).await;
    }
    debug!("Gemini Live task finished.");
}

fn build_setup(
    model: &str,
    agent: &AgentSpec,
    declarations: Vec<pairlive_core::tools::FunctionDeclaration>,
    web_search: bool,
    run_config: &RunConfig,
) -> ClientMessage {
    let mut tools = Vec::new();
    if !declarations.is_empty() {
        tools.push(types::Tool {
            function_declarations: Some(
                declarations
                    .into_iter()
                    .map(|d| types::FunctionDeclaration {
                        name: d.name,
                        description: d.description,
                        parameters_json_schema: d.parameters,
                    })
                    .collect(),
            ),
            ..Default::default()
        });
    }
    if web_search {
        tools.push(types::Tool {
            google_search: Some(Map::new()),
            ..Default::default()
        });
    }

    ClientMessage::Setup(types::Setup {
        model: model.to_string(),
        generation_config: types::GenerationConfig {
            response_modalities: vec![run_config.response_modality],
        },
        system_instruction: Some(types::Content {
            role: None,
            parts: vec![types::Part {
                text: Some(agent.instruction.clone()),
                inline_data: None,
            }],
        }),
        tools,
    })
}

/// Reads upstream messages until `setupComplete` arrives.
async fn wait_for_setup<S, E>(upstream_rx: &mut S) -> Result<()>
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    while let Some(msg) = upstream_rx.next().await {
        match msg? {
            WsMessage::Close(frame) => bail!("Gemini Live closed during setup: {:?}", frame),
            other => match parse_server_message(&other) {
                Some(Ok(server_msg)) if server_msg.setup_complete.is_some() => return Ok(()),
                Some(Ok(server_msg)) => {
                    warn!(?server_msg, "Unexpected message during Gemini Live setup.")
                }
                Some(Err(e)) => warn!(error = %e, "Unparseable message during Gemini Live setup."),
                None => {}
            },
        }
    }
    Err(anyhow!("Gemini Live disconnected before setup completed"))
}

fn parse_server_message(msg: &WsMessage) -> Option<serde_json::Result<ServerMessage>> {
    match msg {
        WsMessage::Text(text) => Some(serde_json::from_str(text.as_str())),
        WsMessage::Binary(data) => Some(serde_json::from_slice(data)),
        _ => None,
    }
}

/// Converts a queued request into its upstream message, or `None` for `Close`.
fn request_to_message(request: LiveRequest) -> Option<ClientMessage> {
    let encode = |data: &[u8]| base64::engine::general_purpose::STANDARD.encode(data);
    match request {
        LiveRequest::Content(content) => {
            Some(ClientMessage::ClientContent(types::ClientContent {
                turns: vec![to_wire_content(content, encode)],
                turn_complete: true,
            }))
        }
        LiveRequest::Realtime(blob) => {
            let mime_type = if blob.mime_type == "audio/pcm" {
                format!("audio/pcm;rate={INPUT_SAMPLE_RATE}")
            } else {
                blob.mime_type
            };
            Some(ClientMessage::RealtimeInput(types::RealtimeInput {
                audio: types::Blob {
                    mime_type,
                    data: encode(&blob.data),
                },
            }))
        }
        LiveRequest::Close => None,
    }
}

fn to_wire_content(content: live::Content, encode: impl Fn(&[u8]) -> String) -> types::Content {
    types::Content {
        role: content.role,
        parts: content
            .parts
            .into_iter()
            .map(|p| types::Part {
                text: p.text,
                inline_data: p.inline_data.map(|b| types::Blob {
                    mime_type: b.mime_type,
                    data: encode(&b.data),
                }),
            })
            .collect(),
    }
}

/// Proxies one live run until the queue closes, the consumer goes away, or upstream ends.
async fn pump<T, R, E>(
    mut upstream_tx: T,
    mut upstream_rx: R,
    mut requests: LiveRequestReceiver,
    events_tx: &mpsc::Sender<Result<TurnEvent>>,
    tools: &ToolSet,
) -> Result<()>
where
    T: futures_util::Sink<WsMessage> + Unpin,
    T::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut assembler = TurnAssembler::default();
    loop {
        tokio::select! {
            _ = events_tx.closed() => {
                debug!("Turn event consumer dropped; closing Gemini Live connection.");
                let _ = upstream_tx.send(WsMessage::Close(None)).await;
                return Ok(());
            }
            request = requests.recv() => {
                let Some(message) = request.and_then(request_to_message) else {
                    debug!("Live request queue closed; closing Gemini Live connection.");
                    let _ = upstream_tx.send(WsMessage::Close(None)).await;
                    return Ok(());
                };
                upstream_tx
                    .send(WsMessage::Text(serde_json::to_string(&message)?.into()))
                    .await?;
            }
            msg = upstream_rx.next() => {
                let msg = match msg {
                    Some(msg) => msg?,
                    None => return Ok(()),
                };
                if let WsMessage::Close(frame) = &msg {
                    info!(?frame, "Gemini Live connection closed by server.");
                    return Ok(());
                }
                let server_msg = match parse_server_message(&msg) {
                    Some(Ok(server_msg)) => server_msg,
                    Some(Err(e)) => {
                        warn!(error = %e, "Ignoring unparseable Gemini Live message.");
                        continue;
                    }
                    None => continue,
                };

                if let Some(content) = server_msg.server_content {
                    for event in assembler.on_content(content)? {
                        if events_tx.send(Ok(event)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                if let Some(tool_call) = server_msg.tool_call {
                    let response = run_tool_calls(tools, tool_call).await;
                    upstream_tx
                        .send(WsMessage::Text(serde_json::to_string(&response)?.into()))
                        .await?;
                }
                if let Some(cancellation) = server_msg.tool_call_cancellation {
                    info!(ids = ?cancellation.ids, "Gemini Live cancelled tool calls.");
                }
                if let Some(go_away) = server_msg.go_away {
                    warn!(time_left = ?go_away.time_left, "Gemini Live will close the connection soon.");
                }
            }
        }
    }
}

async fn run_tool_calls(tools: &ToolSet, tool_call: types::ToolCall) -> ClientMessage {
    let mut function_responses = Vec::with_capacity(tool_call.function_calls.len());
    for call in tool_call.function_calls {
        info!(tool = %call.name, "Dispatching tool call.");
        let response = match tools.call(&call.name, call.args).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed.");
                json!({ "error": e.to_string() })
            }
        };
        function_responses.push(types::FunctionResponse {
            id: call.id,
            name: call.name,
            response,
        });
    }
    ClientMessage::ToolResponse(types::ToolResponse { function_responses })
}
