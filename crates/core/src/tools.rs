//! Pair Programming Tool Service
//!
//! The agent's function tools, exposed as an MCP tool server. A fresh
//! [`PairToolService`] is built for every connection so that tools producing
//! client-visible side effects can publish them through that connection's
//! [`ToolEventPublisher`]. The backend talks to the service through a
//! [`ToolSet`], an MCP client restricted to the agent's capabilities.

use crate::{
    profile::{AgentSpec, Capability},
    session::SessionState,
};
use async_trait::async_trait;
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{CallToolRequestParam, RawContent, ServerCapabilities, ServerInfo},
    service::{Peer, RoleClient, RunningService, ServiceError},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Seconds a clipboard prompt stays valid on the client.
pub const CLIPBOARD_PROMPT_TIMEOUT_SECS: f64 = 300.0;

// --- Side-channel events ---

/// A client-visible side effect produced by a tool while it runs.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// Text the user should paste, e.g. a prompt for their editor.
    Clipboard {
        title: String,
        text: String,
        instructions: String,
        /// Unix timestamp in seconds.
        expires_at: f64,
    },
    /// Move the on-screen cursor overlay to relative coordinates.
    CursorMove {
        x: f64,
        y: f64,
        label: Option<String>,
    },
}

impl ToolEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Clipboard { .. } => "clipboard",
            Self::CursorMove { .. } => "cursor_move",
        }
    }
}

/// Where tools send their side-channel events.
///
/// Implementations must not fail the tool: delivery is best effort.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolEventPublisher: Send + Sync {
    async fn publish(&self, event: ToolEvent);
}

// --- Configuration ---

/// Filesystem locations the file tools may read from.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub project_root: PathBuf,
    pub context_file: PathBuf,
    /// Absolute paths outside the project root that may still be opened.
    pub allowed_external_files: Vec<PathBuf>,
}

// --- Tool arguments ---

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ClipboardArgs {
    /// The text to copy to the clipboard.
    pub text: String,
    /// Optional title shown with the clipboard prompt.
    pub title: Option<String>,
    /// Optional instructions for the user.
    pub instructions: Option<String>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct CursorMoveArgs {
    #[schemars(description = "X coordinate from 0.0 (left) to 1.0 (right)")]
    pub x: f64,
    #[schemars(description = "Y coordinate from 0.0 (top) to 1.0 (bottom)")]
    pub y: f64,
    /// Optional label displayed next to the cursor.
    pub label: Option<String>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct OpenFileArgs {
    #[schemars(
        description = "Path relative to the project root, an absolute path, or the file name of an allowed external file"
    )]
    pub path: String,
}

// --- Service ---

/// MCP tool server holding the tools of one connection.
pub struct PairToolService {
    state: SessionState,
    publisher: Option<Arc<dyn ToolEventPublisher>>,
    config: Arc<ToolConfig>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for PairToolService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl PairToolService {
    pub fn new(
        state: SessionState,
        publisher: Option<Arc<dyn ToolEventPublisher>>,
        config: Arc<ToolConfig>,
    ) -> Self {
        Self {
            state,
            publisher,
            config,
            tool_router: Self::tool_router(),
        }
    }

    /// Queues a prompt for the user's clipboard.
    ///
    /// Publishes a `clipboard` event to the connected client and records it
    /// in the session's `clipboard_history`. The prompt expires five minutes
    /// after it was queued.
    #[tool(
        description = "Whenever you want to help the user create a prompt for their editor, put it in their clipboard history so they can paste it in."
    )]
    pub async fn push_clipboard_prompt(
        &self,
        args: Parameters<ClipboardArgs>,
    ) -> Result<String, String> {
        let args = args.0;
        info!(title = ?args.title, "Executing tool 'push_clipboard_prompt'");
        let expires_at =
            chrono::Utc::now().timestamp_millis() as f64 / 1000.0 + CLIPBOARD_PROMPT_TIMEOUT_SECS;
        let event = ToolEvent::Clipboard {
            title: args.title.unwrap_or_else(|| "Copy to clipboard".to_string()),
            text: args.text,
            instructions: args
                .instructions
                .unwrap_or_else(|| "Please copy this text to your clipboard".to_string()),
            expires_at,
        };

        self.state
            .push("clipboard_history", to_json(&event)?)
            .await;
        self.publish(event).await;

        Ok(json!({ "status": "queued", "expires_at": expires_at }).to_string())
    }

    /// Points the on-screen cursor overlay at a spot on the user's screen.
    ///
    /// Coordinates are relative to the screen, in the 0-1 range. Every move
    /// is recorded under `cursor_moves`.
    #[tool(
        description = "Move the visual cursor overlay to the provided relative coordinates (0-1 range) to point at something on the user's screen."
    )]
    pub async fn move_visual_cursor(
        &self,
        args: Parameters<CursorMoveArgs>,
    ) -> Result<String, String> {
        let args = args.0;
        info!(x = args.x, y = args.y, "Executing tool 'move_visual_cursor'");
        let event = ToolEvent::CursorMove {
            x: args.x,
            y: args.y,
            label: args.label,
        };
        let payload = to_json(&event)?;

        self.state.push("cursor_moves", payload.clone()).await;
        self.publish(event).await;

        Ok(json!({ "ack": true, "cursor": payload }).to_string())
    }

    /// Reads a text file from the project.
    ///
    /// Allow-listed external files are matched first, by absolute path or by
    /// file name. Anything else resolves against the project root and may not
    /// leave it. Failures come back as `{"error": ...}` results.
    #[tool(
        description = "Open a repository file by relative path or absolute path and return its text contents."
    )]
    pub async fn open_project_file(&self, args: Parameters<OpenFileArgs>) -> Result<String, String> {
        let path = args.0.path;
        info!(%path, "Executing tool 'open_project_file'");
        let result = match self.resolve_project_file(&path).await {
            Ok((resolved, shown)) => match tokio::fs::read_to_string(&resolved).await {
                Ok(content) => {
                    self.state
                        .push_unique("opened_files", Value::from(shown.clone()))
                        .await;
                    json!({ "path": shown, "content": content })
                }
                Err(e) => json!({ "error": format!("Error reading file {path}: {e}") }),
            },
            Err(message) => json!({ "error": message }),
        };
        Ok(result.to_string())
    }

    /// Reads the project context file.
    #[tool(
        description = "Read the project context file to understand the current project's requirements, conventions and goals."
    )]
    pub async fn read_context_file(&self) -> Result<String, String> {
        info!("Executing tool 'read_context_file'");
        let context_file = &self.config.context_file;
        let shown = context_file.display().to_string();

        let metadata = match tokio::fs::metadata(context_file).await {
            Ok(metadata) => metadata,
            Err(_) => {
                return Ok(json!({
                    "error": format!("Context file not found at {shown}"),
                    "suggestion": "Make sure the project root exists and contains the context file",
                })
                .to_string());
            }
        };
        if !metadata.is_file() {
            return Ok(json!({ "error": format!("{shown} exists but is not a file") }).to_string());
        }

        let result = match tokio::fs::read_to_string(context_file).await {
            Ok(content) => {
                self.state.increment("context_reads").await;
                self.state
                    .set("last_context_read", Value::from(shown.clone()))
                    .await;
                json!({
                    "path": shown,
                    "content": content,
                    "message": "Successfully read project context",
                })
            }
            Err(e) => json!({ "error": format!("Error reading context file: {e}") }),
        };
        Ok(result.to_string())
    }
}

impl PairToolService {
    async fn publish(&self, event: ToolEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event).await;
        }
    }

    /// Resolves a requested path to a readable file.
    ///
    /// Returns the resolved path and the path to report back, or an error message.
    async fn resolve_project_file(&self, path: &str) -> Result<(PathBuf, String), String> {
        let external = self.allowed_external_files().await;
        let requested = Path::new(path);

        if requested.is_absolute() {
            if let Ok(resolved) = tokio::fs::canonicalize(requested).await {
                if external.contains(&resolved) && is_file(&resolved).await {
                    let shown = resolved.display().to_string();
                    return Ok((resolved, shown));
                }
            }
        }

        let requested_name = requested.file_name();
        for file in &external {
            let name = file.file_name();
            if (name.is_some() && name == requested_name) && is_file(file).await {
                return Ok((file.clone(), file.display().to_string()));
            }
        }

        let root = tokio::fs::canonicalize(&self.config.project_root)
            .await
            .map_err(|e| format!("Project root is unavailable: {e}"))?;
        let resolved = match tokio::fs::canonicalize(root.join(path)).await {
            Ok(resolved) => resolved,
            Err(_) => return Err(format!("File {path} not found")),
        };
        if !is_file(&resolved).await {
            return Err(format!("{path} is not a file"));
        }
        if !resolved.starts_with(&root) {
            return Err("Access outside repository root is not allowed".to_string());
        }
        Ok((resolved, path.to_string()))
    }

    async fn allowed_external_files(&self) -> HashSet<PathBuf> {
        let mut files = HashSet::new();
        for path in &self.config.allowed_external_files {
            // Paths that cannot be resolved are skipped.
            if let Ok(resolved) = tokio::fs::canonicalize(path).await {
                files.insert(resolved);
            }
        }
        files
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn to_json(event: &ToolEvent) -> Result<Value, String> {
    serde_json::to_value(event).map_err(|e| format!("Failed to serialize tool event: {e}"))
}

// --- Client side ---

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' is not available to this agent")]
    NotPermitted(String),
    #[error("tool arguments must be a JSON object")]
    InvalidArguments,
    #[error("tool call failed: {0}")]
    Call(#[from] ServiceError),
    #[error("tool '{0}' returned no content")]
    EmptyResult(String),
}

/// A function tool as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

/// The tools one agent run may call.
#[derive(Clone)]
pub struct ToolSet {
    peer: Option<Peer<RoleClient>>,
    capabilities: Vec<Capability>,
}

/// Owns the background tasks behind a [`ToolSet`].
pub struct ToolSetHandle {
    client: Option<RunningService<RoleClient, ()>>,
    server: Option<JoinHandle<()>>,
}

impl ToolSet {
    /// A tool set without function tools.
    pub fn empty(capabilities: Vec<Capability>) -> (Self, ToolSetHandle) {
        (
            Self {
                peer: None,
                capabilities,
            },
            ToolSetHandle {
                client: None,
                server: None,
            },
        )
    }

    /// Serves `service` in-process and connects a client restricted to `agent`'s capabilities.
    pub async fn start(
        service: PairToolService,
        agent: &AgentSpec,
    ) -> anyhow::Result<(Self, ToolSetHandle)> {
        let has_function_tools = agent
            .capabilities
            .iter()
            .any(|c| !matches!(c, Capability::WebSearch));
        if !has_function_tools {
            return Ok(Self::empty(agent.capabilities.clone()));
        }

        let (server_transport, client_transport) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            match service.serve(server_transport).await {
                Ok(running) => {
                    let _ = running.waiting().await;
                }
                Err(e) => warn!(error = ?e, "Tool service failed to start"),
            }
        });
        let client = match ().serve(client_transport).await {
            Ok(client) => client,
            Err(e) => {
                server.abort();
                return Err(e.into());
            }
        };

        Ok((
            Self {
                peer: Some(client.peer().clone()),
                capabilities: agent.capabilities.clone(),
            },
            ToolSetHandle {
                client: Some(client),
                server: Some(server),
            },
        ))
    }

    /// Whether the backend's built-in web search should be enabled.
    pub fn web_search(&self) -> bool {
        self.capabilities.contains(&Capability::WebSearch)
    }

    fn permits(&self, name: &str) -> bool {
        Capability::for_tool(name).is_some_and(|c| self.capabilities.contains(&c))
    }

    /// The function tools this agent may call.
    pub async fn declarations(&self) -> Result<Vec<FunctionDeclaration>, ToolError> {
        let Some(peer) = &self.peer else {
            return Ok(Vec::new());
        };
        Ok(peer
            .list_all_tools()
            .await?
            .into_iter()
            .filter(|t| self.permits(&t.name))
            .map(|t| FunctionDeclaration {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                parameters: Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    /// Calls a function tool and returns its JSON result.
    ///
    /// Tool-level failures come back as `{"error": ...}` values so that the
    /// model can see them.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let peer = match &self.peer {
            Some(peer) if self.permits(name) => peer,
            _ => return Err(ToolError::NotPermitted(name.to_string())),
        };
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            _ => return Err(ToolError::InvalidArguments),
        };

        let result = peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await?;

        let content = result
            .content
            .and_then(|mut c| c.pop())
            .ok_or_else(|| ToolError::EmptyResult(name.to_string()))?;
        let text = match content.raw {
            RawContent::Text(text_content) => text_content.text,
            _ => return Ok(json!({ "error": "Unexpected content type from tool" })),
        };

        if result.is_error == Some(true) {
            return Ok(json!({ "error": text }));
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "result": text })))
    }
}

impl ToolSetHandle {
    /// Stops the tool client and server tasks.
    pub async fn shutdown(mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.cancel().await;
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

impl Drop for ToolSetHandle {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::AgentProfile;
    use std::fs;

    fn config_for(root: &Path) -> Arc<ToolConfig> {
        Arc::new(ToolConfig {
            project_root: root.to_path_buf(),
            context_file: root.join("Context.MD"),
            allowed_external_files: vec![],
        })
    }

    fn service(root: &Path, publisher: Option<Arc<dyn ToolEventPublisher>>) -> PairToolService {
        PairToolService::new(SessionState::default(), publisher, config_for(root))
    }

    #[tokio::test]
    async fn clipboard_publishes_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = MockToolEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event| {
                matches!(event, ToolEvent::Clipboard { title, text, .. }
                    if title == "Copy to clipboard" && text == "cargo fmt")
            })
            .times(1)
            .returning(|_| ());
        let state = SessionState::default();
        let tools = PairToolService::new(state.clone(), Some(Arc::new(publisher)), config_for(dir.path()));

        let result = tools
            .push_clipboard_prompt(Parameters(ClipboardArgs {
                text: "cargo fmt".into(),
                title: None,
                instructions: None,
            }))
            .await
            .unwrap();

        let result: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(result["status"], "queued");
        assert!(result["expires_at"].as_f64().unwrap() > 0.0);
        let history = state.get("clipboard_history").await.unwrap();
        assert_eq!(history[0]["type"], "clipboard");
        assert_eq!(
            history[0]["instructions"],
            "Please copy this text to your clipboard"
        );
    }

    #[tokio::test]
    async fn cursor_move_acknowledges_with_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = MockToolEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event| event.kind() == "cursor_move")
            .times(1)
            .returning(|_| ());
        let tools = service(dir.path(), Some(Arc::new(publisher)));

        let result = tools
            .move_visual_cursor(Parameters(CursorMoveArgs {
                x: 0.25,
                y: 0.75,
                label: Some("here".into()),
            }))
            .await
            .unwrap();

        let result: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(
            result,
            json!({ "ack": true, "cursor": { "type": "cursor_move", "x": 0.25, "y": 0.75, "label": "here" } })
        );
    }

    #[tokio::test]
    async fn open_project_file_reads_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        let tools = service(dir.path(), None);

        let result = tools
            .open_project_file(Parameters(OpenFileArgs {
                path: "src/main.rs".into(),
            }))
            .await
            .unwrap();

        let result: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(result, json!({ "path": "src/main.rs", "content": "fn main() {}" }));
        assert_eq!(
            tools.state.get("opened_files").await,
            Some(json!(["src/main.rs"]))
        );
    }

    #[tokio::test]
    async fn open_project_file_rejects_escapes_and_missing_files() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("project");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "nope").unwrap();
        let tools = service(&root, None);

        let escaped = tools
            .open_project_file(Parameters(OpenFileArgs {
                path: "../secret.txt".into(),
            }))
            .await
            .unwrap();
        assert!(escaped.contains("outside repository root"));

        let missing = tools
            .open_project_file(Parameters(OpenFileArgs {
                path: "missing.rs".into(),
            }))
            .await
            .unwrap();
        assert!(missing.contains("not found"));
    }

    #[tokio::test]
    async fn open_project_file_allows_listed_external_files_by_name() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("project");
        fs::create_dir(&root).unwrap();
        let notes = outer.path().join("notes.md");
        fs::write(&notes, "# notes").unwrap();
        let config = Arc::new(ToolConfig {
            project_root: root.clone(),
            context_file: root.join("Context.MD"),
            allowed_external_files: vec![notes.clone()],
        });
        let tools = PairToolService::new(SessionState::default(), None, config);

        let result = tools
            .open_project_file(Parameters(OpenFileArgs {
                path: "notes.md".into(),
            }))
            .await
            .unwrap();

        let result: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(result["content"], "# notes");
    }

    #[tokio::test]
    async fn read_context_file_counts_reads() {
        let dir = tempfile::tempdir().unwrap();
        let tools = service(dir.path(), None);

        let missing = tools.read_context_file().await.unwrap();
        assert!(missing.contains("Context file not found"));

        fs::write(dir.path().join("Context.MD"), "Build a relay.").unwrap();
        tools.read_context_file().await.unwrap();
        let result: Value = serde_json::from_str(&tools.read_context_file().await.unwrap()).unwrap();

        assert_eq!(result["content"], "Build a relay.");
        assert_eq!(tools.state.get("context_reads").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn tool_set_round_trip_through_mcp() {
        let dir = tempfile::tempdir().unwrap();
        let tools = service(dir.path(), None);
        let agent = AgentProfile::PairProgrammer.spec();
        let (tool_set, handle) = ToolSet::start(tools, &agent).await.unwrap();

        let names: Vec<String> = tool_set
            .declarations()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(names.contains(&"move_visual_cursor".to_string()));
        assert!(names.contains(&"open_project_file".to_string()));

        let result = tool_set
            .call("move_visual_cursor", json!({ "x": 0.5, "y": 0.5 }))
            .await
            .unwrap();
        assert_eq!(result["ack"], true);
        assert!(tool_set.web_search());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn search_only_agent_cannot_call_function_tools() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AgentProfile::SearchAssistant.spec();
        let (tool_set, _handle) = ToolSet::start(service(dir.path(), None), &agent)
            .await
            .unwrap();

        assert!(tool_set.declarations().await.unwrap().is_empty());
        assert!(matches!(
            tool_set.call("push_clipboard_prompt", json!({ "text": "x" })).await,
            Err(ToolError::NotPermitted(_))
        ));
    }
}
