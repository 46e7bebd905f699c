//! Axum Router Configuration
//!
//! Serves the browser client's static files and the live-session WebSocket.

use crate::{state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let static_dir = app_state.config.static_dir.clone();

    let ws_router = Router::new()
        .route("/ws/{client_id}", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .merge(ws_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, ws::SessionManager};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use pairlive_core::{
        live::{AgentBackend, LiveRequestReceiver, RunConfig, TurnEventStream},
        profile::{AgentProfile, AgentSpec},
        session::{Session, SessionRegistry},
        tools::{ToolConfig, ToolSet},
    };
    use std::{fs, path::PathBuf};
    use tower::ServiceExt;
    use tracing::Level;

    struct UnusedBackend;

    #[async_trait]
    impl AgentBackend for UnusedBackend {
        async fn run_live(
            &self,
            _session: &Session,
            _agent: &AgentSpec,
            _tools: ToolSet,
            _requests: LiveRequestReceiver,
            _run_config: RunConfig,
        ) -> anyhow::Result<TurnEventStream> {
            Err(anyhow!("not used by routing tests"))
        }
    }

    fn app(static_dir: PathBuf) -> Router {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            gemini_api_key: "test-key".into(),
            live_model: gemini_live::DEFAULT_MODEL.into(),
            app_name: "relay-test".into(),
            agent_profile: AgentProfile::PairProgrammer,
            log_level: Level::INFO,
            static_dir: static_dir.clone(),
            project_root: static_dir.clone(),
            context_file: static_dir.join("Context.MD"),
            allowed_external_files: vec![],
        };
        let sessions = SessionManager::new(
            config.app_name.clone(),
            Arc::new(UnusedBackend),
            Arc::new(SessionRegistry::new()),
            config.agent_profile,
            Arc::new(ToolConfig {
                project_root: config.project_root.clone(),
                context_file: config.context_file.clone(),
                allowed_external_files: vec![],
            }),
        );
        create_router(Arc::new(AppState {
            sessions: Arc::new(sessions),
            config: Arc::new(config),
        }))
    }

    #[tokio::test]
    async fn serves_the_client_page_and_assets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html>relay</html>").unwrap();
        fs::create_dir(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/app.js"), "console.log(1)").unwrap();
        let app = app(dir.path().to_path_buf());

        let index = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(index.status(), 200);

        let asset = app
            .oneshot(Request::get("/static/js/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(asset.status(), 200);
    }

    #[tokio::test]
    async fn websocket_route_requires_an_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path().to_path_buf());

        let response = app
            .oneshot(Request::get("/ws/42?is_audio=true").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
