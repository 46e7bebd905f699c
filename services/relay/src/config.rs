use pairlive_core::profile::AgentProfile;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub live_model: String,
    pub app_name: String,
    pub agent_profile: AgentProfile,
    pub log_level: Level,
    pub static_dir: PathBuf,
    pub project_root: PathBuf,
    pub context_file: PathBuf,
    pub allowed_external_files: Vec<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model = std::env::var("LIVE_MODEL")
            .unwrap_or_else(|_| gemini_live::DEFAULT_MODEL.to_string());
        let app_name = std::env::var("APP_NAME").unwrap_or_else(|_| "adk-streaming-ws".to_string());

        let agent_profile = match std::env::var("AGENT_PROFILE") {
            Ok(value) => value
                .parse::<AgentProfile>()
                .map_err(|e| ConfigError::InvalidValue("AGENT_PROFILE".to_string(), e))?,
            Err(_) => AgentProfile::default(),
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let static_dir = std::env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./static"));
        let project_root = std::env::var("PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let context_file = std::env::var("CONTEXT_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join("Context.MD"));

        let allowed_external_files = std::env::var("ALLOWED_EXTERNAL_FILES")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if let Some(relative) = allowed_external_files.iter().find(|p| !p.is_absolute()) {
            return Err(ConfigError::InvalidValue(
                "ALLOWED_EXTERNAL_FILES".to_string(),
                format!("'{}' is not an absolute path", relative.display()),
            ));
        }

        Ok(Self {
            bind_address,
            gemini_api_key,
            live_model,
            app_name,
            agent_profile,
            log_level,
            static_dir,
            project_root,
            context_file,
            allowed_external_files,
        })
    }
}
