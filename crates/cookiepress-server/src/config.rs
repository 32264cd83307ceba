use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GENERATED_DIR: &str = "server/generated";
pub const DEFAULT_OUTPUT_DIR: &str = "runner/output";
pub const DEFAULT_TOOL_SCRIPT: &str = "server/simplecookie/simplecookie.py";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY must be set to a non-empty API key")]
    MissingApiKey,
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration for the server binary. Everything except the API
/// key has a default; empty variables count as unset.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub api_key: String,
    pub base_url: String,
    pub generated_dir: PathBuf,
    pub output_dir: PathBuf,
    pub tool_script: PathBuf,
    pub max_jobs: Option<usize>,
}

impl ServerConfig {
    /// Reads configuration from the process environment. Call after any
    /// `.env` file has been loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr_text = env_or("COOKIEPRESS_ADDR", DEFAULT_ADDR);
        let addr = addr_text
            .parse()
            .map_err(|err: std::net::AddrParseError| ConfigError::Invalid {
                name: "COOKIEPRESS_ADDR",
                value: addr_text.clone(),
                reason: err.to_string(),
            })?;

        let api_key = non_empty_env("OPENAI_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let max_jobs = match non_empty_env("COOKIEPRESS_MAX_JOBS") {
            Some(text) => {
                let parsed =
                    text.parse()
                        .map_err(|err: std::num::ParseIntError| ConfigError::Invalid {
                            name: "COOKIEPRESS_MAX_JOBS",
                            value: text.clone(),
                            reason: err.to_string(),
                        })?;
                Some(parsed)
            }
            None => None,
        };

        Ok(Self {
            addr,
            api_key,
            base_url: env_or("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            generated_dir: env_or("COOKIEPRESS_GENERATED_DIR", DEFAULT_GENERATED_DIR).into(),
            output_dir: env_or("COOKIEPRESS_OUTPUT_DIR", DEFAULT_OUTPUT_DIR).into(),
            tool_script: env_or("COOKIEPRESS_TOOL_SCRIPT", DEFAULT_TOOL_SCRIPT).into(),
            max_jobs,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    non_empty_env(name).unwrap_or_else(|| default.to_string())
}
