use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 4170;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_STEPS: usize = 10;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Top-level config (loom.toml + LOOM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            executor: ExecutorConfig::default(),
            llm: LlmConfig::default(),
            uploads: UploadsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_secs(),
            max_steps: default_max_steps(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub dir: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_idle_secs() -> u64 {
    DEFAULT_SESSION_IDLE_SECS
}
fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}
fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}
fn default_exec_timeout_secs() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_store_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.loom/chats.db")
}
fn default_uploads_dir() -> String {
    std::env::temp_dir()
        .join("loom-uploads")
        .to_string_lossy()
        .into_owned()
}

impl ServerConfig {
    /// Load config from a TOML file with LOOM_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. LOOM_CONFIG env var
    ///   3. ./loom.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("LOOM_CONFIG").ok())
            .unwrap_or_else(|| "loom.toml".to_string());

        let config: ServerConfig = Figment::from(figment::providers::Serialized::defaults(
            ServerConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("LOOM_").split("__"))
        .extract()
        .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file_or_env() {
        let config = ServerConfig::load(Some("/nonexistent/loom.toml")).unwrap();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.session.max_steps, DEFAULT_MAX_STEPS);
    }
}
