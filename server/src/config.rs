use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "PIXEL_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_cooldown_seconds() -> u64 {
    5
}

fn default_recent_changes_limit() -> usize {
    20
}

fn default_canvas_size() -> i32 {
    64
}

fn default_session_queue_capacity() -> usize {
    256
}

fn default_max_frame_size() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_recent_changes_limit")]
    pub recent_changes_limit: usize,
    #[serde(default = "default_canvas_size")]
    pub default_canvas_size: i32,
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Allowed CORS origin. Any origin is allowed when unset.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cooldown_seconds: default_cooldown_seconds(),
            recent_changes_limit: default_recent_changes_limit(),
            default_canvas_size: default_canvas_size(),
            session_queue_capacity: default_session_queue_capacity(),
            max_frame_size: default_max_frame_size(),
            cors_origin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::prefixed(ENV_PREFIX).from_env::<Self>()?.validated()
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.session_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "PIXEL_SESSION_QUEUE_CAPACITY must be at least 1",
            ));
        }
        if self.default_canvas_size <= 0 {
            return Err(ConfigError::Invalid(
                "PIXEL_DEFAULT_CANVAS_SIZE must be positive",
            ));
        }
        if self.cooldown_seconds > i64::MAX as u64 / 1000 {
            return Err(ConfigError::Invalid("PIXEL_COOLDOWN_SECONDS is too large"));
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds as i64)
    }
}
