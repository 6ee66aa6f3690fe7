//! Session configuration from the environment

use crate::state_machine::SessionContext;
use crate::transcript::DEFAULT_GREETING;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_URL: &str = "ws://localhost:9000/chat";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Chat endpoint, one connection per request
    pub url: String,
    pub flush_on_end: bool,
    pub response_timeout: Option<Duration>,
    pub greeting: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            flush_on_end: false,
            response_timeout: None,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("STREAMCHAT_URL") {
            config.url = url;
        }
        if let Some(value) = lookup("STREAMCHAT_FLUSH_ON_END") {
            config.flush_on_end = parse_bool("STREAMCHAT_FLUSH_ON_END", &value)?;
        }
        if let Some(value) = lookup("STREAMCHAT_RESPONSE_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "STREAMCHAT_RESPONSE_TIMEOUT_SECS",
                value: value.clone(),
            })?;
            // Zero means no timeout
            config.response_timeout = (secs > 0).then_some(Duration::from_secs(secs));
        }
        if let Some(greeting) = lookup("STREAMCHAT_GREETING") {
            config.greeting = greeting;
        }

        Ok(config)
    }

    pub fn context(&self, session_id: impl Into<String>) -> SessionContext {
        SessionContext::new(session_id)
            .with_flush_on_end(self.flush_on_end)
            .with_response_timeout(self.response_timeout)
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}
