//! Typed server configuration assembled from the environment.

use chrono::Duration;
use memory::StoreConfig;
use proto::{ConfigError, ThinkingMode};
use tools::ToolDefaults;

use crate::env::EnvFile;

/// Everything the binary needs beyond provider credentials
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub log_level: String,
    pub default_model: String,
    pub thinkdeep_thinking_mode: ThinkingMode,
    pub disabled_tools: Vec<String>,
    pub store: StoreConfig,
}

impl ServerConfig {
    pub fn from_env(env: &EnvFile) -> Result<Self, ConfigError> {
        let thinkdeep_thinking_mode = match env.get("DEFAULT_THINKING_MODE_THINKDEEP") {
            None => ThinkingMode::High,
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "DEFAULT_THINKING_MODE_THINKDEEP".to_string(),
                reason: format!("'{raw}' is not one of minimal|low|medium|high|max"),
            })?,
        };

        let timeout_hours = env.get_usize("CONVERSATION_TIMEOUT_HOURS", 5)?;
        let max_turns = env.get_usize("MAX_CONVERSATION_TURNS", 20)?;
        if max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_CONVERSATION_TURNS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let disabled_tools = env
            .get("DISABLED_TOOLS")
            .unwrap_or_default()
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self {
            log_level: env.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            default_model: env
                .get("DEFAULT_MODEL")
                .unwrap_or_else(|| "auto".to_string()),
            thinkdeep_thinking_mode,
            disabled_tools,
            store: StoreConfig {
                max_turns,
                ttl: Duration::hours(timeout_hours as i64),
                max_threads: env.get_usize("MAX_CONVERSATION_THREADS", 1_000)?,
            },
        })
    }

    pub fn tool_defaults(&self) -> ToolDefaults {
        ToolDefaults {
            default_model: self.default_model.clone(),
            thinkdeep_thinking_mode: self.thinkdeep_thinking_mode,
        }
    }
}
