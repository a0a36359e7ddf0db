//! Environment access with `.env` support.
//!
//! Values come from two layers: the process environment and an optional
//! `.env` file next to the server. Normally the process environment wins
//! and the file only fills gaps. When the file itself sets
//! `ZEN_MCP_FORCE_ENV_OVERRIDE=true`, the file becomes authoritative and
//! shadows the process environment for every lookup.

use std::collections::HashMap;
use std::path::Path;

use proto::ConfigError;
use tracing::debug;

/// Parsed `.env` contents plus the override flag
#[derive(Debug, Default, Clone)]
pub struct EnvFile {
    values: HashMap<String, String>,
    force_override: bool,
}

impl EnvFile {
    /// Loads `.env` from the working directory; a missing file is fine.
    pub fn load() -> Self {
        Self::load_from(Path::new(".env"))
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                debug!(path = %path.display(), "loaded .env file");
                Self::parse(&contents)
            }
            Err(_) => Self::default(),
        }
    }

    pub fn parse(contents: &str) -> Self {
        let values = parse_dotenv(contents);
        let force_override = values
            .get("ZEN_MCP_FORCE_ENV_OVERRIDE")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            values,
            force_override,
        }
    }

    pub fn force_override(&self) -> bool {
        self.force_override
    }

    /// Resolves one key against an injected process-env lookup. With the
    /// override flag the file alone answers; otherwise the process wins
    /// and the file fills gaps.
    pub fn resolve(
        &self,
        key: &str,
        process: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        if self.force_override {
            return self.values.get(key).cloned();
        }
        process(key).or_else(|| self.values.get(key).cloned())
    }

    /// Resolves against the real process environment.
    pub fn get(&self, key: &str) -> Option<String> {
        self.resolve(key, |k| std::env::var(k).ok())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                reason: format!("'{raw}' is not a non-negative integer"),
            }),
        }
    }
}

/// Parses KEY=VALUE lines; `#` comments, blank lines, and an optional
/// `export ` prefix are accepted, surrounding quotes are stripped.
fn parse_dotenv(contents: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        values.insert(key, value.to_string());
    }
    values
}
