use thiserror::Error;

use crate::thread::ThreadId;

/// Maximum number of characters of an upstream body carried in error messages.
const BODY_EXCERPT_CHARS: usize = 200;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Model resolution/policy error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Upstream provider API error.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Conversation memory error.
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Tool input validation error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Anything else; logged with a correlation id at the dispatch boundary.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors, fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// A model manifest could not be parsed.
    #[error("Malformed manifest {path}: {reason}")]
    ManifestParse { path: String, reason: String },

    /// Two manifest entries within one provider claim the same name.
    #[error("Duplicate alias '{alias}' for model '{model}' in {path}")]
    DuplicateAlias {
        alias: String,
        model: String,
        path: String,
    },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// No provider has an API key configured.
    #[error("No providers configured: set at least one provider API key")]
    NoProvidersConfigured,
}

/// Model lookup and restriction-policy errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// The requested name resolves in no registered provider.
    #[error("Unknown model: '{model}'")]
    UnknownModel {
        model: String,
        suggestions: Vec<String>,
    },

    /// The resolved model is disallowed by operator policy.
    #[error("Model '{model}' is restricted for provider {provider}")]
    Restricted {
        model: String,
        provider: String,
        allowed: Vec<String>,
    },
}

/// Upstream provider API errors
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP failure, surfaced with status and a body excerpt. A numeric
    /// `Retry-After` header is carried along for the retry helper.
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retry_after: Option<u64>,
    },

    /// HTTP 429; never retried so quota exhaustion reaches the user at once.
    #[error("Rate limited{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// Per-request deadline exceeded.
    #[error("Timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The provider refused the request (content policy, unsupported input).
    #[error("Refused: {0}")]
    Refused(String),

    /// Connection-level failure (reset, DNS, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// Response arrived but its schema/content was invalid.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request arguments the provider cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl UpstreamError {
    /// Build an [`UpstreamError::Http`] with the body capped to an excerpt.
    pub fn http(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            body: excerpt(body),
            retry_after: None,
        }
    }

    /// The server-suggested retry delay in seconds, when one was sent.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Http { retry_after, .. } | Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the retry helper may attempt this failure again.
    ///
    /// 429 is deliberately non-retryable; a numeric deadline expiry is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => {
                matches!(status, 408 | 409) || (*status >= 500 && *status != 501)
            }
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::Refused(_)
            | Self::InvalidResponse(_)
            | Self::InvalidArgument(_) => false,
        }
    }
}

/// Cap an upstream body to a short excerpt safe to embed in messages.
pub fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

/// Conversation memory errors
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No thread with this id exists.
    #[error("Unknown thread: {0}")]
    ThreadUnknown(ThreadId),

    /// The thread exists but its TTL has elapsed.
    #[error("Thread expired: {0}")]
    ThreadExpired(ThreadId),

    /// The thread has reached its turn limit.
    #[error("Thread {thread_id} is full ({max_turns} turns)")]
    ThreadFull {
        thread_id: ThreadId,
        max_turns: usize,
    },
}

/// Tool dispatch and input validation errors
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A tool argument failed validation; `field` is the offending path.
    #[error("Invalid input at '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The requested tool is not published.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}
