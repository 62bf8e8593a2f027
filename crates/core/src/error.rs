/// Errors raised while looking up a title. None of these cross into the host
/// as a failure; the identify and cover flows turn them into fewer results.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Insufficient metadata to construct query")]
    InsufficientQuery,

    #[error("No match at {url}")]
    NotFound { url: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Malformed response: {0}")]
    Parse(String),

    #[error("Missing required field(s): {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    #[error("Could not start lookup workers: {0}")]
    Workers(#[source] std::io::Error),
}

impl LookupError {
    /// Whether the remote service answered 404 for the request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound { .. })
    }
}

/// A single detail field that could not be extracted. Logged and skipped;
/// sibling fields are unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("field '{field}': {detail}")]
pub struct FieldError {
    pub field: &'static str,
    pub detail: String,
}

impl FieldError {
    pub fn new(field: &'static str, detail: impl Into<String>) -> Self {
        Self {
            field,
            detail: detail.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "missing")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
