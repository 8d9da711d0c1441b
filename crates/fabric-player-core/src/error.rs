//! Error types for Fabric Player Core

use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Negotiation errors
    #[error("No valid protocol / DRM combination available")]
    NoPlayableCombination,

    #[error("Invalid playout URL: {0}")]
    InvalidPlayoutUrl(#[from] url::ParseError),

    // Content resolution errors
    #[error("Content resolution failed: {message}")]
    Resolution {
        message: String,
        status: Option<u16>,
    },

    #[error("Insufficient permissions")]
    PermissionDenied {
        status: u16,
        message: Option<String>,
    },

    #[error("Collection error: {0}")]
    Collection(String),

    // Engine errors
    #[error("Failed to construct {kind} engine: {message}")]
    EngineConstruction {
        kind: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("No engine attached")]
    NotAttached,

    // Recovery errors
    #[error("Maximum reload attempts ({0}) exceeded")]
    ReloadsExhausted(u32),

    #[error("Reload aborted by restart hook")]
    ReloadAborted,

    #[error("Session destroyed")]
    Destroyed,

    // Configuration errors
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to parse parameters: {0}")]
    ParametersJson(#[from] serde_json::Error),

    #[error("Failed to parse parameters: {0}")]
    ParametersToml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a resolution error carrying an HTTP-like status
    pub fn resolution(message: impl Into<String>, status: Option<u16>) -> Self {
        Error::Resolution {
            message: message.into(),
            status,
        }
    }

    /// HTTP-like status embedded in this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Resolution { status, .. } | Error::EngineConstruction { status, .. } => *status,
            Error::PermissionDenied { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if a reload may fix this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Resolution { status, .. } | Error::EngineConstruction { status, .. } => {
                !matches!(status, Some(401) | Some(403))
            }
            Error::Engine(_) => true,
            _ => false,
        }
    }

    /// Returns the error code for host logging
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NoPlayableCombination => "NO_PLAYABLE_COMBINATION",
            Error::InvalidPlayoutUrl(_) => "INVALID_PLAYOUT_URL",
            Error::Resolution { .. } => "RESOLUTION",
            Error::PermissionDenied { .. } => "PERMISSION_DENIED",
            Error::Collection(_) => "COLLECTION",
            Error::EngineConstruction { .. } => "ENGINE_CONSTRUCTION",
            Error::Engine(_) => "ENGINE",
            Error::NotAttached => "NOT_ATTACHED",
            Error::ReloadsExhausted(_) => "RELOADS_EXHAUSTED",
            Error::ReloadAborted => "RELOAD_ABORTED",
            Error::Destroyed => "DESTROYED",
            Error::InvalidParameters(_) => "INVALID_PARAMETERS",
            Error::ParametersJson(_) | Error::ParametersToml(_) => "PARAMETERS_PARSE",
            Error::Io(_) => "IO",
        }
    }
}
