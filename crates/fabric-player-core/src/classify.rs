//! Error classification
//!
//! Maps raw engine and network errors into the recovery taxonomy that drives
//! the session's recovery decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Engine detail reported when playback is waiting on data that never arrives
pub const BUFFER_STALLED: &str = "bufferStalledError";

/// Engine detail reported when the source buffer cannot accept more data
pub const BUFFER_FULL: &str = "bufferFullError";

/// Consecutive errors tolerated before unclassified errors escalate to fatal
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 5;

/// Broad error category as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorType {
    Network,
    Media,
    KeySystem,
    Mux,
    Other,
}

/// Error as emitted by an engine, a resolver call, or engine construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawError {
    /// Status attached to the error itself
    pub status: Option<u16>,
    /// Status of the HTTP response that failed, if any
    pub response_status: Option<u16>,
    pub fatal: bool,
    pub error_type: EngineErrorType,
    /// Engine-specific detail, e.g. `bufferStalledError`
    pub details: String,
    /// User-facing message supplied with the error, shown instead of the defaults
    pub message: Option<String>,
}

impl RawError {
    pub fn new(error_type: EngineErrorType, details: impl Into<String>) -> Self {
        Self {
            status: None,
            response_status: None,
            fatal: false,
            error_type,
            details: details.into(),
            message: None,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_response_status(mut self, status: u16) -> Self {
        self.response_status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Build a raw error from a library error raised outside the engine
    pub fn from_error(error: &crate::Error) -> Self {
        Self {
            status: error.status(),
            response_status: None,
            fatal: true,
            error_type: EngineErrorType::Network,
            details: error.error_code().to_string(),
            message: match error {
                crate::Error::PermissionDenied { message, .. } => message.clone(),
                _ => None,
            },
        }
    }

    fn statuses(&self) -> impl Iterator<Item = u16> {
        self.status.into_iter().chain(self.response_status)
    }

    pub fn is_buffer_stall(&self) -> bool {
        self.details == BUFFER_STALLED
    }

    pub fn is_buffer_full(&self) -> bool {
        self.details == BUFFER_FULL
    }
}

/// Recovery taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 401/403: never retried, surfaces a permission message
    Permission,
    /// 5xx: reload with a longer initial delay
    ServerError,
    /// Fatal media/decode error with an in-place recovery primitive
    FatalRecoverable,
    /// Playback waiting on data; observed before escalating
    TransientStall,
    /// Engine declared the error unrecoverable
    Fatal,
    /// Non-actionable unless repeated
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::ServerError => write!(f, "server_error"),
            ErrorKind::FatalRecoverable => write!(f, "fatal_recoverable"),
            ErrorKind::TransientStall => write!(f, "transient_stall"),
            ErrorKind::Fatal => write!(f, "fatal"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classified error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub raw: RawError,
    pub fatal: bool,
    pub recoverable: bool,
    /// Set when an unclassified error was escalated by repetition
    pub escalated: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Apply the classification rules, in order, to a single error
pub fn classify_raw(raw: &RawError) -> ErrorKind {
    if raw.statuses().any(|status| status == 401 || status == 403) {
        return ErrorKind::Permission;
    }
    if raw.statuses().any(|status| status >= 500) {
        return ErrorKind::ServerError;
    }
    if raw.fatal && raw.error_type == EngineErrorType::Media {
        return ErrorKind::FatalRecoverable;
    }
    if !raw.fatal && raw.is_buffer_stall() {
        return ErrorKind::TransientStall;
    }
    if raw.fatal {
        return ErrorKind::Fatal;
    }
    ErrorKind::Unknown
}

/// Stateful classifier tracking consecutive errors within a session
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    consecutive_errors: u32,
    escalation_threshold: u32,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ESCALATION_THRESHOLD)
    }
}

impl ErrorClassifier {
    pub fn new(escalation_threshold: u32) -> Self {
        Self {
            consecutive_errors: 0,
            escalation_threshold: escalation_threshold.max(1),
        }
    }

    /// Classify an error, escalating repeated unknown errors to fatal
    pub fn classify(&mut self, raw: RawError) -> ErrorRecord {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);

        let mut kind = classify_raw(&raw);
        let mut escalated = false;
        if kind == ErrorKind::Unknown && self.consecutive_errors >= self.escalation_threshold {
            warn!(
                consecutive_errors = self.consecutive_errors,
                details = %raw.details,
                "Repeated errors, escalating to fatal"
            );
            kind = ErrorKind::Fatal;
            escalated = true;
        }

        ErrorRecord {
            kind,
            fatal: raw.fatal || escalated,
            recoverable: !matches!(kind, ErrorKind::Permission | ErrorKind::Unknown),
            escalated,
            raw,
            occurred_at: Utc::now(),
        }
    }

    /// Playback made progress; consecutive error tracking starts over
    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_wins_over_fatal_media() {
        let raw = RawError::new(EngineErrorType::Media, "fragLoadError")
            .fatal()
            .with_response_status(403);
        assert_eq!(classify_raw(&raw), ErrorKind::Permission);
    }

    #[test]
    fn test_server_error() {
        let raw = RawError::new(EngineErrorType::Network, "manifestLoadError").with_status(503);
        assert_eq!(classify_raw(&raw), ErrorKind::ServerError);
    }

    #[test]
    fn test_fatal_media_is_recoverable_in_place() {
        let raw = RawError::new(EngineErrorType::Media, "bufferAppendError").fatal();
        assert_eq!(classify_raw(&raw), ErrorKind::FatalRecoverable);
    }

    #[test]
    fn test_non_fatal_stall() {
        let raw = RawError::new(EngineErrorType::Media, BUFFER_STALLED);
        assert_eq!(classify_raw(&raw), ErrorKind::TransientStall);
        assert_eq!(classify_raw(&raw.clone().fatal()), ErrorKind::FatalRecoverable);
    }

    #[test]
    fn test_fatal_network_and_unknown() {
        let fatal = RawError::new(EngineErrorType::Network, "levelLoadTimeOut").fatal();
        assert_eq!(classify_raw(&fatal), ErrorKind::Fatal);

        let unknown = RawError::new(EngineErrorType::Network, "fragLoadTimeOut");
        assert_eq!(classify_raw(&unknown), ErrorKind::Unknown);
    }

    #[test]
    fn test_unknown_escalates_at_threshold() {
        let mut classifier = ErrorClassifier::default();
        let raw = RawError::new(EngineErrorType::Other, "internalException");

        for _ in 0..4 {
            let record = classifier.classify(raw.clone());
            assert_eq!(record.kind, ErrorKind::Unknown);
            assert!(!record.recoverable);
        }

        let record = classifier.classify(raw);
        assert_eq!(record.kind, ErrorKind::Fatal);
        assert!(record.escalated);
        assert!(record.fatal);
    }

    #[test]
    fn test_reset_clears_consecutive_count() {
        let mut classifier = ErrorClassifier::new(2);
        let raw = RawError::new(EngineErrorType::Other, "x");
        classifier.classify(raw.clone());
        classifier.reset();
        assert_eq!(classifier.classify(raw).kind, ErrorKind::Unknown);
        assert_eq!(classifier.consecutive_errors(), 1);
    }

    #[test]
    fn test_library_error_conversion_keeps_status() {
        let raw = RawError::from_error(&crate::Error::resolution("bad gateway", Some(502)));
        assert_eq!(classify_raw(&raw), ErrorKind::ServerError);
    }
}
