use log::{error, info, warn};
use serde::Serialize;

/// The six error kinds from the matching core's error-handling design.
///
/// Propagation policy: `Configuration`, `InvalidInput`, and `VersionMismatch`
/// surface immediately to the caller. `Transient` is retried once with
/// backoff inside the component that raised it. `Degraded` is logged and the
/// affected job's evidence is omitted, but ranking still proceeds. `NotFound`
/// is absorbed and the hit dropped from results.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("invalid input ({field}): {message}")]
    InvalidInput { field: String, message: String },

    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("degraded: {message}")]
    Degraded { message: String },

    #[error("embedder version {loaded} does not match collection version {expected}")]
    VersionMismatch { loaded: String, expected: String },

    #[error("not found: {message}")]
    NotFound { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl MatcherError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::Degraded {
            message: message.into(),
        }
    }

    pub fn version_mismatch(loaded: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::VersionMismatch {
            loaded: loaded.into(),
            expected: expected.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// A short machine-readable tag, stable across releases, for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Transient { .. } => "TRANSIENT",
            Self::Degraded { .. } => "DEGRADED",
            Self::VersionMismatch { .. } => "VERSION_MISMATCH",
            Self::NotFound { .. } => "NOT_FOUND",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration { .. } => ErrorSeverity::Critical,
            Self::VersionMismatch { .. } => ErrorSeverity::Critical,
            Self::InvalidInput { .. } => ErrorSeverity::Medium,
            Self::Transient { .. } => ErrorSeverity::High,
            Self::Degraded { .. } => ErrorSeverity::Low,
            Self::NotFound { .. } => ErrorSeverity::Low,
        }
    }

    /// Whether this error kind is fatal at the point of a `search`/`indexJobs`
    /// call, and should propagate to the CLI's exit code rather than be
    /// absorbed locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::VersionMismatch { .. }
        )
    }

    pub fn log(&self, context: &str) {
        let code = self.error_code();
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!("[{code}] {context}: {self}")
            }
            ErrorSeverity::Medium => warn!("[{code}] {context}: {self}"),
            ErrorSeverity::Low => info!("[{code}] {context}: {self}"),
        }
    }
}

impl From<anyhow::Error> for MatcherError {
    /// Best-effort classification of an opaque upstream error. Anything that
    /// doesn't match a known shape is treated as a configuration error, since
    /// that's the conservative choice that surfaces rather than swallows it.
    fn from(err: anyhow::Error) -> Self {
        let text = err.to_string().to_lowercase();
        if text.contains("not found") {
            Self::not_found(err.to_string())
        } else if text.contains("timed out") || text.contains("timeout") {
            Self::transient_with_source(err.to_string(), err)
        } else {
            Self::configuration_with_source(err.to_string(), err)
        }
    }
}

pub type MatcherResult<T> = Result<T, MatcherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MatcherError::configuration("x").error_code(), "CONFIGURATION");
        assert_eq!(
            MatcherError::invalid_input("topK", "out of range").error_code(),
            "INVALID_INPUT"
        );
        assert_eq!(MatcherError::transient("x").error_code(), "TRANSIENT");
        assert_eq!(MatcherError::degraded("x").error_code(), "DEGRADED");
        assert_eq!(
            MatcherError::version_mismatch("a", "b").error_code(),
            "VERSION_MISMATCH"
        );
        assert_eq!(MatcherError::not_found("x").error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_error_severity_and_fatality() {
        assert_eq!(
            MatcherError::configuration("x").severity(),
            ErrorSeverity::Critical
        );
        assert!(MatcherError::configuration("x").is_fatal());
        assert!(MatcherError::version_mismatch("a", "b").is_fatal());
        assert!(!MatcherError::degraded("x").is_fatal());
        assert!(!MatcherError::not_found("x").is_fatal());
    }

    #[test]
    fn test_invalid_input_carries_field() {
        let err = MatcherError::invalid_input("topK", "must be between 1 and 200");
        match err {
            MatcherError::InvalidInput { field, message } => {
                assert_eq!(field, "topK");
                assert!(message.contains("200"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
