use thiserror::Error;

/// Errors that can occur anywhere in the voice session engine.
///
/// Device and decode errors are recovered locally by the caller (the widget
/// returns to `Ready`); transport and session errors surface as status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no microphone available")]
    DeviceUnavailable,

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no active audio stream")]
    NoActiveStream,

    #[error("decode failed: {0}")]
    DecodeError(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("session not initialized")]
    SessionNotInitialized,

    #[error("credential fetch failed: {0}")]
    CredentialFetchError(String),

    #[error("invalid transition: {event} while {from}")]
    InvalidTransition { from: String, event: String },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("timeout")]
    Timeout,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SessionError {
    pub(crate) fn invalid_transition(from: impl ToString, event: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }

    /// Whether this error only affects the current recording.
    ///
    /// Recoverable errors return the widget to `Ready`; the user may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable
                | Self::PermissionDenied
                | Self::DecodeError(_)
                | Self::TransportError(_)
                | Self::CredentialFetchError(_)
                | Self::Timeout
        )
    }
}

impl From<hound::Error> for SessionError {
    fn from(err: hound::Error) -> Self {
        Self::DecodeError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message() {
        let err = SessionError::invalid_transition("recording", "start");
        assert_eq!(err.to_string(), "invalid transition: start while recording");
    }

    #[test]
    fn contract_violations_are_not_recoverable() {
        assert!(!SessionError::NoActiveStream.is_recoverable());
        assert!(!SessionError::SessionNotInitialized.is_recoverable());
        assert!(SessionError::DecodeError("empty".into()).is_recoverable());
    }
}
