//! Error types shared across streamrec crates.

/// Top-level error type for streamrec operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamrecError {
    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Snapshot recording error: {message}")]
    Snapshot { message: String },

    #[error("Recording error: {message}")]
    Recording { message: String },

    #[error("Too many players: stream settled in state {state} instead of playing")]
    TooManyPlayers { state: String },

    #[error("Stream did not reach playing state within {timeout_ms}ms")]
    StartTimeout { timeout_ms: u64 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Media engine unavailable: {message}")]
    EngineUnavailable { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StreamrecError.
pub type StreamrecResult<T> = Result<T, StreamrecError>;

impl StreamrecError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
        }
    }

    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot {
            message: msg.into(),
        }
    }

    pub fn recording(msg: impl Into<String>) -> Self {
        Self::Recording {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            message: msg.into(),
        }
    }

    /// Whether the failure came from the stream not reaching the playing
    /// state (contention or a start timeout) rather than from I/O.
    pub fn is_playback_rejected(&self) -> bool {
        matches!(self, Self::TooManyPlayers { .. } | Self::StartTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_players_message_names_state() {
        let err = StreamrecError::TooManyPlayers {
            state: "Error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Too many players: stream settled in state Error instead of playing"
        );
        assert!(err.is_playback_rejected());
    }

    #[test]
    fn io_errors_are_not_playback_rejections() {
        let err: StreamrecError = std::io::Error::other("disk full").into();
        assert!(!err.is_playback_rejected());
        assert_eq!(err.to_string(), "disk full");
    }
}
