use thiserror::Error;

/// All errors produced by denoise-core.
///
/// Only the fatal kinds ever leave a session: `CaptureUnavailable` and
/// `EngineLoadFailed` abort a start. Chunk failures, overflow and underrun
/// are absorbed where they happen and show up in `TransportDiagnostics`.
#[derive(Debug, Error)]
pub enum DenoiseError {
    #[error("audio device unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("engine load failed: {0}")]
    EngineLoadFailed(String),

    #[error("engine failed to process chunk: {0}")]
    EngineProcessFailed(String),

    #[error("engine load cancelled")]
    LoadCancelled,

    #[error("artifact not found: {path}")]
    ArtifactNotFound { path: std::path::PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("no session is running")]
    NotRunning,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DenoiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_render_their_cause() {
        let err = DenoiseError::EngineLoadFailed("model truncated".into());
        assert_eq!(err.to_string(), "engine load failed: model truncated");

        let err = DenoiseError::CaptureUnavailable("no default input device".into());
        assert_eq!(
            err.to_string(),
            "audio device unavailable: no default input device"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DenoiseError = io.into();
        assert!(matches!(err, DenoiseError::Io(_)));
    }
}
