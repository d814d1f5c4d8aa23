/// Core error types for the Layerloom compositor.
use std::path::PathBuf;

/// A specialized Result type for Layerloom operations.
pub type LayerloomResult<T> = Result<T, LayerloomError>;

/// Top-level error type encompassing all Layerloom subsystems.
#[derive(Debug, thiserror::Error)]
pub enum LayerloomError {
    #[error("rendering surface unavailable: {0}")]
    SurfaceUnavailable(String),

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: String, log: String },

    #[error("shader program failed to link: {0}")]
    ShaderLink(String),

    #[error("shader program does not expose `{0}`")]
    MissingShaderInput(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("asset error: {message} ({path:?})")]
    Asset { message: String, path: PathBuf },

    #[error("layer {slot} failed to load: {message}")]
    Load { slot: usize, message: String },

    #[error("layer {slot} did not load within {timeout_ms}ms")]
    LoadTimeout { slot: usize, timeout_ms: u64 },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("layer slot {0} is not registered")]
    UnregisteredSlot(usize),

    #[error("frame {frame} received a completion after it was already ready")]
    SynchronizerOverrun { frame: u32 },

    #[error("an animation run is already active")]
    AlreadyRunning,

    #[error("{0}")]
    Other(String),
}

/// How an error should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Initialization cannot proceed; report to the user and stop.
    Fatal,
    /// A single resource failed; the pipeline may continue.
    Resource,
    /// A programming error: an invariant of the pipeline was broken.
    Invariant,
}

impl LayerloomError {
    /// Create an asset error.
    pub fn asset(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        LayerloomError::Asset {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Create a per-slot load error.
    pub fn load(slot: usize, message: impl Into<String>) -> Self {
        LayerloomError::Load {
            slot,
            message: message.into(),
        }
    }

    /// Classify the error according to the pipeline's failure taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            LayerloomError::Asset { .. }
            | LayerloomError::Load { .. }
            | LayerloomError::LoadTimeout { .. } => ErrorClass::Resource,
            LayerloomError::UnregisteredSlot(_)
            | LayerloomError::SynchronizerOverrun { .. }
            | LayerloomError::AlreadyRunning => ErrorClass::Invariant,
            _ => ErrorClass::Fatal,
        }
    }
}
