use thiserror::Error;

/// Everything that can go wrong inside the synthesis core.
///
/// None of these reach the input layer through the engine's note
/// operations; those log and carry on. They are returned from the
/// lower-level building blocks and from explicit setup calls.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
    #[error("audio context is closed")]
    ContextClosed,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("no audio node with id {0}")]
    UnknownNode(u64),
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("invalid frequency {0} Hz")]
    InvalidFrequency(f64),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid preset: {0}")]
    InvalidPreset(String),
    #[error("keyboard layout error: {0}")]
    Layout(#[from] LayoutError),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

/// Problems with a keyboard layout. `UnparseableName` and the duplicate
/// variants stop construction; the rest are advisory audit findings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    #[error("cannot parse note name '{0}'")]
    UnparseableName(String),
    #[error("key '{key}' is bound to both {first} and {second}")]
    DuplicateKey {
        key: String,
        first: String,
        second: String,
    },
    #[error("{first} and {second} share the same frequency")]
    DuplicateFrequency { first: String, second: String },
    #[error("{from} to {to} is not a single semitone step")]
    NotContiguous { from: String, to: String },
    #[error("'{0}' is spelled with an accidental marker that contradicts its pitch")]
    MisleadingName(String),
}
