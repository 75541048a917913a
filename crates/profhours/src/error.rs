use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value for {option}: {value:?}")]
    InvalidOption { option: &'static str, value: String },

    #[error("unknown preset {0:?}")]
    UnknownPreset(String),

    /// The live sampling pipeline does not expose the handle integrated mode
    /// needs (it has not been started, or was already stopped).
    #[error("sampling pipeline is missing its {0}")]
    MissingPipelineInternals(&'static str),

    #[error("failed to serialize payload")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to spawn the sampling thread")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
