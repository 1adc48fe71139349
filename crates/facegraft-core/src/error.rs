use facegraft_models::ModelKind;
use thiserror::Error;

/// Errors raised by the portrait pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Unreadable image, zero detected faces, or an out-of-range option.
    #[error("invalid input: {0}")]
    Input(String),
    /// A model could not be provisioned or activated.
    #[error("model {model} unavailable: {reason}")]
    ModelUnavailable { model: ModelKind, reason: String },
    /// A model invocation failed.
    #[error("inference failed: {0}")]
    Inference(String),
    /// Disk failure while reading inputs or persisting outputs.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }
}

impl From<ort::Error> for PipelineError {
    fn from(e: ort::Error) -> Self {
        Self::Inference(format!("ort: {e}"))
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => Self::Io(io),
            other => Self::Input(format!("unreadable image: {other}")),
        }
    }
}
