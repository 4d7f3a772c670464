use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("unrecognized orientation tag {0}, expected 1..=8")]
    UnrecognizedOrientation(u16),

    #[error("face detection failed: {0}")]
    DetectionFailure(String),

    #[error("rendering failed: {0}")]
    RenderingFailure(String),
}

impl VisionError {
    /// Whether the pipeline can carry on with the previous display state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, VisionError::UnrecognizedOrientation(_))
    }
}
