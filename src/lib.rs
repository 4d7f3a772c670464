pub mod config;
pub mod coordinator;
pub mod display;
pub mod picker;

// Re-export vision types for convenience
pub use facemark_vision::{
    annotate, face, orientation, FaceDetector, NormalizedBox, Orientation, VisionError,
    YuNetDetector,
};
