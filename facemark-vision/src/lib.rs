pub mod annotate;
pub mod detector;
pub mod error;
pub mod face;
pub mod model;
pub mod orientation;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use annotate::{annotate, NormalizedBox, PixelRect};
pub use detector::FaceDetector;
pub use error::VisionError;
pub use face::YuNetDetector;
pub use orientation::{normalize, Orientation};
pub use video::Camera;
