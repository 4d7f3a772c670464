use image::DynamicImage;

use crate::{annotate::NormalizedBox, error::VisionError, orientation::Orientation};

/// Pluggable face detection capability.
///
/// `image` holds the pixels as stored; `orientation` says how to turn them
/// upright. Returned boxes are normalized against the upright image with a
/// bottom-left origin, in the detector's own order.
pub trait FaceDetector: Send + Sync {
    fn detect_faces(
        &self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<Vec<NormalizedBox>, VisionError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for std::sync::Arc<D> {
    fn detect_faces(
        &self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<Vec<NormalizedBox>, VisionError> {
        (**self).detect_faces(image, orientation)
    }
}
