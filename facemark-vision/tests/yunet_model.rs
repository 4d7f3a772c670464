//! Runs the real YuNet model. Needs `FACEMARK_MODEL_PATH` pointing at
//! `face_detection_yunet_2023mar.onnx`.
use std::path::PathBuf;

use anyhow::Result;
use facemark_vision::{annotate, FaceDetector, Orientation, VisionError, YuNetDetector};
use image::{DynamicImage, GenericImageView, RgbImage};

fn model_path() -> PathBuf {
    std::env::var_os("FACEMARK_MODEL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models/face_detection_yunet_2023mar.onnx"))
}

#[test]
fn test_missing_model_is_reported() {
    let err = YuNetDetector::open(&PathBuf::from("does/not/exist.onnx"), 0.6, 0.3)
        .err()
        .expect("open must fail");
    assert!(format!("{:#}", err).contains("not found"));
}

#[test]
#[ignore]
fn test_blank_image_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let detector = YuNetDetector::open(&model_path(), 0.6, 0.3)?;
    let img = DynamicImage::ImageRgb8(RgbImage::new(320, 240));
    let boxes = detector.detect_faces(&img, Orientation::Up)?;
    assert!(boxes.is_empty());
    Ok(())
}

#[test]
#[ignore]
fn test_detect_and_annotate_sample() -> Result<()> {
    env_logger::try_init().ok();
    let path = std::env::var("FACEMARK_SAMPLE_IMAGE")?;
    let img = image::open(&path)?;
    let detector = YuNetDetector::open(&model_path(), 0.6, 0.3)?;

    let boxes = detector.detect_faces(&img, Orientation::Up)?;
    println!("{}: {} face(s)", path, boxes.len());
    for b in &boxes {
        println!("  {:?}", b);
        assert!(b.x >= -0.1 && b.x + b.width <= 1.1);
    }

    let out = annotate(&img, &boxes)?;
    assert_eq!(out.dimensions(), img.dimensions());
    out.save("annotated_sample.png")?;
    Ok(())
}

#[test]
#[ignore]
fn test_zero_size_image_is_detection_failure() -> Result<()> {
    let detector = YuNetDetector::open(&model_path(), 0.6, 0.3)?;
    let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
    let err = detector.detect_faces(&img, Orientation::Up).unwrap_err();
    assert!(matches!(err, VisionError::DetectionFailure(_)));
    Ok(())
}
