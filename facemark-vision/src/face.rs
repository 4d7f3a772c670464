use std::{path::Path, sync::Mutex};

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::{
    annotate::NormalizedBox, detector::FaceDetector, error::VisionError, model,
    orientation::Orientation, yunet,
};

/// YuNet runs on a fixed square input.
pub const INPUT_SIZE: u32 = 640;

/// Face found in the upright image, pixel units, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
}

impl Detection {
    /// Bottom-left-origin fractions of a `width` x `height` image.
    pub fn to_normalized(&self, width: u32, height: u32) -> NormalizedBox {
        let (w, h) = (width as f32, height as f32);
        let [x, y, bw, bh] = self.bbox;
        NormalizedBox::new(x / w, 1.0 - (y + bh) / h, bw / w, bh / h)
    }
}

/// Aspect-preserving fit of an image into the centered square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height) as f32;
        let width = ((width as f32 * scale) as u32).clamp(1, target);
        let height = ((height as f32 * scale) as u32).clamp(1, target);
        Self {
            scale,
            offset_x: (target - width) / 2,
            offset_y: (target - height) / 2,
            width,
            height,
        }
    }

    /// Map a canvas-space box back onto the source image.
    pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        [
            (bbox[0] - self.offset_x as f32) / self.scale,
            (bbox[1] - self.offset_y as f32) / self.scale,
            bbox[2] / self.scale,
            bbox[3] / self.scale,
        ]
    }
}

/// [`FaceDetector`] backed by the YuNet ONNX model.
pub struct YuNetDetector {
    session: Mutex<Session>,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YuNetDetector {
    pub fn open(model_path: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(model::detector_session(model_path)?),
            score_threshold,
            nms_threshold,
        })
    }

    /// Detect faces in an already upright image.
    pub fn detect_upright(&self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            anyhow::bail!("cannot detect faces in a {}x{} image", width, height);
        }

        let letterbox = Letterbox::fit(width, height, INPUT_SIZE);
        let input = Value::from_array(planar_bgr(img, &letterbox)?)?;

        let output_data: Vec<(Vec<i64>, Vec<f32>)> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow::anyhow!("detector session poisoned"))?;
            let outputs = session.run(ort::inputs![input])?;
            let mut data = Vec::new();
            for (_name, output) in outputs.iter() {
                let (shape, values) = output
                    .try_extract_tensor::<f32>()
                    .context("YuNet output is not an f32 tensor")?;
                data.push((shape.iter().copied().collect(), values.to_vec()));
            }
            data
        };

        let refs: Vec<(&[i64], &[f32])> = output_data
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();
        let parsed = yunet::parse_outputs(&refs, INPUT_SIZE as usize)?;
        let raw = yunet::decode_detections(&parsed, self.score_threshold, INPUT_SIZE as usize)?;

        let detections: Vec<Detection> = raw
            .into_iter()
            .map(|d| Detection {
                bbox: letterbox.unmap(d.bbox),
                score: d.score,
            })
            .collect();

        let kept = if self.nms_threshold < 1.0 {
            nms(&detections, self.nms_threshold)
        } else {
            detections
        };
        log::debug!(
            "yunet: {} face(s) above {:.2} in {}x{}",
            kept.len(),
            self.score_threshold,
            width,
            height
        );
        Ok(kept)
    }
}

impl FaceDetector for YuNetDetector {
    fn detect_faces(
        &self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<Vec<NormalizedBox>, VisionError> {
        let upright = orientation.apply(model_sized(image));
        let detections = self
            .detect_upright(&upright)
            .map_err(|e| VisionError::DetectionFailure(format!("{:#}", e)))?;
        Ok(detections
            .iter()
            .map(|d| d.to_normalized(upright.width(), upright.height()))
            .collect())
    }
}

/// Shrink `img` to fit the model input before any further copy or rotation.
/// Boxes come back as fractions, so the scale does not leak into the result.
fn model_sized(img: &DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 || width.max(height) <= INPUT_SIZE {
        return img.clone();
    }
    img.resize(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle)
}

/// Letterbox `img` into the square canvas as a `[1, 3, S, S]` BGR tensor.
fn planar_bgr(img: &DynamicImage, letterbox: &Letterbox) -> Result<Array4<f32>> {
    let size = INPUT_SIZE;
    let resized = img.resize_exact(
        letterbox.width,
        letterbox.height,
        image::imageops::FilterType::Triangle,
    );
    let mut canvas = image::RgbImage::new(size, size);
    image::imageops::overlay(
        &mut canvas,
        &resized.to_rgb8(),
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);
    for (i, px) in canvas.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, size as usize, size as usize), data)?)
}

/// Non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &det.bbox) <= iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}
