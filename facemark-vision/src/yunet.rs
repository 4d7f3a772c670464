//! YuNet post-processing.
//!
//! YuNet (2023mar) is anchor-free. For each stride (8, 16, 32) it emits
//! `cls` and `obj` scores of shape `[1, H*W, 1]`, box deltas `[1, H*W, 4]` and
//! landmark deltas `[1, H*W, 10]`, in the order
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, .., kps_8, ..`.
//!
//! Decoding per grid cell `(row, col)`:
//! cx = (col + dx) * stride, cy = (row + dy) * stride,
//! w = exp(dw) * stride, h = exp(dh) * stride,
//! score = sqrt(clamp(cls) * clamp(obj)).

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Box in input-canvas pixels, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
}

/// Per-stride tensors for one inference.
#[derive(Debug)]
pub struct ScaleOutputs {
    pub scores: Vec<Array2<f32>>,
    pub boxes: Vec<Array2<f32>>,
}

fn grid_cells(input_size: usize, stride: usize) -> usize {
    (input_size / stride) * (input_size / stride)
}

/// Pull the `[1, cells, width]` tensors for every stride starting at `offset`.
fn collect_group(
    outputs: &[(&[i64], &[f32])],
    offset: usize,
    width: usize,
    name: &str,
    input_size: usize,
) -> Result<Vec<Array2<f32>>> {
    let mut group = Vec::with_capacity(STRIDES.len());
    for (i, &stride) in STRIDES.iter().enumerate() {
        let idx = offset + i;
        let cells = grid_cells(input_size, stride);
        let Some((shape, data)) = outputs.get(idx) else {
            anyhow::bail!("missing {} output at index {}", name, idx);
        };
        if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != cells || shape[2] as usize != width
        {
            anyhow::bail!(
                "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                name,
                idx,
                shape,
                cells,
                width
            );
        }
        group.push(Array2::from_shape_vec((cells, width), data.to_vec())?);
    }
    Ok(group)
}

/// Split the 12 raw YuNet outputs into per-stride score and box tensors.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<ScaleOutputs> {
    if outputs.len() < 12 {
        anyhow::bail!("expected 12 YuNet outputs, got {}", outputs.len());
    }
    let cls = collect_group(outputs, 0, 1, "cls", input_size)?;
    let obj = collect_group(outputs, 3, 1, "obj", input_size)?;
    let boxes = collect_group(outputs, 6, 4, "bbox", input_size)?;
    // kps (9..12) are validated but unused: only rectangles are drawn.
    collect_group(outputs, 9, 10, "kps", input_size)?;

    let scores = cls
        .iter()
        .zip(obj.iter())
        .map(|(c, o)| {
            let mut s = c.mapv(|v| v.clamp(0.0, 1.0)) * o.mapv(|v| v.clamp(0.0, 1.0));
            s.mapv_inplace(f32::sqrt);
            s
        })
        .collect();

    Ok(ScaleOutputs { scores, boxes })
}

/// Decode every grid cell scoring at least `score_threshold`.
pub fn decode_detections(
    outputs: &ScaleOutputs,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let (Some(scores), Some(boxes)) = (outputs.scores.get(scale), outputs.boxes.get(scale))
        else {
            anyhow::bail!("missing tensors for stride {}", stride);
        };
        let side = input_size / stride;
        if scores.nrows() != side * side || boxes.nrows() != side * side {
            anyhow::bail!(
                "expected {} cells for stride {}, got {} scores / {} boxes",
                side * side,
                stride,
                scores.nrows(),
                boxes.nrows()
            );
        }

        let s = stride as f32;
        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + boxes[[idx, 0]]) * s;
                let cy = (row as f32 + boxes[[idx, 1]]) * s;
                let w = boxes[[idx, 2]].exp() * s;
                let h = boxes[[idx, 3]].exp() * s;

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                });
            }
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_scale(input_size: usize, stride: usize, width: usize) -> Array2<f32> {
        Array2::zeros((grid_cells(input_size, stride), width))
    }

    #[test]
    fn test_decode_single_cell() {
        let input_size = 640;
        let mut scores: Vec<_> = STRIDES.iter().map(|&s| empty_scale(input_size, s, 1)).collect();
        let mut boxes: Vec<_> = STRIDES.iter().map(|&s| empty_scale(input_size, s, 4)).collect();

        // stride 32, 20x20 grid, cell (row 10, col 10)
        let idx = 10 * 20 + 10;
        scores[2][[idx, 0]] = 0.9;
        boxes[2][[idx, 0]] = 0.5;
        boxes[2][[idx, 1]] = 0.25;
        boxes[2][[idx, 2]] = 4.0f32.ln();
        boxes[2][[idx, 3]] = 2.0f32.ln();

        let outputs = ScaleOutputs { scores, boxes };
        let dets = decode_detections(&outputs, 0.5, input_size).unwrap();
        assert_eq!(dets.len(), 1);

        // cx = 10.5 * 32 = 336, cy = 10.25 * 32 = 328, w = 128, h = 64
        let d = &dets[0];
        assert!((d.bbox[0] - 272.0).abs() < 1e-3);
        assert!((d.bbox[1] - 296.0).abs() < 1e-3);
        assert!((d.bbox[2] - 128.0).abs() < 1e-3);
        assert!((d.bbox[3] - 64.0).abs() < 1e-3);
        assert!((d.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_parse_combines_cls_and_obj() {
        let input_size = 64;
        let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for (width, fill) in [(1usize, 0.81f32), (1, 1.0), (4, 0.0), (10, 0.0)] {
            for &stride in &STRIDES {
                let cells = grid_cells(input_size, stride);
                owned.push((
                    vec![1, cells as i64, width as i64],
                    vec![fill; cells * width],
                ));
            }
        }
        let refs: Vec<(&[i64], &[f32])> = owned
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let parsed = parse_outputs(&refs, input_size).unwrap();
        assert_eq!(parsed.scores.len(), 3);
        assert!((parsed.scores[0][[0, 0]] - 0.9).abs() < 1e-6);
        assert_eq!(parsed.boxes[1].nrows(), 16);
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        let shape = [1i64, 3, 1];
        let data = [0.0f32; 3];
        let refs = vec![(&shape[..], &data[..]); 12];
        assert!(parse_outputs(&refs, 640).is_err());
    }
}
