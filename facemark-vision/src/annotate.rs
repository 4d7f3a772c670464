//! Overlay of detection boxes onto a copy of the source image.

use image::{DynamicImage, ImageBuffer, Pixel, Primitive, Rgb, Rgba};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use serde::Serialize;

use crate::error::VisionError;

pub const HIGHLIGHT_RGB: [u8; 3] = [255, 255, 0];

/// Detector output: fractions of the image size, origin bottom-left, y up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Detector noise can push near-boundary boxes slightly outside [0,1];
    /// pull them back instead of dropping the detection.
    pub fn clamped(&self) -> Self {
        Self {
            x: unit(self.x),
            y: unit(self.y),
            width: unit(self.width),
            height: unit(self.height),
        }
    }
}

fn unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Rectangle in pixel units, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    /// Clamp, scale to `width` x `height` and flip the vertical axis.
    pub fn from_normalized(b: &NormalizedBox, width: u32, height: u32) -> Self {
        let b = b.clamped();
        let (w, h) = (width as f32, height as f32);
        Self {
            x: b.x * w,
            y: (1.0 - b.y - b.height) * h,
            width: b.width * w,
            height: b.height * h,
        }
    }

    /// Whole-pixel rectangle inside a `width` x `height` surface, at least 1px.
    fn to_stroke_rect(self, width: u32, height: u32) -> Rect {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;

        let x1 = self.x.round().clamp(0.0, max_x);
        let y1 = self.y.round().clamp(0.0, max_y);
        // inclusive far edge
        let x2 = ((self.x + self.width).round() - 1.0).clamp(0.0, max_x);
        let y2 = ((self.y + self.height).round() - 1.0).clamp(0.0, max_y);

        let w = (x2 - x1 + 1.0).max(1.0) as u32;
        let h = (y2 - y1 + 1.0).max(1.0) as u32;
        Rect::at(x1 as i32, y1 as i32).of_size(w, h)
    }
}

/// Draw `boxes` as 1px yellow outlines over a copy of `image`.
///
/// The result has the same dimensions as `image`. RGB and RGBA input keeps its
/// color model and bit depth; grayscale input, which cannot hold yellow, is
/// promoted to RGBA of the same depth. Boxes are stroked in the given order.
pub fn annotate(
    image: &DynamicImage,
    boxes: &[NormalizedBox],
) -> Result<DynamicImage, VisionError> {
    check_dimensions(image.width(), image.height())?;
    let [r, g, b] = HIGHLIGHT_RGB;
    let (r16, g16, b16) = (wide(r), wide(g), wide(b));
    let (rf, gf, bf) = (unit_f32(r), unit_f32(g), unit_f32(b));
    match image {
        DynamicImage::ImageRgb8(src) => {
            compose(src, boxes, Rgb([r, g, b])).map(DynamicImage::ImageRgb8)
        }
        DynamicImage::ImageRgba8(src) => {
            compose(src, boxes, Rgba([r, g, b, u8::MAX])).map(DynamicImage::ImageRgba8)
        }
        DynamicImage::ImageRgb16(src) => {
            compose(src, boxes, Rgb([r16, g16, b16])).map(DynamicImage::ImageRgb16)
        }
        DynamicImage::ImageRgba16(src) => {
            compose(src, boxes, Rgba([r16, g16, b16, u16::MAX])).map(DynamicImage::ImageRgba16)
        }
        DynamicImage::ImageRgb32F(src) => {
            compose(src, boxes, Rgb([rf, gf, bf])).map(DynamicImage::ImageRgb32F)
        }
        DynamicImage::ImageRgba32F(src) => {
            compose(src, boxes, Rgba([rf, gf, bf, 1.0])).map(DynamicImage::ImageRgba32F)
        }
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => {
            compose(&image.to_rgba8(), boxes, Rgba([r, g, b, u8::MAX]))
                .map(DynamicImage::ImageRgba8)
        }
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            compose(&image.to_rgba16(), boxes, Rgba([r16, g16, b16, u16::MAX]))
                .map(DynamicImage::ImageRgba16)
        }
        other => compose(&other.to_rgba32f(), boxes, Rgba([rf, gf, bf, 1.0]))
            .map(DynamicImage::ImageRgba32F),
    }
}

/// 8-bit channel value at 16-bit depth (255 -> 65535).
fn wide(v: u8) -> u16 {
    u16::from(v) * 257
}

fn unit_f32(v: u8) -> f32 {
    f32::from(v) / 255.0
}

fn check_dimensions(width: u32, height: u32) -> Result<(), VisionError> {
    if width == 0 || height == 0 {
        return Err(VisionError::RenderingFailure(format!(
            "cannot allocate a {}x{} surface",
            width, height
        )));
    }
    Ok(())
}

fn compose<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    boxes: &[NormalizedBox],
    color: P,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, VisionError>
where
    P: Pixel,
{
    let (width, height) = src.dimensions();
    check_dimensions(width, height)?;

    let mut surface = allocate_surface::<P>(width, height)?;
    let len = surface.len();
    surface.copy_from_slice(&src.as_raw()[..len]);

    for b in boxes {
        let rect = PixelRect::from_normalized(b, width, height);
        log::debug!("stroking {:?} from {:?}", rect, b);
        draw_hollow_rect_mut(&mut surface, rect.to_stroke_rect(width, height), color);
    }

    Ok(surface)
}

fn allocate_surface<P>(
    width: u32,
    height: u32,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, VisionError>
where
    P: Pixel,
{
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(P::CHANNEL_COUNT as usize))
        .ok_or_else(|| {
            VisionError::RenderingFailure(format!("{}x{} surface overflows", width, height))
        })?;

    let mut data: Vec<P::Subpixel> = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        VisionError::RenderingFailure(format!("allocating {} samples: {}", len, e))
    })?;
    data.resize(len, <P::Subpixel as Primitive>::DEFAULT_MIN_VALUE);

    ImageBuffer::from_raw(width, height, data)
        .ok_or_else(|| VisionError::RenderingFailure("surface buffer size mismatch".to_string()))
}
