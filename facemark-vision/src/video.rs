//! Still capture from a V4L2 camera.

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Frames dropped after opening so auto-exposure can settle.
const WARMUP_FRAMES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Rgb3,
    Yuyv,
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(PixelFormat::Rgb3),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            _ => None,
        }
    }
}

pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let current = dev.format().context("get format")?;

        // RGB3 if the driver offers it, YUYV otherwise
        let mut fmt = dev
            .set_format(&Format::new(current.width, current.height, FourCC::new(b"RGB3")))
            .unwrap_or(current);
        if PixelFormat::from_fourcc(fmt.fourcc) != Some(PixelFormat::Rgb3) {
            fmt = dev
                .set_format(&Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV")))
                .unwrap_or(fmt);
        }
        let format = PixelFormat::from_fourcc(fmt.fourcc)
            .ok_or_else(|| anyhow::anyhow!("unsupported camera pixel format {}", fmt.fourcc))?;

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        log::debug!(
            "camera {}: {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            format
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            format,
        })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!("captured frame seq={} len={}", meta.sequence, data.len());
        let rgb = match self.format {
            PixelFormat::Rgb3 => data.to_vec(),
            PixelFormat::Yuyv => yuyv_to_rgb(self.width, self.height, data)?,
            PixelFormat::Grey => grey_to_rgb(self.width, self.height, data)?,
        };
        rgb_frame(self.width, self.height, rgb)
    }

    /// One settled still.
    pub fn grab(&mut self) -> Result<DynamicImage> {
        for _ in 0..WARMUP_FRAMES {
            self.frame()?;
        }
        Ok(DynamicImage::ImageRgb8(self.frame()?))
    }
}

fn rgb_frame(width: u32, height: u32, mut buf: Vec<u8>) -> Result<RgbImage> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        anyhow::bail!("frame too small: got {} bytes, expected {}", buf.len(), expected);
    }
    buf.truncate(expected);
    RgbImage::from_raw(width, height, buf).ok_or_else(|| anyhow::anyhow!("failed to build frame"))
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(to_u8(y + 1.402 * v));
            out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
            out.push(to_u8(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        let rgb = yuyv_to_rgb(2, 1, &[100, 128, 200, 128]).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(yuyv_to_rgb(4, 4, &[0; 8]).is_err());
        assert!(grey_to_rgb(4, 4, &[0; 8]).is_err());
        assert!(rgb_frame(2, 2, vec![0; 5]).is_err());
    }

    #[test]
    fn test_oversized_frame_truncated() {
        let frame = rgb_frame(1, 1, vec![1, 2, 3, 4, 5]).unwrap();
        assert_eq!(frame.as_raw(), &vec![1, 2, 3]);
    }
}
