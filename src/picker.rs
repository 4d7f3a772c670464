//! Image acquisition: gallery files and camera stills.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageDecoder, ImageReader};
use serde::Serialize;

use facemark_vision::Camera;

/// EXIF tag id of `Orientation`.
const EXIF_ORIENTATION: u16 = 0x0112;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Gallery,
    Camera,
}

/// An acquired picture, pixels as stored plus the stored orientation tag.
#[derive(Debug, Clone)]
pub struct PickedImage {
    pub image: DynamicImage,
    pub orientation_tag: u16,
    pub source: Source,
}

/// Something the user can pick a picture from. `Ok(None)` means the user
/// backed out without choosing.
pub trait ImageSource {
    fn pick(&mut self) -> Result<Option<PickedImage>>;
}

pub struct GalleryPicker {
    path: PathBuf,
}

impl GalleryPicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ImageSource for GalleryPicker {
    fn pick(&mut self) -> Result<Option<PickedImage>> {
        let (image, orientation_tag) = open_with_orientation(&self.path)?;
        log::info!(
            "Picked {} ({}x{}, orientation tag {})",
            self.path.display(),
            image.width(),
            image.height(),
            orientation_tag
        );
        Ok(Some(PickedImage {
            image,
            orientation_tag,
            source: Source::Gallery,
        }))
    }
}

pub struct CameraPicker {
    device: String,
    orientation_tag: u16,
}

impl CameraPicker {
    pub fn new(device: impl Into<String>, orientation_tag: u16) -> Self {
        Self {
            device: device.into(),
            orientation_tag,
        }
    }
}

impl ImageSource for CameraPicker {
    fn pick(&mut self) -> Result<Option<PickedImage>> {
        log::info!("Opening camera: {}", self.device);
        let mut camera = Camera::open(&self.device).context("Failed to open camera")?;
        let image = camera.grab().context("Failed to capture frame")?;
        Ok(Some(PickedImage {
            image,
            orientation_tag: self.orientation_tag,
            source: Source::Camera,
        }))
    }
}

/// Decode `path` and read its stored EXIF orientation tag.
///
/// A picture without an orientation tag is upright (tag 1). A tag that is
/// present is returned verbatim, even when out of range, so the caller can
/// reject it instead of guessing.
pub fn open_with_orientation(path: &Path) -> Result<(DynamicImage, u16)> {
    let mut decoder = ImageReader::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .with_guessed_format()?
        .into_decoder()
        .with_context(|| format!("decoding {}", path.display()))?;

    let tag = match decoder.exif_metadata() {
        Ok(Some(exif)) => exif_orientation_tag(&exif).unwrap_or(1),
        Ok(None) => 1,
        Err(e) => {
            log::warn!("ignoring unreadable EXIF in {}: {}", path.display(), e);
            1
        }
    };

    let image = DynamicImage::from_decoder(decoder)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok((image, tag))
}

/// Find the `Orientation` entry in IFD0 of a TIFF-structured EXIF block.
pub fn exif_orientation_tag(exif: &[u8]) -> Option<u16> {
    let tiff = exif.strip_prefix(b"Exif\0\0").unwrap_or(exif);
    let big_endian = match tiff.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    let u16_at = |at: usize| -> Option<u16> {
        let b: [u8; 2] = tiff.get(at..at + 2)?.try_into().ok()?;
        Some(if big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    };
    let u32_at = |at: usize| -> Option<u32> {
        let b: [u8; 4] = tiff.get(at..at + 4)?.try_into().ok()?;
        Some(if big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    };

    if u16_at(2)? != 42 {
        return None;
    }
    let ifd = u32_at(4)? as usize;
    let count = u16_at(ifd)? as usize;
    (0..count)
        .map(|i| ifd + 2 + i * 12)
        .find(|&entry| u16_at(entry) == Some(EXIF_ORIENTATION))
        // SHORT value, left-justified in the 4-byte value field
        .and_then(|entry| u16_at(entry + 8))
}

/// One line of the interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickRequest {
    Gallery(PathBuf),
    Camera,
    Cancel,
}

impl PickRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (command, rest) = line
            .split_once(char::is_whitespace)
            .map(|(c, r)| (c, r.trim()))
            .unwrap_or((line, ""));
        match command {
            "gallery" | "g" if !rest.is_empty() => Ok(PickRequest::Gallery(PathBuf::from(rest))),
            "gallery" | "g" => anyhow::bail!("gallery needs a path"),
            "camera" | "c" => Ok(PickRequest::Camera),
            "cancel" | "" => Ok(PickRequest::Cancel),
            other => anyhow::bail!("unknown command {:?}, expected gallery/camera/cancel", other),
        }
    }
}
