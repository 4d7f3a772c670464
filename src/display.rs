//! Sinks for the currently displayed image.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};

/// Single-writer destination of the displayed picture. Only the coordinator
/// calls it, from its own task.
pub trait DisplaySink: Send {
    fn set_displayed_image(&mut self, image: &DynamicImage) -> Result<()>;
}

/// Shows the image by writing it to `path`. Each update is written to a
/// sibling temp file first and renamed over the target, so readers never see
/// a half-written picture.
pub struct FileDisplay {
    path: PathBuf,
    format: ImageFormat,
}

impl FileDisplay {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ImageFormat::from_path(&path)
            .with_context(|| format!("unsupported output format for {}", path.display()))?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySink for FileDisplay {
    fn set_displayed_image(&mut self, image: &DynamicImage) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);

        // JPEG has no alpha channel
        let encoded = match self.format {
            ImageFormat::Jpeg => image.to_rgb8().save_with_format(&tmp, self.format),
            _ => image.save_with_format(&tmp, self.format),
        };
        if let Err(e) = encoded {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("writing {}", tmp.display()));
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        log::debug!("displayed image written to {}", self.path.display());
        Ok(())
    }
}

/// Keeps every displayed frame in memory; clones share the same history.
#[derive(Clone, Default)]
pub struct MemoryDisplay {
    frames: Arc<Mutex<Vec<DynamicImage>>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<DynamicImage> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn latest(&self) -> Option<DynamicImage> {
        self.frames.lock().ok().and_then(|f| f.last().cloned())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DisplaySink for MemoryDisplay {
    fn set_displayed_image(&mut self, image: &DynamicImage) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| anyhow::anyhow!("display history poisoned"))?
            .push(image.clone());
        Ok(())
    }
}
