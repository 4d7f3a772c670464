use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("FACEMARK_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "facemark")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facemark.toml"))
});

pub static DEFAULT_MODEL_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACEMARK_MODEL_PATH")
            .unwrap_or("/usr/local/share/facemark/face_detection_yunet_2023mar.onnx"),
    )
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// YuNet ONNX model file.
    pub model: PathBuf,
    pub camera: String,
    /// EXIF orientation tag of camera frames (1 = mounted upright).
    pub camera_orientation: u16,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub detection_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_PATH.to_path_buf(),
            camera: "/dev/video0".to_string(),
            camera_orientation: 1,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            detection_timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("facemark-config-{}-{}", std::process::id(), name))
            .join("config.toml")
    }

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let cfg = load_config(Some(&scratch("missing")))?;
        assert_eq!(cfg, Config::default());
        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let path = scratch("round-trip");
        let cfg = Config {
            camera: "/dev/video2".to_string(),
            camera_orientation: 6,
            detection_timeout_ms: 2_500,
            ..Config::default()
        };
        save_config(&cfg, Some(&path))?;
        assert_eq!(load_config(Some(&path))?, cfg);
        std::fs::remove_dir_all(path.parent().unwrap())?;
        Ok(())
    }

    #[test]
    fn test_partial_file_fills_defaults() -> Result<()> {
        let cfg: Config = toml::from_str("score_threshold = 0.8\n")?;
        assert_eq!(cfg.score_threshold, 0.8);
        assert_eq!(cfg.camera, "/dev/video0");
        assert_eq!(cfg.detection_timeout(), Duration::from_secs(10));
        Ok(())
    }
}
