use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcofaceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Unset means the transport's own default.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_user_device")]
    pub user_device: i32,
    #[serde(default = "default_environment_device")]
    pub environment_device: i32,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_clip_duration")]
    pub clip_duration_secs: f64,
    #[serde(default = "default_max_clip_bytes")]
    pub max_clip_bytes: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    #[serde(default = "default_min_brightness")]
    pub min_brightness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_seek_back")]
    pub seek_back_secs: f64,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: f64,
}

pub const MAX_CLIP_BYTES: u64 = 15 * 1024 * 1024;

fn default_base_url() -> String { "http://127.0.0.1:5000".to_string() }
fn default_user_device() -> i32 { 0 }
fn default_environment_device() -> i32 { 2 }
fn default_frame_width() -> u32 { 640 }
fn default_frame_height() -> u32 { 480 }
fn default_fps() -> f64 { 30.0 }
fn default_clip_duration() -> f64 { 3.0 }
fn default_max_clip_bytes() -> u64 { MAX_CLIP_BYTES }
fn default_jpeg_quality() -> i32 { 90 }
fn default_min_brightness() -> f64 { 40.0 }
fn default_seek_back() -> f64 { 0.1 }
fn default_extraction_timeout() -> f64 { 3.0 }

impl Default for EcofaceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            camera: CameraConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            user_device: default_user_device(),
            environment_device: default_environment_device(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            fps: default_fps(),
            clip_duration_secs: default_clip_duration(),
            max_clip_bytes: default_max_clip_bytes(),
            jpeg_quality: default_jpeg_quality(),
            min_brightness: default_min_brightness(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            seek_back_secs: default_seek_back(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

impl EcofaceConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {:?}: {}", path, e)))?;
        let config: EcofaceConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among the user and system locations, else defaults.
    pub fn discover() -> Result<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                log::info!("Loading configuration from {:?}", path);
                return Self::load(&path);
            }
        }
        log::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ecoface").join("config.json"));
        }
        paths.push(PathBuf::from("/etc/ecoface/config.json"));
        paths
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            return Err(Error::Config("server.base_url must not be empty".into()));
        }
        if let Some(t) = self.server.timeout_secs {
            positive_duration("server.timeout_secs", t)?;
        }

        let camera = &self.camera;
        positive_duration("camera.clip_duration_secs", camera.clip_duration_secs)?;
        if camera.max_clip_bytes == 0 {
            return Err(Error::Config("camera.max_clip_bytes must be positive".into()));
        }
        if !(camera.fps > 0.0 && camera.fps.is_finite()) {
            return Err(Error::Config(format!("camera.fps must be positive (got {})", camera.fps)));
        }
        if !(0..=100).contains(&camera.jpeg_quality) {
            return Err(Error::Config(format!(
                "camera.jpeg_quality must be within 0..=100 (got {})",
                camera.jpeg_quality
            )));
        }

        let extraction = &self.extraction;
        if !(extraction.seek_back_secs >= 0.0 && extraction.seek_back_secs.is_finite()) {
            return Err(Error::Config(format!(
                "extraction.seek_back_secs must be zero or more (got {})",
                extraction.seek_back_secs
            )));
        }
        positive_duration("extraction.timeout_secs", extraction.timeout_secs)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.server
            .timeout_secs
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }
}

/// A strictly positive number of seconds that fits in a `Duration`.
fn positive_duration(field: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        Ok(_) => Err(Error::Config(format!("{} must be positive", field))),
        Err(e) => Err(Error::Config(format!("{} = {}: {}", field, secs, e))),
    }
}

impl CameraConfig {
    /// Out-of-range values (only possible without `validate`) fall back to the default.
    pub fn clip_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.clip_duration_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_clip_duration()))
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_extraction_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EcofaceConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.server.base_url, "http://127.0.0.1:5000");
        assert_eq!(config.camera.max_clip_bytes, 15 * 1024 * 1024);
        assert_eq!(config.camera.clip_duration(), Duration::from_secs(3));
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"base_url": "http://faces.local:8000"}}, "camera": {{"fps": 15}}}}"#
        )
        .unwrap();
        let config = EcofaceConfig::load(file.path()).unwrap();
        assert_eq!(config.server.base_url, "http://faces.local:8000");
        assert_eq!(config.camera.fps, 15.0);
        assert_eq!(config.camera.frame_width, 640);
        assert_eq!(config.extraction.seek_back_secs, 0.1);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(EcofaceConfig::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn huge_durations_are_config_errors_not_panics() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"camera": {{"clip_duration_secs": 1e300}},
                "extraction": {{"timeout_secs": 1e300}}}}"#
        )
        .unwrap();
        match EcofaceConfig::load(file.path()) {
            Err(Error::Config(msg)) => {
                assert!(msg.contains("camera.clip_duration_secs"), "{}", msg)
            }
            other => panic!("expected config error, got {:?}", other),
        }

        let mut config = EcofaceConfig::default();
        config.server.timeout_secs = Some(f64::INFINITY);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn unvalidated_values_do_not_panic_accessors() {
        let mut config = EcofaceConfig::default();
        config.camera.clip_duration_secs = 1e300;
        config.extraction.timeout_secs = -1.0;
        config.server.timeout_secs = Some(f64::NAN);
        assert_eq!(config.camera.clip_duration(), Duration::from_secs(3));
        assert_eq!(config.extraction.timeout(), Duration::from_secs(3));
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn camera_and_extraction_bounds_are_checked() {
        let cases: [fn(&mut EcofaceConfig); 4] = [
            |c| c.camera.fps = 0.0,
            |c| c.camera.jpeg_quality = 101,
            |c| c.camera.jpeg_quality = -1,
            |c| c.extraction.seek_back_secs = -0.5,
        ];
        for (i, tweak) in cases.iter().enumerate() {
            let mut config = EcofaceConfig::default();
            tweak(&mut config);
            assert!(matches!(config.validate(), Err(Error::Config(_))), "case {}", i);
        }
        assert!(EcofaceConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = EcofaceConfig::default();
        config.extraction.timeout_secs = 0.0;
        assert!(config.validate().is_err());
    }
}
