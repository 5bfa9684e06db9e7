use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Pipeline configuration.
///
/// Loaded from an optional TOML file named by `CLOCKFACE_CONFIG`, then
/// overridden by `CLOCKFACE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Pre-shipped SCRFD detector model.
    pub detector_model: PathBuf,
    /// Root directory of the face sample store.
    pub sample_dir: PathBuf,
    /// Well-known path of the trained recognizer artifact.
    pub classifier_path: PathBuf,
    /// SQLite database holding the employee directory and attendance ledger.
    pub db_path: PathBuf,
    /// Samples captured per enrollment invocation.
    pub sample_target: u32,
    /// Side of the square canonical face sample.
    pub canonical_size: u32,
    /// Confidence must be strictly greater than this to accept a face.
    pub confidence_threshold: f64,
    /// Divisor in `confidence = 100 × (1 − distance / divisor)`.
    pub distance_divisor: f64,
    /// Skip frames that are almost entirely black before detection.
    pub skip_dark_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            detector_model: data_dir.join("models").join("det_10g.onnx"),
            sample_dir: data_dir.join("FaceData"),
            classifier_path: data_dir.join("Classifier").join("classifier.bin"),
            db_path: data_dir.join("employees.db"),
            sample_target: 200,
            canonical_size: 450,
            confidence_threshold: 77.0,
            distance_divisor: 300.0,
            skip_dark_frames: true,
        }
    }
}

impl Config {
    /// Load from `CLOCKFACE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("CLOCKFACE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `CLOCKFACE_*` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CLOCKFACE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("CLOCKFACE_DETECTOR_MODEL") {
            self.detector_model = PathBuf::from(v);
        }
        if let Some(v) = lookup("CLOCKFACE_SAMPLE_DIR") {
            self.sample_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CLOCKFACE_CLASSIFIER_PATH") {
            self.classifier_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CLOCKFACE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        env_parse(&lookup, "CLOCKFACE_SAMPLE_TARGET", &mut self.sample_target)?;
        env_parse(&lookup, "CLOCKFACE_CANONICAL_SIZE", &mut self.canonical_size)?;
        env_parse(&lookup, "CLOCKFACE_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold)?;
        env_parse(&lookup, "CLOCKFACE_DISTANCE_DIVISOR", &mut self.distance_divisor)?;
        if let Some(v) = lookup("CLOCKFACE_SKIP_DARK_FRAMES") {
            self.skip_dark_frames = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_target == 0 {
            return Err(ConfigError::Invalid("sample_target must be at least 1".into()));
        }
        if self.canonical_size < 16 {
            return Err(ConfigError::Invalid(format!(
                "canonical_size {} is too small (minimum 16)",
                self.canonical_size
            )));
        }
        if !self.distance_divisor.is_finite() || self.distance_divisor == 0.0 {
            return Err(ConfigError::Invalid("distance_divisor must be a non-zero number".into()));
        }
        if !self.confidence_threshold.is_finite() {
            return Err(ConfigError::Invalid("confidence_threshold must be finite".into()));
        }
        Ok(())
    }

    pub fn capture_settings(&self) -> crate::enroll::CaptureSettings {
        crate::enroll::CaptureSettings {
            sample_target: self.sample_target,
            canonical_size: self.canonical_size,
            skip_dark_frames: self.skip_dark_frames,
        }
    }

    pub fn recognition_settings(&self) -> crate::attendance::RecognitionSettings {
        crate::attendance::RecognitionSettings {
            confidence_threshold: self.confidence_threshold,
            distance_divisor: self.distance_divisor,
            canonical_size: self.canonical_size,
            skip_dark_frames: self.skip_dark_frames,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("clockface")
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *slot = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_empirical_constants() {
        let config = Config::default();
        assert_eq!(config.sample_target, 200);
        assert_eq!(config.confidence_threshold, 77.0);
        assert_eq!(config.distance_divisor, 300.0);
        assert_eq!(config.canonical_size, 450);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("CLOCKFACE_CAMERA_DEVICE", "/dev/video4"),
                ("CLOCKFACE_SAMPLE_TARGET", "25"),
                ("CLOCKFACE_CONFIDENCE_THRESHOLD", "80.5"),
                ("CLOCKFACE_SKIP_DARK_FRAMES", "0"),
            ]))
            .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.sample_target, 25);
        assert_eq!(config.confidence_threshold, 80.5);
        assert!(!config.skip_dark_frames);
    }

    #[test]
    fn test_env_rejects_garbage_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("CLOCKFACE_DISTANCE_DIVISOR", "three hundred")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "CLOCKFACE_DISTANCE_DIVISOR"));
    }

    #[test]
    fn test_toml_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clockface.toml");
        std::fs::write(&path, "sample_target = 50\nsample_dir = \"/srv/faces\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sample_target, 50);
        assert_eq!(config.sample_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.distance_divisor, 300.0);
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clockface.toml");
        std::fs::write(&path, "confidence_cutoff = 10\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_zero_divisor() {
        let config = Config {
            distance_divisor: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
