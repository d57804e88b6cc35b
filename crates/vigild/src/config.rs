use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Hard cap on configured camera identifiers.
pub const MAX_CAMERAS: usize = 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration: TOML file with `VIGIL_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seconds of continuous absence before the session is locked.
    pub absent_timeout: f64,
    /// Seconds of session idle time required before idle training runs.
    pub idle_threshold: u64,
    /// Probe poll interval while a user is present.
    pub present_interval: f64,
    /// Probe poll interval while nobody is detected.
    pub absent_interval: f64,
    /// How often the idle-training loop re-checks the session.
    pub train_poll_interval: f64,
    /// Dataset root for captured images, labels and training metadata.
    pub dataset: PathBuf,
    /// Detector weights file; also keys the whitelist store.
    pub model: PathBuf,
    pub epochs: u32,
    pub batch: u32,
    /// External training command; idle training is disabled when unset.
    pub train_command: Option<String>,
    /// External presence probe command (exit 0 = authorized user seen);
    /// presence arrives only via D-Bus reports when unset.
    pub probe_command: Option<String>,
    /// Where to record the SHA-256 of the trained weights.
    pub profile_hash: Option<PathBuf>,
    /// Camera identifiers the capture tooling writes under.
    pub cameras: Vec<String>,
    /// State directory for the whitelist store and defaults.
    pub state_dir: PathBuf,
}

/// On-disk shape; everything optional so partial files merge over defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    absent_timeout: Option<f64>,
    idle_threshold: Option<u64>,
    present_interval: Option<f64>,
    absent_interval: Option<f64>,
    train_poll_interval: Option<f64>,
    dataset: Option<PathBuf>,
    model: Option<PathBuf>,
    epochs: Option<u32>,
    batch: Option<u32>,
    train_command: Option<String>,
    probe_command: Option<String>,
    profile_hash: Option<PathBuf>,
    cameras: Option<Vec<String>>,
    state_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `VIGIL_CONFIG` (default
    /// `$XDG_CONFIG_HOME/vigil/config.toml`); a missing file is an empty
    /// one. Environment variables override file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self::resolve(file))
    }

    fn resolve(file: FileConfig) -> Self {
        let state_dir = std::env::var("VIGIL_STATE_DIR")
            .map(PathBuf::from)
            .ok()
            .or(file.state_dir)
            .unwrap_or_else(default_state_dir);

        let mut cameras = env_string("VIGIL_CAMERAS")
            .map(|v| v.split(',').map(str::to_string).collect())
            .or(file.cameras)
            .unwrap_or_default();
        cameras.truncate(MAX_CAMERAS);

        Self {
            absent_timeout: env_f64("VIGIL_ABSENT_TIMEOUT")
                .or(file.absent_timeout)
                .unwrap_or(30.0),
            idle_threshold: env_u64("VIGIL_IDLE_THRESHOLD")
                .or(file.idle_threshold)
                .unwrap_or(0),
            present_interval: env_f64("VIGIL_PRESENT_INTERVAL")
                .or(file.present_interval)
                .unwrap_or(10.0),
            absent_interval: env_f64("VIGIL_ABSENT_INTERVAL")
                .or(file.absent_interval)
                .unwrap_or(5.0),
            train_poll_interval: env_f64("VIGIL_TRAIN_POLL_INTERVAL")
                .or(file.train_poll_interval)
                .unwrap_or(10.0),
            dataset: env_path("VIGIL_DATASET")
                .or(file.dataset)
                .unwrap_or_else(|| state_dir.join("dataset")),
            model: env_path("VIGIL_MODEL")
                .or(file.model)
                .unwrap_or_else(|| state_dir.join("model.pt")),
            epochs: env_u32("VIGIL_EPOCHS").or(file.epochs).unwrap_or(1),
            batch: env_u32("VIGIL_BATCH").or(file.batch).unwrap_or(1),
            train_command: env_string("VIGIL_TRAIN_COMMAND").or(file.train_command),
            probe_command: env_string("VIGIL_PROBE_COMMAND").or(file.probe_command),
            profile_hash: env_path("VIGIL_PROFILE_HASH").or(file.profile_hash),
            cameras,
            state_dir,
        }
    }

    /// Create the per-camera image and label directories the capture
    /// tooling expects under the dataset root.
    pub fn ensure_camera_dirs(&self) -> std::io::Result<()> {
        for camera in self.cameras.iter().take(MAX_CAMERAS) {
            std::fs::create_dir_all(self.dataset.join("images").join(camera))?;
            std::fs::create_dir_all(self.dataset.join("labels").join(camera))?;
        }
        Ok(())
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("VIGIL_CONFIG") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("vigil/config.toml")
}

fn default_state_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vigil")
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/vigil.toml")).unwrap();
        assert_eq!(config.absent_timeout, 30.0);
        assert_eq!(config.idle_threshold, 0);
        assert_eq!(config.present_interval, 10.0);
        assert_eq!(config.absent_interval, 5.0);
        assert!(config.train_command.is_none());
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
absent_timeout = 12.5
idle_threshold = 300
train_command = "vigil-train"
cameras = ["front", "door"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.absent_timeout, 12.5);
        assert_eq!(config.idle_threshold, 300);
        assert_eq!(config.train_command.as_deref(), Some("vigil-train"));
        assert_eq!(config.cameras, vec!["front", "door"]);
        // Untouched knobs keep their defaults.
        assert_eq!(config.batch, 1);
    }

    #[test]
    fn camera_list_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cameras: Vec<String> = (0..30).map(|i| format!("\"cam{i}\"")).collect();
        std::fs::write(&path, format!("cameras = [{}]", cameras.join(", "))).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cameras.len(), MAX_CAMERAS);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "absent_timout = 10.0").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn ensure_camera_dirs_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "dataset = \"{}\"\ncameras = [\"cam0\"]",
                dir.path().join("data").display()
            ),
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        config.ensure_camera_dirs().unwrap();
        assert!(dir.path().join("data/images/cam0").is_dir());
        assert!(dir.path().join("data/labels/cam0").is_dir());
    }
}
