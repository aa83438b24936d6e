// Configuration for the Mantion monitor

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where a camera's frames come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    /// USB/V4L device index (needs the `opencv` feature in mantion-eye)
    Device(u32),
    /// Directory of still images, replayed in name order
    Images(PathBuf),
}

/// One monitored camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    pub source: CameraSource,
}

/// Detector connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for a detection to count as presence
    pub threshold: f32,
    /// Inference service endpoint receiving JPEG frames
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Also report hand detections
    pub detect_hands: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            endpoint: "http://127.0.0.1:8000/detect".to_string(),
            timeout_ms: 2000,
            detect_hands: true,
        }
    }
}

/// Alarm sound settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    pub sound_path: PathBuf,
    /// Player executable; platform default when unset
    pub player: Option<String>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            sound_path: PathBuf::from("alarm.wav"),
            player: None,
        }
    }
}

impl AlarmConfig {
    /// Player used when none is configured
    pub fn player_command(&self) -> String {
        if let Some(player) = &self.player {
            return player.clone();
        }
        if cfg!(target_os = "macos") {
            "afplay".to_string()
        } else if cfg!(target_os = "windows") {
            "powershell".to_string()
        } else {
            "aplay".to_string()
        }
    }
}

/// Kind of evidence saved when an alarm starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Timed clip of the live feed
    VideoClip,
    /// A handful of still images
    BurstImages,
}

/// Evidence capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub clip_duration_secs: u64,
    pub burst_count: u32,
    pub burst_interval_ms: u64,
    /// Root of the `YYYY-MM-DD/` tree
    pub output_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::VideoClip,
            clip_duration_secs: 5,
            burst_count: 3,
            burst_interval_ms: 500,
            output_dir: PathBuf::from("detections"),
        }
    }
}

impl CaptureConfig {
    pub fn clip_duration(&self) -> Duration {
        Duration::from_secs(self.clip_duration_secs)
    }

    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms)
    }
}

/// Event store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    /// Pending events held before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("detections.db"),
            queue_capacity: 256,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_path: PathBuf,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("detections.log"),
            level: "info".to_string(),
        }
    }
}

/// Per-camera loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum time between cycles; caps broadcast rate
    pub cycle_delay_ms: u64,
    /// Consecutive empty cycles needed to leave ALARM
    pub clear_after_misses: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cycle_delay_ms: 33,
            clear_after_misses: 1,
        }
    }
}

impl SessionConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }
}

/// Dashboard server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cameras: Vec<CameraConfig>,
    pub detection: DetectionConfig,
    pub alarm: AlarmConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cameras: vec![CameraConfig {
                id: "camera_1".to_string(),
                source: CameraSource::Device(0),
            }],
            detection: DetectionConfig::default(),
            alarm: AlarmConfig::default(),
            capture: CaptureConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            session: SessionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Text starting with `{` is JSON, anything else TOML
impl std::str::FromStr for MonitorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim_start().starts_with('{') {
            Self::from_json(s)
        } else {
            Self::from_toml(s)
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a file: `.json` files are JSON, anything
    /// else is TOML
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        };
        parsed.map_err(|e| match e {
            ConfigError::ParseError(msg) => {
                ConfigError::ParseError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `MANTION_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(threshold) = std::env::var("MANTION_THRESHOLD") {
            if let Ok(t) = threshold.parse::<f32>() {
                self.detection.threshold = t;
            }
        }

        if let Ok(endpoint) = std::env::var("MANTION_DETECTOR_URL") {
            self.detection.endpoint = endpoint;
        }

        if let Ok(sound) = std::env::var("MANTION_ALARM_SOUND") {
            self.alarm.sound_path = PathBuf::from(sound);
        }

        if let Ok(log_path) = std::env::var("MANTION_LOG_PATH") {
            self.logging.log_path = PathBuf::from(log_path);
        }

        if let Ok(level) = std::env::var("MANTION_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(db) = std::env::var("MANTION_DB_PATH") {
            self.storage.database_path = PathBuf::from(db);
        }

        if let Ok(bind) = std::env::var("MANTION_BIND") {
            self.server.bind_address = bind;
        }
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(ConfigError::ValidationError(
                "detection.threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.detection.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "detection.timeout_ms must be > 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if camera.id.is_empty() || camera.id.len() > 64 {
                return Err(ConfigError::ValidationError(format!(
                    "camera id '{}' must be 1-64 characters",
                    camera.id
                )));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate camera id '{}'",
                    camera.id
                )));
            }
        }

        match self.capture.mode {
            CaptureMode::VideoClip if self.capture.clip_duration_secs == 0 => {
                return Err(ConfigError::ValidationError(
                    "capture.clip_duration_secs must be > 0".to_string(),
                ));
            }
            CaptureMode::BurstImages if self.capture.burst_count == 0 => {
                return Err(ConfigError::ValidationError(
                    "capture.burst_count must be > 0".to_string(),
                ));
            }
            _ => {}
        }

        // Artifact paths are persisted as text
        if self.capture.output_dir.to_str().is_none() {
            return Err(ConfigError::ValidationError(format!(
                "capture.output_dir is not valid UTF-8: {}",
                self.capture.output_dir.display()
            )));
        }

        if self.session.clear_after_misses == 0 {
            return Err(ConfigError::ValidationError(
                "session.clear_after_misses must be > 0".to_string(),
            ));
        }

        if self.storage.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "storage.queue_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MonitorConfig::default();
        assert_eq!(config.detection.threshold, 0.4);
        assert_eq!(config.alarm.sound_path, PathBuf::from("alarm.wav"));
        assert_eq!(config.logging.log_path, PathBuf::from("detections.log"));
        assert_eq!(config.capture.mode, CaptureMode::VideoClip);
        assert_eq!(config.capture.clip_duration_secs, 5);
        assert_eq!(config.capture.burst_count, 3);
        assert_eq!(config.session.cycle_delay_ms, 33);
        assert_eq!(config.session.clear_after_misses, 1);
        assert_eq!(config.cameras.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let text = r#"
            [[cameras]]
            id = "line_a"
            source = { device = 2 }

            [[cameras]]
            id = "line_b"
            source = { images = "/tmp/frames" }

            [detection]
            threshold = 0.6

            [capture]
            mode = "burst_images"
            burst_count = 5
        "#;
        let config: MonitorConfig = text.parse().unwrap();
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].source, CameraSource::Device(2));
        assert_eq!(
            config.cameras[1].source,
            CameraSource::Images(PathBuf::from("/tmp/frames"))
        );
        assert_eq!(config.detection.threshold, 0.6);
        assert_eq!(config.capture.mode, CaptureMode::BurstImages);
        assert_eq!(config.capture.burst_count, 5);
        // untouched sections keep their defaults
        assert_eq!(config.capture.clip_duration_secs, 5);
        assert_eq!(config.session.cycle_delay_ms, 33);
    }

    #[test]
    fn test_config_from_json() {
        let text = r#"{"cameras": [{"id": "c", "source": {"device": 0}}], "alarm": {"sound_path": "siren.wav"}}"#;
        let config: MonitorConfig = text.parse().unwrap();
        assert_eq!(config.alarm.sound_path, PathBuf::from("siren.wav"));
        assert_eq!(config.detection.threshold, 0.4);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mantion.toml");
        std::fs::write(&path, "[server]\nbind_address = \"127.0.0.1:9000\"\n").unwrap();
        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");

        assert!(matches!(
            MonitorConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_config_parse_error() {
        assert!(matches!(
            "cameras = 12".parse::<MonitorConfig>(),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_malformed_json_file_reports_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mantion.json");
        std::fs::write(&path, r#"{"cameras": [}"#).unwrap();

        let Err(ConfigError::ParseError(msg)) = MonitorConfig::from_file(&path) else {
            panic!("expected a parse error");
        };
        assert!(msg.contains("mantion.json"));
        // serde_json positions, not a TOML complaint about the first line
        assert!(msg.contains("line 1 column"), "{}", msg);

        let Err(ConfigError::ParseError(msg)) = r#"{"detection": {"threshold": "high"}}"#.parse::<MonitorConfig>() else {
            panic!("expected a parse error");
        };
        assert!(msg.contains("invalid type"), "{}", msg);
    }

    #[cfg(unix)]
    #[test]
    fn test_validation_rejects_non_utf8_output_dir() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut config = MonitorConfig::default();
        config.capture.output_dir = PathBuf::from(OsStr::from_bytes(b"detections-\xff"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("output_dir")
        ));
    }

    #[test]
    fn test_validation_threshold() {
        let mut config = MonitorConfig::default();
        config.detection.threshold = 1.5;
        assert!(config.validate().is_err());
        config.detection.threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_duplicate_cameras() {
        let mut config = MonitorConfig::default();
        config.cameras.push(config.cameras[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_capture_counts() {
        let mut config = MonitorConfig::default();
        config.capture.clip_duration_secs = 0;
        assert!(config.validate().is_err());

        // zero clip length is irrelevant in burst mode
        config.capture.mode = CaptureMode::BurstImages;
        assert!(config.validate().is_ok());
        config.capture.burst_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_clear_after_misses() {
        let mut config = MonitorConfig::default();
        config.session.clear_after_misses = 0;
        assert!(config.validate().is_err());
    }
}
