//! mantion-core: shared types for the Mantion safety monitor
//!
//! Holds the error taxonomy, the monitor configuration, the detection data
//! model and the process-wide statistics counters used by every other crate.

pub mod types;
pub mod error;
pub mod config;
pub mod stats;
pub mod sink;

pub use error::{Error, Result};
pub use config::{
    AlarmConfig, CameraConfig, CameraSource, CaptureConfig, CaptureMode, ConfigError,
    DetectionConfig, LoggingConfig, MonitorConfig, ServerConfig, SessionConfig, StorageConfig,
};
pub use types::{
    dominant_type, BoundingBox, CameraId, Detection, DetectionEvent, DetectionSet, DetectionType,
    Keypoint, PresenceState,
};
pub use stats::{GlobalStats, StatsSnapshot};
pub use sink::{EventSink, MemoryEventSink};
