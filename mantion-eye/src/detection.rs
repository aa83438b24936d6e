//! Boundary to the pose and hand detector

use crate::error::VisionError;
use crate::frame::Frame;
use mantion_core::{BoundingBox, Detection, DetectionConfig, DetectionSet, DetectionType};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Anything that can find people in a frame.
///
/// Implementations may fail or even panic; sessions only call them through
/// [`detect_guarded`].
pub trait DetectionPort: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<DetectionSet, VisionError>;

    fn name(&self) -> &str {
        "detector"
    }
}

/// Run a detector, turning every failure into an empty set.
pub fn detect_guarded(port: &dyn DetectionPort, frame: &Frame, camera_id: &str) -> DetectionSet {
    match catch_unwind(AssertUnwindSafe(|| port.detect(frame))) {
        Ok(Ok(detections)) => detections,
        Ok(Err(e)) => {
            warn!(camera_id, "Detection fault in {}: {}", port.name(), e);
            Vec::new()
        }
        Err(panic) => {
            warn!(
                camera_id,
                "Detection fault: {} panicked: {}",
                port.name(),
                panic_reason(panic.as_ref())
            );
            Vec::new()
        }
    }
}

pub(crate) fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Drop detections below `threshold`
pub fn retain_confident(detections: &mut DetectionSet, threshold: f32) {
    detections.retain(|d| d.confidence >= threshold);
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(default = "default_kind")]
    kind: DetectionType,
    confidence: f32,
    bbox: [i32; 4],
    #[serde(default)]
    keypoints: Vec<[i32; 2]>,
}

fn default_kind() -> DetectionType {
    DetectionType::Human
}

impl WireDetection {
    fn into_detection(self) -> Option<Detection> {
        let bbox = BoundingBox::try_from(self.bbox).ok()?;
        let keypoints = self.keypoints.into_iter().map(|[x, y]| (x, y)).collect();
        Detection::new(self.kind, self.confidence, bbox, keypoints).ok()
    }
}

/// Detector reached over HTTP.
///
/// Each frame is POSTed as `image/jpeg` to the configured endpoint, which
/// answers `{"detections": [{"kind", "confidence", "bbox", "keypoints"}]}`.
/// `detect` blocks the calling thread on `runtime`, so it must be called from
/// outside that runtime (camera sessions run on their own threads).
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    detect_hands: bool,
    runtime: Handle,
}

impl HttpDetector {
    pub fn new(config: &DetectionConfig, runtime: Handle) -> Result<Self, VisionError> {
        if config.endpoint.trim().is_empty() {
            return Err(VisionError::Config("Detector endpoint is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            detect_hands: config.detect_hands,
            runtime,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse(&self, response: DetectResponse) -> DetectionSet {
        let mut detections = Vec::with_capacity(response.detections.len());
        for wire in response.detections {
            if !self.detect_hands && wire.kind == DetectionType::Hand {
                continue;
            }
            match wire.into_detection() {
                Some(detection) => detections.push(detection),
                None => debug!("Skipping malformed detection from {}", self.endpoint),
            }
        }
        detections
    }
}

impl DetectionPort for HttpDetector {
    fn detect(&self, frame: &Frame) -> Result<DetectionSet, VisionError> {
        let jpeg = frame.to_jpeg()?;
        let request = self
            .client
            .post(&self.endpoint)
            .query(&[("hands", self.detect_hands)])
            .header(CONTENT_TYPE, "image/jpeg")
            .body(jpeg);

        let response = self.runtime.block_on(async move {
            request
                .send()
                .await?
                .error_for_status()?
                .json::<DetectResponse>()
                .await
        })?;

        Ok(self.parse(response))
    }

    fn name(&self) -> &str {
        "http-detector"
    }
}
