use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Camera identifier, e.g. `camera_1`
pub type CameraId = String;

/// Pose keypoint in pixel coordinates
pub type Keypoint = (i32, i32);

/// What a detection is evidence of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Human,
    Hand,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Human => "human",
            DetectionType::Hand => "hand",
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(DetectionType::Human),
            "hand" => Ok(DetectionType::Hand),
            other => Err(Error::Serialization(format!("Unknown detection type '{}'", other))),
        }
    }
}

/// Axis-aligned box, corners in integer pixels. Always `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if x1 >= x2 || y1 >= y2 {
            return Err(Error::Serialization(format!(
                "Degenerate bounding box ({}, {}, {}, {})",
                x1, y1, x2, y2
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }
}

impl TryFrom<[i32; 4]> for BoundingBox {
    type Error = Error;

    fn try_from(v: [i32; 4]) -> Result<Self> {
        BoundingBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One detector hit on one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub kind: DetectionType,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(
        kind: DetectionType,
        confidence: f32,
        bbox: BoundingBox,
        keypoints: Vec<Keypoint>,
    ) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(Error::Serialization(format!(
                "Confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self { kind, confidence, bbox, keypoints })
    }

    pub fn human(confidence: f32, bbox: BoundingBox) -> Result<Self> {
        Self::new(DetectionType::Human, confidence, bbox, Vec::new())
    }
}

/// Detections for a single frame. Empty means nobody is there.
pub type DetectionSet = Vec<Detection>;

/// Alarm state of one camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresenceState {
    Safe,
    Alarm,
}

impl PresenceState {
    pub fn is_alarm(&self) -> bool {
        matches!(self, PresenceState::Alarm)
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceState::Safe => f.write_str("SAFE"),
            PresenceState::Alarm => f.write_str("ALARM"),
        }
    }
}

/// Persisted record of one SAFE -> ALARM edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Row id, assigned by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub camera_id: CameraId,
    pub detection_type: DetectionType,
    pub artifact_path: Option<PathBuf>,
}

impl DetectionEvent {
    pub fn new(
        camera_id: impl Into<CameraId>,
        detection_type: DetectionType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            camera_id: camera_id.into(),
            detection_type,
            artifact_path: None,
        }
    }

    pub fn with_artifact(mut self, path: Option<PathBuf>) -> Self {
        self.artifact_path = path;
        self
    }
}

/// Event type for a set of detections: `human` wins over `hand`
pub fn dominant_type(detections: &[Detection]) -> DetectionType {
    if detections.iter().any(|d| d.kind == DetectionType::Human) || detections.is_empty() {
        DetectionType::Human
    } else {
        DetectionType::Hand
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_rejects_degenerate() {
        assert!(BoundingBox::new(10, 10, 10, 20).is_err());
        assert!(BoundingBox::new(10, 10, 20, 5).is_err());
        let b = BoundingBox::new(1, 2, 11, 22).unwrap();
        assert_eq!(b.width(), 10);
        assert_eq!(b.height(), 20);

        let wide = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX).unwrap();
        assert_eq!(wide.width(), i32::MAX);
        assert_eq!(wide.height(), i32::MAX);
    }

    #[test]
    fn test_bbox_serde_as_array() {
        let b = BoundingBox::new(1, 2, 3, 4).unwrap();
        assert_eq!(serde_json::to_string(&b).unwrap(), "[1,2,3,4]");
        let bad: std::result::Result<BoundingBox, _> = serde_json::from_str("[5,5,1,1]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_detection_confidence_range() {
        let b = BoundingBox::new(0, 0, 5, 5).unwrap();
        assert!(Detection::human(0.0, b).is_ok());
        assert!(Detection::human(1.0, b).is_ok());
        assert!(Detection::human(1.01, b).is_err());
        assert!(Detection::human(-0.1, b).is_err());
        assert!(Detection::human(f32::NAN, b).is_err());
    }

    #[test]
    fn test_detection_type_round_trip_str() {
        assert_eq!("hand".parse::<DetectionType>().unwrap(), DetectionType::Hand);
        assert_eq!(DetectionType::Human.to_string(), "human");
        assert!("robot".parse::<DetectionType>().is_err());
    }

    #[test]
    fn test_dominant_type() {
        let b = BoundingBox::new(0, 0, 5, 5).unwrap();
        let hand = Detection::new(DetectionType::Hand, 0.9, b, vec![]).unwrap();
        let human = Detection::human(0.5, b).unwrap();
        assert_eq!(dominant_type(&[hand.clone()]), DetectionType::Hand);
        assert_eq!(dominant_type(&[hand, human]), DetectionType::Human);
    }
}
