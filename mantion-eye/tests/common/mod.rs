//! Scripted cameras and detectors for session and hub tests

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use mantion_core::{
    AlarmConfig, BoundingBox, CameraSource, Detection, DetectionSet, DetectionType, EventSink,
    GlobalStats, MemoryEventSink,
};
use mantion_eye::{
    BurstCapture, Frame, FrameAnnotator, FrameSource, SessionContext, SessionSettings,
    SourceFactory, VisionError, DetectionPort,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// What the scripted detector does for a given frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Absent,
    Present,
    Hand,
    Fault,
    Panic,
    /// A person whose box runs to the end of the coordinate space
    Sprawl,
}

/// Answers by frame sequence number; frames past the script get `after`
pub struct ScriptedDetector {
    script: Vec<Step>,
    after: Step,
}

impl ScriptedDetector {
    pub fn new(script: &[Step]) -> Self {
        Self { script: script.to_vec(), after: Step::Absent }
    }

    pub fn always(step: Step) -> Self {
        Self { script: Vec::new(), after: step }
    }
}

impl DetectionPort for ScriptedDetector {
    fn detect(&self, frame: &Frame) -> Result<DetectionSet, VisionError> {
        let step = self
            .script
            .get(frame.sequence() as usize)
            .copied()
            .unwrap_or(self.after);
        let bbox = BoundingBox::new(4, 4, 20, 28).unwrap();
        match step {
            Step::Absent => Ok(Vec::new()),
            Step::Present => Ok(vec![Detection::human(0.9, bbox).unwrap()]),
            Step::Hand => Ok(vec![
                Detection::new(DetectionType::Hand, 0.8, bbox, Vec::new()).unwrap()
            ]),
            Step::Fault => Err(VisionError::Detector("inference server unreachable".to_string())),
            Step::Panic => panic!("detector blew up"),
            Step::Sprawl => {
                let mut keypoints = vec![(0, 0); 17];
                keypoints[5] = (10, 10);
                keypoints[6] = (i32::MAX, i32::MAX);
                Ok(vec![Detection::new(
                    DetectionType::Human,
                    0.9,
                    BoundingBox::new(0, 0, i32::MAX, 10).unwrap(),
                    keypoints,
                )
                .unwrap()])
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Camera that yields `limit` frames (or forever), fails once `fail` is set
/// and panics once `panic` is set
pub struct ScriptedSource {
    limit: Option<usize>,
    served: usize,
    fail: Arc<AtomicBool>,
    panic: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<RgbImage, VisionError> {
        if self.panic.load(Ordering::SeqCst) {
            panic!("driver crashed");
        }
        if self.fail.load(Ordering::SeqCst) || self.limit.map_or(false, |l| self.served >= l) {
            return Err(VisionError::Acquisition("device unplugged".to_string()));
        }
        self.served += 1;
        Ok(RgbImage::from_pixel(32, 32, Rgb([self.served as u8, 64, 64])))
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Hands out scripted sources; `Images("missing")` fails to open
#[derive(Default)]
pub struct ScriptedFactory {
    pub limit: Option<usize>,
    pub fail: Arc<AtomicBool>,
    pub panic: Arc<AtomicBool>,
    pub releases: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn limited(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl SourceFactory for ScriptedFactory {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameSource>, VisionError> {
        if let CameraSource::Images(dir) = source {
            if dir.as_os_str() == "missing" {
                return Err(VisionError::Camera("no such camera".to_string()));
            }
        }
        Ok(Box::new(ScriptedSource {
            limit: self.limit,
            served: 0,
            fail: self.fail.clone(),
            panic: self.panic.clone(),
            releases: self.releases.clone(),
        }))
    }
}

pub struct Harness {
    pub runtime: Runtime,
    pub dir: tempfile::TempDir,
    pub sink: Arc<MemoryEventSink>,
    pub stats: Arc<GlobalStats>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            runtime: Runtime::new().unwrap(),
            dir: tempfile::tempdir().unwrap(),
            sink: Arc::new(MemoryEventSink::new()),
            stats: Arc::new(GlobalStats::new()),
        }
    }

    pub fn artifacts(&self) -> PathBuf {
        self.dir.path().join("detections")
    }

    pub fn context(
        &self,
        factory: Arc<dyn SourceFactory>,
        detector: Arc<dyn DetectionPort>,
        cycle_delay: Duration,
    ) -> SessionContext {
        self.context_with_sink(factory, detector, cycle_delay, self.sink.clone())
    }

    pub fn context_with_sink(
        &self,
        factory: Arc<dyn SourceFactory>,
        detector: Arc<dyn DetectionPort>,
        cycle_delay: Duration,
        sink: Arc<dyn EventSink>,
    ) -> SessionContext {
        SessionContext {
            settings: SessionSettings {
                threshold: 0.4,
                cycle_delay,
                clear_after_misses: 1,
            },
            sources: factory,
            detector,
            annotator: FrameAnnotator::default(),
            capture: Arc::new(BurstCapture::new(self.artifacts(), 1, Duration::ZERO)),
            alarm: AlarmConfig {
                sound_path: self.dir.path().join("no-alarm.wav"),
                player: None,
            },
            sink,
            stats: self.stats.clone(),
            runtime: self.runtime.handle().clone(),
        }
    }
}

/// Poll `cond` for up to five seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
