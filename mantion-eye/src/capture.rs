//! Evidence capture when an alarm starts
//!
//! A capture job runs on its own thread and is fed frames by the session that
//! raised the alarm; it never touches the camera. When the artifact is
//! complete (or the session stops feeding it) the job records the detection
//! event with the artifact path, or with no path if writing failed.

use crate::error::VisionError;
use crate::frame::{encode_jpeg, Frame};
use chrono::{DateTime, Local, Utc};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use mantion_core::{CaptureConfig, CaptureMode, DetectionEvent, EventSink};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Frames buffered between a session and its capture job
const FEED_CAPACITY: usize = 16;

/// How evidence is written for one alarm
pub trait CaptureStrategy: Send + Sync {
    fn mode(&self) -> CaptureMode;

    /// Prepare a new artifact for an alarm raised at `started_at`
    fn begin(
        &self,
        camera_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Box<dyn ArtifactWriter>, VisionError>;
}

/// An artifact being written
pub trait ArtifactWriter: Send {
    /// Add a frame. Returns `true` once the artifact wants no more frames.
    fn push(&mut self, frame: &Frame) -> Result<bool, VisionError>;

    /// Close the artifact and return the path to record
    fn finish(self: Box<Self>) -> Result<PathBuf, VisionError>;
}

pub fn strategy_from_config(config: &CaptureConfig) -> Arc<dyn CaptureStrategy> {
    match config.mode {
        CaptureMode::VideoClip => Arc::new(VideoClipCapture::new(
            &config.output_dir,
            config.clip_duration(),
        )),
        CaptureMode::BurstImages => Arc::new(BurstCapture::new(
            &config.output_dir,
            config.burst_count,
            config.burst_interval(),
        )),
    }
}

/// `<root>/YYYY-MM-DD`, using the local calendar date
pub fn artifact_dir(root: &Path, started_at: DateTime<Utc>) -> PathBuf {
    root.join(started_at.with_timezone(&Local).format("%Y-%m-%d").to_string())
}

/// `<camera>_<HHMMSS>_<millis>`, with anything unsafe in the camera id replaced
fn artifact_stem(camera_id: &str, started_at: DateTime<Utc>) -> String {
    let camera: String = camera_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let local = started_at.with_timezone(&Local);
    format!("{}_{}", camera, local.format("%H%M%S_%3f"))
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

/// Timed clip stored as concatenated JPEG frames (`.mjpeg`)
#[derive(Debug, Clone)]
pub struct VideoClipCapture {
    root: PathBuf,
    duration: Duration,
}

impl VideoClipCapture {
    pub fn new(root: impl AsRef<Path>, duration: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            duration,
        }
    }
}

impl CaptureStrategy for VideoClipCapture {
    fn mode(&self) -> CaptureMode {
        CaptureMode::VideoClip
    }

    fn begin(
        &self,
        camera_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Box<dyn ArtifactWriter>, VisionError> {
        let dir = artifact_dir(&self.root, started_at);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.mjpeg", artifact_stem(camera_id, started_at)));
        let out = BufWriter::new(File::create(&path)?);

        Ok(Box::new(ClipWriter {
            path,
            out,
            duration: self.duration,
            first: None,
            frames: 0,
        }))
    }
}

struct ClipWriter {
    path: PathBuf,
    out: BufWriter<File>,
    duration: Duration,
    first: Option<DateTime<Utc>>,
    frames: u32,
}

impl ArtifactWriter for ClipWriter {
    fn push(&mut self, frame: &Frame) -> Result<bool, VisionError> {
        let first = *self.first.get_or_insert(frame.captured_at());
        self.out.write_all(&frame.to_jpeg()?)?;
        self.frames += 1;
        Ok(elapsed(first, frame.captured_at()) >= self.duration)
    }

    fn finish(self: Box<Self>) -> Result<PathBuf, VisionError> {
        let ClipWriter { path, mut out, frames, .. } = *self;
        out.flush()?;
        if frames == 0 {
            drop(out);
            let _ = std::fs::remove_file(&path);
            return Err(VisionError::Capture(format!(
                "No frames captured for {}",
                path.display()
            )));
        }
        debug!("Clip {} has {} frames", path.display(), frames);
        Ok(path)
    }
}

/// A few stills spaced by `interval`
#[derive(Debug, Clone)]
pub struct BurstCapture {
    root: PathBuf,
    count: u32,
    interval: Duration,
}

impl BurstCapture {
    pub fn new(root: impl AsRef<Path>, count: u32, interval: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            count: count.max(1),
            interval,
        }
    }
}

impl CaptureStrategy for BurstCapture {
    fn mode(&self) -> CaptureMode {
        CaptureMode::BurstImages
    }

    fn begin(
        &self,
        camera_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Box<dyn ArtifactWriter>, VisionError> {
        let dir = artifact_dir(&self.root, started_at);
        std::fs::create_dir_all(&dir)?;

        Ok(Box::new(BurstWriter {
            dir,
            stem: artifact_stem(camera_id, started_at),
            count: self.count,
            interval: self.interval,
            last: None,
            saved: Vec::new(),
        }))
    }
}

struct BurstWriter {
    dir: PathBuf,
    stem: String,
    count: u32,
    interval: Duration,
    last: Option<DateTime<Utc>>,
    saved: Vec<PathBuf>,
}

impl ArtifactWriter for BurstWriter {
    fn push(&mut self, frame: &Frame) -> Result<bool, VisionError> {
        if self.saved.len() as u32 >= self.count {
            return Ok(true);
        }
        let due = match self.last {
            None => true,
            Some(last) => elapsed(last, frame.captured_at()) >= self.interval,
        };
        if due {
            let path = self.dir.join(format!("{}_{}.jpg", self.stem, self.saved.len() + 1));
            std::fs::write(&path, encode_jpeg(frame.image())?)?;
            self.last = Some(frame.captured_at());
            self.saved.push(path);
        }
        Ok(self.saved.len() as u32 >= self.count)
    }

    /// The first image stands for the whole burst
    fn finish(self: Box<Self>) -> Result<PathBuf, VisionError> {
        let BurstWriter { stem, saved, count, .. } = *self;
        if saved.len() < count as usize {
            warn!("Burst {} ended early with {} of {} images", stem, saved.len(), count);
        }
        saved
            .into_iter()
            .next()
            .ok_or_else(|| VisionError::Capture(format!("No images captured for burst {}", stem)))
    }
}

/// A running capture for one alarm.
///
/// Dropping the job without calling [`CaptureJob::finish`] detaches the
/// worker; it still completes and records its event.
pub struct CaptureJob {
    feed: Option<Sender<Frame>>,
    worker: Option<JoinHandle<Option<PathBuf>>>,
}

impl CaptureJob {
    /// Start capturing for `event`; the event is recorded exactly once,
    /// whatever happens to the artifact.
    pub fn start(
        strategy: Arc<dyn CaptureStrategy>,
        event: DetectionEvent,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (tx, rx) = channel::bounded(FEED_CAPACITY);
        let thread_name = format!("capture-{}", event.camera_id);
        // Keep a copy so the event survives a failed spawn
        let fallback = event.clone();
        let worker_sink = sink.clone();

        match std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_capture(strategy, event, worker_sink, rx))
        {
            Ok(worker) => Self {
                feed: Some(tx),
                worker: Some(worker),
            },
            Err(e) => {
                error!(
                    camera_id = %fallback.camera_id,
                    "Actuator fault: cannot start capture worker: {}", e
                );
                sink.record(fallback);
                Self {
                    feed: None,
                    worker: None,
                }
            }
        }
    }

    /// Hand a frame to the worker without blocking. Returns `false` once the
    /// worker has stopped accepting frames.
    pub fn feed(&mut self, frame: &Frame) -> bool {
        let Some(tx) = self.feed.as_ref() else {
            return false;
        };
        match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Capture worker behind, skipping frame {}", frame.sequence());
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.feed = None;
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Stop feeding, then wait for the artifact to be closed and the event
    /// recorded. Returns the recorded artifact path.
    pub fn finish(mut self) -> Option<PathBuf> {
        self.feed = None;
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(path) => path,
            Err(_) => {
                error!("Capture worker panicked");
                None
            }
        }
    }
}

fn run_capture(
    strategy: Arc<dyn CaptureStrategy>,
    event: DetectionEvent,
    sink: Arc<dyn EventSink>,
    frames: Receiver<Frame>,
) -> Option<PathBuf> {
    let path = match write_artifact(strategy.as_ref(), &event, &frames) {
        Ok(path) => {
            info!(
                camera_id = %event.camera_id,
                "Saved {:?} artifact {}",
                strategy.mode(),
                path.display()
            );
            Some(path)
        }
        Err(e) => {
            error!(camera_id = %event.camera_id, "Actuator fault: capture failed: {}", e);
            None
        }
    };
    // Release the session's sender side before the (possibly slow) insert
    drop(frames);
    sink.record(event.with_artifact(path.clone()));
    path
}

fn write_artifact(
    strategy: &dyn CaptureStrategy,
    event: &DetectionEvent,
    frames: &Receiver<Frame>,
) -> Result<PathBuf, VisionError> {
    let mut writer = strategy.begin(&event.camera_id, event.timestamp)?;
    for frame in frames.iter() {
        if writer.push(&frame)? {
            break;
        }
    }
    writer.finish()
}
