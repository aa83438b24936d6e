//! One camera's acquire → detect → alarm loop

use crate::alarm::AlarmActuator;
use crate::annotate::FrameAnnotator;
use crate::camera::{CameraGuard, DefaultSourceFactory, SourceFactory};
use crate::capture::{strategy_from_config, CaptureJob, CaptureStrategy};
use crate::detection::{detect_guarded, panic_reason, retain_confident, DetectionPort};
use crate::frame::{encode_jpeg, Frame};
use crate::hub::{AlertMessage, CameraStatusMessage, ClearedMessage, FramePacket, HubMessage, Publisher};
use crate::presence::{PresenceStateMachine, Transition};
use chrono::Utc;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use mantion_core::{
    dominant_type, AlarmConfig, CameraId, CameraSource, DetectionEvent, Error,
    EventSink, GlobalStats, MonitorConfig, Result,
};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    Stopped,
    Running,
}

/// Why a session loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    Stopped,
    AcquisitionFailed(String),
    /// The loop panicked
    Faulted(String),
}

/// Called on the session thread after the camera has been released
pub type ExitHook = Arc<dyn Fn(&str, SessionExit) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub threshold: f32,
    pub cycle_delay: Duration,
    pub clear_after_misses: u32,
}

impl SessionSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            threshold: config.detection.threshold,
            cycle_delay: config.session.cycle_delay(),
            clear_after_misses: config.session.clear_after_misses,
        }
    }
}

/// Collaborators shared by every session of a hub
#[derive(Clone)]
pub struct SessionContext {
    pub settings: SessionSettings,
    pub sources: Arc<dyn SourceFactory>,
    pub detector: Arc<dyn DetectionPort>,
    pub annotator: FrameAnnotator,
    pub capture: Arc<dyn CaptureStrategy>,
    pub alarm: AlarmConfig,
    pub sink: Arc<dyn EventSink>,
    pub stats: Arc<GlobalStats>,
    /// Runs alarm playback tasks
    pub runtime: Handle,
}

impl SessionContext {
    pub fn from_config(
        config: &MonitorConfig,
        detector: Arc<dyn DetectionPort>,
        sink: Arc<dyn EventSink>,
        runtime: Handle,
    ) -> Self {
        Self {
            settings: SessionSettings::from_config(config),
            sources: Arc::new(DefaultSourceFactory),
            detector,
            annotator: FrameAnnotator::default(),
            capture: strategy_from_config(&config.capture),
            alarm: config.alarm.clone(),
            sink,
            stats: Arc::new(GlobalStats::new()),
            runtime,
        }
    }
}

struct Control {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// A camera and the thread that watches it.
///
/// Stopped until [`CameraSession::start`] opens the camera. The loop runs on
/// its own OS thread; [`CameraSession::stop`] is observed within one cycle
/// and releases the camera exactly once.
pub struct CameraSession {
    camera_id: CameraId,
    source: CameraSource,
    context: SessionContext,
    publisher: Publisher,
    running: Arc<AtomicBool>,
    alarm_active: Arc<AtomicBool>,
    on_exit: Option<ExitHook>,
    control: Option<Control>,
}

impl CameraSession {
    pub fn new(
        camera_id: impl Into<CameraId>,
        source: CameraSource,
        context: SessionContext,
        publisher: Publisher,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            source,
            context,
            publisher,
            running: Arc::new(AtomicBool::new(false)),
            alarm_active: Arc::new(AtomicBool::new(false)),
            on_exit: None,
            control: None,
        }
    }

    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.on_exit = Some(hook);
        self
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    pub fn state(&self) -> SessionState {
        if self.is_running() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn alarm_active(&self) -> bool {
        self.alarm_active.load(Ordering::SeqCst)
    }

    /// Open the camera and launch the loop. Starting a running session does
    /// nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a loop that ended on its own
        self.stop();

        let source = self.context.sources.open(&self.source).map_err(|e| {
            Error::Resource(format!("Camera {} failed to open: {}", self.camera_id, e))
        })?;
        let guard = CameraGuard::new(self.camera_id.clone(), source);
        let (stop_tx, stop_rx) = channel::bounded(1);

        let worker = SessionWorker {
            camera_id: self.camera_id.clone(),
            guard,
            context: self.context.clone(),
            publisher: self.publisher.clone(),
            stop: stop_rx,
            running: self.running.clone(),
            alarm_active: self.alarm_active.clone(),
            on_exit: self.on_exit.clone(),
        };

        self.running.store(true, Ordering::SeqCst);
        let thread = std::thread::Builder::new()
            .name(format!("camera-{}", self.camera_id))
            .spawn(move || worker.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                Error::Resource(format!("Cannot start session thread: {}", e))
            })?;

        self.control = Some(Control { stop: stop_tx, thread });
        info!("Camera session {} started", self.camera_id);
        Ok(())
    }

    /// Stop the loop and wait for it to release the camera. Idempotent.
    pub fn stop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        let _ = control.stop.try_send(());
        drop(control.stop);

        // Dropped from the exit hook on our own thread: it is already ending
        if std::thread::current().id() == control.thread.thread().id() {
            return;
        }
        if control.thread.join().is_err() {
            error!("Camera session {} thread panicked", self.camera_id);
            self.running.store(false, Ordering::SeqCst);
        }
        debug!("Camera session {} joined", self.camera_id);
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the session thread
struct SessionWorker {
    camera_id: CameraId,
    guard: CameraGuard,
    context: SessionContext,
    publisher: Publisher,
    stop: Receiver<()>,
    running: Arc<AtomicBool>,
    alarm_active: Arc<AtomicBool>,
    on_exit: Option<ExitHook>,
}

impl SessionWorker {
    fn run(mut self) {
        self.publisher.publish(HubMessage::CameraStatus(CameraStatusMessage {
            camera_id: self.camera_id.clone(),
            online: true,
            reason: None,
        }));

        let exit = match catch_unwind(AssertUnwindSafe(|| self.cycle_loop())) {
            Ok(exit) => exit,
            Err(panic) => SessionExit::Faulted(panic_reason(panic.as_ref())),
        };

        self.guard.release();
        self.alarm_active.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        let reason = match &exit {
            SessionExit::Stopped => {
                info!("Camera session {} stopped", self.camera_id);
                None
            }
            SessionExit::AcquisitionFailed(reason) => {
                error!("Camera session {} ended: {}", self.camera_id, reason);
                Some(reason.clone())
            }
            SessionExit::Faulted(reason) => {
                error!("Camera session {} crashed: {}", self.camera_id, reason);
                Some(format!("session fault: {}", reason))
            }
        };
        self.publisher.publish(HubMessage::CameraStatus(CameraStatusMessage {
            camera_id: self.camera_id.clone(),
            online: false,
            reason,
        }));

        if let Some(hook) = self.on_exit.take() {
            hook(&self.camera_id, exit);
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    fn cycle_loop(&mut self) -> SessionExit {
        let settings = self.context.settings.clone();
        let mut machine = PresenceStateMachine::new(
            self.camera_id.clone(),
            settings.threshold,
            settings.clear_after_misses,
        );
        let actuator = AlarmActuator::new(
            self.camera_id.clone(),
            &self.context.alarm,
            self.context.runtime.clone(),
            self.context.capture.clone(),
            self.context.sink.clone(),
        );
        let mut jobs: Vec<CaptureJob> = Vec::new();
        let mut sequence = 0u64;

        let exit = loop {
            if self.stop_requested() {
                break SessionExit::Stopped;
            }

            let image = match self.guard.read() {
                Ok(image) => image,
                Err(e) => {
                    error!(camera_id = %self.camera_id, "Acquisition error: {}", e);
                    break SessionExit::AcquisitionFailed(e.to_string());
                }
            };
            let now = Utc::now();
            let frame = Frame::new(image, now, sequence);
            sequence += 1;

            for job in jobs.iter_mut() {
                job.feed(&frame);
            }
            jobs.retain(|job| !job.is_finished());

            let mut detections =
                detect_guarded(self.context.detector.as_ref(), &frame, &self.camera_id);
            retain_confident(&mut detections, settings.threshold);
            for d in &detections {
                debug!(
                    camera_id = %self.camera_id,
                    "Detected {} with confidence {:.2} at {:?}",
                    d.kind,
                    d.confidence,
                    <[i32; 4]>::from(d.bbox)
                );
            }
            self.context.stats.record_detections(detections.len(), now);

            match machine.observe(&detections, now) {
                Transition::AlarmStarted => {
                    let kind = dominant_type(&detections);
                    warn!(camera_id = %self.camera_id, "ALARM: {} detected", kind);
                    self.alarm_active.store(true, Ordering::SeqCst);
                    self.context.stats.record_alarm();
                    actuator.start();

                    let mut job =
                        actuator.capture_artifact(DetectionEvent::new(self.camera_id.clone(), kind, now));
                    job.feed(&frame);
                    jobs.push(job);

                    self.publisher.publish(HubMessage::DetectionAlert(AlertMessage {
                        camera_id: self.camera_id.clone(),
                        detections: detections.len(),
                        timestamp: now,
                    }));
                }
                Transition::AlarmCleared => {
                    info!(camera_id = %self.camera_id, "Area clear");
                    self.alarm_active.store(false, Ordering::SeqCst);
                    actuator.stop();
                    self.publisher.publish(HubMessage::AlarmCleared(ClearedMessage {
                        camera_id: self.camera_id.clone(),
                        timestamp: now,
                    }));
                }
                Transition::None => {}
            }

            // Only pay for annotation and encoding when someone is watching
            if self.publisher.wants_frames() {
                let state = machine.state();
                let annotated = self.context.annotator.annotate(frame.image(), &detections, state);
                match encode_jpeg(&annotated) {
                    Ok(jpeg) => self.publisher.publish_frame(FramePacket {
                        camera_id: self.camera_id.clone(),
                        sequence: frame.sequence(),
                        state,
                        detections: detections.len(),
                        jpeg,
                    }),
                    Err(e) => debug!(camera_id = %self.camera_id, "Frame encode failed: {}", e),
                }
            }

            match self.stop.recv_timeout(settings.cycle_delay) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break SessionExit::Stopped,
                Err(RecvTimeoutError::Timeout) => {}
            }
        };

        actuator.stop();
        for job in jobs {
            job.finish();
        }
        exit
    }
}
