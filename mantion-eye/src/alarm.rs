//! Audible alarm and evidence capture for one camera

use crate::capture::{CaptureJob, CaptureStrategy};
use mantion_core::{AlarmConfig, DetectionEvent, EventSink};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tracked playback task; stopping it kills the player process
struct Playback {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Playback {
    fn cancel(self) {
        // The task may already have finished on its own
        let _ = self.stop.send(());
    }
}

/// Side effects of an alarm edge: sound playback and artifact capture.
///
/// Playback runs as a task on `runtime`, so `start` and `stop` return at once
/// and may be called from plain threads.
pub struct AlarmActuator {
    camera_id: String,
    sound_path: PathBuf,
    player: String,
    runtime: Handle,
    current: Mutex<Option<Playback>>,
    capture: Arc<dyn CaptureStrategy>,
    sink: Arc<dyn EventSink>,
}

impl AlarmActuator {
    pub fn new(
        camera_id: impl Into<String>,
        config: &AlarmConfig,
        runtime: Handle,
        capture: Arc<dyn CaptureStrategy>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            sound_path: config.sound_path.clone(),
            player: config.player_command(),
            runtime,
            current: Mutex::new(None),
            capture,
            sink,
        }
    }

    /// Begin playback. A playback already running is stopped first.
    pub fn start(&self) {
        let (stop, stop_rx) = oneshot::channel();
        let task = self.runtime.spawn(play(
            self.camera_id.clone(),
            self.player.clone(),
            self.sound_path.clone(),
            stop_rx,
        ));

        if let Some(previous) = self.current.lock().replace(Playback { stop, task }) {
            debug!(camera_id = %self.camera_id, "Replacing running alarm playback");
            previous.cancel();
        }
        info!(camera_id = %self.camera_id, "Alarm triggered");
    }

    /// Halt playback. Does nothing when no alarm is sounding.
    pub fn stop(&self) {
        if let Some(playback) = self.current.lock().take() {
            playback.cancel();
            info!(camera_id = %self.camera_id, "Alarm stopped");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map_or(false, |p| !p.task.is_finished())
    }

    /// Start capturing evidence for `event`. The returned job records the
    /// event (with the artifact path) when it completes.
    pub fn capture_artifact(&self, event: DetectionEvent) -> CaptureJob {
        CaptureJob::start(self.capture.clone(), event, self.sink.clone())
    }
}

impl Drop for AlarmActuator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn player_args(player: &str, sound: &Path) -> Vec<OsString> {
    if player.eq_ignore_ascii_case("powershell") {
        let script = format!(
            "(New-Object Media.SoundPlayer '{}').PlaySync()",
            sound.display()
        );
        vec!["-NoProfile".into(), "-Command".into(), script.into()]
    } else {
        vec![sound.as_os_str().to_os_string()]
    }
}

async fn play(
    camera_id: String,
    player: String,
    sound: PathBuf,
    mut stop: oneshot::Receiver<()>,
) {
    if !sound.exists() {
        error!(%camera_id, "Actuator fault: alarm sound file not found: {}", sound.display());
        return;
    }

    let mut child = match Command::new(&player)
        .args(player_args(&player, &sound))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!(%camera_id, "Actuator fault: alarm playback error ({}): {}", player, e);
            return;
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => debug!(%camera_id, "Alarm playback finished"),
            Ok(status) => warn!(%camera_id, "Actuator fault: {} exited with {}", player, status),
            Err(e) => error!(%camera_id, "Actuator fault: alarm playback error: {}", e),
        },
        _ = &mut stop => {
            if let Err(e) = child.kill().await {
                warn!(%camera_id, "Failed to kill alarm player: {}", e);
            }
            debug!(%camera_id, "Alarm playback interrupted");
        }
    }
}
