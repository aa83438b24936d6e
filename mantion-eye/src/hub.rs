//! MonitorHub - camera supervision and fan-out
//!
//! Owns every `CameraSession` and the global counters. Sessions publish on
//! two kinds of channel:
//!
//! - one lossy frame channel per camera (depth 2, oldest frame dropped for
//!   slow subscribers)
//! - one shared alert channel carrying [`HubMessage`]s
//!
//! Subscribers get exactly what sessions published; the hub does no further
//! processing.

use crate::session::{CameraSession, ExitHook, SessionContext, SessionExit, SessionState};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mantion_core::{
    CameraConfig, CameraId, CameraSource, Error, GlobalStats, PresenceState, Result,
    StatsSnapshot,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Frames kept per camera for subscribers that fall behind
pub const FRAME_CHANNEL_DEPTH: usize = 2;
const ALERT_CHANNEL_DEPTH: usize = 64;

/// Hub message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// Greeting sent to new dashboard connections
    Status(StatusMessage),
    /// A camera went from SAFE to ALARM
    DetectionAlert(AlertMessage),
    /// A camera went from ALARM back to SAFE
    AlarmCleared(ClearedMessage),
    CameraStatus(CameraStatusMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub camera_id: CameraId,
    /// How many people or hands were in view
    pub detections: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearedMessage {
    pub camera_id: CameraId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatusMessage {
    pub camera_id: CameraId,
    pub online: bool,
    /// Why the camera went offline, if it was not asked to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One annotated frame, JPEG encoded
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub camera_id: CameraId,
    pub sequence: u64,
    pub state: PresenceState,
    pub detections: usize,
    pub jpeg: Bytes,
}

/// A session's handle onto the hub channels
#[derive(Debug, Clone)]
pub struct Publisher {
    frames: broadcast::Sender<FramePacket>,
    events: broadcast::Sender<HubMessage>,
}

impl Publisher {
    pub fn new(frames: broadcast::Sender<FramePacket>, events: broadcast::Sender<HubMessage>) -> Self {
        Self { frames, events }
    }

    /// Channels nobody listens to yet
    pub fn detached() -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_DEPTH);
        let (events, _) = broadcast::channel(ALERT_CHANNEL_DEPTH);
        Self { frames, events }
    }

    pub fn wants_frames(&self) -> bool {
        self.frames.receiver_count() > 0
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<FramePacket> {
        self.frames.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HubMessage> {
        self.events.subscribe()
    }

    /// Never blocks; with no subscribers the packet is simply dropped
    pub fn publish_frame(&self, packet: FramePacket) {
        let _ = self.frames.send(packet);
    }

    pub fn publish(&self, message: HubMessage) {
        let _ = self.events.send(message);
    }
}

/// Row of `GET /api/cameras`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    pub camera_id: CameraId,
    pub state: SessionState,
    pub running: bool,
    pub alarm_active: bool,
    pub source: CameraSource,
}

struct SessionEntry {
    generation: Uuid,
    session: CameraSession,
}

struct HubShared {
    context: SessionContext,
    sessions: RwLock<HashMap<CameraId, SessionEntry>>,
    frames: RwLock<HashMap<CameraId, broadcast::Sender<FramePacket>>>,
    events: broadcast::Sender<HubMessage>,
}

impl HubShared {
    /// Exit hook target. Removes the entry only if it is still the session
    /// that exited; a camera re-added under the same id is left alone.
    fn session_exited(&self, camera_id: &str, generation: Uuid, exit: SessionExit) {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(camera_id) {
                Some(entry) if entry.generation == generation => {
                    self.frames.write().remove(camera_id);
                    sessions.remove(camera_id)
                }
                _ => None,
            }
        };

        if let Some(entry) = removed {
            match exit {
                SessionExit::AcquisitionFailed(reason) => {
                    error!("Camera {} removed after acquisition failure: {}", camera_id, reason)
                }
                SessionExit::Faulted(reason) => {
                    error!("Camera {} removed after a session fault: {}", camera_id, reason)
                }
                SessionExit::Stopped => info!("Camera {} removed", camera_id),
            }
            // Dropping on the session's own thread detaches instead of joining
            drop(entry);
        }
    }
}

/// Supervises camera sessions. Cheap to clone.
#[derive(Clone)]
pub struct MonitorHub {
    shared: Arc<HubShared>,
}

impl MonitorHub {
    pub fn new(context: SessionContext) -> Self {
        let (events, _) = broadcast::channel(ALERT_CHANNEL_DEPTH);
        Self {
            shared: Arc::new(HubShared {
                context,
                sessions: RwLock::new(HashMap::new()),
                frames: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn global_stats(&self) -> Arc<GlobalStats> {
        self.shared.context.stats.clone()
    }

    /// Open `source` and start watching it as `camera_id`.
    ///
    /// Fails with `Configuration` for a duplicate id and `Resource` when the
    /// camera cannot be opened or stops before it is registered.
    pub fn add_camera(&self, camera_id: impl Into<CameraId>, source: CameraSource) -> Result<()> {
        let camera_id = camera_id.into();
        let frames = {
            let sessions = self.shared.sessions.write();
            let mut frames = self.shared.frames.write();
            // A camera still starting holds its frame channel but no session yet
            if sessions.contains_key(&camera_id) || frames.contains_key(&camera_id) {
                return Err(Error::Configuration(format!("Camera {} already exists", camera_id)));
            }
            let (tx, _) = broadcast::channel(FRAME_CHANNEL_DEPTH);
            frames.insert(camera_id.clone(), tx.clone());
            tx
        };

        let generation = Uuid::new_v4();
        let weak: Weak<HubShared> = Arc::downgrade(&self.shared);
        let hook: ExitHook = Arc::new(move |id: &str, exit: SessionExit| {
            if let Some(shared) = weak.upgrade() {
                shared.session_exited(id, generation, exit);
            }
        });

        let publisher = Publisher::new(frames, self.shared.events.clone());
        let mut session = CameraSession::new(
            camera_id.clone(),
            source,
            self.shared.context.clone(),
            publisher,
        )
        .with_exit_hook(hook);
        if let Err(e) = session.start() {
            self.shared.frames.write().remove(&camera_id);
            return Err(e);
        }

        let stale = {
            let mut sessions = self.shared.sessions.write();
            // The loop may have died before it was registered; its hook found nothing
            if session.is_running() {
                sessions.insert(camera_id.clone(), SessionEntry { generation, session });
                None
            } else {
                self.shared.frames.write().remove(&camera_id);
                Some(session)
            }
        };

        if let Some(session) = stale {
            drop(session);
            warn!("Camera {} stopped before it was registered", camera_id);
            return Err(Error::Resource(format!(
                "Camera {} stopped before it was registered",
                camera_id
            )));
        }
        info!("Camera {} added", camera_id);
        Ok(())
    }

    /// Stop and forget a camera. Returns `false` for an unknown id.
    pub fn remove_camera(&self, camera_id: &str) -> bool {
        // Out of the map first so the exit hook finds nothing to do
        let entry = {
            let mut sessions = self.shared.sessions.write();
            let entry = sessions.remove(camera_id);
            if entry.is_some() {
                self.shared.frames.write().remove(camera_id);
            }
            entry
        };
        let Some(mut entry) = entry else {
            return false;
        };
        entry.session.stop();
        info!("Camera {} removed", camera_id);
        true
    }

    /// Add every configured camera, skipping (and logging) those that fail.
    /// Returns how many started.
    pub fn start_all(&self, cameras: &[CameraConfig]) -> usize {
        let mut started = 0;
        for camera in cameras {
            match self.add_camera(camera.id.clone(), camera.source.clone()) {
                Ok(()) => started += 1,
                Err(e) => error!("Skipping camera {}: {}", camera.id, e),
            }
        }
        if started == 0 && !cameras.is_empty() {
            warn!("No configured camera could be started");
        }
        started
    }

    /// Stop every session
    pub fn shutdown(&self) {
        let entries: Vec<(CameraId, SessionEntry)> = {
            let mut sessions = self.shared.sessions.write();
            let mut frames = self.shared.frames.write();
            sessions
                .drain()
                .inspect(|(camera_id, _)| {
                    frames.remove(camera_id);
                })
                .collect()
        };
        for (camera_id, mut entry) in entries {
            entry.session.stop();
            info!("Camera {} shut down", camera_id);
        }
    }

    pub fn cameras_active(&self) -> usize {
        self.shared
            .sessions
            .read()
            .values()
            .filter(|e| e.session.is_running())
            .count()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.context.stats.snapshot(self.cameras_active())
    }

    pub fn cameras(&self) -> Vec<CameraStatus> {
        let mut cameras: Vec<CameraStatus> = self
            .shared
            .sessions
            .read()
            .values()
            .map(|e| CameraStatus {
                camera_id: e.session.camera_id().to_string(),
                state: e.session.state(),
                running: e.session.is_running(),
                alarm_active: e.session.alarm_active(),
                source: e.session.source().clone(),
            })
            .collect();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        cameras
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.shared.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HubMessage> {
        self.shared.events.subscribe()
    }

    /// Live receivers of the alert channel
    pub fn event_subscribers(&self) -> usize {
        self.shared.events.receiver_count()
    }

    pub fn subscribe_frames(&self, camera_id: &str) -> Option<broadcast::Receiver<FramePacket>> {
        self.shared.frames.read().get(camera_id).map(|tx| tx.subscribe())
    }
}

impl std::fmt::Debug for MonitorHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHub")
            .field("cameras", &self.camera_ids())
            .finish()
    }
}
