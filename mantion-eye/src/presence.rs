//! SAFE/ALARM edge detection for one camera

use chrono::{DateTime, Utc};
use mantion_core::{CameraId, Detection, PresenceState};

/// What a single observation did to the alarm state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    AlarmStarted,
    AlarmCleared,
}

/// Per-camera alarm bookkeeping, owned by exactly one session
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    pub camera_id: CameraId,
    pub alarm_active: bool,
    pub last_transition_time: Option<DateTime<Utc>>,
    pub consecutive_miss_count: u32,
}

#[derive(Debug, Clone)]
pub struct PresenceStateMachine {
    state: CameraState,
    threshold: f32,
    clear_after_misses: u32,
}

impl PresenceStateMachine {
    /// `clear_after_misses` below 1 is treated as 1
    pub fn new(camera_id: impl Into<CameraId>, threshold: f32, clear_after_misses: u32) -> Self {
        Self {
            state: CameraState {
                camera_id: camera_id.into(),
                alarm_active: false,
                last_transition_time: None,
                consecutive_miss_count: 0,
            },
            threshold,
            clear_after_misses: clear_after_misses.max(1),
        }
    }

    pub fn state(&self) -> PresenceState {
        if self.state.alarm_active {
            PresenceState::Alarm
        } else {
            PresenceState::Safe
        }
    }

    pub fn camera_state(&self) -> &CameraState {
        &self.state
    }

    /// Feed one cycle's detections.
    ///
    /// Confidence is checked against the threshold again here, so a caller
    /// that forgot to filter cannot raise an alarm on weak detections.
    pub fn observe(&mut self, detections: &[Detection], now: DateTime<Utc>) -> Transition {
        let present = detections.iter().any(|d| d.confidence >= self.threshold);

        if present {
            self.state.consecutive_miss_count = 0;
            if self.state.alarm_active {
                return Transition::None;
            }
            self.state.alarm_active = true;
            self.state.last_transition_time = Some(now);
            return Transition::AlarmStarted;
        }

        self.state.consecutive_miss_count = self.state.consecutive_miss_count.saturating_add(1);
        if self.state.alarm_active && self.state.consecutive_miss_count >= self.clear_after_misses {
            self.state.alarm_active = false;
            self.state.last_transition_time = Some(now);
            return Transition::AlarmCleared;
        }
        Transition::None
    }
}
