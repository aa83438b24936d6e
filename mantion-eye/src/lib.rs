//! mantion-eye: camera monitoring for the Mantion safety monitor
//!
//! Each camera runs in a [`CameraSession`] on its own thread: frames are read
//! from a [`FrameSource`], passed to a [`DetectionPort`], and fed to a
//! [`PresenceStateMachine`]. SAFE → ALARM edges sound the alarm, capture
//! evidence and record a detection event. [`MonitorHub`] supervises the
//! sessions and fans their output out to dashboard subscribers.

pub mod alarm;
pub mod annotate;
pub mod camera;
pub mod capture;
pub mod detection;
pub mod error;
pub mod frame;
pub mod hub;
pub mod presence;
pub mod session;

pub use alarm::AlarmActuator;
pub use annotate::FrameAnnotator;
pub use camera::{CameraGuard, DefaultSourceFactory, FrameSource, ImageSequenceSource, SourceFactory};
pub use capture::{BurstCapture, CaptureJob, CaptureStrategy, VideoClipCapture};
pub use detection::{detect_guarded, DetectionPort, HttpDetector};
pub use error::VisionError;
pub use frame::Frame;
pub use hub::{CameraStatus, FramePacket, HubMessage, MonitorHub, Publisher};
pub use presence::{CameraState, PresenceStateMachine, Transition};
pub use session::{CameraSession, SessionContext, SessionExit, SessionSettings, SessionState};
