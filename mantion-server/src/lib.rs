//! mantion-server: process wiring and the live dashboard
//!
//! [`Monitor`] owns the camera hub and the event writer; the dashboard serves
//! statistics, camera status and recent events over HTTP and streams alerts
//! and annotated frames over a WebSocket.

pub mod dashboard;
pub mod logging;
pub mod monitor;
pub mod websocket;

pub use dashboard::{create_router, DashboardState};
pub use logging::init_logging;
pub use monitor::{run, Monitor};
