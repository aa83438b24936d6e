// WebSocket feed: hub messages as JSON text, annotated frames as binary

use crate::dashboard::DashboardState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use mantion_eye::hub::StatusMessage;
use mantion_eye::{FramePacket, HubMessage, MonitorHub};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Only stream frames from this camera
    pub camera: Option<String>,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQueryParams>,
    State(state): State<DashboardState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, params.camera))
}

/// Binary frame layout: `[id_len: u8][camera_id utf8][jpeg bytes]`.
/// Returns `None` for camera ids longer than 255 bytes.
pub fn encode_frame_message(camera_id: &str, jpeg: &[u8]) -> Option<Vec<u8>> {
    let id = camera_id.as_bytes();
    let id_len = u8::try_from(id.len()).ok()?;
    let mut out = Vec::with_capacity(1 + id.len() + jpeg.len());
    out.push(id_len);
    out.extend_from_slice(id);
    out.extend_from_slice(jpeg);
    Some(out)
}

/// Subscriptions for one connection
struct FrameFeed {
    filter: Option<String>,
    streams: StreamMap<String, BroadcastStream<FramePacket>>,
}

impl FrameFeed {
    fn new(hub: &MonitorHub, filter: Option<String>) -> Self {
        let mut feed = Self {
            filter,
            streams: StreamMap::new(),
        };
        for camera_id in hub.camera_ids() {
            feed.follow(hub, &camera_id);
        }
        feed
    }

    fn wants(&self, camera_id: &str) -> bool {
        self.filter.as_deref().map_or(true, |f| f == camera_id)
    }

    fn follow(&mut self, hub: &MonitorHub, camera_id: &str) {
        if !self.wants(camera_id) || self.streams.contains_key(camera_id) {
            return;
        }
        if let Some(rx) = hub.subscribe_frames(camera_id) {
            self.streams.insert(camera_id.to_string(), BroadcastStream::new(rx));
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: MonitorHub, camera: Option<String>) {
    info!("Dashboard client connected (camera filter: {:?})", camera);

    let (mut sender, mut receiver) = socket.split();
    let mut events = hub.subscribe_events();
    let mut feed = FrameFeed::new(&hub, camera);

    let mut send_task = tokio::spawn(async move {
        let greeting = HubMessage::Status(StatusMessage {
            message: "Connected to Mantion safety monitor".to_string(),
        });
        if let Ok(json) = serde_json::to_string(&greeting) {
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }

        loop {
            let outgoing = tokio::select! {
                message = events.recv() => match message {
                    Ok(message) => {
                        if let HubMessage::CameraStatus(status) = &message {
                            if status.online {
                                feed.follow(&hub, &status.camera_id);
                            }
                        }
                        match serde_json::to_string(&message) {
                            Ok(json) => Message::Text(json),
                            Err(e) => {
                                warn!("Failed to serialize hub message: {}", e);
                                continue;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Dashboard client lagged, skipped {} messages", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some((camera_id, packet)) = feed.streams.next(), if !feed.streams.is_empty() => {
                    // A lagged stream yields an error once, then the newest frames
                    let Ok(packet) = packet else { continue };
                    match encode_frame_message(&camera_id, &packet.jpeg) {
                        Some(bytes) => Message::Binary(bytes),
                        None => continue,
                    }
                }
            };

            if sender.send(outgoing).await.is_err() {
                debug!("Dashboard client went away");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    // Whichever side ends first takes the other down with it
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Dashboard client disconnected");
}
