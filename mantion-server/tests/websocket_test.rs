// Dashboard WebSocket connections against a live listener

use futures_util::{SinkExt, StreamExt};
use mantion_core::{MemoryEventSink, MonitorConfig};
use mantion_eye::{HttpDetector, MonitorHub, SessionContext};
use mantion_server::{create_router, DashboardState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio_tungstenite::connect_async;

fn hub() -> MonitorHub {
    let config = MonitorConfig::default();
    let detector = Arc::new(HttpDetector::new(&config.detection, Handle::current()).unwrap());
    MonitorHub::new(SessionContext::from_config(
        &config,
        detector,
        Arc::new(MemoryEventSink::new()),
        Handle::current(),
    ))
}

async fn serve(hub: MonitorHub) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(DashboardState::new(hub, None));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_close_releases_subscriptions() {
    let hub = hub();
    let url = serve(hub.clone()).await;
    assert_eq!(hub.event_subscribers(), 0);

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    let greeting = ws.next().await.unwrap().unwrap().into_text().unwrap();
    let greeting: serde_json::Value = serde_json::from_str(&greeting).unwrap();
    assert_eq!(greeting["type"], "status");
    assert_eq!(hub.event_subscribers(), 1);

    ws.close(None).await.unwrap();

    // Nothing is published on an idle hub, so only the close can free the receiver
    let deadline = Instant::now() + Duration::from_secs(5);
    while hub.event_subscribers() != 0 {
        assert!(Instant::now() < deadline, "subscription outlived the connection");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
