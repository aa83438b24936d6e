// Process wiring: store, detector, hub, dashboard

use crate::dashboard::{create_router, DashboardState};
use anyhow::{bail, Context};
use axum::Router;
use mantion_core::{EventSink, MonitorConfig};
use mantion_eye::{HttpDetector, MonitorHub, SessionContext};
use mantion_storage::{EventStore, QueuedEventSink};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{info, warn};

/// A running monitor: camera sessions plus the event writer behind them
pub struct Monitor {
    hub: MonitorHub,
    store: EventStore,
    sink: Arc<QueuedEventSink>,
}

impl Monitor {
    /// Open the event store, connect the detector and start every configured
    /// camera. Blocks while cameras open.
    ///
    /// Fails when cameras are configured but none of them could be started.
    pub fn start(config: &MonitorConfig, runtime: Handle) -> anyhow::Result<Self> {
        let store = EventStore::open(&config.storage.database_path).with_context(|| {
            format!(
                "opening event store {}",
                config.storage.database_path.display()
            )
        })?;
        let sink = Arc::new(
            QueuedEventSink::spawn(store.clone(), config.storage.queue_capacity)
                .context("starting event writer")?,
        );

        let detector = Arc::new(
            HttpDetector::new(&config.detection, runtime.clone())
                .context("creating detector client")?,
        );
        info!("Detector endpoint: {}", detector.endpoint());

        let event_sink: Arc<dyn EventSink> = sink.clone();
        let context = SessionContext::from_config(config, detector, event_sink, runtime);
        let hub = MonitorHub::new(context);

        let started = hub.start_all(&config.cameras);
        if started == 0 && !config.cameras.is_empty() {
            sink.shutdown();
            bail!("none of the {} configured cameras could be started", config.cameras.len());
        }
        info!("Monitoring {} of {} cameras", started, config.cameras.len());

        Ok(Self { hub, store, sink })
    }

    pub fn hub(&self) -> &MonitorHub {
        &self.hub
    }

    pub fn router(&self) -> Router {
        create_router(DashboardState::new(self.hub.clone(), Some(self.store.clone())))
    }

    /// Serve the dashboard until Ctrl+C or SIGTERM, then shut down
    pub async fn serve(self, bind_address: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("binding {}", bind_address))?;
        info!("Dashboard listening on http://{}", listener.local_addr()?);

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(wait_for_shutdown())
            .await;

        self.shutdown().await;
        served.context("dashboard server failed")
    }

    /// Stop all sessions, then flush pending events
    pub async fn shutdown(self) {
        let Self { hub, sink, .. } = self;
        let joined = tokio::task::spawn_blocking(move || {
            hub.shutdown();
            sink.shutdown();
        })
        .await;
        if let Err(e) = joined {
            warn!("Shutdown task failed: {}", e);
        }
        info!("Monitor stopped");
    }
}

/// Start the monitor described by `config` and serve its dashboard
pub async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let runtime = Handle::current();
    let bind_address = config.server.bind_address.clone();
    let monitor = tokio::task::spawn_blocking(move || Monitor::start(&config, runtime))
        .await
        .context("monitor startup task failed")??;
    monitor.serve(&bind_address).await
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
