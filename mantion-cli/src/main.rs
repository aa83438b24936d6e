// Mantion command line interface
// Run the monitor, browse recorded detections, query a running dashboard

use anyhow::Context;
use clap::{Parser, Subcommand};
use mantion_core::{CameraConfig, CameraSource, DetectionEvent, MonitorConfig};
use mantion_storage::EventStore;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "mantion")]
#[command(about = "Mantion camera safety monitor", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor and its dashboard
    Run {
        /// Configuration file (JSON or TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Watch a single camera device instead of the configured ones
        #[arg(long)]
        camera: Option<u32>,

        /// Detection confidence threshold
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Show recorded detection events, newest first
    Events {
        /// Event database
        #[arg(long, default_value = "detections.db")]
        db: PathBuf,

        /// Number of events to show
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },

    /// Show statistics from a running dashboard
    Stats {
        #[arg(long, default_value = "http://localhost:5000")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            camera,
            threshold,
        } => run_monitor(config, camera, threshold).await,
        Commands::Events { db, limit } => show_events(db, limit),
        Commands::Stats { server } => show_stats(&server).await,
    }
}

async fn run_monitor(
    config_path: Option<PathBuf>,
    camera: Option<u32>,
    threshold: Option<f32>,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    config.apply_env();

    // Flags win over file and environment
    if let Some(index) = camera {
        config.cameras = vec![CameraConfig {
            id: format!("camera_{}", index),
            source: CameraSource::Device(index),
        }];
    }
    if let Some(threshold) = threshold {
        config.detection.threshold = threshold;
    }
    config.validate().context("invalid configuration")?;

    mantion_server::init_logging(&config.logging)?;
    info!(
        "Starting Mantion with {} camera(s), threshold {:.2}",
        config.cameras.len(),
        config.detection.threshold
    );

    mantion_server::run(config).await
}

fn show_events(db: PathBuf, limit: usize) -> anyhow::Result<()> {
    if !db.exists() {
        anyhow::bail!("no event database at {}", db.display());
    }
    let store = EventStore::open(&db).with_context(|| format!("opening {}", db.display()))?;
    let events = store.recent(limit)?;

    if events.is_empty() {
        println!("No detections recorded");
        return Ok(());
    }
    print!("{}", format_events(&events));
    Ok(())
}

fn format_events(events: &[DetectionEvent]) -> String {
    let mut out = format!(
        "{:<20} {:<16} {:<6} {}\n",
        "TIMESTAMP", "CAMERA", "TYPE", "ARTIFACT"
    );
    for event in events {
        let artifact = event
            .artifact_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<20} {:<16} {:<6} {}\n",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.camera_id,
            event.detection_type.as_str(),
            artifact
        ));
    }
    out
}

async fn show_stats(server: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/stats", server.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("Mantion dashboard is not reachable at {}", server))?;
    if !response.status().is_success() {
        anyhow::bail!("Server responded with error: {}", response.status());
    }

    let stats: serde_json::Value = response.json().await?;
    println!("Mantion statistics ({})", server);
    println!("   Total detections: {}", stats["total_detections"]);
    println!("   Alarms triggered: {}", stats["alarms_triggered"]);
    println!("   Active cameras:   {}", stats["cameras_active"]);
    match stats["last_detection"].as_str() {
        Some(last) => println!("   Last detection:   {}", last),
        None => println!("   Last detection:   never"),
    }
    println!("   Uptime:           {}s", stats["uptime_seconds"]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mantion_core::DetectionType;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from(["mantion", "run", "--camera", "2", "--threshold", "0.6"]).unwrap();
        match cli.command {
            Commands::Run {
                camera, threshold, ..
            } => {
                assert_eq!(camera, Some(2));
                assert_eq!(threshold, Some(0.6));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_format_events_table() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let events = vec![
            DetectionEvent::new("camera_1", DetectionType::Human, ts)
                .with_artifact(Some(PathBuf::from("detections/2024-03-01/camera_1_123005_000.mjpeg"))),
            DetectionEvent::new("camera_2", DetectionType::Hand, ts),
        ];

        let table = format_events(&events);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("TIMESTAMP"));
        assert!(lines[1].contains("2024-03-01 12:30:05"));
        assert!(lines[1].contains("camera_1"));
        assert!(lines[1].ends_with(".mjpeg"));
        assert!(lines[2].contains("camera_2"));
        assert!(lines[2].ends_with('-'));
    }
}
