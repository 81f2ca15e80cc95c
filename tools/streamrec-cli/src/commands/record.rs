//! Record a stream.

use std::path::PathBuf;

use streamrec_common::config::AppConfig;
use streamrec_common::formats::{ImageFormat, VideoContainer};
use streamrec_media_engine::GstMediaEngine;
use streamrec_recorder::{RecorderEvent, SessionConfig, StreamRecorder};
use tokio::sync::broadcast;

pub struct RecordArgs {
    pub uri: String,
    pub snapshots: bool,
    pub video: bool,
    pub snapshot_dir: Option<PathBuf>,
    pub video_dir: Option<PathBuf>,
    pub snapshot_interval: Option<u64>,
    pub segment_minutes: Option<u64>,
    pub image_format: Option<ImageFormat>,
    pub container: Option<VideoContainer>,
    pub display: bool,
}

pub async fn run(mut config: AppConfig, args: RecordArgs) -> anyhow::Result<()> {
    if !args.snapshots && !args.video {
        anyhow::bail!("Nothing to record: pass --snapshots, --video, or both");
    }

    let rec = &mut config.recording;
    if let Some(dir) = args.snapshot_dir {
        rec.snapshot_dir = dir;
    }
    if let Some(dir) = args.video_dir {
        rec.video_dir = dir;
    }
    if let Some(secs) = args.snapshot_interval {
        rec.snapshot_interval_secs = secs;
    }
    if let Some(mins) = args.segment_minutes {
        rec.segment_interval_mins = mins;
    }
    if let Some(format) = args.image_format {
        rec.image_format = format;
    }
    if let Some(container) = args.container {
        rec.video_container = container;
    }
    rec.display = rec.display && args.display;

    let plugin_dir = config.engine.resolve_plugin_dir()?;
    let engine = GstMediaEngine::new(plugin_dir.as_deref())?;

    let session =
        SessionConfig::from_defaults(args.uri, args.snapshots, args.video, &config.recording);
    let mut recorder = StreamRecorder::new(session, Box::new(engine))?;

    let session = recorder.config();
    println!("Recording {}", session.stream_uri);
    if session.snapshots {
        println!(
            "  Snapshots: every {}s into {}",
            session.snapshot_interval.as_secs(),
            session.snapshot_dir.display()
        );
    }
    if session.video {
        println!(
            "  Video: {}-minute {} segments into {}",
            session.segment_interval.as_secs() / 60,
            session.video_container,
            session.video_dir.display()
        );
    }
    println!();

    let logger = tokio::spawn(log_events(recorder.subscribe()));

    recorder.start().await?;

    println!("Press Ctrl+C to stop recording...");
    println!();

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;

    println!();
    recorder.shutdown().await?;
    logger.abort();
    println!("Recording stopped.");

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<RecorderEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &RecorderEvent) {
    match event {
        RecorderEvent::StateChanged(state) => tracing::info!(?state, "Session state changed"),
        RecorderEvent::SnapshotSaved { path } => {
            tracing::info!(path = %path.display(), "Snapshot saved")
        }
        RecorderEvent::SnapshotSkipped { path } => {
            tracing::debug!(path = %path.display(), "Snapshot skipped")
        }
        RecorderEvent::SegmentStarted { path } => {
            tracing::info!(path = %path.display(), "Segment started")
        }
        RecorderEvent::SegmentSkipped { path } => {
            tracing::debug!(path = %path.display(), "Segment skipped")
        }
        RecorderEvent::Error { kind, message } => {
            tracing::error!(?kind, %message, "Recorder error")
        }
        RecorderEvent::RecoveryStarted => tracing::info!("Recovering playback"),
        RecorderEvent::RecoveryCompleted => tracing::info!("Playback recovered"),
        RecorderEvent::RecoveryFailed { message } => {
            tracing::error!(%message, "Playback recovery failed")
        }
        RecorderEvent::EngineStateChanged(state) => {
            tracing::debug!(%state, "Engine state changed")
        }
    }
}
