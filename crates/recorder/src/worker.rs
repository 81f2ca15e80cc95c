//! The engine actor.
//!
//! `EngineWorker` owns the [`MediaEngine`] on a dedicated thread and runs
//! one [`Command`] at a time. Blocking engine calls (the bounded wait for
//! playback to settle, EOS draining on stop) therefore stall only this
//! thread, and play/stop/snapshot can never race each other.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Timelike;
use streamrec_common::clock::{segment_path, snapshot_path, WallClock};
use streamrec_common::error::{StreamrecError, StreamrecResult};
use streamrec_media_engine::{MediaEngine, OutputSpec, PlayRequest};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::events::{RecorderErrorKind, RecorderEvent, SessionState};
use crate::session::{RecordingModes, SessionConfig};

/// Result of a snapshot or segment request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The file was written (or the segment started) at this path.
    Saved(PathBuf),
    /// A file with this timestamped name already existed; nothing was done.
    Skipped(PathBuf),
}

impl CaptureOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved(_))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Saved(path) | Self::Skipped(path) => path,
        }
    }
}

pub(crate) type Reply<T> = oneshot::Sender<StreamrecResult<T>>;

pub(crate) enum Command {
    TakeSnapshot {
        dir: PathBuf,
        reply: Option<Reply<CaptureOutcome>>,
    },
    StartSegment {
        dir: PathBuf,
        reply: Option<Reply<CaptureOutcome>>,
    },
    /// Stop and start a fresh segment, if video mode is still on.
    RotateSegment,
    PlayLive {
        reply: Option<Reply<()>>,
    },
    Recover,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct EngineWorker {
    engine: Box<dyn MediaEngine>,
    config: Arc<SessionConfig>,
    modes: Arc<RecordingModes>,
    clock: Arc<dyn WallClock>,
    events: broadcast::Sender<RecorderEvent>,
    state: Arc<watch::Sender<SessionState>>,
    last_recovery: Option<Instant>,
}

impl EngineWorker {
    pub(crate) fn new(
        engine: Box<dyn MediaEngine>,
        config: Arc<SessionConfig>,
        modes: Arc<RecordingModes>,
        clock: Arc<dyn WallClock>,
        events: broadcast::Sender<RecorderEvent>,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        Self {
            engine,
            config,
            modes,
            clock,
            events,
            state,
            last_recovery: None,
        }
    }

    /// Move the worker onto its own thread.
    pub(crate) fn spawn(self) -> StreamrecResult<(mpsc::UnboundedSender<Command>, JoinHandle<()>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("streamrec-engine".to_string())
            .spawn(move || self.run(rx))?;
        Ok((tx, handle))
    }

    fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(engine = %self.engine.name(), "Engine worker started");

        while let Some(command) = commands.blocking_recv() {
            match command {
                Command::TakeSnapshot { dir, reply } => {
                    let result = self.take_snapshot(&dir);
                    respond(reply, result);
                }
                Command::StartSegment { dir, reply } => {
                    let result = self.start_video_recording(&dir);
                    respond(reply, result);
                }
                Command::RotateSegment => self.rotate_segment(),
                Command::PlayLive { reply } => {
                    let result = self.play_live();
                    respond(reply, result);
                }
                Command::Recover => self.recover(),
                Command::Shutdown { reply } => {
                    if let Err(e) = self.engine.stop() {
                        tracing::warn!(error = %e, "Failed to stop engine during shutdown");
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }

        tracing::info!("Engine worker stopped");
    }

    /// Capture one frame into `dir`, named after the current millisecond.
    pub(crate) fn take_snapshot(&mut self, dir: &Path) -> StreamrecResult<CaptureOutcome> {
        let result = self.try_take_snapshot(dir);
        match &result {
            Ok(CaptureOutcome::Saved(path)) => {
                tracing::debug!(path = %path.display(), "Snapshot saved");
                self.emit(RecorderEvent::SnapshotSaved { path: path.clone() });
            }
            Ok(CaptureOutcome::Skipped(path)) => {
                tracing::debug!(path = %path.display(), "Snapshot name already taken; skipped");
                self.emit(RecorderEvent::SnapshotSkipped { path: path.clone() });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot recording error");
                self.report(RecorderErrorKind::Snapshot, e);
            }
        }
        result
    }

    fn try_take_snapshot(&mut self, dir: &Path) -> StreamrecResult<CaptureOutcome> {
        let path = snapshot_path(dir, &self.clock.now(), self.config.image_format);
        std::fs::create_dir_all(dir)?;
        if path.exists() {
            return Ok(CaptureOutcome::Skipped(path));
        }
        self.engine.take_snapshot(&path)?;
        Ok(CaptureOutcome::Saved(path))
    }

    /// Start recording a new segment into `dir`, named after the current
    /// second, and wait (bounded) for the stream to play.
    pub(crate) fn start_video_recording(&mut self, dir: &Path) -> StreamrecResult<CaptureOutcome> {
        let result = self.try_start_segment(dir);
        match &result {
            Ok(CaptureOutcome::Saved(path)) => {
                tracing::info!(path = %path.display(), "Video segment started");
                self.emit(RecorderEvent::SegmentStarted { path: path.clone() });
            }
            Ok(CaptureOutcome::Skipped(path)) => {
                tracing::info!(path = %path.display(), "Segment name already taken; skipped");
                self.emit(RecorderEvent::SegmentSkipped { path: path.clone() });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recording error");
                self.report(RecorderErrorKind::for_recording_error(e), e);
            }
        }
        result
    }

    fn try_start_segment(&mut self, dir: &Path) -> StreamrecResult<CaptureOutcome> {
        let path = segment_path(dir, &self.clock.now(), self.config.video_container);
        std::fs::create_dir_all(dir)?;
        if path.exists() {
            return Ok(CaptureOutcome::Skipped(path));
        }

        let request = self.segment_request(&path);
        tracing::debug!(uri = %request.uri, sink = %request.describe(), "Opening stream for recording");
        if let Err(e) = self.engine.play(&request) {
            self.abort_segment(&path);
            return Err(e);
        }

        let settled = self.engine.wait_until_settled(self.config.start_timeout);
        if settled.is_transitional() {
            self.abort_segment(&path);
            return Err(StreamrecError::StartTimeout {
                timeout_ms: self.config.start_timeout.as_millis() as u64,
            });
        }
        if !settled.is_playing() {
            self.abort_segment(&path);
            return Err(StreamrecError::TooManyPlayers {
                state: settled.to_string(),
            });
        }
        Ok(CaptureOutcome::Saved(path))
    }

    /// Leave the engine stopped and remove the partial file.
    fn abort_segment(&mut self, path: &Path) {
        if let Err(e) = self.engine.stop() {
            tracing::warn!(error = %e, "Failed to stop engine after rejected segment");
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed partial segment"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial segment")
            }
        }
    }

    /// Play without recording so snapshots have frames to grab.
    pub(crate) fn play_live(&mut self) -> StreamrecResult<()> {
        let request = self.live_request();
        tracing::info!(uri = %request.uri, sink = %request.describe(), "Starting live playback");
        let result = self.engine.play(&request);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Live playback failed to start");
            self.report(RecorderErrorKind::Recording, e);
        }
        result
    }

    fn rotate_segment(&mut self) {
        if !self.modes.video() {
            return;
        }
        tracing::info!("Rotating video segment");
        if let Err(e) = self.engine.stop() {
            tracing::warn!(error = %e, "Failed to stop previous segment");
        }
        if let Err(e) = self.restart_segment() {
            if e.is_playback_rejected() {
                tracing::warn!("Stream unavailable; recording stays inactive until the next rotation");
            }
        }
    }

    /// Start a fresh segment after the engine was stopped. A name still held
    /// by the segment just stopped frees up in the next second, so that case
    /// waits for it and retries once.
    fn restart_segment(&mut self) -> StreamrecResult<()> {
        let dir = self.config.video_dir.clone();
        let CaptureOutcome::Skipped(taken) = self.start_video_recording(&dir)? else {
            return Ok(());
        };

        let millis = u64::from((self.clock.now().nanosecond() / 1_000_000).min(999));
        let wait = Duration::from_millis(1_000 - millis);
        tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting for a free segment name");
        std::thread::sleep(wait);

        match self.start_video_recording(&dir)? {
            CaptureOutcome::Saved(_) => Ok(()),
            CaptureOutcome::Skipped(_) => Err(StreamrecError::recording(format!(
                "Segment name {} is still taken",
                taken.display()
            ))),
        }
    }

    /// Stop and replay after an engine error or end of stream. Never fails;
    /// problems are logged and emitted as `RecoveryFailed`.
    pub(crate) fn recover(&mut self) {
        if !self.modes.any() {
            self.modes.finish_recovery();
            return;
        }

        if let Some(last) = self.last_recovery {
            let since = last.elapsed();
            if since < self.config.recovery_backoff {
                std::thread::sleep(self.config.recovery_backoff - since);
            }
        }

        self.set_state(SessionState::Recovering);
        self.emit(RecorderEvent::RecoveryStarted);
        tracing::info!("Restarting playback");

        match self.try_recover() {
            Ok(()) => {
                tracing::info!("Playback restarted");
                self.emit(RecorderEvent::RecoveryCompleted);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Playback recovery failed");
                self.emit(RecorderEvent::RecoveryFailed {
                    message: e.to_string(),
                });
            }
        }

        self.last_recovery = Some(Instant::now());
        self.modes.finish_recovery();
        self.set_state(SessionState::Running);
    }

    fn try_recover(&mut self) -> StreamrecResult<()> {
        self.engine.stop()?;
        if self.modes.video() {
            self.restart_segment()
        } else if self.modes.snapshots() {
            self.play_live()
        } else {
            Ok(())
        }
    }

    fn segment_request(&self, path: &Path) -> PlayRequest {
        let request = PlayRequest::new(self.config.stream_uri.clone(), self.config.network_caching)
            .with_output(OutputSpec::File {
                path: path.to_path_buf(),
                container: self.config.video_container,
            });
        self.with_live_outputs(request)
    }

    fn live_request(&self) -> PlayRequest {
        self.with_live_outputs(PlayRequest::new(
            self.config.stream_uri.clone(),
            self.config.network_caching,
        ))
    }

    fn with_live_outputs(&self, mut request: PlayRequest) -> PlayRequest {
        if self.config.display {
            request = request.with_output(OutputSpec::Display);
        }
        if self.modes.snapshots() {
            request = request.with_output(OutputSpec::Snapshot {
                format: self.config.image_format,
            });
        }
        request
    }

    fn set_state(&self, state: SessionState) {
        if self.state.send_replace(state) != state {
            self.emit(RecorderEvent::StateChanged(state));
        }
    }

    fn report(&self, kind: RecorderErrorKind, err: &StreamrecError) {
        self.emit(RecorderEvent::Error {
            kind,
            message: err.to_string(),
        });
    }

    fn emit(&self, event: RecorderEvent) {
        let _ = self.events.send(event);
    }
}

fn respond<T>(reply: Option<Reply<T>>, result: StreamrecResult<T>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}
