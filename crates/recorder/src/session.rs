//! Recording session management.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use streamrec_common::clock::{SystemClock, WallClock};
use streamrec_common::config::RecordingDefaults;
use streamrec_common::error::{StreamrecError, StreamrecResult};
use streamrec_common::formats::{ImageFormat, VideoContainer};
use streamrec_media_engine::{EngineEvent, MediaEngine};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::events::{RecorderEvent, SessionState};
use crate::worker::{CaptureOutcome, Command, EngineWorker, Reply};

const EVENT_CAPACITY: usize = 256;

/// Longest accepted snapshot or rotation interval.
pub const MAX_TIMER_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for a recording session. Immutable once the recorder is
/// built.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stream to record. Not validated; the engine decides what it accepts.
    pub stream_uri: String,

    /// Take periodic snapshots.
    pub snapshots: bool,

    /// Record rotating video segments.
    pub video: bool,

    pub snapshot_dir: PathBuf,
    pub video_dir: PathBuf,

    /// Time between snapshots.
    pub snapshot_interval: Duration,

    /// Time between segment rotations.
    pub segment_interval: Duration,

    pub image_format: ImageFormat,
    pub video_container: VideoContainer,

    /// Network buffering hint for the engine.
    pub network_caching: Duration,

    /// Upper bound on waiting for a segment's stream to reach playing.
    pub start_timeout: Duration,

    /// Render the stream live alongside recording.
    pub display: bool,

    /// Minimum spacing between two recoveries.
    pub recovery_backoff: Duration,
}

impl SessionConfig {
    /// A session with the standard defaults: current directory, 5 second
    /// snapshots, 15 minute segments, PNG and MP4.
    pub fn new(stream_uri: impl Into<String>, snapshots: bool, video: bool) -> Self {
        Self::from_defaults(stream_uri, snapshots, video, &RecordingDefaults::default())
    }

    pub fn from_defaults(
        stream_uri: impl Into<String>,
        snapshots: bool,
        video: bool,
        defaults: &RecordingDefaults,
    ) -> Self {
        Self {
            stream_uri: stream_uri.into(),
            snapshots,
            video,
            snapshot_dir: defaults.snapshot_dir.clone(),
            video_dir: defaults.video_dir.clone(),
            snapshot_interval: defaults.snapshot_interval(),
            segment_interval: defaults.segment_interval(),
            image_format: defaults.image_format,
            video_container: defaults.video_container,
            network_caching: defaults.network_caching(),
            start_timeout: defaults.start_timeout(),
            display: defaults.display,
            recovery_backoff: Duration::from_secs(1),
        }
    }

    /// Reject intervals that cannot drive a timer: zero, or longer than
    /// [`MAX_TIMER_INTERVAL`].
    pub fn validate(&self) -> StreamrecResult<()> {
        if self.snapshots && self.snapshot_interval.is_zero() {
            return Err(StreamrecError::config("Snapshot interval must be positive"));
        }
        if self.video && self.segment_interval.is_zero() {
            return Err(StreamrecError::config(
                "Segment rotation interval must be positive",
            ));
        }
        if self.snapshots && self.snapshot_interval > MAX_TIMER_INTERVAL {
            return Err(StreamrecError::config(format!(
                "Snapshot interval must not exceed {}s",
                MAX_TIMER_INTERVAL.as_secs()
            )));
        }
        if self.video && self.segment_interval > MAX_TIMER_INTERVAL {
            return Err(StreamrecError::config(format!(
                "Segment rotation interval must not exceed {}s",
                MAX_TIMER_INTERVAL.as_secs()
            )));
        }
        Ok(())
    }
}

/// Mode flags shared by the handle, timers, event pump and worker.
#[derive(Debug)]
pub(crate) struct RecordingModes {
    snapshots: AtomicBool,
    video: AtomicBool,
    recovery_pending: AtomicBool,
}

impl RecordingModes {
    pub(crate) fn new(snapshots: bool, video: bool) -> Self {
        Self {
            snapshots: AtomicBool::new(snapshots),
            video: AtomicBool::new(video),
            recovery_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn snapshots(&self) -> bool {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub(crate) fn video(&self) -> bool {
        self.video.load(Ordering::SeqCst)
    }

    pub(crate) fn any(&self) -> bool {
        self.snapshots() || self.video()
    }

    pub(crate) fn disable_snapshots(&self) {
        self.snapshots.store(false, Ordering::SeqCst);
    }

    pub(crate) fn disable_video(&self) {
        self.video.store(false, Ordering::SeqCst);
    }

    pub(crate) fn disable_all(&self) {
        self.disable_snapshots();
        self.disable_video();
    }

    /// Claim the single recovery slot. False if one is already queued.
    pub(crate) fn begin_recovery(&self) -> bool {
        self.recovery_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn finish_recovery(&self) {
        self.recovery_pending.store(false, Ordering::SeqCst);
    }
}

/// Records one stream as snapshots, video segments, or both.
///
/// Must be started and shut down from inside a tokio runtime; the engine
/// itself runs on a dedicated worker thread.
pub struct StreamRecorder {
    config: Arc<SessionConfig>,
    modes: Arc<RecordingModes>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RecorderEvent>,
    state: Arc<watch::Sender<SessionState>>,
    engine_events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    worker: Option<JoinHandle<()>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl StreamRecorder {
    /// Build a recorder around `engine`. Nothing plays until [`start`].
    ///
    /// [`start`]: StreamRecorder::start
    pub fn new(config: SessionConfig, engine: Box<dyn MediaEngine>) -> StreamrecResult<Self> {
        Self::with_clock(config, engine, Arc::new(SystemClock))
    }

    /// Like [`StreamRecorder::new`] with a custom clock for file naming.
    pub fn with_clock(
        config: SessionConfig,
        mut engine: Box<dyn MediaEngine>,
        clock: Arc<dyn WallClock>,
    ) -> StreamrecResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let modes = Arc::new(RecordingModes::new(config.snapshots, config.video));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = Arc::new(watch::channel(SessionState::Idle).0);

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        engine.subscribe(engine_tx);

        let (commands, worker) = EngineWorker::new(
            engine,
            config.clone(),
            modes.clone(),
            clock,
            events.clone(),
            state.clone(),
        )
        .spawn()?;

        Ok(Self {
            config,
            modes,
            commands,
            events,
            state,
            engine_events: Some(engine_rx),
            worker: Some(worker),
            tasks: Vec::new(),
        })
    }

    /// Start recording.
    ///
    /// Starts playback per mode and arms the timers. Failing to start the
    /// first segment or playback is reported as an event, not returned; the
    /// timers and recovery keep trying.
    pub async fn start(&mut self) -> StreamrecResult<()> {
        if self.state() != SessionState::Idle {
            return Err(StreamrecError::recording("Session already started"));
        }
        let engine_events = self
            .engine_events
            .take()
            .ok_or_else(|| StreamrecError::recording("Engine events already consumed"))?;

        tracing::info!(
            uri = %self.config.stream_uri,
            snapshots = self.config.snapshots,
            video = self.config.video,
            "Starting stream recorder"
        );

        self.tasks.push(self.spawn_event_pump(engine_events));

        if !self.config.snapshots && !self.config.video {
            tracing::warn!("Neither snapshot nor video mode is enabled; nothing to record");
        }

        // Without video mode, playback only exists to feed snapshots.
        if self.config.snapshots && !self.config.video {
            if let Err(e) = self
                .request(|reply| Command::PlayLive { reply: Some(reply) })
                .await
            {
                tracing::warn!(error = %e, "Initial playback failed; waiting for recovery");
            }
        }

        if self.config.video {
            let dir = self.config.video_dir.clone();
            if let Err(e) = self
                .request(|reply| Command::StartSegment {
                    dir,
                    reply: Some(reply),
                })
                .await
            {
                tracing::warn!(error = %e, "First segment failed; retrying at next rotation");
            }
        }

        if self.config.snapshots {
            self.tasks.push(self.spawn_snapshot_timer());
        }
        if self.config.video {
            self.tasks.push(self.spawn_rotation_timer());
        }

        self.mark_running();
        tracing::info!("Stream recorder running");
        Ok(())
    }

    /// Capture one snapshot into `dir` now.
    pub async fn take_snapshot(&self, dir: impl Into<PathBuf>) -> StreamrecResult<CaptureOutcome> {
        let dir = dir.into();
        self.request(|reply| Command::TakeSnapshot {
            dir,
            reply: Some(reply),
        })
        .await
    }

    /// Start a new video segment in `dir` now, replacing current playback.
    pub async fn start_video_recording(
        &self,
        dir: impl Into<PathBuf>,
    ) -> StreamrecResult<CaptureOutcome> {
        let dir = dir.into();
        self.request(|reply| Command::StartSegment {
            dir,
            reply: Some(reply),
        })
        .await
    }

    /// Subscribe to recorder events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshots_active(&self) -> bool {
        self.modes.snapshots()
    }

    pub fn video_active(&self) -> bool {
        self.modes.video()
    }

    /// Stop the timers and the engine. Commands already queued run first.
    pub async fn shutdown(mut self) -> StreamrecResult<()> {
        tracing::info!("Stopping stream recorder");
        self.modes.disable_all();
        for task in self.tasks.drain(..) {
            task.abort();
        }

        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply: tx }).is_ok() {
            let _ = rx.await;
        }

        if let Some(worker) = self.worker.take() {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::warn!("Engine worker panicked"),
                Err(e) => tracing::warn!(error = %e, "Engine worker join failed"),
            }
        }

        self.set_state(SessionState::Stopped);
        tracing::info!("Stream recorder stopped");
        Ok(())
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> StreamrecResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Leave `Idle`. A recovery the worker already began owns the state and
    /// returns it to `Running` itself.
    fn mark_running(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            let _ = self.events.send(RecorderEvent::StateChanged(SessionState::Running));
        }
    }

    fn set_state(&self, state: SessionState) {
        if self.state.send_replace(state) != state {
            let _ = self.events.send(RecorderEvent::StateChanged(state));
        }
    }

    fn spawn_snapshot_timer(&self) -> tokio::task::JoinHandle<()> {
        let period = self.config.snapshot_interval;
        let dir = self.config.snapshot_dir.clone();
        let modes = self.modes.clone();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !modes.snapshots() {
                    tracing::info!("Snapshot mode off; snapshot timer stopped");
                    break;
                }
                let command = Command::TakeSnapshot {
                    dir: dir.clone(),
                    reply: None,
                };
                if commands.send(command).is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_rotation_timer(&self) -> tokio::task::JoinHandle<()> {
        let period = self.config.segment_interval;
        let modes = self.modes.clone();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !modes.video() {
                    tracing::info!("Video mode off; rotation timer stopped");
                    break;
                }
                if commands.send(Command::RotateSegment).is_err() {
                    break;
                }
            }
        })
    }

    /// Forward engine notifications: errors and end of stream queue one
    /// recovery, state changes are re-emitted.
    fn spawn_event_pump(
        &self,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let modes = self.modes.clone();
        let commands = self.commands.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(event) = engine_events.recv().await {
                match event {
                    EngineEvent::EncounteredError { message } => {
                        tracing::warn!(%message, "Engine reported a playback error");
                        schedule_recovery(&modes, &commands);
                    }
                    EngineEvent::EndReached => {
                        tracing::info!("Stream reached its end");
                        schedule_recovery(&modes, &commands);
                    }
                    EngineEvent::StateChanged(state) => {
                        let _ = events.send(RecorderEvent::EngineStateChanged(state));
                    }
                }
            }
        })
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn schedule_recovery(modes: &RecordingModes, commands: &mpsc::UnboundedSender<Command>) {
    if !modes.any() {
        return;
    }
    if !modes.begin_recovery() {
        tracing::debug!("Recovery already queued");
        return;
    }
    if commands.send(Command::Recover).is_err() {
        modes.finish_recovery();
    }
}

fn worker_gone() -> StreamrecError {
    StreamrecError::engine("Engine worker is not running")
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamrec_media_engine::testing::{EngineCall, ScriptedEngine};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("streamrec_test_session_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn config(dir: &std::path::Path, snapshots: bool, video: bool) -> SessionConfig {
        let mut config = SessionConfig::new("rtsp://camera/stream", snapshots, video);
        config.snapshot_dir = dir.join("snaps");
        config.video_dir = dir.join("videos");
        config.snapshot_interval = Duration::from_secs(1);
        config.segment_interval = Duration::from_secs(60);
        config.start_timeout = Duration::from_millis(20);
        config.display = false;
        config
    }

    fn count(engine: &ScriptedEngine, pred: impl Fn(&EngineCall) -> bool) -> usize {
        engine.calls().iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn defaults_follow_recording_contract() {
        let config = SessionConfig::new("rtsp://x", true, false);
        assert_eq!(config.snapshot_interval, Duration::from_secs(5));
        assert_eq!(config.segment_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.snapshot_dir, PathBuf::from("."));
        assert_eq!(config.video_dir, PathBuf::from("."));
    }

    #[test]
    fn zero_intervals_are_rejected_for_active_modes() {
        let mut config = SessionConfig::new("rtsp://x", true, false);
        config.snapshot_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::new("rtsp://x", false, true);
        config.segment_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        // Zero is fine when the mode is off.
        let mut config = SessionConfig::new("rtsp://x", false, false);
        config.snapshot_interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn intervals_beyond_the_ceiling_are_rejected() {
        let mut config = SessionConfig::new("rtsp://x", true, false);
        config.snapshot_interval = Duration::from_secs(u64::MAX);
        assert!(matches!(config.validate(), Err(StreamrecError::Config { .. })));

        let defaults = RecordingDefaults {
            segment_interval_mins: u64::MAX,
            ..RecordingDefaults::default()
        };
        let config = SessionConfig::from_defaults("rtsp://x", false, true, &defaults);
        assert!(matches!(config.validate(), Err(StreamrecError::Config { .. })));

        let mut config = SessionConfig::new("rtsp://x", true, true);
        config.snapshot_interval = MAX_TIMER_INTERVAL;
        config.segment_interval = MAX_TIMER_INTERVAL;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn recovery_slot_is_claimed_once() {
        let modes = RecordingModes::new(true, false);
        assert!(modes.begin_recovery());
        assert!(!modes.begin_recovery());
        modes.finish_recovery();
        assert!(modes.begin_recovery());
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let dir = scratch("start_twice");
        let engine = ScriptedEngine::new();
        let mut recorder =
            StreamRecorder::new(config(&dir, false, false), Box::new(engine.clone())).unwrap();
        assert!(engine.is_subscribed());

        recorder.start().await.unwrap();
        assert_eq!(recorder.state(), SessionState::Running);
        assert!(recorder.start().await.is_err());

        recorder.shutdown().await.unwrap();
        // Neither mode: nothing played, only the shutdown stop.
        assert_eq!(engine.calls(), vec![EngineCall::Stop]);
    }

    #[tokio::test]
    async fn start_leaves_a_recovery_in_progress_alone() {
        let dir = scratch("running_after_recovery");
        let recorder =
            StreamRecorder::new(config(&dir, false, false), Box::new(ScriptedEngine::new()))
                .unwrap();
        let mut events = recorder.subscribe();

        recorder.state.send_replace(SessionState::Recovering);
        recorder.mark_running();
        assert_eq!(recorder.state(), SessionState::Recovering);
        assert!(events.try_recv().is_err());

        recorder.state.send_replace(SessionState::Idle);
        recorder.mark_running();
        assert_eq!(recorder.state(), SessionState::Running);
        assert_eq!(
            events.try_recv().unwrap(),
            RecorderEvent::StateChanged(SessionState::Running)
        );
        recorder.shutdown().await.unwrap();
    }

    /// Moves one second forward on every read so no two files collide.
    struct SteppingClock(std::sync::atomic::AtomicI64);

    impl WallClock for SteppingClock {
        fn now(&self) -> chrono::NaiveDateTime {
            let step = self.0.fetch_add(1, Ordering::SeqCst);
            chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|d| d.and_hms_opt(8, 30, 0))
                .unwrap()
                + chrono::TimeDelta::seconds(step)
        }
    }

    fn stepping() -> Arc<dyn WallClock> {
        Arc::new(SteppingClock(std::sync::atomic::AtomicI64::new(0)))
    }

    /// Wait until the worker has drained everything queued so far. Yields
    /// instead of parking so paused time does not auto-advance meanwhile.
    async fn barrier(recorder: &StreamRecorder) {
        let (tx, mut rx) = oneshot::channel();
        recorder
            .commands
            .send(Command::PlayLive { reply: Some(tx) })
            .unwrap();
        loop {
            match rx.try_recv() {
                Ok(result) => return result.unwrap(),
                Err(oneshot::error::TryRecvError::Empty) => tokio::task::yield_now().await,
                Err(oneshot::error::TryRecvError::Closed) => panic!("worker dropped the reply"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_timer_stops_for_good_once_mode_is_off() {
        let dir = scratch("snapshot_timer_off");
        let engine = ScriptedEngine::new();
        let mut recorder = StreamRecorder::with_clock(
            config(&dir, true, false),
            Box::new(engine.clone()),
            stepping(),
        )
        .unwrap();
        recorder.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        recorder.modes.disable_snapshots();
        tokio::time::sleep(Duration::from_secs(10)).await;
        barrier(&recorder).await;

        // Ticks at 1s and 2s fired; the 3s tick saw the flag and ended the task.
        assert_eq!(count(&engine, |c| matches!(c, EngineCall::Snapshot(_))), 2);
        assert!(recorder.tasks.iter().any(|t| t.is_finished()));
        recorder.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_timer_stops_for_good_once_mode_is_off() {
        let dir = scratch("rotation_timer_off");
        let engine = ScriptedEngine::new();
        let mut cfg = config(&dir, false, true);
        cfg.segment_interval = Duration::from_secs(1);
        let mut recorder =
            StreamRecorder::with_clock(cfg, Box::new(engine.clone()), stepping()).unwrap();
        recorder.start().await.unwrap();

        let segments = |engine: &ScriptedEngine| {
            engine
                .plays()
                .iter()
                .filter(|p| p.recording_path().is_some())
                .count()
        };

        // The worker skips rotations once video is off, so let the 1s and 2s
        // rotations land before clearing the flag.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        barrier(&recorder).await;
        assert_eq!(segments(&engine), 3);
        recorder.modes.disable_video();

        tokio::time::sleep(Duration::from_secs(10)).await;
        barrier(&recorder).await;

        assert_eq!(segments(&engine), 3);
        assert!(recorder.tasks.iter().any(|t| t.is_finished()));
        assert!(!recorder.video_active());
        recorder.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_independently_at_their_own_periods() {
        let dir = scratch("independent_timers");
        let engine = ScriptedEngine::new();
        let mut cfg = config(&dir, true, true);
        cfg.snapshot_interval = Duration::from_secs(2);
        cfg.segment_interval = Duration::from_secs(5);
        let mut recorder =
            StreamRecorder::with_clock(cfg, Box::new(engine.clone()), stepping()).unwrap();
        recorder.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        barrier(&recorder).await;

        // Snapshots at 2, 4, 6, 8 and 10s; the first segment plus rotations
        // at 5 and 10s.
        let snapshots = count(&engine, |c| matches!(c, EngineCall::Snapshot(_)));
        let segments = engine
            .plays()
            .iter()
            .filter(|p| p.recording_path().is_some())
            .count();
        assert_eq!(snapshots, 5);
        assert_eq!(segments, 3);
        assert!(recorder.snapshots_active());
        assert!(recorder.video_active());

        recorder.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
