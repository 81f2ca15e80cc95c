//! In-memory engine for exercising the recorder without GStreamer.
//!
//! `ScriptedEngine` is cheap to clone; every clone shares the same script
//! and call log, so a test keeps one clone while the recorder owns another.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use streamrec_common::error::{StreamrecError, StreamrecResult};

use crate::engine::{EngineEvent, EngineEventSink, EngineState, MediaEngine, PlayRequest};

/// Bytes written for every scripted snapshot.
pub const FAKE_FRAME: &[u8] = b"\x89PNG\r\n\x1a\nstreamrec-frame";

/// One call made against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Play(PlayRequest),
    Stop,
    Snapshot(PathBuf),
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<EngineCall>,
    state: EngineState,
    /// Where the next plays settle. Empty means `Playing`; `None` hangs in
    /// `Opening` until the caller's timeout.
    outcomes: VecDeque<Option<EngineState>>,
    snapshot_failure: Option<String>,
    sink: Option<EngineEventSink>,
}

/// A [`MediaEngine`] that follows a script and records every call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The next play settles in `state` instead of `Playing`.
    pub fn settle_next_play_in(&self, state: EngineState) {
        self.script().outcomes.push_back(Some(state));
    }

    /// The next play never leaves `Opening`.
    pub fn hang_next_play(&self) {
        self.script().outcomes.push_back(None);
    }

    /// Snapshots fail with `message` from now on.
    pub fn fail_snapshots(&self, message: impl Into<String>) {
        self.script().snapshot_failure = Some(message.into());
    }

    /// Deliver an event as if the engine raised it.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.script().sink {
            let _ = sink.send(event);
        }
    }

    pub fn emit_error(&self, message: &str) {
        self.emit(EngineEvent::EncounteredError {
            message: message.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.script().calls.clone()
    }

    pub fn plays(&self) -> Vec<PlayRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Play(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Stop))
            .count()
    }

    pub fn snapshot_paths(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Snapshot(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn is_subscribed(&self) -> bool {
        self.script().sink.is_some()
    }
}

impl MediaEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn play(&mut self, request: &PlayRequest) -> StreamrecResult<()> {
        // A muxer opens its file as soon as the pipeline starts.
        if let Some(path) = request.recording_path() {
            std::fs::write(path, b"")?;
        }
        let mut script = self.script();
        script.calls.push(EngineCall::Play(request.clone()));
        script.state = match script.outcomes.pop_front() {
            Some(Some(state)) => state,
            Some(None) => EngineState::Opening,
            None => EngineState::Playing,
        };
        Ok(())
    }

    fn stop(&mut self) -> StreamrecResult<()> {
        let mut script = self.script();
        script.calls.push(EngineCall::Stop);
        script.state = EngineState::Stopped;
        Ok(())
    }

    fn state(&self) -> EngineState {
        self.script().state
    }

    fn wait_until_settled(&mut self, timeout: Duration) -> EngineState {
        let state = self.state();
        if state.is_transitional() {
            std::thread::sleep(timeout);
        }
        self.state()
    }

    fn take_snapshot(&mut self, path: &Path) -> StreamrecResult<()> {
        let mut script = self.script();
        script.calls.push(EngineCall::Snapshot(path.to_path_buf()));
        if let Some(message) = &script.snapshot_failure {
            return Err(StreamrecError::snapshot(message.clone()));
        }
        if !script.state.is_playing() {
            return Err(StreamrecError::snapshot(format!(
                "No frame available in state {}",
                script.state
            )));
        }
        drop(script);
        std::fs::write(path, FAKE_FRAME)?;
        Ok(())
    }

    fn subscribe(&mut self, sink: EngineEventSink) {
        self.script().sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutputSpec;
    use streamrec_common::formats::VideoContainer;

    #[test]
    fn plays_settle_as_scripted() {
        let mut engine = ScriptedEngine::new();
        engine.settle_next_play_in(EngineState::Error);
        engine.hang_next_play();

        let request = PlayRequest::new("rtsp://cam", Duration::ZERO);
        engine.play(&request).unwrap();
        assert_eq!(engine.wait_until_settled(Duration::ZERO), EngineState::Error);
        engine.play(&request).unwrap();
        assert_eq!(
            engine.wait_until_settled(Duration::from_millis(1)),
            EngineState::Opening
        );
        engine.play(&request).unwrap();
        assert_eq!(engine.state(), EngineState::Playing);
        assert_eq!(engine.plays().len(), 3);
    }

    #[test]
    fn recording_play_creates_the_output_file() {
        let dir = std::env::temp_dir().join("streamrec_test_scripted_file");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clip.mp4");

        let mut engine = ScriptedEngine::new();
        engine
            .play(
                &PlayRequest::new("rtsp://cam", Duration::ZERO).with_output(OutputSpec::File {
                    path: path.clone(),
                    container: VideoContainer::Mp4,
                }),
            )
            .unwrap();
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn snapshots_need_playback() {
        let mut engine = ScriptedEngine::new();
        let err = engine
            .take_snapshot(Path::new("/nonexistent/never-written.png"))
            .unwrap_err();
        assert!(err.to_string().contains("NothingSpecial"));
    }
}
