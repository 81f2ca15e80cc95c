//! Events emitted by a running recorder.
//!
//! Nothing the recorder does is fatal to the host; failures show up here
//! (and in the log) instead of being raised.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use streamrec_common::error::StreamrecError;
use streamrec_media_engine::EngineState;

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, nothing armed yet.
    #[default]
    Idle,
    /// Timers armed, playback running per mode.
    Running,
    /// Restarting playback after an engine error or end of stream.
    Recovering,
    /// Shut down.
    Stopped,
}

/// Category of a non-fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderErrorKind {
    /// Capturing a snapshot failed.
    Snapshot,
    /// Starting a segment or playback failed.
    Recording,
    /// The stream settled somewhere other than playing.
    TooManyPlayers,
    /// The stream did not settle before the start timeout.
    StartTimeout,
}

impl RecorderErrorKind {
    pub(crate) fn for_recording_error(err: &StreamrecError) -> Self {
        match err {
            StreamrecError::TooManyPlayers { .. } => Self::TooManyPlayers,
            StreamrecError::StartTimeout { .. } => Self::StartTimeout,
            _ => Self::Recording,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    StateChanged(SessionState),
    SnapshotSaved { path: PathBuf },
    /// A snapshot with the same name already existed.
    SnapshotSkipped { path: PathBuf },
    SegmentStarted { path: PathBuf },
    /// A segment with the same name already existed.
    SegmentSkipped { path: PathBuf },
    Error {
        kind: RecorderErrorKind,
        message: String,
    },
    RecoveryStarted,
    RecoveryCompleted,
    RecoveryFailed { message: String },
    EngineStateChanged(EngineState),
}
