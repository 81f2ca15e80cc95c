//! Playback engine contract.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use streamrec_common::error::StreamrecResult;
use streamrec_common::formats::{ImageFormat, VideoContainer};

/// Lifecycle state reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineState {
    /// Nothing opened yet.
    #[default]
    NothingSpecial,
    /// Opening the stream.
    Opening,
    Playing,
    Paused,
    Stopped,
    /// End of stream reached.
    Ended,
    Error,
}

impl EngineState {
    /// The stream has been requested but has not settled yet.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::NothingSpecial | Self::Opening)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NothingSpecial => "NothingSpecial",
            Self::Opening => "Opening",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Ended => "Ended",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Notification delivered by an engine from its own threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback failed.
    EncounteredError { message: String },
    /// The stream ended.
    EndReached,
    StateChanged(EngineState),
}

/// Where an engine delivers its events.
pub type EngineEventSink = tokio::sync::mpsc::UnboundedSender<EngineEvent>;

/// One destination of a play request. Several outputs duplicate the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    /// Render in a live window.
    Display,
    /// Record to a file in the given container.
    File {
        path: PathBuf,
        container: VideoContainer,
    },
    /// Keep the latest frame available for [`MediaEngine::take_snapshot`].
    Snapshot { format: ImageFormat },
}

/// A request to open and play a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRequest {
    pub uri: String,
    /// Network buffering hint. Lower means less latency.
    pub network_caching: Duration,
    pub outputs: Vec<OutputSpec>,
}

impl PlayRequest {
    pub fn new(uri: impl Into<String>, network_caching: Duration) -> Self {
        Self {
            uri: uri.into(),
            network_caching,
            outputs: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Path of the file output, if the request records.
    pub fn recording_path(&self) -> Option<&Path> {
        self.outputs.iter().find_map(|o| match o {
            OutputSpec::File { path, .. } => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn has_snapshot_output(&self) -> bool {
        self.outputs
            .iter()
            .any(|o| matches!(o, OutputSpec::Snapshot { .. }))
    }

    /// Human-readable sink description, e.g.
    /// `#duplicate{dst=std{access=file,mux=mp4,dst='a.mp4'},dst=display}`.
    pub fn describe(&self) -> String {
        let dsts = self
            .outputs
            .iter()
            .map(|o| match o {
                OutputSpec::Display => "dst=display".to_string(),
                OutputSpec::File { path, container } => format!(
                    "dst=std{{access=file,mux={},dst='{}'}}",
                    container.extension(),
                    path.display()
                ),
                OutputSpec::Snapshot { format } => format!("dst=snapshot{{{}}}", format.extension()),
            })
            .collect::<Vec<_>>()
            .join(",");
        format!(
            ":network-caching={} :sout=#duplicate{{{dsts}}}",
            self.network_caching.as_millis()
        )
    }
}

/// A media playback engine driving one stream at a time.
///
/// Implementations are owned by a single thread; nothing here needs to be
/// re-entrant. Events may be delivered from any thread.
pub trait MediaEngine: Send {
    /// Engine name for logging.
    fn name(&self) -> &str;

    /// Open and play a stream, replacing any current playback.
    fn play(&mut self, request: &PlayRequest) -> StreamrecResult<()>;

    /// Stop current playback and finalize any output files.
    fn stop(&mut self) -> StreamrecResult<()>;

    /// Current lifecycle state.
    fn state(&self) -> EngineState;

    /// Block until the state is no longer transitional or `timeout`
    /// elapses, and return the state at that point.
    fn wait_until_settled(&mut self, timeout: Duration) -> EngineState;

    /// Write the current frame to `path` as an image.
    fn take_snapshot(&mut self, path: &Path) -> StreamrecResult<()>;

    /// Deliver future events to `sink`.
    fn subscribe(&mut self, sink: EngineEventSink);
}
