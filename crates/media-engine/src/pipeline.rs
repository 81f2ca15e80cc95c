//! GStreamer playback engine.
//!
//! Every play request becomes one pipeline: `uridecodebin` restricted to
//! raw video feeds a `tee`, and each [`OutputSpec`] adds one branch. A bus
//! thread per pipeline turns bus messages into [`EngineState`] transitions
//! and [`EngineEvent`]s.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gst::prelude::*;
use gstreamer as gst;
use streamrec_common::error::{StreamrecError, StreamrecResult};
use streamrec_common::formats::{ImageFormat, VideoContainer};

use crate::engine::{
    EngineEvent, EngineEventSink, EngineState, MediaEngine, OutputSpec, PlayRequest,
};

/// Elements the generated pipelines may use.
pub const REQUIRED_ELEMENTS: &[&str] = &[
    "uridecodebin",
    "queue",
    "videoconvert",
    "tee",
    "x264enc",
    "h264parse",
    "mp4mux",
    "avimux",
    "matroskamux",
    "filesink",
    "autovideosink",
    "videorate",
    "pngenc",
    "jpegenc",
    "fakesink",
];

/// Name of the fakesink holding the latest encoded frame.
const SNAPSHOT_SINK: &str = "snapshot";

const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const BUS_POLL_INTERVAL_MS: u64 = 100;

/// State shared between the engine and its bus thread.
#[derive(Debug, Default)]
struct SharedState {
    state: Mutex<EngineState>,
    changed: Condvar,
}

impl SharedState {
    fn get(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns true if the state actually changed.
    fn set(&self, state: EngineState) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let changed = *guard != state;
        *guard = state;
        self.changed.notify_all();
        changed
    }

    fn wait_settled(&self, timeout: Duration) -> EngineState {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        while guard.is_transitional() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|p| p.into_inner());
            guard = next;
        }
        *guard
    }
}

struct ActivePlayback {
    pipeline: gst::Pipeline,
    bus_stop: Arc<AtomicBool>,
    bus_thread: Option<JoinHandle<()>>,
    /// Whether the muxer needs EOS before the file is playable.
    finalize: bool,
}

impl ActivePlayback {
    fn halt_bus_watch(&mut self) {
        self.bus_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.bus_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Bus watch thread panicked");
            }
        }
    }

    /// Send EOS and wait for it to reach the sinks so muxers can write their
    /// trailers. Bounded so a wedged pipeline cannot block stop forever.
    fn drain_eos(&self) {
        if !self.pipeline.send_event(gst::event::Eos::new()) {
            tracing::warn!("Failed to send EOS event; output may be truncated");
            return;
        }
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= EOS_DRAIN_TIMEOUT {
                tracing::warn!("EOS drain timed out after 10s");
                break;
            }
            let remaining = EOS_DRAIN_TIMEOUT - elapsed;
            match bus.timed_pop(gst::ClockTime::from_nseconds(remaining.as_nanos() as u64)) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!("EOS received; pipeline drained");
                        break;
                    }
                    gst::MessageView::Error(e) => {
                        tracing::warn!(error = %e.error(), "Pipeline error during EOS drain");
                        break;
                    }
                    _ => {}
                },
                None => {
                    tracing::warn!("EOS drain timed out after 10s");
                    break;
                }
            }
        }
    }

    fn shut_down(&mut self) -> StreamrecResult<()> {
        self.halt_bus_watch();
        self.pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| StreamrecError::engine(format!("Failed to stop pipeline: {e:?}")))
    }
}

/// [`MediaEngine`] backed by GStreamer pipelines.
pub struct GstMediaEngine {
    shared: Arc<SharedState>,
    sink: Option<EngineEventSink>,
    active: Option<ActivePlayback>,
}

impl GstMediaEngine {
    /// Initialize GStreamer, scanning `plugin_dir` first when given.
    pub fn new(plugin_dir: Option<&Path>) -> StreamrecResult<Self> {
        init_gstreamer()?;
        if let Some(dir) = plugin_dir {
            let changed = gst::Registry::get().scan_path(dir);
            tracing::info!(dir = %dir.display(), changed, "Scanned engine plugin directory");
        }
        Ok(Self {
            shared: Arc::new(SharedState::default()),
            sink: None,
            active: None,
        })
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }
}

impl MediaEngine for GstMediaEngine {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn play(&mut self, request: &PlayRequest) -> StreamrecResult<()> {
        if self.active.is_some() {
            self.stop()?;
        }

        let launch = describe_pipeline(request)?;
        tracing::debug!(%launch, "Building playback pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| StreamrecError::engine(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| StreamrecError::engine("Launch string did not produce a pipeline"))?;
        apply_source_latency(&pipeline, request.network_caching);

        self.shared.set(EngineState::Opening);
        self.emit(EngineEvent::StateChanged(EngineState::Opening));

        let bus_stop = Arc::new(AtomicBool::new(false));
        let bus_thread = spawn_bus_watch(
            &pipeline,
            self.shared.clone(),
            self.sink.clone(),
            bus_stop.clone(),
        )?;
        let mut active = ActivePlayback {
            pipeline,
            bus_stop,
            bus_thread: Some(bus_thread),
            finalize: request.outputs.iter().any(|o| {
                matches!(o, OutputSpec::File { container, .. } if container.needs_finalize())
            }),
        };

        if let Err(e) = active.pipeline.set_state(gst::State::Playing) {
            if let Err(stop_err) = active.shut_down() {
                tracing::warn!(error = %stop_err, "Failed to tear down rejected pipeline");
            }
            self.shared.set(EngineState::Error);
            return Err(StreamrecError::engine(format!(
                "Failed to start playback of {}: {e:?}",
                request.uri
            )));
        }

        self.active = Some(active);
        Ok(())
    }

    fn stop(&mut self) -> StreamrecResult<()> {
        let Some(mut active) = self.active.take() else {
            self.shared.set(EngineState::Stopped);
            return Ok(());
        };

        active.halt_bus_watch();
        if active.finalize && self.shared.get().is_playing() {
            active.drain_eos();
        }
        let result = active.shut_down();

        if self.shared.set(EngineState::Stopped) {
            self.emit(EngineEvent::StateChanged(EngineState::Stopped));
        }
        result
    }

    fn state(&self) -> EngineState {
        self.shared.get()
    }

    fn wait_until_settled(&mut self, timeout: Duration) -> EngineState {
        self.shared.wait_settled(timeout)
    }

    fn take_snapshot(&mut self, path: &Path) -> StreamrecResult<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| StreamrecError::snapshot("Nothing is playing"))?;
        let sink = active.pipeline.by_name(SNAPSHOT_SINK).ok_or_else(|| {
            StreamrecError::snapshot("Snapshot output is not enabled for the current playback")
        })?;
        let sample = sink
            .property::<Option<gst::Sample>>("last-sample")
            .ok_or_else(|| StreamrecError::snapshot("No frame decoded yet"))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| StreamrecError::snapshot("Last sample carries no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| StreamrecError::snapshot(format!("Failed to map frame: {e}")))?;
        std::fs::write(path, map.as_slice())?;
        Ok(())
    }

    fn subscribe(&mut self, sink: EngineEventSink) {
        self.sink = Some(sink);
    }
}

impl Drop for GstMediaEngine {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "Failed to stop playback on drop");
            }
        }
    }
}

fn spawn_bus_watch(
    pipeline: &gst::Pipeline,
    shared: Arc<SharedState>,
    sink: Option<EngineEventSink>,
    stop: Arc<AtomicBool>,
) -> StreamrecResult<JoinHandle<()>> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| StreamrecError::engine("Pipeline has no bus"))?;
    let pipeline = pipeline.clone();

    let handle = std::thread::Builder::new()
        .name("streamrec-bus".to_string())
        .spawn(move || {
            let emit = |event: EngineEvent| {
                if let Some(sink) = &sink {
                    let _ = sink.send(event);
                }
            };

            while !stop.load(Ordering::SeqCst) {
                let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_INTERVAL_MS))
                else {
                    continue;
                };
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                match msg.view() {
                    gst::MessageView::Error(e) => {
                        let message = match e.debug() {
                            Some(debug) => format!("{} ({debug})", e.error()),
                            None => e.error().to_string(),
                        };
                        tracing::warn!(error = %e.error(), "Playback error");
                        if shared.set(EngineState::Error) {
                            emit(EngineEvent::StateChanged(EngineState::Error));
                        }
                        emit(EngineEvent::EncounteredError { message });
                    }
                    gst::MessageView::Eos(_) => {
                        tracing::info!("End of stream");
                        if shared.set(EngineState::Ended) {
                            emit(EngineEvent::StateChanged(EngineState::Ended));
                        }
                        emit(EngineEvent::EndReached);
                    }
                    gst::MessageView::StateChanged(sc) => {
                        let from_pipeline = msg
                            .src()
                            .map(|src| src == pipeline.upcast_ref::<gst::Object>())
                            .unwrap_or(false);
                        if !from_pipeline || shared.get() == EngineState::Error {
                            continue;
                        }
                        let state = map_gst_state(sc.current(), sc.pending());
                        if shared.set(state) {
                            tracing::debug!(%state, "Engine state changed");
                            emit(EngineEvent::StateChanged(state));
                        }
                    }
                    _ => {}
                }
            }
        })?;
    Ok(handle)
}

fn map_gst_state(current: gst::State, pending: gst::State) -> EngineState {
    match (current, pending) {
        (gst::State::Playing, _) => EngineState::Playing,
        (gst::State::Paused, gst::State::Playing) => EngineState::Opening,
        (gst::State::Paused, _) => EngineState::Paused,
        (gst::State::Ready, _) => EngineState::Opening,
        (gst::State::Null, _) | (gst::State::VoidPending, _) => EngineState::Stopped,
        _ => EngineState::NothingSpecial,
    }
}

/// Hand the caching hint to network sources that expose a `latency`
/// property (rtspsrc, srtsrc, ...).
fn apply_source_latency(pipeline: &gst::Pipeline, caching: Duration) {
    let Some(decoder) = pipeline.by_name("src") else {
        return;
    };
    let latency_ms = caching.as_millis().to_string();
    decoder.connect("source-setup", false, move |values| {
        if let Some(Ok(source)) = values.get(1).map(|v| v.get::<gst::Element>()) {
            if source.find_property("latency").is_some() {
                source.set_property_from_str("latency", &latency_ms);
                tracing::debug!(latency_ms = %latency_ms, "Applied source latency");
            }
        }
        None
    });
}

/// Build the `gst-launch` description for a play request.
pub fn describe_pipeline(request: &PlayRequest) -> StreamrecResult<String> {
    if request.uri.trim().is_empty() {
        return Err(StreamrecError::engine("Stream URI is empty"));
    }
    let snapshot_outputs = request
        .outputs
        .iter()
        .filter(|o| matches!(o, OutputSpec::Snapshot { .. }))
        .count();
    if snapshot_outputs > 1 {
        return Err(StreamrecError::engine(
            "At most one snapshot output per playback",
        ));
    }

    let buffer_ns = request.network_caching.as_nanos() as u64;
    let mut launch = format!(
        "uridecodebin name=src uri=\"{}\" caps=video/x-raw expose-all-streams=false buffer-duration={buffer_ns} ! queue ! videoconvert ! tee name=t",
        escape(&request.uri)
    );

    if request.outputs.is_empty() {
        launch.push_str(" t. ! queue ! fakesink sync=false");
    }
    for output in &request.outputs {
        launch.push_str(" t. ! ");
        launch.push_str(&output_branch(output));
    }
    Ok(launch)
}

fn output_branch(output: &OutputSpec) -> String {
    match output {
        OutputSpec::Display => {
            "queue leaky=downstream max-size-buffers=4 ! videoconvert ! autovideosink sync=false"
                .to_string()
        }
        OutputSpec::File { path, container } => format!(
            "queue ! videoconvert ! x264enc tune=zerolatency speed-preset=veryfast key-int-max=60 ! h264parse ! {} ! filesink location=\"{}\"",
            muxer_element(*container),
            escape(&path.to_string_lossy())
        ),
        OutputSpec::Snapshot { format } => format!(
            "queue leaky=downstream max-size-buffers=1 ! videorate drop-only=true max-rate=4 ! videoconvert ! {} ! fakesink name={SNAPSHOT_SINK} enable-last-sample=true sync=false async=false",
            image_encoder_element(*format)
        ),
    }
}

fn muxer_element(container: VideoContainer) -> &'static str {
    match container {
        VideoContainer::Mp4 => "mp4mux",
        VideoContainer::Avi => "avimux",
        VideoContainer::Matroska => "matroskamux",
    }
}

fn image_encoder_element(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "pngenc",
        ImageFormat::Jpeg => "jpegenc",
    }
}

/// Availability of each element in [`REQUIRED_ELEMENTS`].
pub fn check_elements() -> StreamrecResult<Vec<(&'static str, bool)>> {
    init_gstreamer()?;
    Ok(REQUIRED_ELEMENTS
        .iter()
        .map(|name| (*name, gst::ElementFactory::find(name).is_some()))
        .collect())
}

/// GStreamer version string, e.g. `GStreamer 1.24.2`.
pub fn engine_version() -> StreamrecResult<String> {
    init_gstreamer()?;
    Ok(gst::version_string().to_string())
}

fn init_gstreamer() -> StreamrecResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(StreamrecError::engine_unavailable(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
