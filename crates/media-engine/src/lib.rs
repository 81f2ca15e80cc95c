//! streamrec Media Engine
//!
//! The recorder never decodes, muxes or transports media itself. It drives
//! a playback engine through the [`MediaEngine`] trait: play a stream with
//! a set of outputs, stop it, wait for it to settle, grab a frame, and
//! listen for error and end-of-stream notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                GstMediaEngine                  │
//! │  uridecodebin ──► tee ─┬─► encoder ─► filesink │
//! │                        ├─► autovideosink       │
//! │                        └─► pngenc ─► fakesink  │
//! │                                (last sample)   │
//! │  bus thread ──► EngineState + EngineEvent      │
//! └───────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod pipeline;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::*;
pub use pipeline::GstMediaEngine;
