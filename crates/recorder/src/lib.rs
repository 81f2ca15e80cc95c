//! streamrec Recorder
//!
//! Records a live stream as periodic snapshots, as rotating video segments,
//! or both. One engine actor thread owns the playback engine; the snapshot
//! timer, the rotation timer, error recovery and public calls all submit
//! commands to it, so engine operations never overlap.
//!
//! ```text
//! snapshot timer ──┐
//! rotation timer ──┼──► command queue ──► EngineWorker ──► MediaEngine
//! event pump ──────┘       (mpsc)          (own thread)        │
//!     ▲                                                        │
//!     └──────────────────── EngineEvent ◄──────────────────────┘
//! ```

pub mod events;
pub mod session;
mod worker;

pub use events::*;
pub use session::*;
pub use worker::CaptureOutcome;
