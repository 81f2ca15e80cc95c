//! streamrec Common Utilities
//!
//! Shared infrastructure for all streamrec crates:
//! - Error types and result aliases
//! - Wall clock and timestamped output naming
//! - Image and video format constants
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod formats;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use formats::*;
