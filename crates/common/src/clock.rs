//! Wall clock and timestamped output naming.
//!
//! Every file streamrec writes is named after the local wall-clock time at
//! which it was requested:
//! - snapshots: `yyyy_MM_dd_HH-mm-ss-fff.<ext>` (millisecond precision)
//! - video segments: `yyyy_MM_dd_HH-mm-ss.<ext>` (second precision)
//!
//! Two requests in the same bucket produce the same name, which is how the
//! recorder detects and skips collisions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime, TimeDelta};

use crate::formats::{ImageFormat, VideoContainer};

const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H-%M-%S-%3f";
const SEGMENT_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H-%M-%S";

/// Source of local wall-clock time for output naming.
pub trait WallClock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += delta;
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// File name for a snapshot taken at `at`.
pub fn snapshot_file_name(at: &NaiveDateTime, format: ImageFormat) -> String {
    format!(
        "{}.{}",
        at.format(SNAPSHOT_TIMESTAMP_FORMAT),
        format.extension()
    )
}

/// File name for a video segment started at `at`.
pub fn segment_file_name(at: &NaiveDateTime, container: VideoContainer) -> String {
    format!(
        "{}.{}",
        at.format(SEGMENT_TIMESTAMP_FORMAT),
        container.extension()
    )
}

/// Full snapshot path inside `dir`.
pub fn snapshot_path(dir: &Path, at: &NaiveDateTime, format: ImageFormat) -> PathBuf {
    dir.join(snapshot_file_name(at, format))
}

/// Full segment path inside `dir`.
pub fn segment_path(dir: &Path, at: &NaiveDateTime, container: VideoContainer) -> PathBuf {
    dir.join(segment_file_name(at, container))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn snapshot_name_has_millisecond_precision() {
        assert_eq!(
            snapshot_file_name(&at(9, 5, 3, 7), ImageFormat::Png),
            "2024_03_07_09-05-03-007.png"
        );
    }

    #[test]
    fn segment_name_has_second_precision() {
        assert_eq!(
            segment_file_name(&at(23, 59, 58, 999), VideoContainer::Mp4),
            "2024_03_07_23-59-58.mp4"
        );
    }

    #[test]
    fn same_second_bucket_collides_for_segments_only() {
        let a = at(12, 0, 0, 100);
        let b = at(12, 0, 0, 900);
        assert_eq!(
            segment_file_name(&a, VideoContainer::Avi),
            segment_file_name(&b, VideoContainer::Avi)
        );
        assert_ne!(
            snapshot_file_name(&a, ImageFormat::Jpeg),
            snapshot_file_name(&b, ImageFormat::Jpeg)
        );
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(at(1, 2, 3, 4));
        let other = clock.clone();
        clock.advance(TimeDelta::milliseconds(1500));
        assert_eq!(other.now(), at(1, 2, 4, 504));
    }

    proptest! {
        #[test]
        fn snapshot_names_sort_like_their_timestamps(
            base_ms in 0i64..3_000_000_000_000,
            step_ms in 1i64..100_000_000,
        ) {
            let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
            let a = epoch + TimeDelta::milliseconds(base_ms);
            let b = a + TimeDelta::milliseconds(step_ms);
            let name_a = snapshot_file_name(&a, ImageFormat::Png);
            let name_b = snapshot_file_name(&b, ImageFormat::Png);
            prop_assert_eq!(name_a.len(), name_b.len());
            prop_assert!(name_a < name_b);
        }
    }
}
