//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StreamrecError, StreamrecResult};
use crate::formats::{ImageFormat, VideoContainer};

/// Environment variable naming an extra engine plugin directory.
pub const PLUGIN_DIR_ENV: &str = "STREAMREC_PLUGIN_DIR";

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Media engine location.
    pub engine: EngineConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Directory snapshots are written to.
    pub snapshot_dir: PathBuf,

    /// Directory video segments are written to.
    pub video_dir: PathBuf,

    /// Seconds between snapshots.
    pub snapshot_interval_secs: u64,

    /// Minutes between video segment rotations.
    pub segment_interval_mins: u64,

    /// Snapshot image format.
    pub image_format: ImageFormat,

    /// Video segment container.
    pub video_container: VideoContainer,

    /// Network buffering hint handed to the engine (ms).
    pub network_caching_ms: u64,

    /// Upper bound on waiting for the stream to reach the playing state.
    pub start_timeout_secs: u64,

    /// Render the stream in a live window while recording.
    pub display: bool,
}

/// Where to find the media engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra plugin directory. Must exist when set.
    pub plugin_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "streamrec=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("."),
            video_dir: PathBuf::from("."),
            snapshot_interval_secs: 5,
            segment_interval_mins: 15,
            image_format: ImageFormat::Png,
            video_container: VideoContainer::Mp4,
            network_caching_ms: 100,
            start_timeout_secs: 10,
            display: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn segment_interval(&self) -> Duration {
        Duration::from_secs(self.segment_interval_mins.saturating_mul(60))
    }

    pub fn network_caching(&self) -> Duration {
        Duration::from_millis(self.network_caching_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

impl EngineConfig {
    /// Resolve the plugin directory to hand to the engine.
    ///
    /// Order: explicit config, `STREAMREC_PLUGIN_DIR`, a bundled
    /// `./gstreamer/x86` or `./gstreamer/x64` folder matching the host word
    /// size, then `None` for the system installation. An explicitly named
    /// directory that does not exist is an error.
    pub fn resolve_plugin_dir(&self) -> StreamrecResult<Option<PathBuf>> {
        let env_dir = std::env::var_os(PLUGIN_DIR_ENV).map(PathBuf::from);
        self.resolve_plugin_dir_with(env_dir, &bundled_plugin_dir())
    }

    fn resolve_plugin_dir_with(
        &self,
        env_dir: Option<PathBuf>,
        bundled: &Path,
    ) -> StreamrecResult<Option<PathBuf>> {
        if let Some(dir) = &self.plugin_dir {
            return require_dir(dir, "engine.plugin_dir").map(Some);
        }
        if let Some(dir) = env_dir.filter(|d| !d.as_os_str().is_empty()) {
            return require_dir(&dir, PLUGIN_DIR_ENV).map(Some);
        }
        if bundled.is_dir() {
            tracing::debug!(dir = %bundled.display(), "Using bundled engine plugins");
            return Ok(Some(bundled.to_path_buf()));
        }
        Ok(None)
    }
}

fn require_dir(dir: &Path, source: &str) -> StreamrecResult<PathBuf> {
    if dir.is_dir() {
        Ok(dir.to_path_buf())
    } else {
        Err(StreamrecError::config(format!(
            "Engine plugin directory {} (from {source}) does not exist",
            dir.display()
        )))
    }
}

fn bundled_plugin_dir() -> PathBuf {
    let arch = if cfg!(target_pointer_width = "32") {
        "x86"
    } else {
        "x64"
    };
    PathBuf::from(".").join("gstreamer").join(arch)
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from `path`, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<PathBuf, std::io::Error> {
        let config_path = config_file_path();
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Save config to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("streamrec").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("streamrec_test_config_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_match_recorder_contract() {
        let rec = RecordingDefaults::default();
        assert_eq!(rec.snapshot_interval(), Duration::from_secs(5));
        assert_eq!(rec.segment_interval(), Duration::from_secs(15 * 60));
        assert_eq!(rec.network_caching(), Duration::from_millis(100));
        assert_eq!(rec.snapshot_dir, PathBuf::from("."));
        assert_eq!(rec.image_format, ImageFormat::Png);
        assert_eq!(rec.video_container, VideoContainer::Mp4);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"recording": {"snapshot_interval_secs": 1}}"#).unwrap();
        assert_eq!(config.recording.snapshot_interval_secs, 1);
        assert_eq!(config.recording.segment_interval_mins, 15);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = scratch("roundtrip");
        let path = dir.join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.recording.video_container = VideoContainer::Matroska;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.recording.video_container, VideoContainer::Matroska);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unparsable_config_falls_back_to_defaults() {
        let dir = scratch("garbage");
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.recording.snapshot_interval_secs, 5);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn huge_segment_minutes_saturate_instead_of_overflowing() {
        let rec = RecordingDefaults {
            segment_interval_mins: u64::MAX,
            ..RecordingDefaults::default()
        };
        assert_eq!(rec.segment_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn explicit_plugin_dir_must_exist() {
        let config = EngineConfig {
            plugin_dir: Some(PathBuf::from("/definitely/not/here/streamrec")),
        };
        let err = config
            .resolve_plugin_dir_with(None, Path::new("/nope"))
            .unwrap_err();
        assert!(matches!(err, StreamrecError::Config { .. }));
    }

    #[test]
    fn env_plugin_dir_is_used_when_config_is_empty() {
        let dir = scratch("env_plugins");
        let resolved = EngineConfig::default()
            .resolve_plugin_dir_with(Some(dir.clone()), Path::new("/nope"))
            .unwrap();
        assert_eq!(resolved, Some(dir.clone()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_everything_means_system_install() {
        let resolved = EngineConfig::default()
            .resolve_plugin_dir_with(None, Path::new("/nope/gstreamer/x64"))
            .unwrap();
        assert_eq!(resolved, None);
    }
}
