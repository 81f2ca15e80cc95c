//! Output formats for snapshots and video segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StreamrecError;

/// Still-image format used for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// Container format used for video segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoContainer {
    #[default]
    Mp4,
    Avi,
    Matroska,
}

impl VideoContainer {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Matroska => "mkv",
        }
    }

    /// Whether the muxer only writes a playable file after end-of-stream.
    pub fn needs_finalize(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Avi)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl fmt::Display for VideoContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = StreamrecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(StreamrecError::config(format!(
                "Unknown image format '{other}' (expected png or jpg)"
            ))),
        }
    }
}

impl FromStr for VideoContainer {
    type Err = StreamrecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "avi" => Ok(Self::Avi),
            "mkv" | "matroska" => Ok(Self::Matroska),
            other => Err(StreamrecError::config(format!(
                "Unknown video container '{other}' (expected mp4, avi or mkv)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extensions() {
        assert_eq!(ImageFormat::default().extension(), "png");
        assert_eq!(VideoContainer::default().extension(), "mp4");
    }

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!("JPEG".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!(
            "matroska".parse::<VideoContainer>().unwrap(),
            VideoContainer::Matroska
        );
        assert!("gif".parse::<ImageFormat>().is_err());
        assert!("webm".parse::<VideoContainer>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&VideoContainer::Matroska).unwrap();
        assert_eq!(json, "\"matroska\"");
        let parsed: ImageFormat = serde_json::from_str("\"jpeg\"").unwrap();
        assert_eq!(parsed, ImageFormat::Jpeg);
    }
}
