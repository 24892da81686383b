//! Business media rows referenced by the media queue

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Business table that owns a captured file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    RoomEntry,
    GatePass,
}

impl MediaSource {
    pub const ALL: [Self; 2] = [Self::RoomEntry, Self::GatePass];

    /// Source tag stored in the queue.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoomEntry => "room_entry",
            Self::GatePass => "gate_pass",
        }
    }

    /// Business table holding the media rows.
    pub const fn table(self) -> &'static str {
        match self {
            Self::RoomEntry => "room_entry_media",
            Self::GatePass => "gate_pass_media",
        }
    }

    /// Object key prefix used by the reconciliation pass.
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::RoomEntry => "room-entry",
            Self::GatePass => "gate-pass",
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "room_entry" => Ok(Self::RoomEntry),
            "gate_pass" => Ok(Self::GatePass),
            other => Err(Error::InvalidInput(format!("Unknown media source: {other}"))),
        }
    }
}

/// Media row present in a business table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: i64,
    /// Path relative to the local media root.
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub thock_number: String,
    /// `photo` or `video`.
    pub media_type: String,
}

/// Input for inserting a business media row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMediaFile {
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub thock_number: String,
    pub media_type: String,
}

const VIDEO_EXTENSIONS: [&str; 9] = [
    "mov", "avi", "mkv", "wmv", "mts", "3gp", "flv", "webm", "m4v",
];

/// True for video containers that the capture pipeline converts to `.mp4`.
pub fn is_convertible_video(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
}

/// Swap the extension of `value` for `.mp4`.
pub fn mp4_variant(value: &str) -> Option<String> {
    let (stem, ext) = value.rsplit_once('.')?;
    if ext.contains('/') || stem.is_empty() {
        return None;
    }
    Some(format!("{stem}.mp4"))
}
