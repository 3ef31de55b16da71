//! Writer and player configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;
use crate::Result;

/// Revision written on `Format` lines by this build.
pub const FORMAT_REVISION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_TIME_LINE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_KEYFRAME_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_KEYFRAME_MAX_MESSAGES: u32 = 1000;
const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_LOCK_INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const DEFAULT_LOCK_MAX_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait for an exclusive file lock.
///
/// With `timeout: None` acquisition blocks until the lock is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockPolicy {
    pub timeout: Option<Duration>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            initial_backoff: DEFAULT_LOCK_INITIAL_BACKOFF,
            max_backoff: DEFAULT_LOCK_MAX_BACKOFF,
        }
    }
}

impl LockPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum distance between `Time` anchors in the data log.
    /// Default: 5 minutes
    pub time_line_interval: Duration,

    /// Maximum time between keyframes.
    /// Default: 60 seconds
    pub keyframe_interval: Duration,

    /// Maximum number of messages between keyframes.
    /// Default: 1000
    pub keyframe_max_messages: u32,

    /// Record time jumps larger than this (either direction) abort the write.
    /// `None` accepts any jump.
    /// Default: 24 hours
    pub max_clock_skew: Option<Duration>,

    pub lock: LockPolicy,

    /// Written on `Format` lines.
    /// Default: the crate version
    pub format_revision: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            time_line_interval: DEFAULT_TIME_LINE_INTERVAL,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            keyframe_max_messages: DEFAULT_KEYFRAME_MAX_MESSAGES,
            max_clock_skew: Some(DEFAULT_MAX_CLOCK_SKEW),
            lock: LockPolicy::default(),
            format_revision: FORMAT_REVISION.to_string(),
        }
    }
}

impl WriterConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Starting cursor. `None` starts just before the earliest catalogued
    /// message.
    pub initial_cursor: Option<Timestamp>,
}

impl PlayerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
