use std::path::PathBuf;
use std::time::Duration;

use crate::grammar::FormatError;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkewDirection {
    Backward,
    Forward,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed line: {0}")]
    Format(#[from] FormatError),
    #[error("clock skew: record time {record} jumps {direction:?} by {skew:?} from {last}, bound is {bound:?}")]
    ClockSkew {
        last: Timestamp,
        record: Timestamp,
        direction: SkewDirection,
        skew: Duration,
        bound: Duration,
    },
    /// `actual` is `None` when a pop found nothing saved.
    #[error("cursor mismatch: expected {expected:?}, found {actual:?}")]
    CursorMismatch {
        expected: Option<Timestamp>,
        actual: Option<Timestamp>,
    },
    #[error("lock on {} not acquired within {timeout:?}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },
    #[error("negative time to next message in {component}: next {next} is before cursor {cursor}")]
    NegativeTimeToNext {
        component: String,
        cursor: Timestamp,
        next: Timestamp,
    },
    #[error("invalid component name: {0:?}")]
    InvalidName(String),
    #[error("timestamp out of representable range: {0}us")]
    TimestampRange(i64),
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("cannot encode message type {type_id}: {reason}")]
    Encode { type_id: u32, reason: String },
    #[error("cannot decode message type {type_id}: {reason}")]
    Decode { type_id: u32, reason: String },
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
