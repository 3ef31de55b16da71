//! CHIL: indexed telemetry log store and time-indexed playback engine.
//!
//! A recording session is a `<name>.chil` directory. Each component records
//! through its own [`Writer`] into a delta-encoded text log plus a sparse
//! keyframe index; a shared catalog summarises which message types each
//! component holds over which time ranges. A [`Player`] merges every
//! component of a session back into one time-ordered stream.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod grammar;
pub mod index;
pub mod layout;
mod lines;
pub mod lock;
pub mod message;
pub mod player;
pub mod reader;
pub mod timestamp;
pub mod writer;

pub use catalog::{Catalog, ComponentSummary, TimeRange};
pub use clock::{Clock, QuantaClock, SystemClock};
pub use config::{LockPolicy, PlayerConfig, WriterConfig, FORMAT_REVISION};
pub use error::{Error, Result, SkewDirection};
pub use index::{OutOfRange, SparseIndex};
pub use message::{Json, JsonMessage, LogRecord, Message, RawMessage};
pub use player::{Cursor, PlayedMessage, Player, PlayerState};
pub use reader::ComponentReader;
pub use timestamp::Timestamp;
pub use writer::{LogStatus, Writer, WriterStats};
