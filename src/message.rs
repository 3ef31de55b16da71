//! What gets logged.
//!
//! Each message kind implements [`Message`] once: a stable numeric type id plus
//! a text encoding. The engine never looks inside payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::grammar::unescape_payload;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

pub trait Message: Sized {
    fn type_id(&self) -> u32;

    /// Record time carried by the message itself, if any. Messages without
    /// one are stamped by the writer's clock.
    fn timestamp(&self) -> Option<Timestamp> {
        None
    }

    /// Payload text. May contain anything; the writer escapes line breaks.
    /// An error aborts the append before anything is written.
    fn serialize(&self) -> Result<String>;

    fn deserialize(type_id: u32, payload: &str) -> Result<Self>;
}

/// An undecoded message: type id plus payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub type_id: u32,
    pub payload: String,
    pub timestamp: Option<Timestamp>,
}

impl RawMessage {
    pub fn new(type_id: u32, payload: impl Into<String>) -> Self {
        Self {
            type_id,
            payload: payload.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl Message for RawMessage {
    fn type_id(&self) -> u32 {
        self.type_id
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    fn serialize(&self) -> Result<String> {
        Ok(self.payload.clone())
    }

    fn deserialize(type_id: u32, payload: &str) -> Result<Self> {
        Ok(Self::new(type_id, payload))
    }
}

/// A serde type with a fixed type id, logged as JSON via [`Json`].
pub trait JsonMessage: Serialize + DeserializeOwned {
    const TYPE_ID: u32;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: JsonMessage> Message for Json<T> {
    fn type_id(&self) -> u32 {
        T::TYPE_ID
    }

    fn serialize(&self) -> Result<String> {
        serde_json::to_string(&self.0).map_err(|err| Error::Encode {
            type_id: T::TYPE_ID,
            reason: err.to_string(),
        })
    }

    fn deserialize(type_id: u32, payload: &str) -> Result<Self> {
        if type_id != T::TYPE_ID {
            return Err(Error::Decode {
                type_id,
                reason: format!("expected type {}", T::TYPE_ID),
            });
        }
        serde_json::from_str(payload)
            .map(Json)
            .map_err(|err| Error::Decode {
                type_id,
                reason: err.to_string(),
            })
    }
}

/// One message as read back from a data log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub time: Timestamp,
    pub type_id: u32,
    /// Unescaped payload text.
    pub payload: String,
    /// Byte offset of the line in the data log.
    pub offset: u64,
}

impl LogRecord {
    pub(crate) fn from_line(
        time: Timestamp,
        type_id: u32,
        escaped: &str,
        offset: u64,
    ) -> std::result::Result<Self, crate::grammar::FormatError> {
        Ok(Self {
            time,
            type_id,
            payload: unescape_payload(escaped)?.into_owned(),
            offset,
        })
    }

    pub fn decode<M: Message>(&self) -> Result<M> {
        M::deserialize(self.type_id, &self.payload)
    }
}
