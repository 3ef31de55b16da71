//! Append-only recording of one component.
//!
//! A [`Writer`] holds exclusive locks on `<name>.log` and `<name>.idx` for its
//! whole lifetime. Message lines are delta-encoded against the latest `Time`
//! anchor; the index receives a keyframe every `keyframe_interval` or every
//! `keyframe_max_messages` messages, whichever comes first.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::WriterConfig;
use crate::error::SkewDirection;
use crate::grammar::{self, TypePeriod, DATA_HEADER, INDEX_HEADER};
use crate::layout::{data_filename, SessionLayout};
use crate::lock::LockedFile;
use crate::message::Message;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

/// Outcome of a successful [`Writer::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Logged,
    /// Record time went backwards by `regressed_by`; the writer resynced with
    /// a fresh anchor and keyframe before writing the message.
    ClockSkew { regressed_by: Duration },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub messages: u64,
    pub keyframes: u64,
    pub anchors: u64,
    pub skew_events: u64,
}

pub struct Writer {
    name: String,
    layout: SessionLayout,
    config: WriterConfig,
    clock: Arc<dyn Clock>,
    data: BufWriter<LockedFile>,
    index: BufWriter<LockedFile>,
    data_offset: u64,
    anchor: Option<Timestamp>,
    last_keyframe: Option<Timestamp>,
    since_keyframe: u32,
    last_logged: Option<Timestamp>,
    periods: BTreeMap<u32, (Timestamp, Timestamp)>,
    stats: WriterStats,
    closed: bool,
}

impl Writer {
    pub fn open(session_dir: impl AsRef<Path>, name: &str, config: WriterConfig) -> Result<Self> {
        Self::open_with_clock(session_dir, name, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        session_dir: impl AsRef<Path>,
        name: &str,
        config: WriterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let layout = SessionLayout::new(session_dir);
        let data_path = layout.data_path(name)?;
        let index_path = layout.index_path(name)?;
        std::fs::create_dir_all(layout.root())?;

        let mut data = LockedFile::open_append(&data_path, &config.lock)?;
        let mut index = LockedFile::open_append(&index_path, &config.lock)?;
        prepare(&mut data, DATA_HEADER, &config.format_revision)?;
        prepare(&mut index, INDEX_HEADER, &config.format_revision)?;
        let data_offset = data.len()?;

        log::info!(
            "opened writer {} in {} at offset {}",
            name,
            layout.root().display(),
            data_offset
        );
        Ok(Self {
            name: name.to_string(),
            layout,
            config,
            clock,
            data: BufWriter::new(data),
            index: BufWriter::new(index),
            data_offset,
            anchor: None,
            last_keyframe: None,
            since_keyframe: 0,
            last_logged: None,
            periods: BTreeMap::new(),
            stats: WriterStats::default(),
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn last_logged(&self) -> Option<Timestamp> {
        self.last_logged
    }

    /// Logs `message` at its own timestamp, or at the writer clock's `now`.
    pub fn log<M: Message>(&mut self, message: &M) -> Result<LogStatus> {
        let time = message.timestamp().unwrap_or_else(|| self.clock.now());
        self.log_at(message, time)
    }

    pub fn log_at<M: Message>(&mut self, message: &M, time: Timestamp) -> Result<LogStatus> {
        // Reject unrepresentable times before anything reaches the files.
        time.to_lexical()?;
        let status = self.check_skew(time)?;
        let type_id = message.type_id();
        let payload = message.serialize()?;

        if let (LogStatus::ClockSkew { regressed_by }, Some(last)) = (status, self.last_logged) {
            log::warn!(
                "{}: clock skew, record time {} is {:?} behind {}",
                self.name,
                time,
                regressed_by,
                last
            );
            self.write_keyframe(last)?;
            self.anchor = None;
            self.last_keyframe = None;
            self.stats.skew_events += 1;
        }

        if self.needs_anchor(time) {
            self.write_anchor(time)?;
        }
        if self.needs_keyframe(time) {
            self.write_keyframe(time)?;
        }
        let anchor = self.anchor.ok_or(Error::Corrupt("message without anchor"))?;
        let delta = u64::try_from(time.micros_since(anchor))
            .map_err(|_| Error::Corrupt("negative delta from anchor"))?;
        self.write_data(&grammar::message_line(delta, type_id, &payload))?;

        self.since_keyframe = self.since_keyframe.saturating_add(1);
        self.last_logged = Some(time);
        self.stats.messages += 1;
        self.periods
            .entry(type_id)
            .and_modify(|(from, to)| {
                *from = (*from).min(time);
                *to = (*to).max(time);
            })
            .or_insert((time, time));
        Ok(status)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.data.flush()?;
        self.index.flush()?;
        Ok(())
    }

    /// Per-type time ranges logged so far, in type id order.
    pub fn periods(&self) -> Vec<TypePeriod> {
        self.periods
            .iter()
            .map(|(&type_id, &(from, to))| TypePeriod { type_id, from, to })
            .collect()
    }

    /// Writes the final keyframe and anchor, appends this component's record
    /// to the session catalog and releases the locks.
    pub fn close(mut self) -> Result<()> {
        if let Some(last) = self.last_logged {
            self.write_keyframe(last)?;
            self.write_anchor(last)?;
        }
        self.flush()?;
        self.data.get_ref().sync_data()?;
        self.index.get_ref().sync_data()?;
        Catalog::append(
            &self.layout,
            &data_filename(&self.name)?,
            &self.periods(),
            &self.config.format_revision,
            &self.config.lock,
        )?;
        self.closed = true;
        log::info!(
            "closed writer {}: {} messages, {} keyframes, {} anchors",
            self.name,
            self.stats.messages,
            self.stats.keyframes,
            self.stats.anchors
        );
        Ok(())
    }

    fn check_skew(&self, time: Timestamp) -> Result<LogStatus> {
        let Some(last) = self.last_logged else {
            return Ok(LogStatus::Logged);
        };
        let jump = time.micros_since(last);
        let direction = if jump < 0 {
            SkewDirection::Backward
        } else {
            SkewDirection::Forward
        };
        let skew = Duration::from_micros(jump.unsigned_abs());
        if let Some(bound) = self.config.max_clock_skew {
            if skew > bound {
                log::warn!(
                    "{}: record time {} jumps {:?} from {}, refusing to log",
                    self.name,
                    time,
                    skew,
                    last
                );
                return Err(Error::ClockSkew {
                    last,
                    record: time,
                    direction,
                    skew,
                    bound,
                });
            }
        }
        if direction == SkewDirection::Backward {
            return Ok(LogStatus::ClockSkew { regressed_by: skew });
        }
        Ok(LogStatus::Logged)
    }

    fn needs_anchor(&self, time: Timestamp) -> bool {
        match self.anchor {
            None => true,
            Some(anchor) => {
                time < anchor
                    || time.micros_since(anchor) > micros(self.config.time_line_interval)
            }
        }
    }

    fn needs_keyframe(&self, time: Timestamp) -> bool {
        match self.last_keyframe {
            None => true,
            Some(keyframe) => {
                time.micros_since(keyframe) > micros(self.config.keyframe_interval)
                    || self.since_keyframe >= self.config.keyframe_max_messages
            }
        }
    }

    fn write_data(&mut self, line: &str) -> Result<()> {
        self.data.write_all(line.as_bytes())?;
        self.data_offset += line.len() as u64;
        Ok(())
    }

    fn write_index(&mut self, line: &str) -> Result<()> {
        // Every index line refers to data that must already be on disk.
        self.data.flush()?;
        self.index.write_all(line.as_bytes())?;
        self.index.flush()?;
        Ok(())
    }

    fn write_anchor(&mut self, time: Timestamp) -> Result<()> {
        self.write_data(&grammar::time_line(time)?)?;
        let offset = self.data_offset;
        self.write_index(&grammar::anchor_line(time, offset)?)?;
        log::debug!("{}: anchor {} at {}", self.name, time, offset);
        self.anchor = Some(time);
        self.stats.anchors += 1;
        Ok(())
    }

    fn write_keyframe(&mut self, time: Timestamp) -> Result<()> {
        let offset = self.data_offset;
        self.write_index(&grammar::keyframe_line(offset, time)?)?;
        log::debug!("{}: keyframe {} at {}", self.name, time, offset);
        self.last_keyframe = Some(time);
        self.since_keyframe = 0;
        self.stats.keyframes += 1;
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!(
                "writer {} dropped without close; no final keyframe or catalog record",
                self.name
            );
        }
    }
}

/// Header on a fresh file, terminator after a crashed partial line, then the
/// Format line for this session.
fn prepare(file: &mut LockedFile, header: &str, revision: &str) -> Result<()> {
    let mut text = String::new();
    match file.last_byte()? {
        None => text.push_str(&grammar::header_line(header)),
        Some(b'\n') => {}
        Some(_) => {
            log::warn!(
                "{} ends with a partial line; terminating it",
                file.path().display()
            );
            text.push('\n');
        }
    }
    text.push_str(&grammar::format_line(revision));
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}
