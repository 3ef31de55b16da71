//! Time-indexed reading of one component log.
//!
//! The index file is loaded whole at open. Keyframes are grouped into epochs.
//! Every writer session starts a new epoch at its first indexed offset, and so
//! does a keyframe whose time is lower than its predecessor's. An epoch covers
//! the data from its start up to the next epoch's start. Within an epoch, record times
//! never decrease, so a search interpolates an approximate offset from the
//! epoch's keyframes and then walks lines to the exact position.

use std::collections::BTreeSet;
use std::path::Path;

use crate::config::FORMAT_REVISION;
use crate::grammar::{FormatError, IndexLine, LogLine};
use crate::index::{AnchorIndex, OffsetIndex, OutOfRange};
use crate::layout::SessionLayout;
use crate::lines::{ForwardLines, Line, LineFile};
use crate::message::LogRecord;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

#[derive(Debug)]
struct Epoch {
    start: u64,
    end: u64,
    offsets: OffsetIndex,
}

/// Search position: a record qualifies when `(time, offset)` is strictly
/// greater than `(after, offset)`.
#[derive(Debug, Clone, Copy)]
struct After {
    time: Timestamp,
    offset: u64,
}

impl After {
    fn admits(&self, time: Timestamp, offset: u64) -> bool {
        (time, offset) > (self.time, self.offset)
    }
}

pub struct ComponentReader {
    name: String,
    data: LineFile,
    epochs: Vec<Epoch>,
    anchors: AnchorIndex,
    formats: Vec<String>,
    corrupt: BTreeSet<u64>,
}

impl ComponentReader {
    pub fn open(session_dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        Self::open_in(&SessionLayout::new(session_dir), name)
    }

    pub(crate) fn open_in(layout: &SessionLayout, name: &str) -> Result<Self> {
        let data = LineFile::open(&layout.data_path(name)?)?;
        let index_path = layout.index_path(name)?;
        let mut reader = Self {
            name: name.to_string(),
            epochs: Vec::new(),
            anchors: AnchorIndex::new(),
            formats: Vec::new(),
            corrupt: BTreeSet::new(),
            data,
        };
        match LineFile::open(&index_path) {
            Ok(index) => reader.load_index(&index)?,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("{name}: no index file, searches scan the whole log");
            }
            Err(err) => return Err(err),
        }
        reader.close_epochs();
        log::info!(
            "opened reader {}: {} bytes, {} epochs, {} anchors",
            reader.name,
            reader.data.len(),
            reader.epochs.len(),
            reader.anchors.len()
        );
        Ok(reader)
    }

    fn load_index(&mut self, index: &LineFile) -> Result<()> {
        let data_len = self.data.len();
        // Set by a Format line; the session's first keyframe or anchor opens its epoch.
        let mut new_session = false;
        for line in index.forward(0)? {
            let line = line?;
            let parsed = match line.text() {
                Some(text) if line.complete => IndexLine::parse(text),
                Some(_) => Err(FormatError::Unterminated),
                None => Err(FormatError::Encoding),
            };
            match parsed {
                Ok(IndexLine::Header) => {}
                Ok(IndexLine::Format(revision)) => {
                    self.note_format(revision);
                    new_session = true;
                }
                Ok(IndexLine::Keyframe { offset, time }) => {
                    if offset > data_len {
                        log::warn!(
                            "{}: keyframe at {} is past end of data ({}), ignored",
                            self.name,
                            offset,
                            data_len
                        );
                        continue;
                    }
                    if std::mem::take(&mut new_session) {
                        self.start_epoch(offset);
                    }
                    self.add_keyframe(time, offset);
                }
                Ok(IndexLine::Anchor { time, offset }) => {
                    if offset <= data_len && std::mem::take(&mut new_session) {
                        self.start_epoch(offset);
                    }
                    self.anchors.insert(offset, time);
                }
                Err(err) => {
                    log::warn!(
                        "{}: index line at {} skipped ({err})",
                        self.name,
                        line.start
                    );
                }
            }
        }
        Ok(())
    }

    fn note_format(&mut self, revision: &str) {
        if self.formats.iter().any(|seen| seen == revision) {
            return;
        }
        if revision != FORMAT_REVISION {
            log::warn!(
                "{}: written by format revision {}, reading with {}",
                self.name,
                revision,
                FORMAT_REVISION
            );
        }
        self.formats.push(revision.to_string());
    }

    fn add_keyframe(&mut self, time: Timestamp, offset: u64) {
        let regressed = match self.epochs.last().and_then(|epoch| epoch.offsets.last()) {
            Some((last_time, _)) => time < last_time,
            None => false,
        };
        if regressed {
            log::debug!("{}: keyframe time regresses at {}, new epoch", self.name, offset);
        }
        if self.epochs.is_empty() || regressed {
            self.start_epoch(offset);
        }
        if let Some(epoch) = self.epochs.last_mut() {
            if !epoch.offsets.contains_key(time) {
                epoch.offsets.insert(time, offset);
            }
        }
    }

    /// The first epoch always starts at 0 so it covers the file header.
    fn start_epoch(&mut self, offset: u64) {
        let start = match self.epochs.last() {
            None => 0,
            Some(last) if offset <= last.start => return,
            Some(_) => offset,
        };
        self.epochs.push(Epoch {
            start,
            end: 0,
            offsets: OffsetIndex::new(),
        });
    }

    fn close_epochs(&mut self) {
        if self.epochs.is_empty() {
            self.epochs.push(Epoch {
                start: 0,
                end: 0,
                offsets: OffsetIndex::new(),
            });
        }
        let len = self.data.len();
        for i in 0..self.epochs.len() {
            let end = self.epochs.get(i + 1).map_or(len, |next| next.start);
            self.epochs[i].end = end;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epochs(&self) -> usize {
        self.epochs.len()
    }

    /// Format revisions recorded in the index, in first-seen order.
    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Distinct corrupt data lines met so far.
    pub fn corrupt_lines(&self) -> usize {
        self.corrupt.len()
    }

    /// First message with time strictly greater than `t`.
    pub fn next_message_after(&mut self, t: Timestamp) -> Result<Option<LogRecord>> {
        self.next_after(After {
            time: t,
            offset: u64::MAX,
        })
    }

    /// The message that follows `record` in time order. Unlike
    /// [`next_message_after`](Self::next_message_after) this keeps later
    /// messages that share `record`'s time.
    pub fn next_message_following(&mut self, record: &LogRecord) -> Result<Option<LogRecord>> {
        self.next_after(After {
            time: record.time,
            offset: record.offset,
        })
    }

    pub fn time_to_next(&mut self, t: Timestamp) -> Result<Option<time::Duration>> {
        let Some(record) = self.next_message_after(t)? else {
            return Ok(None);
        };
        time_between(&self.name, t, record.time).map(Some)
    }

    /// Every well-formed message in file order.
    pub fn records(&mut self) -> Result<Records<'_>> {
        Ok(Records {
            lines: self.data.forward(0)?,
            name: &self.name,
            corrupt: &mut self.corrupt,
            anchor: None,
        })
    }

    fn next_after(&mut self, after: After) -> Result<Option<LogRecord>> {
        let mut best: Option<LogRecord> = None;
        for i in 0..self.epochs.len() {
            let Some(found) = self.search_epoch(i, after)? else {
                continue;
            };
            let better = best
                .as_ref()
                .map_or(true, |b| (found.time, found.offset) < (b.time, b.offset));
            if better {
                best = Some(found);
            }
        }
        Ok(best)
    }

    fn search_epoch(&mut self, i: usize, after: After) -> Result<Option<LogRecord>> {
        let (start, end, guess) = {
            let epoch = &self.epochs[i];
            let guess = match epoch.offsets.get(after.time) {
                Ok(offset) => offset.clamp(epoch.start, epoch.end),
                Err(OutOfRange::Low) => epoch.start,
                Err(OutOfRange::High) => epoch.end,
            };
            (epoch.start, epoch.end, guess)
        };
        if start >= end {
            return Ok(None);
        }
        let mut pos = self.data.line_start(guess)?.max(start);

        let overshot = match self.first_message(pos, end)? {
            None => true,
            Some(record) => after.admits(record.time, record.offset),
        };
        if overshot {
            while pos > start {
                let Some(line) = self.data.line_before(pos)? else {
                    break;
                };
                if line.start < start {
                    break;
                }
                pos = line.start;
                if let Some((time, _, _)) = self.message_at(&line) {
                    if !after.admits(time, line.start) {
                        break;
                    }
                }
            }
        }

        let anchor = self.anchor_for(pos);
        self.scan_forward(pos, end, after, anchor)
    }

    /// First qualifying message in `[from, end)`. `Time` lines met on the
    /// way replace `anchor`.
    fn scan_forward(
        &mut self,
        from: u64,
        end: u64,
        after: After,
        mut anchor: Option<Timestamp>,
    ) -> Result<Option<LogRecord>> {
        for line in self.data.forward(from)? {
            let line = line?;
            if line.start >= end {
                break;
            }
            if let Some(text) = line.text().filter(|_| line.complete) {
                if let Ok(LogLine::Time(time)) = LogLine::parse(text) {
                    anchor = Some(time);
                    continue;
                }
            }
            let Some((time, type_id, payload)) = record_parts(&line, anchor) else {
                if !is_control(&line) {
                    note_corrupt(&mut self.corrupt, &self.name, line.start);
                }
                continue;
            };
            if !after.admits(time, line.start) {
                continue;
            }
            match LogRecord::from_line(time, type_id, payload, line.start) {
                Ok(record) => return Ok(Some(record)),
                Err(_) => note_corrupt(&mut self.corrupt, &self.name, line.start),
            }
        }
        Ok(None)
    }

    /// First well-formed message at or after `pos` and before `end`.
    fn first_message(&mut self, pos: u64, end: u64) -> Result<Option<LogRecord>> {
        let earliest = After {
            time: Timestamp::from_micros(i64::MIN),
            offset: 0,
        };
        if pos >= end {
            return Ok(None);
        }
        let anchor = self.anchor_for(pos);
        self.scan_forward(pos, end, earliest, anchor)
    }

    /// Absolute time of a message line via the anchor index.
    fn message_at<'l>(&self, line: &'l Line) -> Option<(Timestamp, u32, &'l str)> {
        record_parts(line, self.anchor_for(line.start))
    }

    fn anchor_for(&self, offset: u64) -> Option<Timestamp> {
        match self.anchors.get(offset) {
            Ok(time) => Some(time),
            Err(OutOfRange::High) => self.anchors.last().map(|(_, time)| time),
            Err(OutOfRange::Low) => None,
        }
    }
}

/// Gap from `cursor` to the next message of `component`. A negative gap means
/// the index and the log disagree and is reported, never clamped.
pub(crate) fn time_between(
    component: &str,
    cursor: Timestamp,
    next: Timestamp,
) -> Result<time::Duration> {
    let gap = next - cursor;
    if gap.is_negative() {
        log::warn!("{component}: next message {next} precedes cursor {cursor}");
        return Err(Error::NegativeTimeToNext {
            component: component.to_string(),
            cursor,
            next,
        });
    }
    Ok(gap)
}

/// `(time, type_id, escaped payload)` of a complete message line.
fn record_parts(line: &Line, anchor: Option<Timestamp>) -> Option<(Timestamp, u32, &str)> {
    if !line.complete {
        return None;
    }
    match LogLine::parse(line.text()?) {
        Ok(LogLine::Message {
            delta_us,
            type_id,
            payload,
        }) => {
            let delta = i64::try_from(delta_us).ok()?;
            Some((anchor?.add_micros(delta), type_id, payload))
        }
        _ => None,
    }
}

/// Header, Format and Time lines.
fn is_control(line: &Line) -> bool {
    if !line.complete {
        return false;
    }
    matches!(
        line.text().map(LogLine::parse),
        Some(Ok(LogLine::Header | LogLine::Format(_) | LogLine::Time(_)))
    )
}

fn note_corrupt(seen: &mut BTreeSet<u64>, name: &str, offset: u64) {
    if seen.insert(offset) {
        log::warn!("{name}: corrupt line at offset {offset} skipped");
    }
}

/// Iterator over every well-formed message of a component, in file order.
pub struct Records<'a> {
    lines: ForwardLines<'a>,
    name: &'a str,
    corrupt: &'a mut BTreeSet<u64>,
    anchor: Option<Timestamp>,
}

impl Iterator for Records<'_> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(err)),
            };
            if let Some(text) = line.text().filter(|_| line.complete) {
                match LogLine::parse(text) {
                    Ok(LogLine::Time(time)) => {
                        self.anchor = Some(time);
                        continue;
                    }
                    Ok(LogLine::Header | LogLine::Format(_)) => continue,
                    _ => {}
                }
            }
            let record = record_parts(&line, self.anchor).and_then(|(time, type_id, payload)| {
                LogRecord::from_line(time, type_id, payload, line.start).ok()
            });
            match record {
                Some(record) => return Some(Ok(record)),
                None => note_corrupt(self.corrupt, self.name, line.start),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::message::RawMessage;
    use crate::writer::Writer;

    const BASE: i64 = 1_313_611_666_725_440;

    fn ts(us: i64) -> Timestamp {
        Timestamp::from_micros(BASE + us)
    }

    fn record_session(times: &[i64], config: WriterConfig) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = Writer::open(dir.path().join("s"), "c", config).expect("open");
        for (i, &us) in times.iter().enumerate() {
            writer
                .log_at(&RawMessage::new(7, format!("m{i}")), ts(us))
                .expect("log");
        }
        writer.close().expect("close");
        dir
    }

    #[test]
    fn finds_strictly_later_message() {
        let config = WriterConfig {
            keyframe_max_messages: 4,
            ..WriterConfig::default()
        };
        let times: Vec<i64> = (0..50).map(|i| i * 10).collect();
        let dir = record_session(&times, config);
        let mut reader = ComponentReader::open(dir.path().join("s"), "c").expect("reader");

        let first = reader.next_message_after(ts(-1)).expect("search").expect("first");
        assert_eq!((first.time, first.payload.as_str()), (ts(0), "m0"));
        let exact = reader.next_message_after(ts(120)).expect("search").expect("exact");
        assert_eq!(exact.time, ts(130));
        let between = reader.next_message_after(ts(125)).expect("search").expect("between");
        assert_eq!(between.time, ts(130));
        let last = reader.next_message_after(ts(485)).expect("search").expect("last");
        assert_eq!(last.time, ts(490));
        assert_eq!(reader.next_message_after(ts(490)).expect("search"), None);
        assert_eq!(reader.next_message_after(ts(10_000)).expect("search"), None);
        assert_eq!(reader.corrupt_lines(), 0);
    }

    #[test]
    fn time_to_next_is_gap() {
        let dir = record_session(&[0, 250], WriterConfig::default());
        let mut reader = ComponentReader::open(dir.path().join("s"), "c").expect("reader");
        assert_eq!(
            reader.time_to_next(ts(100)).expect("ttn"),
            Some(time::Duration::microseconds(150))
        );
        assert_eq!(reader.time_to_next(ts(250)).expect("ttn"), None);
    }

    #[test]
    fn negative_gap_is_reported() {
        let err = time_between("c", ts(10), ts(4)).expect_err("negative");
        assert!(matches!(
            err,
            Error::NegativeTimeToNext { ref component, cursor, next }
                if component == "c" && cursor == ts(10) && next == ts(4)
        ));
        assert_eq!(
            time_between("c", ts(4), ts(4)).expect("zero"),
            time::Duration::ZERO
        );
    }

    #[test]
    fn equal_times_are_followed_in_file_order() {
        let dir = record_session(&[0, 5, 5, 5, 9], WriterConfig::default());
        let mut reader = ComponentReader::open(dir.path().join("s"), "c").expect("reader");
        let mut seen = Vec::new();
        let mut next = reader.next_message_after(ts(-1)).expect("search");
        while let Some(record) = next {
            seen.push(record.payload.clone());
            next = reader.next_message_following(&record).expect("follow");
        }
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn records_lists_everything() {
        let dir = record_session(&[3, 1, 7], WriterConfig::default());
        let mut reader = ComponentReader::open(dir.path().join("s"), "c").expect("reader");
        let times: Vec<_> = reader
            .records()
            .expect("records")
            .map(|r| r.expect("record").time)
            .collect();
        assert_eq!(times, vec![ts(3), ts(1), ts(7)]);
        assert_eq!(reader.epochs(), 2);
        assert_eq!(reader.formats(), &[FORMAT_REVISION.to_string()]);
    }

    #[test]
    fn missing_index_falls_back_to_scanning() {
        let dir = record_session(&[0, 10, 20], WriterConfig::default());
        let layout = SessionLayout::new(dir.path().join("s"));
        std::fs::remove_file(layout.index_path("c").expect("path")).expect("rm");
        let mut reader = ComponentReader::open(dir.path().join("s"), "c").expect("reader");
        let found = reader.next_message_after(ts(5)).expect("search");
        assert_eq!(found.map(|r| r.time), Some(ts(10)));
        let via_records: Vec<_> = reader
            .records()
            .expect("records")
            .map(|r| r.expect("record").time)
            .collect();
        assert_eq!(via_records, vec![ts(0), ts(10), ts(20)]);
    }
}
