//! Line grammar for the three CHIL file kinds.
//!
//! ```text
//! data log (<name>.log)              index (<name>.idx)            catalog
//! CHIL                               CHILIDX                       CHILSUPERIDX
//! Format <revision>                  Format <revision>             Format <revision>
//! Time <timestamp>                   <offset> <timestamp>          <file> ([<id> <ts>--<ts>], ...)
//! <delta-us> <type-id>(<payload>)    <timestamp> <offset>
//! ```
//!
//! Every line is terminated by `\n`. Parsers accept a line with or without its
//! terminator; deciding whether an unterminated line is complete is the
//! caller's business.

use std::borrow::Cow;

use crate::timestamp::Timestamp;
use crate::Result;

pub const DATA_HEADER: &str = "CHIL";
pub const INDEX_HEADER: &str = "CHILIDX";
pub const CATALOG_HEADER: &str = "CHILSUPERIDX";
const FORMAT_KEYWORD: &str = "Format";
const TIME_KEYWORD: &str = "Time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("empty line")]
    Empty,
    #[error("line not terminated")]
    Unterminated,
    #[error("line is not valid utf-8")]
    Encoding,
    #[error("unrecognised line")]
    Unrecognised,
    #[error("bad timestamp")]
    Timestamp,
    #[error("bad integer field")]
    Number,
    #[error("bad format revision")]
    Revision,
    #[error("bad message line")]
    Message,
    #[error("bad payload escape")]
    Escape,
    #[error("bad catalog record")]
    Catalog,
}

type ParseResult<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine<'a> {
    Header,
    Format(&'a str),
    Time(Timestamp),
    /// `payload` is still escaped; see [`unescape_payload`].
    Message {
        delta_us: u64,
        type_id: u32,
        payload: &'a str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLine<'a> {
    Header,
    Format(&'a str),
    Keyframe { offset: u64, time: Timestamp },
    Anchor { time: Timestamp, offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePeriod {
    pub type_id: u32,
    pub from: Timestamp,
    pub to: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLine<'a> {
    Header,
    Format(&'a str),
    Component {
        filename: &'a str,
        periods: Vec<TypePeriod>,
    },
}

fn strip_terminator(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

fn parse_u64(text: &str) -> ParseResult<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::Number);
    }
    text.parse().map_err(|_| FormatError::Number)
}

fn parse_u32(text: &str) -> ParseResult<u32> {
    u32::try_from(parse_u64(text)?).map_err(|_| FormatError::Number)
}

fn parse_revision(text: &str) -> ParseResult<&str> {
    if is_revision(text) {
        Ok(text)
    } else {
        Err(FormatError::Revision)
    }
}

pub fn is_revision(text: &str) -> bool {
    !text.is_empty() && !text.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
}

pub fn is_filename(text: &str) -> bool {
    !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

impl<'a> LogLine<'a> {
    pub fn parse(line: &'a str) -> ParseResult<Self> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return Err(FormatError::Empty);
        }
        if line == DATA_HEADER {
            return Ok(Self::Header);
        }
        let (head, rest) = line.split_once(' ').ok_or(FormatError::Unrecognised)?;
        match head {
            FORMAT_KEYWORD => parse_revision(rest).map(Self::Format),
            TIME_KEYWORD => Timestamp::parse_lexical(rest).map(Self::Time),
            _ => {
                let delta_us = parse_u64(head).map_err(|_| FormatError::Unrecognised)?;
                let open = rest.find('(').ok_or(FormatError::Message)?;
                let type_id = parse_u32(&rest[..open]).map_err(|_| FormatError::Message)?;
                let payload = rest[open + 1..]
                    .strip_suffix(')')
                    .ok_or(FormatError::Message)?;
                Ok(Self::Message {
                    delta_us,
                    type_id,
                    payload,
                })
            }
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }
}

impl<'a> IndexLine<'a> {
    pub fn parse(line: &'a str) -> ParseResult<Self> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return Err(FormatError::Empty);
        }
        if line == INDEX_HEADER {
            return Ok(Self::Header);
        }
        let (head, rest) = line.split_once(' ').ok_or(FormatError::Unrecognised)?;
        if head == FORMAT_KEYWORD {
            return parse_revision(rest).map(Self::Format);
        }
        // A timestamp always carries '-', an offset never does.
        if head.contains('-') {
            let time = Timestamp::parse_lexical(head)?;
            let offset = parse_u64(rest)?;
            Ok(Self::Anchor { time, offset })
        } else {
            let offset = parse_u64(head)?;
            let time = Timestamp::parse_lexical(rest)?;
            Ok(Self::Keyframe { offset, time })
        }
    }
}

impl<'a> CatalogLine<'a> {
    pub fn parse(line: &'a str) -> ParseResult<Self> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return Err(FormatError::Empty);
        }
        if line == CATALOG_HEADER {
            return Ok(Self::Header);
        }
        let (head, rest) = line.split_once(' ').ok_or(FormatError::Unrecognised)?;
        if head == FORMAT_KEYWORD {
            return parse_revision(rest).map(Self::Format);
        }
        if !is_filename(head) {
            return Err(FormatError::Catalog);
        }
        let body = rest
            .trim()
            .strip_prefix('(')
            .and_then(|body| body.strip_suffix(')'))
            .ok_or(FormatError::Catalog)?;
        let mut periods = Vec::new();
        let mut remaining = body.trim();
        while !remaining.is_empty() {
            let inner_start = remaining.strip_prefix('[').ok_or(FormatError::Catalog)?;
            let close = inner_start.find(']').ok_or(FormatError::Catalog)?;
            periods.push(parse_period(&inner_start[..close])?);
            remaining = inner_start[close + 1..].trim_start();
            match remaining.strip_prefix(',') {
                Some(after) => remaining = after.trim_start(),
                None if remaining.is_empty() => {}
                None => return Err(FormatError::Catalog),
            }
        }
        if periods.is_empty() {
            return Err(FormatError::Catalog);
        }
        Ok(Self::Component {
            filename: head,
            periods,
        })
    }
}

fn parse_period(text: &str) -> ParseResult<TypePeriod> {
    let (id, range) = text.trim().split_once(' ').ok_or(FormatError::Catalog)?;
    let (from, to) = range.trim().split_once("--").ok_or(FormatError::Catalog)?;
    Ok(TypePeriod {
        type_id: parse_u32(id)?,
        from: Timestamp::parse_lexical(from)?,
        to: Timestamp::parse_lexical(to)?,
    })
}

pub fn header_line(header: &str) -> String {
    format!("{header}\n")
}

pub fn format_line(revision: &str) -> String {
    format!("{FORMAT_KEYWORD} {revision}\n")
}

pub fn time_line(time: Timestamp) -> Result<String> {
    Ok(format!("{TIME_KEYWORD} {}\n", time.to_lexical()?))
}

pub fn message_line(delta_us: u64, type_id: u32, payload: &str) -> String {
    format!("{delta_us} {type_id}({})\n", escape_payload(payload))
}

pub fn keyframe_line(offset: u64, time: Timestamp) -> Result<String> {
    Ok(format!("{offset} {}\n", time.to_lexical()?))
}

pub fn anchor_line(time: Timestamp, offset: u64) -> Result<String> {
    Ok(format!("{} {offset}\n", time.to_lexical()?))
}

pub fn catalog_line(filename: &str, periods: &[TypePeriod]) -> Result<String> {
    let mut line = format!("{filename} (");
    for (i, period) in periods.iter().enumerate() {
        if i > 0 {
            line.push_str(", ");
        }
        line.push_str(&format!(
            "[{} {}--{}]",
            period.type_id,
            period.from.to_lexical()?,
            period.to.to_lexical()?
        ));
    }
    line.push_str(")\n");
    Ok(line)
}

/// Makes a payload safe to embed in a single line.
pub fn escape_payload(payload: &str) -> Cow<'_, str> {
    if !payload.contains(['\\', '\n', '\r']) {
        return Cow::Borrowed(payload);
    }
    let mut out = String::with_capacity(payload.len() + 8);
    for ch in payload.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

pub fn unescape_payload(escaped: &str) -> ParseResult<Cow<'_, str>> {
    if !escaped.contains('\\') {
        return Ok(Cow::Borrowed(escaped));
    }
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(FormatError::Escape),
        }
    }
    Ok(Cow::Owned(out))
}
