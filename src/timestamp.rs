//! Absolute record times.
//!
//! A [`Timestamp`] is a count of microseconds since the Unix epoch, UTC. On
//! disk it is always written as `YYYYMMDD-HHMMSS.ffffff`.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::grammar::FormatError;
use crate::{Error, Result};

/// Length of the lexical form, e.g. `20110817-200746.725440`.
pub const LEXICAL_LEN: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    pub fn add_micros(self, micros: i64) -> Self {
        Self(self.0.saturating_add(micros))
    }

    /// Signed distance `self - earlier` in microseconds.
    pub fn micros_since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Renders the on-disk form. Fails for years outside `0000..=9999`.
    pub fn to_lexical(self) -> Result<String> {
        let nanos = i128::from(self.0) * 1_000;
        let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|_| Error::TimestampRange(self.0))?;
        if !(0..=9999).contains(&dt.year()) {
            return Err(Error::TimestampRange(self.0));
        }
        Ok(format!(
            "{:04}{:02}{:02}-{:02}{:02}{:02}.{:06}",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.microsecond()
        ))
    }

    /// Parses `YYYYMMDD-HHMMSS.f` with one to six fraction digits.
    pub fn parse_lexical(text: &str) -> std::result::Result<Self, FormatError> {
        let bytes = text.as_bytes();
        if !text.is_ascii()
            || bytes.len() < 17
            || bytes.len() > LEXICAL_LEN
            || bytes[8] != b'-'
            || bytes[15] != b'.'
        {
            return Err(FormatError::Timestamp);
        }
        let frac = &text[16..];
        if !all_digits(&text[0..8]) || !all_digits(&text[9..15]) || !all_digits(frac) {
            return Err(FormatError::Timestamp);
        }
        let num = |range: std::ops::Range<usize>| -> u32 {
            text[range].bytes().fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
        };
        let year = num(0..4) as i32;
        let month = Month::try_from(num(4..6) as u8).map_err(|_| FormatError::Timestamp)?;
        let date = Date::from_calendar_date(year, month, num(6..8) as u8)
            .map_err(|_| FormatError::Timestamp)?;
        let mut micros = num(16..text.len());
        for _ in frac.len()..6 {
            micros *= 10;
        }
        let clock = Time::from_hms_micro(
            num(9..11) as u8,
            num(11..13) as u8,
            num(13..15) as u8,
            micros,
        )
        .map_err(|_| FormatError::Timestamp)?;
        let nanos = PrimitiveDateTime::new(date, clock)
            .assume_utc()
            .unix_timestamp_nanos();
        i64::try_from(nanos / 1_000)
            .map(Self)
            .map_err(|_| FormatError::Timestamp)
    }
}

fn all_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_lexical() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}us", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse_lexical(s)
    }
}

impl Add<time::Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: time::Duration) -> Self::Output {
        let micros = i64::try_from(rhs.whole_microseconds()).unwrap_or(i64::MAX);
        self.add_micros(micros)
    }
}

impl Sub for Timestamp {
    type Output = time::Duration;

    fn sub(self, rhs: Timestamp) -> Self::Output {
        time::Duration::microseconds(self.micros_since(rhs))
    }
}
