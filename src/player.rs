//! Merge-ordered playback over every component of a session.
//!
//! Each component keeps one pending record: the next message after the
//! shared cursor. `order` ranks components by pending time, exhausted ones
//! last. Consuming a record refreshes only that component and moves it to its
//! new rank; any cursor change marks the ranking dirty and the next call
//! rebuilds it from scratch.

use std::path::Path;

use crate::catalog::Catalog;
use crate::config::PlayerConfig;
use crate::layout::SessionLayout;
use crate::message::LogRecord;
use crate::reader::{time_between, ComponentReader};
use crate::timestamp::Timestamp;
use crate::{Error, Result};

const MIN_DENSITY_GAP_US: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// No components to play.
    Idle,
    Ready,
    /// Every component is exhausted at the current cursor.
    Drained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedMessage {
    /// Index of the component in [`Player::components`] order.
    pub source: usize,
    pub component: String,
    pub record: LogRecord,
}

/// Current playback time plus the values saved by pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    current: Timestamp,
    saved: Vec<Timestamp>,
}

impl Cursor {
    pub fn new(at: Timestamp) -> Self {
        Self {
            current: at,
            saved: Vec::new(),
        }
    }

    pub fn get(&self) -> Timestamp {
        self.current
    }

    pub fn set(&mut self, at: Timestamp) {
        self.current = at;
    }

    pub fn push(&mut self, at: Timestamp) {
        self.saved.push(self.current);
        self.current = at;
    }

    /// Returns the discarded value and restores the one saved by the
    /// matching push.
    pub fn pop(&mut self) -> Result<Timestamp> {
        let restored = self.saved.pop().ok_or(Error::CursorMismatch {
            expected: None,
            actual: None,
        })?;
        Ok(std::mem::replace(&mut self.current, restored))
    }

    /// Like [`pop`](Self::pop) but fails, leaving the cursor untouched, when
    /// the current value is not `expected`.
    pub fn pop_expect(&mut self, expected: Timestamp) -> Result<Timestamp> {
        if self.saved.is_empty() || self.current != expected {
            return Err(Error::CursorMismatch {
                expected: Some(expected),
                actual: (!self.saved.is_empty()).then_some(self.current),
            });
        }
        self.pop()
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}

struct Slot {
    reader: ComponentReader,
    pending: Option<LogRecord>,
}

pub struct Player {
    layout: SessionLayout,
    catalog: Catalog,
    slots: Vec<Slot>,
    order: Vec<usize>,
    cursor: Cursor,
    dirty: bool,
    state: PlayerState,
}

impl Player {
    pub fn open(session_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(session_dir, PlayerConfig::default())
    }

    pub fn open_with_config(session_dir: impl AsRef<Path>, config: PlayerConfig) -> Result<Self> {
        let layout = SessionLayout::new(session_dir);
        let catalog = Catalog::load(&layout)?;

        for name in layout.discover_components()? {
            if catalog.component(&name).is_none() {
                log::warn!(
                    "{}: {name}.log is not in the catalog and will not be played",
                    layout.root().display()
                );
            }
        }

        let mut slots = Vec::new();
        for summary in catalog.components() {
            let name = summary.name();
            if !layout.data_path(name)?.exists() {
                log::warn!(
                    "{}: catalogued component {name} has no data file, skipped",
                    layout.root().display()
                );
                continue;
            }
            slots.push(Slot {
                reader: ComponentReader::open_in(&layout, name)?,
                pending: None,
            });
        }

        let start = config.initial_cursor.unwrap_or_else(|| {
            catalog
                .time_range()
                .map_or(Timestamp::from_micros(0), |range| range.from.add_micros(-1))
        });
        let state = if slots.is_empty() {
            PlayerState::Idle
        } else {
            PlayerState::Ready
        };
        log::info!(
            "opened player on {}: {} components, cursor {}",
            layout.root().display(),
            slots.len(),
            start
        );
        Ok(Self {
            order: (0..slots.len()).collect(),
            layout,
            catalog,
            slots,
            cursor: Cursor::new(start),
            dirty: true,
            state,
        })
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Component names, indexed by [`PlayedMessage::source`].
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.reader.name())
    }

    pub fn reader(&self, source: usize) -> Option<&ComponentReader> {
        self.slots.get(source).map(|slot| &slot.reader)
    }

    pub fn cursor(&self) -> Timestamp {
        self.cursor.get()
    }

    pub fn cursor_depth(&self) -> usize {
        self.cursor.depth()
    }

    pub fn set_cursor(&mut self, at: Timestamp) {
        self.cursor.set(at);
        self.invalidate();
    }

    pub fn advance_cursor(&mut self, by: time::Duration) {
        let at = self.cursor.get() + by;
        self.set_cursor(at);
    }

    pub fn push_cursor(&mut self, at: Timestamp) {
        self.cursor.push(at);
        self.invalidate();
    }

    pub fn pop_cursor(&mut self) -> Result<Timestamp> {
        let popped = self.cursor.pop()?;
        self.invalidate();
        Ok(popped)
    }

    pub fn pop_cursor_expect(&mut self, expected: Timestamp) -> Result<Timestamp> {
        let popped = self.cursor.pop_expect(expected)?;
        self.invalidate();
        Ok(popped)
    }

    /// Runs `f` with the cursor temporarily at `at`.
    pub fn with_cursor<R>(
        &mut self,
        at: Timestamp,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let depth = self.cursor.depth();
        self.push_cursor(at);
        let result = f(self);
        while self.cursor.depth() > depth {
            self.pop_cursor()?;
        }
        result
    }

    /// Next message in global time order. The cursor moves to its time.
    pub fn next_message(&mut self) -> Result<Option<PlayedMessage>> {
        if self.state == PlayerState::Idle {
            return Ok(None);
        }
        self.ensure_ordered()?;
        let Some(&source) = self.order.first() else {
            return Ok(None);
        };
        let Some(record) = self.slots[source].pending.take() else {
            self.state = PlayerState::Drained;
            return Ok(None);
        };

        // On failure the record stays pending and the cursor stays put.
        let slot = &mut self.slots[source];
        match slot.reader.next_message_following(&record) {
            Ok(next) => slot.pending = next,
            Err(err) => {
                slot.pending = Some(record);
                return Err(err);
            }
        }
        self.cursor.set(record.time);
        self.reinsert_first();

        Ok(Some(PlayedMessage {
            source,
            component: self.slots[source].reader.name().to_string(),
            record,
        }))
    }

    /// Time from the cursor to the next message of any component.
    pub fn time_to_next(&mut self) -> Result<Option<time::Duration>> {
        if self.state == PlayerState::Idle {
            return Ok(None);
        }
        self.ensure_ordered()?;
        let Some(&source) = self.order.first() else {
            return Ok(None);
        };
        let Some(pending) = self.slots[source].pending.as_ref() else {
            return Ok(None);
        };
        time_between(self.slots[source].reader.name(), self.cursor.get(), pending.time).map(Some)
    }

    /// Mean message rate in messages per second, sampled at `samples` evenly
    /// spaced cursor positions over `[start, stop]`. Gaps under 100 µs count
    /// as 100 µs.
    pub fn message_density(
        &mut self,
        start: Timestamp,
        stop: Timestamp,
        samples: usize,
    ) -> Result<f64> {
        if samples == 0 {
            return Ok(0.0);
        }
        let span = stop.micros_since(start);
        let steps = samples.saturating_sub(1).max(1) as i64;
        self.with_cursor(start, |player| {
            let mut total = 0.0;
            for i in 0..samples {
                let at = start.add_micros(span / steps * i as i64);
                player.set_cursor(at);
                if let Some(gap) = player.time_to_next()? {
                    let gap_us = i64::try_from(gap.whole_microseconds()).unwrap_or(i64::MAX);
                    total += 1_000_000.0 / gap_us.max(MIN_DENSITY_GAP_US) as f64;
                }
            }
            Ok(total / samples as f64)
        })
    }

    fn invalidate(&mut self) {
        self.dirty = true;
        if self.state == PlayerState::Drained {
            self.state = PlayerState::Ready;
        }
    }

    fn ensure_ordered(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let cursor = self.cursor.get();
        for slot in &mut self.slots {
            slot.pending = slot.reader.next_message_after(cursor)?;
        }
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by_key(|&i| self.rank(i));
        self.order = order;
        self.dirty = false;
        log::debug!("player re-sorted {} components at {}", self.slots.len(), cursor);
        Ok(())
    }

    /// Moves the component at the front of `order` back to its rank.
    fn reinsert_first(&mut self) {
        let mut i = 0;
        while i + 1 < self.order.len() && self.rank(self.order[i]) > self.rank(self.order[i + 1]) {
            self.order.swap(i, i + 1);
            i += 1;
        }
    }

    fn rank(&self, source: usize) -> (bool, Option<Timestamp>, usize) {
        let pending = self.slots[source].pending.as_ref().map(|record| record.time);
        (pending.is_none(), pending, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_stack_restores_in_order() {
        let mut cursor = Cursor::new(Timestamp::from_micros(0));
        cursor.push(Timestamp::from_micros(5));
        cursor.push(Timestamp::from_micros(10));
        assert_eq!(cursor.pop().expect("pop"), Timestamp::from_micros(10));
        assert_eq!(cursor.pop().expect("pop"), Timestamp::from_micros(5));
        assert_eq!(cursor.get(), Timestamp::from_micros(0));
        assert!(matches!(
            cursor.pop(),
            Err(Error::CursorMismatch {
                expected: None,
                actual: None
            })
        ));
    }

    #[test]
    fn pop_expect_checks_value_without_popping() {
        let mut cursor = Cursor::new(Timestamp::from_micros(1));
        cursor.push(Timestamp::from_micros(2));
        let err = cursor
            .pop_expect(Timestamp::from_micros(3))
            .expect_err("mismatch");
        assert!(matches!(
            err,
            Error::CursorMismatch {
                expected: Some(_),
                actual: Some(_)
            }
        ));
        assert_eq!(cursor.depth(), 1);
        assert_eq!(
            cursor.pop_expect(Timestamp::from_micros(2)).expect("match"),
            Timestamp::from_micros(2)
        );
        assert_eq!(cursor.get(), Timestamp::from_micros(1));
    }
}
