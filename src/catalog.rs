//! Session-wide catalog of which components hold which message types when.
//!
//! The catalog is append-only: every closed writer appends one record listing
//! the time range of each type it logged. It is used for discovery only; the
//! per-component index files stay authoritative for seeking.

use std::collections::BTreeMap;
use std::io::Write;

use crate::config::LockPolicy;
use crate::grammar::{self, CatalogLine, TypePeriod, CATALOG_HEADER};
use crate::layout::{component_from_filename, SessionLayout};
use crate::lock::LockedFile;
use crate::timestamp::Timestamp;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeRange {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeRange {
    pub fn new(a: Timestamp, b: Timestamp) -> Self {
        Self {
            from: a.min(b),
            to: a.max(b),
        }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.from <= t && t <= self.to
    }

    fn overlaps(&self, other: &TimeRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComponentSummary {
    name: String,
    types: BTreeMap<u32, Vec<TimeRange>>,
}

impl ComponentSummary {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.types.keys().copied()
    }

    /// Disjoint, sorted ranges over which `type_id` was recorded.
    pub fn ranges(&self, type_id: u32) -> &[TimeRange] {
        self.types.get(&type_id).map_or(&[], Vec::as_slice)
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.types
            .values()
            .flatten()
            .copied()
            .reduce(|a, b| a.union(&b))
    }

    fn add(&mut self, type_id: u32, range: TimeRange) {
        let ranges = self.types.entry(type_id).or_default();
        let mut merged = range;
        ranges.retain(|existing| {
            if existing.overlaps(&merged) {
                merged = existing.union(&merged);
                false
            } else {
                true
            }
        });
        let pos = ranges.partition_point(|r| r.from < merged.from);
        ranges.insert(pos, merged);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    components: BTreeMap<String, ComponentSummary>,
    formats: Vec<String>,
    skipped_lines: usize,
}

impl Catalog {
    /// A session with no catalog file yet loads as an empty catalog.
    pub fn load(layout: &SessionLayout) -> Result<Self> {
        let bytes = match std::fs::read(layout.catalog_path()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("{}: no catalog", layout.root().display());
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let catalog = Self::parse(&String::from_utf8_lossy(&bytes));
        log::info!(
            "catalog {}: {} components",
            layout.root().display(),
            catalog.components.len()
        );
        Ok(catalog)
    }

    /// Tolerant parse: malformed lines are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut catalog = Catalog::default();
        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match CatalogLine::parse(line) {
                Ok(CatalogLine::Header) => {}
                Ok(CatalogLine::Format(revision)) => {
                    if !catalog.formats.iter().any(|r| r == revision) {
                        catalog.formats.push(revision.to_string());
                    }
                }
                Ok(CatalogLine::Component { filename, periods }) => {
                    let Some(name) = component_from_filename(filename) else {
                        log::warn!("catalog line {}: bad component file {filename:?}", lineno + 1);
                        catalog.skipped_lines += 1;
                        continue;
                    };
                    let summary = catalog
                        .components
                        .entry(name.to_string())
                        .or_insert_with(|| ComponentSummary {
                            name: name.to_string(),
                            types: BTreeMap::new(),
                        });
                    for period in periods {
                        summary.add(period.type_id, TimeRange::new(period.from, period.to));
                    }
                }
                Err(err) => {
                    log::warn!("catalog line {}: skipped ({err})", lineno + 1);
                    catalog.skipped_lines += 1;
                }
            }
        }
        catalog
    }

    /// Appends one component record under the catalog's exclusive lock.
    pub fn append(
        layout: &SessionLayout,
        filename: &str,
        periods: &[TypePeriod],
        revision: &str,
        policy: &LockPolicy,
    ) -> Result<()> {
        if periods.is_empty() {
            return Ok(());
        }
        let mut text = String::new();
        let mut file = LockedFile::open_append(&layout.catalog_path(), policy)?;
        if file.is_empty()? {
            text.push_str(&grammar::header_line(CATALOG_HEADER));
        } else if file.last_byte()? != Some(b'\n') {
            text.push('\n');
        }
        text.push_str(&grammar::format_line(revision));
        text.push_str(&grammar::catalog_line(filename, periods)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Components in name order.
    pub fn components(&self) -> impl Iterator<Item = &ComponentSummary> {
        self.components.values()
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSummary> {
        self.components.get(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn ranges(&self, component: &str, type_id: u32) -> &[TimeRange] {
        self.components
            .get(component)
            .map_or(&[], |summary| summary.ranges(type_id))
    }

    pub fn components_with(&self, type_id: u32) -> Vec<&str> {
        self.components
            .values()
            .filter(|summary| summary.types.contains_key(&type_id))
            .map(ComponentSummary::name)
            .collect()
    }

    /// Earliest to latest recorded time over all components.
    pub fn time_range(&self) -> Option<TimeRange> {
        self.components
            .values()
            .filter_map(ComponentSummary::time_range)
            .reduce(|a, b| a.union(&b))
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(us: i64) -> Timestamp {
        Timestamp::from_micros(1_300_000_000_000_000 + us)
    }

    fn period(type_id: u32, from: i64, to: i64) -> TypePeriod {
        TypePeriod {
            type_id,
            from: ts(from),
            to: ts(to),
        }
    }

    #[test]
    fn append_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = SessionLayout::new(dir.path().join("s"));
        std::fs::create_dir_all(layout.root()).expect("mkdir");
        let policy = LockPolicy::default();
        Catalog::append(&layout, "a.log", &[period(1, 0, 10), period(2, 5, 6)], "r1", &policy)
            .expect("append a");
        Catalog::append(&layout, "b.log", &[period(1, 20, 30)], "r1", &policy).expect("append b");
        Catalog::append(&layout, "empty.log", &[], "r1", &policy).expect("append nothing");

        let text = std::fs::read_to_string(layout.catalog_path()).expect("read");
        assert!(text.starts_with("CHILSUPERIDX\nFormat r1\n"));

        let catalog = Catalog::load(&layout).expect("load");
        let names: Vec<_> = catalog.components().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(catalog.components_with(2), vec!["a"]);
        assert_eq!(catalog.ranges("a", 1), &[TimeRange::new(ts(0), ts(10))]);
        assert_eq!(catalog.time_range(), Some(TimeRange::new(ts(0), ts(30))));
        assert_eq!(catalog.formats(), &["r1".to_string()]);
    }

    #[test]
    fn repeated_records_merge_intervals() {
        let text = format!(
            "CHILSUPERIDX\nnav.log ([4 {}--{}])\nnav.log ([4 {}--{}], [4 {}--{}])\n",
            ts(0),
            ts(10),
            ts(5),
            ts(20),
            ts(40),
            ts(50)
        );
        let catalog = Catalog::parse(&text);
        assert_eq!(
            catalog.ranges("nav", 4),
            &[TimeRange::new(ts(0), ts(20)), TimeRange::new(ts(40), ts(50))]
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = format!(
            "CHILSUPERIDX\nnav.log ([4 {}--{}])\ngarbage here\nsonar.log ([1 nope])\n",
            ts(0),
            ts(1)
        );
        let catalog = Catalog::parse(&text);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.skipped_lines(), 2);
    }
}
