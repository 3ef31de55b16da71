use std::time::Duration;

use chil::grammar::LogLine;
use chil::layout::SessionLayout;
use chil::{
    Catalog, ComponentReader, Error, LogStatus, Player, RawMessage, SkewDirection, TimeRange,
    Timestamp, Writer, WriterConfig,
};
use tempfile::tempdir;

const BASE: i64 = 1_313_611_666_725_440;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ts(us: i64) -> Timestamp {
    Timestamp::from_micros(BASE + us)
}

fn record_skewed(session: &std::path::Path) {
    let mut writer = Writer::open(session, "depth", WriterConfig::default()).expect("open");
    assert_eq!(
        writer.log_at(&RawMessage::new(4, "m1"), ts(100)).expect("m1"),
        LogStatus::Logged
    );
    let status = writer.log_at(&RawMessage::new(4, "m2"), ts(95)).expect("m2");
    assert_eq!(
        status,
        LogStatus::ClockSkew {
            regressed_by: Duration::from_micros(5)
        }
    );
    writer.close().expect("close");
}

#[test]
fn fresh_anchor_precedes_resynced_message() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("skew");
    record_skewed(&session);

    let path = SessionLayout::new(&session).data_path("depth").expect("path");
    let text = std::fs::read_to_string(path).expect("read");
    let lines: Vec<_> = text.lines().collect();
    let m2 = lines
        .iter()
        .position(|line| line.ends_with("4(m2)"))
        .expect("m2 line");
    assert_eq!(LogLine::parse(lines[m2 - 1]), Ok(LogLine::Time(ts(95))));
    assert_eq!(lines[m2], "0 4(m2)");
}

#[test]
fn resynced_message_is_still_found() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("skew");
    record_skewed(&session);

    let mut reader = ComponentReader::open(&session, "depth").expect("reader");
    assert_eq!(reader.epochs(), 2);
    let found = reader
        .next_message_after(ts(95).add_micros(-1))
        .expect("search")
        .expect("m2");
    assert_eq!(found.payload, "m2");
    let found = reader
        .next_message_after(ts(95))
        .expect("search")
        .expect("m1");
    assert_eq!(found.payload, "m1");
    assert_eq!(reader.next_message_after(ts(100)).expect("search"), None);
}

#[test]
fn playback_orders_skewed_messages_by_time() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("skew");
    record_skewed(&session);

    let mut player = Player::open(&session).expect("player");
    let mut payloads = Vec::new();
    while let Some(played) = player.next_message().expect("next") {
        payloads.push(played.record.payload);
    }
    assert_eq!(payloads, vec!["m2", "m1"]);
}

// The catalog range for a type covers both sides of a resync: m2 was logged
// after m1 but its time extends the range downwards.
#[test]
fn catalog_range_spans_resynced_messages() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("skew");
    record_skewed(&session);

    let catalog = Catalog::load(&SessionLayout::new(&session)).expect("catalog");
    assert_eq!(catalog.ranges("depth", 4), &[TimeRange::new(ts(95), ts(100))]);
}

#[test]
fn skew_beyond_bound_is_fatal() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("skew");
    let config = WriterConfig {
        max_clock_skew: Some(Duration::from_secs(60)),
        ..WriterConfig::default()
    };
    let mut writer = Writer::open(&session, "depth", config).expect("open");
    writer
        .log_at(&RawMessage::new(4, "ok"), ts(3_600_000_000))
        .expect("ok");
    let err = writer
        .log_at(&RawMessage::new(4, "stale"), ts(0))
        .expect_err("fatal skew");
    match err {
        Error::ClockSkew {
            direction, skew, ..
        } => {
            assert_eq!(direction, SkewDirection::Backward);
            assert_eq!(skew, Duration::from_secs(3_600));
        }
        other => panic!("unexpected error {other}"),
    }
    writer.close().expect("close");

    let mut reader = ComponentReader::open(&session, "depth").expect("reader");
    let all: Vec<_> = reader
        .records()
        .expect("records")
        .map(|r| r.expect("record").payload)
        .collect();
    assert_eq!(all, vec!["ok"]);
}

#[test]
fn unbounded_skew_is_accepted() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("skew");
    let config = WriterConfig {
        max_clock_skew: None,
        ..WriterConfig::default()
    };
    let mut writer = Writer::open(&session, "depth", config).expect("open");
    writer
        .log_at(&RawMessage::new(4, "late"), ts(86_400_000_000 * 30))
        .expect("late");
    let status = writer
        .log_at(&RawMessage::new(4, "early"), ts(0))
        .expect("early");
    assert!(matches!(status, LogStatus::ClockSkew { .. }));
    writer.close().expect("close");
}
