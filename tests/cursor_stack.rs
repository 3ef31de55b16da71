use chil::{Error, Player, RawMessage, Timestamp, Writer, WriterConfig};
use tempfile::tempdir;

const BASE: i64 = 1_313_611_666_725_440;

fn ts(us: i64) -> Timestamp {
    Timestamp::from_micros(BASE + us)
}

fn player_over(times: &[i64]) -> (tempfile::TempDir, Player) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("cursor");
    let mut writer = Writer::open(&session, "a", WriterConfig::default()).expect("open");
    for &us in times {
        writer.log_at(&RawMessage::new(1, "m"), ts(us)).expect("log");
    }
    writer.close().expect("close");
    let player = Player::open(&session).expect("player");
    (dir, player)
}

#[test]
fn push_pop_is_lifo() {
    let (_dir, mut player) = player_over(&[0, 10]);
    let start = player.cursor();
    player.push_cursor(ts(5));
    player.push_cursor(ts(10));
    assert_eq!(player.pop_cursor().expect("pop"), ts(10));
    assert_eq!(player.pop_cursor().expect("pop"), ts(5));
    assert_eq!(player.cursor(), start);
    assert!(matches!(
        player.pop_cursor(),
        Err(Error::CursorMismatch { .. })
    ));
}

#[test]
fn pop_expect_reports_divergence() {
    let (_dir, mut player) = player_over(&[0, 10]);
    player.push_cursor(ts(5));
    // Playback moves the cursor away from the pushed value.
    let played = player.next_message().expect("next").expect("message");
    assert_eq!(played.record.time, ts(10));
    match player.pop_cursor_expect(ts(5)) {
        Err(Error::CursorMismatch { expected, actual }) => {
            assert_eq!(expected, Some(ts(5)));
            assert_eq!(actual, Some(ts(10)));
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert_eq!(player.cursor_depth(), 1);
    assert_eq!(player.pop_cursor_expect(ts(10)).expect("pop"), ts(10));
}

#[test]
fn push_re_sorts_playback() {
    let (_dir, mut player) = player_over(&[0, 10, 20, 30]);
    assert_eq!(player.next_message().expect("next").expect("m").record.time, ts(0));
    player.push_cursor(ts(15));
    assert_eq!(player.next_message().expect("next").expect("m").record.time, ts(20));
    player.pop_cursor().expect("pop");
    assert_eq!(player.cursor(), ts(0));
    assert_eq!(player.next_message().expect("next").expect("m").record.time, ts(10));
}

#[test]
fn with_cursor_restores_after_error() {
    let (_dir, mut player) = player_over(&[0, 10]);
    let before = player.cursor();
    let result: chil::Result<()> = player.with_cursor(ts(7), |p| {
        assert_eq!(p.cursor(), ts(7));
        p.push_cursor(ts(8));
        Err(Error::Corrupt("bail out"))
    });
    assert!(matches!(result, Err(Error::Corrupt(_))));
    assert_eq!(player.cursor(), before);
    assert_eq!(player.cursor_depth(), 0);
}
