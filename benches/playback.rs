use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;

use chil::{Player, RawMessage, Timestamp, Writer, WriterConfig};

const COMPONENTS: usize = 8;
const MSGS_PER_COMPONENT: i64 = 10_000;
const BASE: i64 = 1_313_611_666_725_440;

fn bench_playback(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join("playback");
    for n in 0..COMPONENTS {
        let mut writer =
            Writer::open(&session, &format!("component{n}"), WriterConfig::default()).expect("writer");
        for i in 0..MSGS_PER_COMPONENT {
            let at = Timestamp::from_micros(BASE + i * 1_000 + n as i64 * 37);
            writer.log_at(&RawMessage::new(n as u32, "x"), at).expect("log");
        }
        writer.close().expect("close");
    }

    let mut group = c.benchmark_group("playback");
    group.throughput(Throughput::Elements(COMPONENTS as u64 * MSGS_PER_COMPONENT as u64));
    group.sample_size(10);
    group.bench_function(format!("{COMPONENTS}_components"), |b| {
        b.iter(|| {
            let mut player = Player::open(&session).expect("player");
            let mut played = 0u64;
            while let Some(message) = player.next_message().expect("next") {
                black_box(&message);
                played += 1;
            }
            assert_eq!(played, COMPONENTS as u64 * MSGS_PER_COMPONENT as u64);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_playback);
criterion_main!(benches);
