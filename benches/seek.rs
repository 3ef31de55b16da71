use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::tempdir;

use chil::{ComponentReader, RawMessage, Timestamp, Writer, WriterConfig};

const MESSAGES: i64 = 100_000;
const SPACING_US: i64 = 10_000;
const BASE: i64 = 1_313_611_666_725_440;

fn bench_seek(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_message_after");
    for &keyframe_max_messages in &[10_u32, 100, 1000] {
        let dir = tempdir().expect("tempdir");
        let session = dir.path().join("seek");
        let config = WriterConfig {
            keyframe_max_messages,
            ..WriterConfig::default()
        };
        let mut writer = Writer::open(&session, "nav", config).expect("writer");
        for i in 0..MESSAGES {
            writer
                .log_at(&RawMessage::new(1, "payload"), Timestamp::from_micros(BASE + i * SPACING_US))
                .expect("log");
        }
        writer.close().expect("close");
        let mut reader = ComponentReader::open(&session, "nav").expect("reader");

        group.bench_with_input(
            BenchmarkId::from_parameter(keyframe_max_messages),
            &keyframe_max_messages,
            |b, _| {
                // Deterministic pseudo-random query times.
                let mut query = 0x2545_f491_u64;
                b.iter(|| {
                    query = query.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    let offset = (query >> 16) as i64 % (MESSAGES * SPACING_US);
                    let found = reader
                        .next_message_after(black_box(Timestamp::from_micros(BASE + offset)))
                        .expect("search");
                    black_box(found)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_seek);
criterion_main!(benches);
