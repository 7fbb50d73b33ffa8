use criterion::{black_box, criterion_group, criterion_main, Criterion};
use meshmqtt_core::clock::test_support::ZeroRng;
use meshmqtt_core::formatter::Formatter;
use meshmqtt_core::parser::{self, Cmd};
use meshmqtt_core::retry_cache::RetryCache;
use meshmqtt_core::topic::TopicTemplate;

fn benchmark_format_single_publish(c: &mut Criterion) {
    let mut formatter = Formatter::new("kitchen");
    c.bench_function("format_single_publish", |b| {
        b.iter(|| {
            formatter.format_one(
                &ZeroRng,
                Cmd::Publish,
                black_box("kitchen/switch/k1/value"),
                black_box(Some("on")),
            )
        });
    });
}

fn benchmark_format_batch_of_ten(c: &mut Criterion) {
    let mut formatter = Formatter::new("kitchen");
    let records: Vec<(String, Option<String>)> = (0..10)
        .map(|i| (format!("kitchen/switch/k{i}/value"), Some("on".to_string())))
        .collect();

    c.bench_function("format_batch_of_ten", |b| {
        b.iter(|| formatter.format(&ZeroRng, Cmd::Publish, black_box(&records)));
    });
}

fn benchmark_parse_frame(c: &mut Criterion) {
    let frame = b"MQTT kitchen/ABCD\nP:kitchen/switch/k1/value on\nP:..k2/value off\n";
    c.bench_function("parse_frame", |b| {
        b.iter(|| {
            let mut template = TopicTemplate::new();
            parser::parse_frame(black_box(frame), &mut template)
        });
    });
}

fn benchmark_retry_cache_tick(c: &mut Criterion) {
    c.bench_function("retry_cache_tick_32_entries", |b| {
        b.iter_batched(
            || {
                let cache = RetryCache::new(32, 32 * 250);
                for i in 0..32u32 {
                    cache.add(b"MQTT kitchen/ABCD\nP:kitchen/switch/k1/value on\n", 1, i + 1, 200, 3, 0).unwrap();
                }
                cache
            },
            |cache| cache.tick(1_000, &ZeroRng, |_, _| 1, |_| {}),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    benchmark_format_single_publish,
    benchmark_format_batch_of_ten,
    benchmark_parse_frame,
    benchmark_retry_cache_tick,
);
criterion_main!(benches);
