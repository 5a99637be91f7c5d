//! Performance benchmarks for beacon-engine

use beacon_engine::{
    canonicalize, ClientFilter, EventHistory, EventSource, InboundMessage, SseDecoder, SseFrame,
    SyncEvent,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn sample_event(n: u64) -> SyncEvent {
    SyncEvent::new(
        n.to_string(),
        "stage_change",
        json!({"stage": "paint", "bay": n % 8}),
        Some(format!("ORD-{}", n % 100)),
        1_706_745_600_000 + n,
        EventSource::Push,
        1_706_745_600_000 + n,
    )
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching");

    group.bench_function("canonicalize_alias", |b| {
        b.iter(|| canonicalize(black_box("Stage-Changed")))
    });

    let filter = ClientFilter::from_query(Some("ORD-7"), Some("stage_change,order_created"));
    group.bench_function("client_filter_hit", |b| {
        b.iter(|| filter.matches_canonical(black_box(Some("ORD-7")), black_box("stage_change")))
    });
    group.bench_function("client_filter_miss_subjectless", |b| {
        b.iter(|| filter.matches_canonical(black_box(None), black_box("stage_change")))
    });

    // Fan-out cost: one event against N client filters
    for clients in [10usize, 100, 1000] {
        let filters: Vec<ClientFilter> = (0..clients)
            .map(|n| ClientFilter::from_query(Some(&format!("ORD-{}", n % 50)), None))
            .collect();
        group.bench_with_input(BenchmarkId::new("fan_out", clients), &filters, |b, filters| {
            b.iter(|| {
                filters
                    .iter()
                    .filter(|f| f.matches_canonical(Some("ORD-7"), "stage_change"))
                    .count()
            })
        });
    }

    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    group.bench_function("push_full_buffer", |b| {
        let mut history = EventHistory::new(100);
        history.extend((0..100).map(sample_event));
        let mut n = 100u64;
        b.iter(|| {
            n += 1;
            history.push(black_box(sample_event(n)))
        })
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let text: String = (0..100u64)
        .map(|n| {
            let event = sample_event(n);
            let body = json!({
                "eventType": event.event_type,
                "data": event.payload,
                "subjectID": event.subject_id,
                "timestamp": event.timestamp,
            });
            SseFrame::named("stage_change", body.to_string())
                .with_id(n.to_string())
                .encode()
        })
        .collect();

    group.bench_function("decode_and_parse_100_frames", |b| {
        b.iter(|| {
            let mut decoder = SseDecoder::new();
            decoder
                .feed(black_box(text.as_bytes()))
                .iter()
                .filter_map(|f| InboundMessage::parse(f).ok())
                .count()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_matching, bench_history, bench_decode);
criterion_main!(benches);
