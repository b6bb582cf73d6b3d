use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use std::collections::BTreeMap;

use granary_core::{ActorId, BatchId, Crop, SourceType, WarehouseId};
use granary_events::{EventPayload, InboundRecorded, StockDelta};
use granary_store::{
    Batch, EventDraft, EventFilter, LedgerStore, MemoryLedgerStore, ProjectionUpdates,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("build runtime")
}

fn inbound_draft(warehouse_id: WarehouseId, actor_id: ActorId, i: u64) -> EventDraft {
    let batch_id = BatchId::new();
    EventDraft::new(
        warehouse_id,
        actor_id,
        EventPayload::InboundRecorded(InboundRecorded {
            batch_id,
            crop: Crop::Maize,
            bags: (i % 40 + 1) as i64,
            source_type: SourceType::FarmerDelivery,
            source_name: "Bench Farmer".to_string(),
            batch_code: format!("BNCH-MAIZE-20250101-{i:04}"),
        }),
    )
}

fn inbound_updates(warehouse_id: WarehouseId, draft: &EventDraft) -> ProjectionUpdates {
    let EventPayload::InboundRecorded(inbound) = &draft.payload else {
        unreachable!("bench drafts are all inbound");
    };
    ProjectionUpdates {
        stock: Some(StockDelta {
            crop: inbound.crop,
            bags: inbound.bags,
        }),
        batch: Some(Batch {
            batch_id: inbound.batch_id,
            warehouse_id,
            batch_code: inbound.batch_code.clone(),
            crop: inbound.crop,
            source_type: inbound.source_type,
            source_name: inbound.source_name.clone(),
            initial_bags: inbound.bags,
            remaining_bags: inbound.bags,
            qr_token: "{}".to_string(),
            created_by: draft.actor_id,
            created_at: Utc::now(),
        }),
        ..ProjectionUpdates::none()
    }
}

fn seeded_store(rt: &tokio::runtime::Runtime, events: u64) -> (MemoryLedgerStore, WarehouseId) {
    let store = MemoryLedgerStore::new();
    let warehouse_id = WarehouseId::new();
    let actor_id = ActorId::new();
    rt.block_on(async {
        for i in 0..events {
            let draft = inbound_draft(warehouse_id, actor_id, i);
            let updates = inbound_updates(warehouse_id, &draft);
            store.append(draft, updates).await.expect("seed append");
        }
    });
    (store, warehouse_id)
}

fn bench_append_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("append_throughput");

    for batch_size in [1u64, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size));
        group.bench_with_input(
            BenchmarkId::new("inbound_with_projections", batch_size),
            batch_size,
            |b, &size| {
                b.iter(|| {
                    let store = MemoryLedgerStore::new();
                    let warehouse_id = WarehouseId::new();
                    let actor_id = ActorId::new();
                    rt.block_on(async {
                        for i in 0..size {
                            let draft = inbound_draft(warehouse_id, actor_id, i);
                            let updates = inbound_updates(warehouse_id, &draft);
                            black_box(store.append(draft, updates).await.unwrap());
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

fn bench_stream_read(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("stream_read");

    for event_count in [10u64, 100, 1000, 10000].iter() {
        let (store, warehouse_id) = seeded_store(&rt, *event_count);
        group.throughput(Throughput::Elements(*event_count));
        group.bench_with_input(
            BenchmarkId::new("full_stream", event_count),
            event_count,
            |b, _| {
                b.iter(|| {
                    let events = rt
                        .block_on(store.read(warehouse_id, EventFilter::all()))
                        .unwrap();
                    black_box(events);
                });
            },
        );
    }

    group.finish();
}

fn bench_stock_replay(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("stock_replay");

    for event_count in [100u64, 1000, 10000].iter() {
        let (store, warehouse_id) = seeded_store(&rt, *event_count);
        let events = rt
            .block_on(store.read(warehouse_id, EventFilter::all()))
            .unwrap();
        group.throughput(Throughput::Elements(*event_count));
        group.bench_with_input(
            BenchmarkId::new("fold_deltas", event_count),
            event_count,
            |b, _| {
                b.iter(|| {
                    let mut totals: BTreeMap<Crop, i64> = BTreeMap::new();
                    for event in &events {
                        if let Some(delta) = event.payload.stock_delta() {
                            *totals.entry(delta.crop).or_insert(0) += delta.bags;
                        }
                    }
                    black_box(totals);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append_throughput,
    bench_stream_read,
    bench_stock_replay
);
criterion_main!(benches);
