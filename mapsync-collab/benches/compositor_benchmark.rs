use criterion::{criterion_group, criterion_main, Criterion};
use mapsync_collab::broadcast::BroadcastDispatcher;
use mapsync_collab::compositor::compose;
use mapsync_collab::confirmed::ConfirmedItems;
use mapsync_collab::overrides::OverrideItem;
use mapsync_collab::pending::{ItemProcess, PendingOperations, ProcessStatus};
use mapsync_collab::protocol::ServerMessage;
use mapsync_collab::session::SessionRegistry;
use mapsync_core::{DataId, Geometry, Item, ItemPatch, MapContext, MapKind, NewItem};
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::mpsc;

fn items(n: usize) -> Vec<Item> {
    (0..n)
        .map(|i| Item {
            id: DataId::new("ds1", i.to_string()),
            geometry: Geometry::Point([139.0 + i as f64 * 1e-4, 35.0]),
            geo_properties: Default::default(),
            name: Some(format!("Item{i}")),
            last_edited_time: "2024-06-01T09:00:00Z".into(),
            content: None,
        })
        .collect()
}

fn bench_compose_1000_confirmed(c: &mut Criterion) {
    let mut store = ConfirmedItems::new();
    store.apply_fetch(items(1000));

    c.bench_function("compose_1000_confirmed", |b| {
        b.iter(|| black_box(compose(black_box(&store), &[], &[])))
    });
}

fn bench_compose_with_pending_and_overrides(c: &mut Criterion) {
    let mut store = ConfirmedItems::new();
    store.apply_fetch(items(1000));

    // 50 updates, 20 deletes and 10 placeholders
    let ops = PendingOperations::new();
    let mut pending: Vec<ItemProcess> = Vec::new();
    for i in 0..50 {
        pending.push(ItemProcess::new(
            ops.allocate_id(),
            ProcessStatus::Updating {
                target: DataId::new("ds1", i.to_string()),
                patch: ItemPatch::name(format!("Renamed{i}")),
            },
        ));
    }
    for i in 100..120 {
        pending.push(ItemProcess::new(
            ops.allocate_id(),
            ProcessStatus::Deleting {
                target: DataId::new("ds1", i.to_string()),
            },
        ));
    }
    for _ in 0..10 {
        pending.push(ItemProcess::new(
            ops.allocate_id(),
            ProcessStatus::Registering {
                temp_id: DataId::temporary("ds1"),
                payload: NewItem::new("ds1", Geometry::Point([139.5, 35.5])),
            },
        ));
    }

    let overrides: Vec<OverrideItem> = (200..220)
        .map(|i| OverrideItem::Delete {
            target: DataId::new("ds1", i.to_string()),
        })
        .collect();

    c.bench_function("compose_1000_with_80_pending_20_overrides", |b| {
        b.iter(|| black_box(compose(&store, black_box(&pending), black_box(&overrides))))
    });
}

fn bench_broadcast_100_viewers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_updated_100_viewers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let registry = Arc::new(SessionRegistry::new());
                let dispatcher = BroadcastDispatcher::new(registry.clone());
                let map = MapContext::new("m1", MapKind::Real);

                let mut receivers = Vec::new();
                for i in 0..100 {
                    let sid = registry.add_session(format!("sid-{i}")).await;
                    let (tx, rx) = mpsc::unbounded_channel();
                    registry.attach_socket(&sid, tx).await;
                    registry.set_current_map(&sid, map.clone()).await;
                    receivers.push(rx);
                }

                let sent = dispatcher
                    .broadcast("m1", Some(MapKind::Real), black_box(&ServerMessage::Updated))
                    .await;
                black_box(sent);
            });
        })
    });
}

fn bench_invalidate_everywhere(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = SessionRegistry::new();
    let delivered: Vec<DataId> = (0..500).map(|i| DataId::new("ds1", i.to_string())).collect();
    rt.block_on(async {
        for i in 0..100 {
            let sid = registry.add_session(format!("sid-{i}")).await;
            registry.record_delivered(&sid, delivered.iter()).await;
        }
    });
    let targets: Vec<DataId> = delivered[..10].to_vec();

    c.bench_function("invalidate_10_ids_100_sessions", |b| {
        b.iter(|| rt.block_on(async { black_box(registry.invalidate_everywhere(&targets).await) }))
    });
}

criterion_group!(
    benches,
    bench_compose_1000_confirmed,
    bench_compose_with_pending_and_overrides,
    bench_broadcast_100_viewers,
    bench_invalidate_everywhere,
);
criterion_main!(benches);
