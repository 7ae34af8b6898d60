use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use energy_market::{AreaConfig, Device, MarketArea, StorageConfig};
use external_gateway::{Command, CommandKind, ExternalGateway, GatewayConfig};
use message_bus::{BusConfig, InMemoryBus};
use serde_json::json;

fn connected_gateway() -> (Arc<MarketArea>, Arc<ExternalGateway>) {
    let bus = InMemoryBus::new(BusConfig { record_history: false, ..Default::default() });
    let area = Arc::new(MarketArea::new("bench", Utc::now(), AreaConfig::default()));
    let gateway = Arc::new(
        ExternalGateway::new(
            Arc::new(Device::new("storage")),
            area.clone(),
            Arc::new(bus.session().unwrap()),
            StorageConfig::default(),
            GatewayConfig::default(),
        )
        .unwrap(),
    );
    gateway.register("{}");
    area.cycle_markets();
    gateway.event_market_cycle();
    (area, gateway)
}

fn bench_parse_offer(c: &mut Criterion) {
    let payload = json!({"price": 10.0, "energy": 2.0, "transaction_id": "t1"});

    c.bench_function("parse_offer", |b| {
        b.iter(|| {
            let command = Command::parse(CommandKind::Offer, black_box(&payload));
            black_box(command).unwrap();
        })
    });
}

fn bench_admit_and_apply(c: &mut Criterion) {
    let (_area, gateway) = connected_gateway();
    let payload = json!({"transaction_id": "list"}).to_string();
    let mut tick = 0u64;

    c.bench_function("admit_16_apply_tick", |b| {
        b.iter(|| {
            for _ in 0..16 {
                gateway.admit(CommandKind::ListOffers, black_box(&payload)).unwrap();
            }
            tick += 1;
            gateway.event_tick(black_box(tick));
        })
    });
}

criterion_group!(benches, bench_parse_offer, bench_admit_and_apply);
criterion_main!(benches);
