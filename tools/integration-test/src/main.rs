use std::time::Duration;

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use dispatch_service::{initialize_logging, DeviceSpec, DispatchService, ServiceConfig};
use external_gateway::{market_notify_channel, market_notify_response_channel};
use message_bus::InMemoryBus;
use serde_json::{json, Value};
use uuid::Uuid;

const TICKS_PER_SLOT: u64 = 10;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = initialize_logging();
    println!("🚀 Starting Grid Dispatch Integration Test");

    let service = DispatchService::new(test_config()).context("Failed to build deployment")?;
    let bus = service.bus();
    let clock = service.clock();

    // Test 1: Registration only takes effect at the next slot
    println!("🔌 Test 1: Registering storage...");
    bus.publish("storage/register_participant", request("reg-1", json!({})));
    let registered = expect_one(bus, "storage/response/register_participant")?;
    println!("   Response: {}", registered);
    ensure!(registered["registered"] == true, "registration was not accepted");
    ensure!(!service.gateway("storage").context("storage missing")?.is_connected(), "connected too early");

    run_slot(&service);
    ensure!(service.gateway("storage").context("storage missing")?.is_connected(), "not connected after slot");
    println!("✅ Storage is connected");

    // Test 2: Commands are queued and answered on the next tick
    println!("\n📨 Test 2: Posting offer, bid and queries...");
    bus.publish("storage/offer", request("offer-1", json!({"price": 24.0, "energy": 2.0})));
    bus.publish("storage/bid", request("bid-1", json!({"price": 3.0, "energy": 1.0})));
    bus.publish("storage/list_offers", request("list-1", json!({})));
    bus.publish("storage/device_info", request("info-1", json!({})));
    wait_for_pending(&service, 4)?;
    ensure!(bus.published("storage/response/offer").is_empty(), "offer answered before the tick");

    clock.advance_tick();
    let offer = expect_one(bus, "storage/response/offer")?;
    println!("   Offer: {}", offer);
    ensure!(offer["status"] == "ready" && offer["transaction_id"] == "offer-1", "offer failed");
    println!("   Bid: {}", expect_one(bus, "storage/response/bid")?);
    println!("   Offer list: {}", expect_one(bus, "storage/response/list_offers")?["offer_list"]);
    println!("   Device info: {}", expect_one(bus, "storage/response/stats")?["device_info"]);
    println!("✅ Queued commands applied at tick {}", clock.get_current_tick() - 1);

    // Test 3: Invalid requests are rejected immediately
    println!("\n🚫 Test 3: Sending invalid requests...");
    bus.publish("storage/offer", request("bad-1", json!({"price": 1.0, "energy": 1.0, "seller": "x"})));
    bus.publish("storage/delete_offer", request("bad-2", json!({"offer": "unknown"})));
    let rejected = bus.wait_for("storage/response/offer", 2, RESPONSE_TIMEOUT);
    ensure!(rejected.len() == 2 && rejected[1]["status"] == "error", "unexpected key was accepted");
    println!("   {}", rejected[1]["error_message"]);
    let delete = expect_one(bus, "storage/response/delete_offer")?;
    ensure!(delete["status"] == "error", "unknown offer id was accepted");
    println!("   {}", delete["error_message"]);
    println!("✅ Invalid requests rejected with their transaction ids");

    // Test 4: Aggregator batch runs immediately
    println!("\n🗂️  Test 4: Aggregator batch for battery...");
    let aggregator = service.aggregator("agg-1").context("aggregator missing")?;
    let battery = service.gateway("battery").context("battery missing")?.device().uuid.clone();
    let batch = json!({
        "transaction_id": "batch-1",
        "batch_commands": {
            battery.clone(): [
                {"type": "bid", "price": 6.0, "energy": 2.0, "transaction_id": "b-1"},
                {"type": "list_bids", "transaction_id": "b-2"},
                {"type": "update_offer", "price": 1.0, "energy": 1.0, "transaction_id": "b-3"},
            ]
        }
    });
    bus.publish(&aggregator.batch_commands_channel(), batch.to_string());
    let responses = expect_one(bus, &aggregator.batch_response_channel())?;
    let results = responses["responses"][battery.as_str()].as_array().cloned().unwrap_or_default();
    for result in &results {
        println!("   {} -> {}", result["command"], result["status"]);
    }
    ensure!(results.len() == 3 && results[0]["status"] == "ready", "aggregator bid failed");
    ensure!(results[2]["status"] == "error", "update without offers succeeded");
    println!("✅ Aggregator batch answered");

    // Test 5: Market events are forwarded and acknowledged
    println!("\n📡 Test 5: Broadcasting a trade event...");
    let market_id = service.area().next_market().id().to_string();
    let event = json!({
        "event_type": 4,
        "kwargs": {"trade": trade("pv", "storage")},
        "transaction_uuid": Uuid::new_v4().to_string(),
    });
    bus.publish(&market_notify_channel(&market_id), event.to_string());
    let ack = expect_one(bus, &market_notify_response_channel(&market_id))?;
    println!("   Ack: {}", ack);
    let forwarded = expect_one(bus, "storage/events/trade")?;
    ensure!(forwarded.get("seller_origin").is_none(), "internal trade fields leaked");
    println!("✅ Trade forwarded to storage");

    // Test 6: Unregistration at the slot boundary
    println!("\n👋 Test 6: Unregistering storage...");
    bus.publish("storage/unregister_participant", request("unreg-1", json!({})));
    let unregistered = expect_one(bus, "storage/response/unregister_participant")?;
    ensure!(unregistered["unregistered"] == true, "unregistration was rejected");
    bus.publish("storage/list_bids", request("late-1", json!({})));
    wait_for_pending(&service, 1)?;
    run_slot(&service);
    ensure!(!service.gateway("storage").context("storage missing")?.is_connected(), "still connected");
    println!("   Market summaries: {}", bus.published("storage/events/market").len());
    println!("   Tick events: {}", bus.published("storage/events/tick").len());
    println!("   Aggregator market events: {}", bus.published(&aggregator.market_events_channel()).len());
    println!("✅ Storage disconnected");

    service.shutdown();
    println!("\n📊 Final status:\n{}", serde_json::to_string_pretty(&service.status())?);
    println!("\n🎉 Integration test completed successfully!");
    Ok(())
}

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.clock.ticks_per_slot = TICKS_PER_SLOT;
    config.clock.tick_cadence_ms = 0;
    config.bus.record_history = true;
    let mut battery = DeviceSpec::new("battery");
    battery.aggregator = Some("agg-1".to_string());
    config.devices = vec![DeviceSpec::new("storage"), battery];
    config
}

fn request(transaction_id: &str, mut body: Value) -> String {
    body["transaction_id"] = json!(transaction_id);
    body.to_string()
}

fn trade(seller: &str, buyer: &str) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "time": Utc::now(),
        "offer_id": Uuid::new_v4().to_string(),
        "seller": seller,
        "buyer": buyer,
        "energy": 1.0,
        "price": 12.0,
        "seller_origin": seller,
        "buyer_origin": buyer,
    })
}

/// Advance the clock through the next slot boundary
fn run_slot(service: &DispatchService) {
    while !service.clock().advance_tick().rotated {}
}

fn expect_one(bus: &InMemoryBus, channel: &str) -> Result<Value> {
    bus.wait_for(channel, 1, RESPONSE_TIMEOUT)
        .pop()
        .with_context(|| format!("no message on {}", channel))
}

fn wait_for_pending(service: &DispatchService, count: usize) -> Result<()> {
    let gateway = service.gateway("storage").context("storage missing")?;
    let deadline = std::time::Instant::now() + RESPONSE_TIMEOUT;
    while gateway.pending_requests() < count {
        ensure!(std::time::Instant::now() < deadline, "only {} request(s) queued", gateway.pending_requests());
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}
