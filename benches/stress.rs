use std::sync::Arc;
use std::time::{Duration, Instant};

use adstock::config::{PlacementConfig, PlacementTable};
use adstock::model::{AdEvent, AdType, HostContext, ShowRect};
use adstock::present::Presenter;
use adstock::registry::PlacementRegistry;
use adstock::router::CallbackRouter;
use adstock::sim::{HeadlessGateway, SimConfig, SimLoader};
use adstock::sweeper;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn build(n_placements: usize, stock: i32, sim: SimConfig) -> Arc<PlacementRegistry> {
    let mut table = PlacementTable::new();
    for i in 0..n_placements {
        table
            .insert(PlacementConfig::new(format!("p{i}"), AdType::Promotion, stock))
            .unwrap();
    }
    let router = Arc::new(CallbackRouter::new());
    let presenter = Presenter::spawn(HeadlessGateway::new(), router.clone());
    let loader = Arc::new(SimLoader::new(sim));
    Arc::new(PlacementRegistry::new(table, loader, presenter, router))
}

/// Time from `load_ads` to the first load callback on every placement.
async fn phase1_cold_fill(n_placements: usize, stock: i32, sim: SimConfig) {
    let registry = build(n_placements, stock, sim);
    let start = Instant::now();
    let mut handles = Vec::new();

    for id in registry.configured_ids() {
        let placement = registry.get_or_create(&id).unwrap();
        let mut rx = registry.subscribe(&id).unwrap();
        handles.push(tokio::spawn(async move {
            let started = Instant::now();
            placement.manager().load_ads();
            let event = rx.recv().await.unwrap();
            (started.elapsed(), matches!(event, AdEvent::LoadSuccess { .. }))
        }));
    }

    let mut latencies = Vec::new();
    let mut ok = 0;
    for result in futures::future::join_all(handles).await {
        let (latency, success) = result.unwrap();
        latencies.push(latency);
        ok += success as usize;
    }
    println!(
        "  {n_placements} placements, {ok} loaded in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    print_latency("first load callback", &mut latencies);
}

/// Dispense from every placement repeatedly while the stock refills behind.
async fn phase2_show_churn(n_placements: usize, stock: i32, rounds: usize, sim: SimConfig) {
    let registry = build(n_placements, stock, sim);
    for id in registry.configured_ids() {
        registry.get_or_create(&id).unwrap().manager().load_ads();
    }
    let sweeper = tokio::spawn(sweeper::run_sweeper(registry.clone(), Duration::from_millis(50)));

    let ctx = HostContext::new();
    let rect = ShowRect::new(0, 0, 1080, 1920);
    let mut latencies = Vec::new();
    let mut not_ready = 0;
    let start = Instant::now();

    for _ in 0..rounds {
        for placement in registry.placements() {
            let stock = placement.as_stocked().unwrap();
            let t = Instant::now();
            match stock.show(Some(&ctx), Some(rect)) {
                Ok(_) => {
                    latencies.push(t.elapsed());
                    registry.presenter().hide(stock.placement_id());
                }
                Err(_) => not_ready += 1,
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    registry.presenter().is_showing().await;

    let total = rounds * n_placements;
    println!(
        "  {rounds} rounds x {n_placements} placements = {total} shows in {:.2}s, {not_ready} not ready",
        start.elapsed().as_secs_f64()
    );
    print_latency("show dispatch", &mut latencies);
    sweeper.abort();
}

#[tokio::main]
async fn main() {
    let n_placements: usize = env_or("ADSTOCK_BENCH_PLACEMENTS", 200);
    let stock: i32 = env_or("ADSTOCK_BENCH_STOCK", 4);
    let rounds: usize = env_or("ADSTOCK_BENCH_ROUNDS", 100);
    let sim = SimConfig {
        candidates_per_fetch: 8,
        ttl: Duration::from_secs(300),
        latency: Duration::from_millis(env_or("ADSTOCK_BENCH_LATENCY_MS", 2)),
        fail_every: Some(env_or("ADSTOCK_BENCH_FAIL_EVERY", 7)),
    };

    println!("=== adstock stress benchmark ===");
    println!("placements: {n_placements}, stock: {stock}, latency: {:?}\n", sim.latency);

    println!("[phase 1] cold fill");
    phase1_cold_fill(n_placements, stock, sim.clone()).await;

    println!("\n[phase 2] show churn");
    phase2_show_churn(n_placements, stock, rounds, sim).await;

    println!("\n=== benchmark complete ===");
}
