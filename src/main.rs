use std::sync::Arc;

use tracing::{info, warn};

use adstock::config::{HostConfig, PlacementConfig, PlacementTable};
use adstock::model::{AdType, HostContext, ShowRect};
use adstock::present::Presenter;
use adstock::registry::{ManagedPlacement, PlacementRegistry};
use adstock::router::CallbackRouter;
use adstock::sim::{HeadlessGateway, SimLoader};
use adstock::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = HostConfig::from_env();
    adstock::observability::init(config.metrics_port)?;

    let table = match &config.placements_path {
        Some(path) => PlacementTable::load(path)?,
        None => {
            let mut table = PlacementTable::new();
            table.insert(PlacementConfig::new("default", AdType::Promotion, 2))?;
            table
        }
    };

    let router = Arc::new(CallbackRouter::new());
    let presenter = Presenter::spawn(HeadlessGateway::new(), router.clone());
    let loader = Arc::new(SimLoader::new(config.sim.clone()));
    let registry = Arc::new(PlacementRegistry::new(table, loader, presenter, router));

    for id in registry.configured_ids() {
        let placement = registry.get_or_create(&id)?;
        let mut events = registry.subscribe(&id)?;
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                info!("{id}: {}", event.label());
            }
        });
        placement.manager().load_ads();
    }

    info!("adstock running");
    info!("  placements: {}", registry.len());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  show_interval: {:?}", config.show_interval);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweeper = tokio::spawn(sweeper::run_sweeper(registry.clone(), config.sweep_interval));

    // Graceful shutdown on SIGTERM/ctrl-c
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let ctx = HostContext::new();
    let rect = ShowRect::new(0, 0, 1080, 1920);
    let mut show_tick = tokio::time::interval(config.show_interval);
    show_tick.tick().await;
    let mut on_screen: Option<String> = None;

    loop {
        tokio::select! {
            _ = show_tick.tick() => {
                if let Some(id) = on_screen.take() {
                    registry.presenter().hide(&id);
                }
                on_screen = show_next(&registry, &ctx, rect);
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    sweeper.abort();
    if let Some(id) = on_screen {
        registry.presenter().hide(&id);
    }
    registry.presenter().is_showing().await;
    ctx.release();
    for id in registry.placement_ids() {
        registry.destroy(&id);
    }
    info!("adstock stopped");
    Ok(())
}

/// Show one unit from the first placement that has one. Returns the placement
/// now on screen.
fn show_next(registry: &PlacementRegistry, ctx: &HostContext, rect: ShowRect) -> Option<String> {
    for placement in registry.placements() {
        match &placement {
            ManagedPlacement::Stocked(stock) => {
                if !stock.is_ready() {
                    continue;
                }
                match stock.show(Some(ctx), Some(rect)) {
                    Ok(unit_id) => {
                        info!("{}: dispatched {unit_id}", stock.placement_id());
                        return Some(stock.placement_id().to_string());
                    }
                    Err(e) => warn!("{}: show failed: {e}", stock.placement_id()),
                }
            }
            ManagedPlacement::Direct(direct) => {
                match direct.take_ready() {
                    Some(unit) => info!(
                        "{}: host renders {} itself",
                        placement.manager().placement_id(),
                        unit.id
                    ),
                    None => placement.manager().load_ads(),
                }
            }
        }
    }
    None
}
