use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::registry::PlacementRegistry;

/// Background task that periodically checks every live placement, evicting
/// expired units and kicking replenishment without waiting for a host poll.
pub async fn run_sweeper(registry: Arc<PlacementRegistry>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let ready = sweep_once(&registry);
        debug!("sweep: {ready}/{} placements ready", registry.len());
    }
}

/// One pass over the registry. Returns how many placements are ready.
pub fn sweep_once(registry: &PlacementRegistry) -> usize {
    registry
        .placements()
        .iter()
        .filter(|p| p.manager().sweep())
        .count()
}
