//! Simulated collaborators for the demo host and load testing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::AdError;
use crate::loader::SourceLoader;
use crate::model::*;
use crate::present::{PresentationGateway, RenderCallback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub candidates_per_fetch: usize,
    pub ttl: Duration,
    pub latency: Duration,
    /// Every Nth download fails with a resource error.
    pub fail_every: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            candidates_per_fetch: 4,
            ttl: Duration::from_secs(60),
            latency: Duration::from_millis(150),
            fail_every: None,
        }
    }
}

/// Loader that invents candidates and pretends to download them.
pub struct SimLoader {
    config: SimConfig,
    downloads: AtomicU64,
}

impl SimLoader {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            downloads: AtomicU64::new(0),
        }
    }

    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SourceLoader for SimLoader {
    async fn provide_candidates(&self, placement_id: &str) -> Result<Vec<AdUnit>, AdError> {
        tokio::time::sleep(self.config.latency).await;
        let expires_at = now_ms() + self.config.ttl.as_millis() as Ms;
        let candidates = (0..self.config.candidates_per_fetch)
            .map(|_| {
                let creative = Ulid::new();
                AdUnit::new(
                    placement_id,
                    vec![ResourceRef::new(
                        format!("https://cdn.adstock.invalid/creative/{creative}.png"),
                        ResourceKind::Image,
                    )],
                    expires_at,
                )
            })
            .collect();
        Ok(candidates)
    }

    async fn download_resources(&self, unit: AdUnit) -> Result<AdUnit, AdError> {
        tokio::time::sleep(self.config.latency).await;
        let n = self.downloads.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = self.config.fail_every
            && every > 0
            && n % every == 0
        {
            return Err(AdError::LoadDownloadFailed(format!(
                "simulated failure for {}",
                unit.id
            )));
        }
        Ok(unit)
    }
}

/// Gateway with no screen: logs shows and settles renders immediately.
/// Renders fail until the surface has been initialised.
#[derive(Default)]
pub struct HeadlessGateway {
    surface_ready: bool,
    showing: Option<Ulid>,
}

impl HeadlessGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationGateway for HeadlessGateway {
    fn init_surface(&mut self) {
        if !self.surface_ready {
            debug!("headless surface initialised");
        }
        self.surface_ready = true;
    }

    fn show(
        &mut self,
        _ctx: &HostContext,
        rect: ShowRect,
        placement_id: &str,
        unit: AdUnit,
        callback: RenderCallback,
    ) {
        if !self.surface_ready {
            callback.failed("surface not initialised");
            return;
        }
        info!(
            "showing {} on {placement_id} at {}x{}+{}+{}",
            unit.id, rect.width, rect.height, rect.x, rect.y
        );
        self.showing = Some(unit.id);
        callback.rendered();
    }

    fn hide(&mut self) {
        if let Some(id) = self.showing.take() {
            info!("hid {id}");
        }
    }

    fn is_showing(&self) -> bool {
        self.showing.is_some()
    }
}
