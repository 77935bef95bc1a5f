//! Stocked placements: a small pool of pre-downloaded units per placement,
//! refilled in the background as units are shown or expire.
//!
//! One load cycle runs fetch → download → stock. Whatever mix of successes and
//! failures the downloads produce, the mediation layer hears exactly one
//! `LoadSuccess` or `LoadFailed` for the cycle.

mod queue;

pub(crate) use queue::BatchTicket;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::PlacementConfig;
use crate::error::AdError;
use crate::limits::MAX_CANDIDATES_PER_FETCH;
use crate::loader::SourceLoader;
use crate::manager::AdsManager;
use crate::model::*;
use crate::observability as obs;
use crate::present::Presenter;
use crate::router::CallbackRouter;

use queue::InventoryQueue;

/// What to do once the queue lock has been released.
enum Next {
    Nothing,
    Fetch,
    Download(BatchTicket, Vec<AdUnit>),
    LoadFailed(AdError),
}

struct Shared {
    placement_id: String,
    queue: Mutex<InventoryQueue>,
    loader: Arc<dyn SourceLoader>,
    presenter: Presenter,
    router: Arc<CallbackRouter>,
    runtime: Handle,
}

/// Stock manager for one placement. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StockManager {
    shared: Arc<Shared>,
}

impl StockManager {
    /// Must be called from within a Tokio runtime: downloads are spawned on it.
    pub fn new(
        placement: &PlacementConfig,
        loader: Arc<dyn SourceLoader>,
        presenter: Presenter,
        router: Arc<CallbackRouter>,
    ) -> Self {
        let target = placement.target_stock_size();
        debug!("stock manager for {} with target {target}", placement.id);
        Self {
            shared: Arc::new(Shared {
                placement_id: placement.id.clone(),
                queue: Mutex::new(InventoryQueue::new(target)),
                loader,
                presenter,
                router,
                runtime: Handle::current(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InventoryQueue> {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn placement_id(&self) -> &str {
        &self.shared.placement_id
    }

    pub fn target_stock_size(&self) -> usize {
        self.lock().target
    }

    pub fn stock_len(&self) -> usize {
        self.lock().stocked.len()
    }

    pub fn incoming_len(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn phase(&self) -> StockPhase {
        self.lock().phase()
    }

    /// Usage after `destroy()` is a caller bug: loud in debug builds, a logged
    /// no-op in release builds.
    fn check_alive(&self, q: &InventoryQueue, op: &str) -> bool {
        debug_assert!(!q.destroyed, "{op} called after destroy on {}", self.placement_id());
        if q.destroyed {
            warn!("{op} called after destroy on {}", self.placement_id());
        }
        !q.destroyed
    }

    // ── Readiness ────────────────────────────────────────────

    /// True iff a non-expired unit is stocked. Evicts expired units and then
    /// kicks replenishment in the background.
    pub fn is_ready(&self) -> bool {
        {
            let q = self.lock();
            if !self.check_alive(&q, "is_ready") {
                return false;
            }
        }
        self.sweep()
    }

    /// `is_ready` for background callers that may race with `destroy()`.
    pub(crate) fn sweep(&self) -> bool {
        let ready = {
            let mut q = self.lock();
            if q.destroyed {
                return false;
            }
            let evicted = q.evict_expired(now_ms());
            self.record_eviction(evicted, q.stocked.len());
            !q.stocked.is_empty()
        };
        self.update_stock();
        ready
    }

    /// Idempotent load trigger. Starting new work, whether a fetch or a batch
    /// over leftover candidates, opens a fresh cycle that ends in exactly one
    /// load event. Nothing is reported when the stock is already full or a
    /// cycle is still in flight.
    pub fn load(&self) {
        {
            let q = self.lock();
            if !self.check_alive(&q, "load") {
                return;
            }
        }
        self.replenish(true);
    }

    /// Replenishment entry point for internal refills (after show, on a
    /// readiness check).
    fn update_stock(&self) {
        self.replenish(false);
    }

    fn replenish(&self, host_request: bool) {
        let next = {
            let mut q = self.lock();
            if q.destroyed || q.is_full() {
                return;
            }
            if q.is_stocking() {
                debug!(
                    "{}: batch in flight ({}/{} settled), skip",
                    self.placement_id(),
                    q.success + q.failed,
                    q.pending
                );
                return;
            }
            if q.fetching {
                return;
            }
            if !q.incoming.is_empty() {
                if host_request {
                    q.arm_latch();
                }
                let (ticket, units) = q.open_batch();
                Next::Download(ticket, units)
            } else {
                q.arm_latch();
                q.fetching = true;
                Next::Fetch
            }
        };
        self.run(next);
    }

    fn run(&self, next: Next) {
        match next {
            Next::Nothing => {}
            Next::Fetch => self.spawn_fetch(),
            Next::Download(ticket, units) => self.spawn_downloads(ticket, units),
            Next::LoadFailed(error) => self.publish_load_failed(error),
        }
    }

    // ── Candidate fetch ──────────────────────────────────────

    fn spawn_fetch(&self) {
        info!("{}: requesting candidates", self.placement_id());
        metrics::counter!(obs::CANDIDATE_FETCHES_TOTAL, "placement" => self.placement_id().to_string())
            .increment(1);
        let this = self.clone();
        self.shared.runtime.spawn(async move {
            match this.shared.loader.provide_candidates(this.placement_id()).await {
                Ok(candidates) => this.accept_candidates(candidates),
                Err(error) => this.on_fetch_failed(error),
            }
        });
    }

    fn on_fetch_failed(&self, error: AdError) {
        let next = {
            let mut q = self.lock();
            if q.destroyed {
                return;
            }
            q.fetching = false;
            warn!("{}: candidate fetch failed: {error}", self.placement_id());
            if q.take_latch() {
                Next::LoadFailed(error)
            } else {
                Next::Nothing
            }
        };
        self.run(next);
    }

    /// Accept candidates pushed by the host (e.g. from a bid response).
    pub fn on_candidates_received(&self, candidates: Vec<AdUnit>) {
        {
            let q = self.lock();
            if !self.check_alive(&q, "on_candidates_received") {
                return;
            }
        }
        self.accept_candidates(candidates);
    }

    fn accept_candidates(&self, mut candidates: Vec<AdUnit>) {
        if candidates.len() > MAX_CANDIDATES_PER_FETCH {
            warn!(
                "{}: {} candidates, keeping first {MAX_CANDIDATES_PER_FETCH}",
                self.placement_id(),
                candidates.len()
            );
            candidates.truncate(MAX_CANDIDATES_PER_FETCH);
        }
        let next = {
            let mut q = self.lock();
            if q.destroyed {
                debug!("{}: candidates arrived after destroy", self.placement_id());
                return;
            }
            q.fetching = false;
            let rejected = q.enqueue_candidates(candidates);
            if rejected > 0 {
                metrics::counter!(obs::CANDIDATES_REJECTED_TOTAL, "placement" => self.placement_id().to_string())
                    .increment(rejected as u64);
                debug!("{}: dropped {rejected} candidates without resources", self.placement_id());
            }
            if q.incoming.is_empty() {
                if q.take_latch() {
                    Next::LoadFailed(AdError::NoUsableCandidates)
                } else {
                    Next::Nothing
                }
            } else {
                let (ticket, units) = q.open_batch();
                Next::Download(ticket, units)
            }
        };
        self.run(next);
    }

    // ── Downloads ────────────────────────────────────────────

    fn spawn_downloads(&self, ticket: BatchTicket, units: Vec<AdUnit>) {
        if units.is_empty() {
            return;
        }
        info!(
            "{}: batch {} downloading {} candidates",
            self.placement_id(),
            ticket.0,
            units.len()
        );
        for unit in units {
            let this = self.clone();
            self.shared.runtime.spawn(async move {
                let started = Instant::now();
                let result = this.shared.loader.download_resources(unit).await;
                metrics::histogram!(obs::DOWNLOAD_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                match result {
                    Ok(unit) => this.on_candidate_download_succeeded(ticket, unit),
                    Err(error) => this.on_candidate_download_failed(ticket, error),
                }
            });
        }
    }

    pub(crate) fn on_candidate_download_succeeded(&self, ticket: BatchTicket, unit: AdUnit) {
        metrics::counter!(obs::DOWNLOADS_TOTAL, "outcome" => obs::download_label(None)).increment(1);
        let unit_id = unit.id;
        let publish = {
            let mut q = self.lock();
            if q.destroyed {
                debug!("{}: download of {unit_id} finished after destroy", self.placement_id());
                return;
            }
            let current = q.is_current(ticket);
            if current {
                q.success += 1;
            }
            if q.is_full() {
                debug!("{}: stock full, dropping {unit_id}", self.placement_id());
            } else {
                if !current {
                    debug!("{}: stocking {unit_id} from stale batch {}", self.placement_id(), ticket.0);
                }
                q.stocked.push_back(unit);
            }
            debug!(
                "{}: stock {}/{}, incoming {}, batch {}/{}/{} (ok/failed/pending)",
                self.placement_id(),
                q.stocked.len(),
                q.target,
                q.incoming.len(),
                q.success,
                q.failed,
                q.pending
            );
            metrics::gauge!(obs::STOCK_SIZE, "placement" => self.placement_id().to_string())
                .set(q.stocked.len() as f64);
            q.take_latch()
        };
        self.shared.presenter.init_surface();
        if publish {
            self.publish_load_success(unit_id);
        }
    }

    pub(crate) fn on_candidate_download_failed(&self, ticket: BatchTicket, error: AdError) {
        metrics::counter!(obs::DOWNLOADS_TOTAL, "outcome" => obs::download_label(Some(&error)))
            .increment(1);
        let next = {
            let mut q = self.lock();
            if q.destroyed {
                return;
            }
            if !q.is_current(ticket) {
                debug!("{}: ignoring failure from stale batch {}: {error}", self.placement_id(), ticket.0);
                return;
            }
            if !error.is_download_failure() {
                warn!("{}: load aborted: {error}", self.placement_id());
                q.retire_batch();
                if q.take_latch() {
                    Next::LoadFailed(error)
                } else {
                    Next::Nothing
                }
            } else {
                q.failed += 1;
                debug!(
                    "{}: download failed ({error}), batch {}/{}/{} (ok/failed/pending), incoming {}",
                    self.placement_id(),
                    q.success,
                    q.failed,
                    q.pending,
                    q.incoming.len()
                );
                if q.incoming.is_empty() {
                    if q.failed >= q.pending && q.take_latch() {
                        Next::LoadFailed(error)
                    } else {
                        Next::Nothing
                    }
                } else if q.can_preload() && !q.is_stocking() {
                    let (ticket, units) = q.open_batch();
                    Next::Download(ticket, units)
                } else {
                    Next::Nothing
                }
            }
        };
        self.run(next);
    }

    // ── Outward events ───────────────────────────────────────

    fn publish_load_success(&self, unit_id: Ulid) {
        info!("{}: load success", self.placement_id());
        metrics::counter!(obs::LOAD_CALLBACKS_TOTAL,
            "placement" => self.placement_id().to_string(), "outcome" => "success")
        .increment(1);
        self.shared
            .router
            .send(self.placement_id(), AdEvent::LoadSuccess { unit_id });
    }

    fn publish_load_failed(&self, error: AdError) {
        info!("{}: load failed: {error}", self.placement_id());
        metrics::counter!(obs::LOAD_CALLBACKS_TOTAL,
            "placement" => self.placement_id().to_string(), "outcome" => error.label())
        .increment(1);
        self.shared
            .router
            .send(self.placement_id(), AdEvent::LoadFailed(error));
    }

    fn record_eviction(&self, evicted: usize, remaining: usize) {
        if evicted == 0 {
            return;
        }
        debug!("{}: evicted {evicted} expired units", self.placement_id());
        metrics::counter!(obs::EXPIRED_UNITS_TOTAL, "placement" => self.placement_id().to_string())
            .increment(evicted as u64);
        metrics::gauge!(obs::STOCK_SIZE, "placement" => self.placement_id().to_string())
            .set(remaining as f64);
    }

    // ── Show / hide ──────────────────────────────────────────

    /// Hand the oldest ready unit to the presenter. Returns the dispensed
    /// unit's id; the render outcome arrives later as `Shown` or
    /// `ShowFailed` + `Closed`.
    pub fn show(&self, ctx: Option<&HostContext>, rect: Option<ShowRect>) -> Result<Ulid, AdError> {
        let Some(ctx) = ctx.filter(|c| c.is_usable()) else {
            return self.reject_show(AdError::ShowInvalidArgument("host context is missing or released"));
        };
        let Some(rect) = rect.filter(|r| r.has_positive_dimension()) else {
            return self.reject_show(AdError::ShowInvalidArgument("width or height must be positive"));
        };

        if self.shared.presenter.is_closed() {
            return self.reject_show(AdError::ShowUnknownException("render task stopped".into()));
        }

        let unit = {
            let mut q = self.lock();
            if !self.check_alive(&q, "show") {
                return self.reject_show(AdError::ShowNotReady);
            }
            let (unit, evicted) = q.pop_ready(now_ms());
            self.record_eviction(evicted, q.stocked.len());
            if unit.is_some() {
                metrics::gauge!(obs::STOCK_SIZE, "placement" => self.placement_id().to_string())
                    .set(q.stocked.len() as f64);
            }
            unit
        };
        let Some(unit) = unit else {
            return self.reject_show(AdError::ShowNotReady);
        };

        let unit_id = unit.id;
        info!("{}: dispensing {unit_id}", self.placement_id());
        if let Err(e) = self.shared.presenter.show(ctx.clone(), rect, unit) {
            // The unit is already gone from stock
            let result = self.reject_show(e);
            self.shared.router.send(self.placement_id(), AdEvent::Closed);
            return result;
        }
        metrics::counter!(obs::SHOWS_TOTAL, "status" => "dispatched").increment(1);
        self.update_stock();
        Ok(unit_id)
    }

    fn reject_show(&self, error: AdError) -> Result<Ulid, AdError> {
        debug!("{}: {error}", self.placement_id());
        metrics::counter!(obs::SHOWS_TOTAL, "status" => error.label()).increment(1);
        self.shared
            .router
            .send(self.placement_id(), AdEvent::ShowFailed(error.clone()));
        Err(error)
    }

    /// Hide the displayed unit, if any, and publish `Closed`.
    pub fn hide(&self) {
        {
            let q = self.lock();
            if !self.check_alive(&q, "hide") {
                return;
            }
        }
        self.shared.presenter.hide(self.placement_id());
    }

    /// Unregister from routing and drop both queues. Downloads still in flight
    /// finish on their own and are discarded.
    pub fn destroy(&self) {
        {
            let mut q = self.lock();
            if q.destroyed {
                return;
            }
            q.destroyed = true;
            q.clear();
        }
        self.shared.router.unregister(self.placement_id());
        metrics::gauge!(obs::STOCK_SIZE, "placement" => self.placement_id().to_string()).set(0.0);
        info!("{}: destroyed", self.placement_id());
    }
}

impl AdsManager for StockManager {
    fn placement_id(&self) -> &str {
        StockManager::placement_id(self)
    }

    fn ad_type(&self) -> AdType {
        AdType::Promotion
    }

    fn load_ads(&self) {
        self.load();
    }

    fn pre_load_res(&self, candidates: Vec<AdUnit>) {
        self.on_candidates_received(candidates);
    }

    fn is_ready(&self) -> bool {
        StockManager::is_ready(self)
    }

    fn sweep(&self) -> bool {
        StockManager::sweep(self)
    }

    fn destroy(&self) {
        StockManager::destroy(self);
    }
}
