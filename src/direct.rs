//! Banner and native placements: no stock, one ready unit at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::PlacementConfig;
use crate::error::AdError;
use crate::loader::SourceLoader;
use crate::manager::AdsManager;
use crate::model::*;
use crate::observability as obs;
use crate::router::CallbackRouter;

#[derive(Debug, Default)]
struct DirectState {
    ready: Option<AdUnit>,
    loading: bool,
    destroyed: bool,
}

struct Shared {
    placement_id: String,
    ad_type: AdType,
    state: Mutex<DirectState>,
    loader: Arc<dyn SourceLoader>,
    router: Arc<CallbackRouter>,
    runtime: Handle,
}

/// Manager for placements the host renders itself. Each `load_ads` cycle ends
/// in exactly one `LoadSuccess` or `LoadFailed`; the host then takes the unit
/// with `take_ready`.
#[derive(Clone)]
pub struct DirectManager {
    shared: Arc<Shared>,
}

impl DirectManager {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        placement: &PlacementConfig,
        loader: Arc<dyn SourceLoader>,
        router: Arc<CallbackRouter>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                placement_id: placement.id.clone(),
                ad_type: placement.ad_type,
                state: Mutex::new(DirectState::default()),
                loader,
                router,
                runtime: Handle::current(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DirectState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn placement(&self) -> &str {
        &self.shared.placement_id
    }

    /// Hand the ready unit to the host for display.
    pub fn take_ready(&self) -> Option<AdUnit> {
        let mut state = self.lock();
        let unit = state.ready.take()?;
        if unit.is_expired(now_ms()) {
            debug!("{}: ready unit expired before use", self.placement());
            return None;
        }
        Some(unit)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    fn finish(&self, event: AdEvent) {
        let outcome = match &event {
            AdEvent::LoadFailed(e) => e.label(),
            _ => "success",
        };
        metrics::counter!(obs::LOAD_CALLBACKS_TOTAL,
            "placement" => self.placement().to_string(), "outcome" => outcome)
        .increment(1);
        self.shared.router.send(self.placement(), event);
    }

    fn spawn_download(&self, unit: AdUnit) {
        let this = self.clone();
        self.shared.runtime.spawn(async move {
            let result = this.shared.loader.download_resources(unit).await;
            metrics::counter!(obs::DOWNLOADS_TOTAL,
                "outcome" => obs::download_label(result.as_ref().err()))
            .increment(1);
            let event = {
                let mut state = this.lock();
                if state.destroyed {
                    return;
                }
                state.loading = false;
                match result {
                    Ok(unit) => {
                        let unit_id = unit.id;
                        state.ready = Some(unit);
                        AdEvent::LoadSuccess { unit_id }
                    }
                    Err(error) => {
                        warn!("{}: download failed: {error}", this.placement());
                        AdEvent::LoadFailed(error)
                    }
                }
            };
            this.finish(event);
        });
    }
}

impl AdsManager for DirectManager {
    fn placement_id(&self) -> &str {
        self.placement()
    }

    fn ad_type(&self) -> AdType {
        self.shared.ad_type
    }

    fn load_ads(&self) {
        {
            let mut state = self.lock();
            debug_assert!(!state.destroyed, "load_ads called after destroy on {}", self.placement());
            if state.destroyed || state.loading {
                return;
            }
            if let Some(unit) = &state.ready {
                if !unit.is_expired(now_ms()) {
                    let unit_id = unit.id;
                    drop(state);
                    self.finish(AdEvent::LoadSuccess { unit_id });
                    return;
                }
                state.ready = None;
            }
            state.loading = true;
        }
        info!("{}: requesting candidates", self.placement());
        let this = self.clone();
        self.shared.runtime.spawn(async move {
            match this.shared.loader.provide_candidates(this.placement()).await {
                Ok(candidates) => this.pre_load_res(candidates),
                Err(error) => {
                    {
                        let mut state = this.lock();
                        if state.destroyed {
                            return;
                        }
                        state.loading = false;
                    }
                    this.finish(AdEvent::LoadFailed(error));
                }
            }
        });
    }

    fn pre_load_res(&self, candidates: Vec<AdUnit>) {
        let first = candidates.into_iter().find(AdUnit::has_resources);
        {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.loading = first.is_some();
        }
        match first {
            Some(unit) => self.spawn_download(unit),
            None => self.finish(AdEvent::LoadFailed(AdError::NoUsableCandidates)),
        }
    }

    fn is_ready(&self) -> bool {
        let mut state = self.lock();
        if state.ready.as_ref().is_some_and(|u| u.is_expired(now_ms())) {
            debug!("{}: dropping expired unit", self.placement());
            state.ready = None;
        }
        state.ready.is_some()
    }

    fn destroy(&self) {
        {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.ready = None;
            state.loading = false;
        }
        self.shared.router.unregister(self.placement());
        info!("{}: destroyed", self.placement());
    }
}
