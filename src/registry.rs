use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::PlacementTable;
use crate::direct::DirectManager;
use crate::limits::*;
use crate::loader::SourceLoader;
use crate::manager::AdsManager;
use crate::model::AdEvent;
use crate::present::Presenter;
use crate::router::CallbackRouter;
use crate::stock::StockManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownPlacement(String),
    PlacementIdTooLong(usize),
    TooManyPlacements,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownPlacement(id) => write!(f, "unknown placement: {id}"),
            RegistryError::PlacementIdTooLong(len) => {
                write!(f, "placement id too long ({len} > {MAX_PLACEMENT_ID_LEN})")
            }
            RegistryError::TooManyPlacements => write!(f, "too many placements"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// A live placement. The variant follows the configured ad type.
#[derive(Clone)]
pub enum ManagedPlacement {
    Stocked(StockManager),
    Direct(DirectManager),
}

impl ManagedPlacement {
    pub fn manager(&self) -> &dyn AdsManager {
        match self {
            ManagedPlacement::Stocked(m) => m,
            ManagedPlacement::Direct(m) => m,
        }
    }

    pub fn as_stocked(&self) -> Option<&StockManager> {
        match self {
            ManagedPlacement::Stocked(m) => Some(m),
            ManagedPlacement::Direct(_) => None,
        }
    }

    pub fn as_direct(&self) -> Option<&DirectManager> {
        match self {
            ManagedPlacement::Direct(m) => Some(m),
            ManagedPlacement::Stocked(_) => None,
        }
    }
}

/// Manages per-placement ad managers. Placements are created lazily on first
/// use and share one loader, presenter and router.
pub struct PlacementRegistry {
    placements: DashMap<String, ManagedPlacement>,
    table: PlacementTable,
    loader: Arc<dyn SourceLoader>,
    presenter: Presenter,
    router: Arc<CallbackRouter>,
}

impl PlacementRegistry {
    pub fn new(
        table: PlacementTable,
        loader: Arc<dyn SourceLoader>,
        presenter: Presenter,
        router: Arc<CallbackRouter>,
    ) -> Self {
        Self {
            placements: DashMap::new(),
            table,
            loader,
            presenter,
            router,
        }
    }

    /// Get or lazily create the manager for a configured placement.
    pub fn get_or_create(&self, placement_id: &str) -> Result<ManagedPlacement, RegistryError> {
        if let Some(placement) = self.placements.get(placement_id) {
            return Ok(placement.value().clone());
        }
        if placement_id.len() > MAX_PLACEMENT_ID_LEN {
            return Err(RegistryError::PlacementIdTooLong(placement_id.len()));
        }
        let config = self
            .table
            .get(placement_id)
            .ok_or_else(|| RegistryError::UnknownPlacement(placement_id.to_string()))?;
        if self.placements.len() >= MAX_PLACEMENTS {
            return Err(RegistryError::TooManyPlacements);
        }

        let placement = match self.placements.entry(placement_id.to_string()) {
            // Lost a creation race
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let managed = if config.ad_type.is_stocked() {
                    ManagedPlacement::Stocked(StockManager::new(
                        config,
                        self.loader.clone(),
                        self.presenter.clone(),
                        self.router.clone(),
                    ))
                } else {
                    ManagedPlacement::Direct(DirectManager::new(
                        config,
                        self.loader.clone(),
                        self.router.clone(),
                    ))
                };
                e.insert(managed.clone());
                managed
            }
        };
        info!(
            "placement {placement_id} created ({})",
            config.ad_type.label()
        );
        metrics::gauge!(crate::observability::PLACEMENTS_ACTIVE).set(self.placements.len() as f64);
        Ok(placement)
    }

    pub fn get(&self, placement_id: &str) -> Option<ManagedPlacement> {
        self.placements.get(placement_id).map(|p| p.value().clone())
    }

    /// Subscribe to a placement's events, creating the placement if needed.
    pub fn subscribe(&self, placement_id: &str) -> Result<broadcast::Receiver<AdEvent>, RegistryError> {
        self.get_or_create(placement_id)?;
        Ok(self.router.subscribe(placement_id))
    }

    /// Destroy a placement and forget it. Returns false if it was not live.
    pub fn destroy(&self, placement_id: &str) -> bool {
        let Some((_, placement)) = self.placements.remove(placement_id) else {
            return false;
        };
        placement.manager().destroy();
        metrics::gauge!(crate::observability::PLACEMENTS_ACTIVE).set(self.placements.len() as f64);
        true
    }

    /// Snapshot of live placements, for background iteration without holding
    /// map shards.
    pub fn placements(&self) -> Vec<ManagedPlacement> {
        self.placements.iter().map(|p| p.value().clone()).collect()
    }

    pub fn placement_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.placements.iter().map(|p| p.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ids from the placement table, live or not.
    pub fn configured_ids(&self) -> Vec<String> {
        self.table.ids()
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}
