use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::AdError;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// What kind of payload a creative resource carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Image,
    Video,
    Html,
    Other,
}

/// A remote resource that must be on disk before the unit can be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub url: String,
    pub kind: ResourceKind,
}

impl ResourceRef {
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self { url: url.into(), kind }
    }
}

/// One fetchable, expirable ad candidate.
///
/// Before its resources are downloaded it is a *candidate* and sits in the
/// incoming queue; afterwards it is stocked and can be shown exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdUnit {
    pub id: Ulid,
    pub placement_id: String,
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    /// The unit is invalid once `now >= expires_at`.
    pub expires_at: Ms,
}

impl AdUnit {
    pub fn new(placement_id: impl Into<String>, resources: Vec<ResourceRef>, expires_at: Ms) -> Self {
        Self {
            id: Ulid::new(),
            placement_id: placement_id.into(),
            resources,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Ms) -> bool {
        now >= self.expires_at
    }

    /// A candidate without resources is malformed and never enters the queue.
    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }
}

/// Ad format of a placement. Picks the manager variant at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    Banner,
    Native,
    #[default]
    Promotion,
}

impl AdType {
    pub fn label(&self) -> &'static str {
        match self {
            AdType::Banner => "banner",
            AdType::Native => "native",
            AdType::Promotion => "promotion",
        }
    }

    /// Whether placements of this type keep a stock of pre-downloaded units.
    pub fn is_stocked(&self) -> bool {
        matches!(self, AdType::Promotion)
    }
}

/// Where on screen a promotion unit should be drawn, in density-independent pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ShowRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn has_positive_dimension(&self) -> bool {
        self.width > 0 || self.height > 0
    }
}

/// Handle to the host surface (window, activity, view controller) a unit is
/// shown in. Once released it can no longer host a show.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub id: Ulid,
    released: Arc<AtomicBool>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext {
    pub fn new() -> Self {
        Self {
            id: Ulid::new(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the host surface as going away. Visible to every clone.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_usable(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

/// Outward events delivered to the mediation layer through the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdEvent {
    LoadSuccess { unit_id: Ulid },
    LoadFailed(AdError),
    Shown,
    ShowFailed(AdError),
    Closed,
    Clicked,
}

impl AdEvent {
    pub fn label(&self) -> &'static str {
        match self {
            AdEvent::LoadSuccess { .. } => "load_success",
            AdEvent::LoadFailed(_) => "load_failed",
            AdEvent::Shown => "shown",
            AdEvent::ShowFailed(_) => "show_failed",
            AdEvent::Closed => "closed",
            AdEvent::Clicked => "clicked",
        }
    }
}

/// Conceptual lifecycle of one placement's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockPhase {
    Empty,
    FetchingCandidates,
    Downloading,
    Stocked,
    Destroyed,
}
