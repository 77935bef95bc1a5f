use async_trait::async_trait;

use crate::error::AdError;
use crate::model::AdUnit;

/// Per-network loading implementation: fetches raw candidates and downloads
/// their creative resources. Timeout and retry policy live behind this trait.
#[async_trait]
pub trait SourceLoader: Send + Sync + 'static {
    /// Ask the ad server for candidates for a placement.
    async fn provide_candidates(&self, placement_id: &str) -> Result<Vec<AdUnit>, AdError>;

    /// Download every resource of `unit`. Resource failures must be reported as
    /// `AdError::LoadDownloadFailed`; anything else ends the load cycle.
    async fn download_resources(&self, unit: AdUnit) -> Result<AdUnit, AdError>;
}
