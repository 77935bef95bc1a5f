use crate::model::{AdType, AdUnit};

/// Common contract of every per-placement ad manager. The variant is picked
/// from the placement's ad type when the manager is created.
pub trait AdsManager: Send + Sync {
    fn placement_id(&self) -> &str;

    fn ad_type(&self) -> AdType;

    /// Start (or continue) a load cycle. Idempotent while one is running.
    fn load_ads(&self);

    /// Accept freshly fetched candidates and start downloading their resources.
    fn pre_load_res(&self, candidates: Vec<AdUnit>);

    fn is_ready(&self) -> bool;

    /// Periodic readiness check from a background task. Unlike `is_ready`,
    /// tolerates racing with `destroy()`.
    fn sweep(&self) -> bool {
        self.is_ready()
    }

    /// Unregister from event routing and release held units. Terminal.
    fn destroy(&self);
}
