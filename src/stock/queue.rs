use std::collections::VecDeque;

use crate::model::*;

/// Identifies the download batch a completion belongs to. Completions whose
/// ticket no longer matches the open batch are stale and leave the counters alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchTicket(pub(crate) u64);

/// Everything one placement's stock needs, guarded by a single mutex.
#[derive(Debug)]
pub(crate) struct InventoryQueue {
    /// Candidates waiting for their resources to be downloaded.
    pub incoming: VecDeque<AdUnit>,
    /// Ready units, consumed front first.
    pub stocked: VecDeque<AdUnit>,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
    /// Generation of the open batch.
    pub batch: u64,
    pub target: usize,
    /// Armed at the start of a top-level load cycle, disarmed by the first
    /// outward load event of that cycle.
    latch_armed: bool,
    pub fetching: bool,
    pub destroyed: bool,
}

impl InventoryQueue {
    pub fn new(target: usize) -> Self {
        Self {
            incoming: VecDeque::new(),
            stocked: VecDeque::new(),
            pending: 0,
            success: 0,
            failed: 0,
            batch: 0,
            target: target.max(1),
            latch_armed: true,
            fetching: false,
            destroyed: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.stocked.len() >= self.target
    }

    /// A batch is in flight until every issued download has reported back.
    pub fn is_stocking(&self) -> bool {
        self.success + self.failed < self.pending
    }

    pub fn can_preload(&self) -> bool {
        !self.is_full() && !self.incoming.is_empty()
    }

    /// Queue usable candidates; returns how many were dropped as malformed.
    pub fn enqueue_candidates(&mut self, candidates: impl IntoIterator<Item = AdUnit>) -> usize {
        let mut rejected = 0;
        for candidate in candidates {
            if candidate.has_resources() {
                self.incoming.push_back(candidate);
            } else {
                rejected += 1;
            }
        }
        rejected
    }

    /// Open a fresh batch and take as many candidates as the stock is short of.
    pub fn open_batch(&mut self) -> (BatchTicket, Vec<AdUnit>) {
        self.retire_batch();
        let deficit = self.target.saturating_sub(self.stocked.len());
        let mut issued = Vec::with_capacity(deficit.min(self.incoming.len()));
        while self.pending < deficit {
            let Some(candidate) = self.incoming.pop_front() else {
                break;
            };
            self.pending += 1;
            issued.push(candidate);
        }
        (BatchTicket(self.batch), issued)
    }

    /// Forget the open batch. Completions still in flight become stale.
    pub fn retire_batch(&mut self) {
        self.batch += 1;
        self.pending = 0;
        self.success = 0;
        self.failed = 0;
    }

    pub fn is_current(&self, ticket: BatchTicket) -> bool {
        ticket.0 == self.batch
    }

    /// Drop every stocked unit that has expired. Returns how many were dropped.
    pub fn evict_expired(&mut self, now: Ms) -> usize {
        let before = self.stocked.len();
        self.stocked.retain(|unit| !unit.is_expired(now));
        before - self.stocked.len()
    }

    /// Pop the oldest unit that is still valid, discarding expired ones on the way.
    pub fn pop_ready(&mut self, now: Ms) -> (Option<AdUnit>, usize) {
        let mut evicted = 0;
        while let Some(unit) = self.stocked.pop_front() {
            if !unit.is_expired(now) {
                return (Some(unit), evicted);
            }
            evicted += 1;
        }
        (None, evicted)
    }

    pub fn arm_latch(&mut self) {
        self.latch_armed = true;
    }

    /// True for exactly one caller per armed cycle.
    pub fn take_latch(&mut self) -> bool {
        std::mem::replace(&mut self.latch_armed, false)
    }

    pub fn phase(&self) -> StockPhase {
        if self.destroyed {
            StockPhase::Destroyed
        } else if self.fetching {
            StockPhase::FetchingCandidates
        } else if self.is_stocking() {
            StockPhase::Downloading
        } else if !self.stocked.is_empty() {
            StockPhase::Stocked
        } else {
            StockPhase::Empty
        }
    }

    pub fn clear(&mut self) {
        self.incoming.clear();
        self.stocked.clear();
        self.retire_batch();
        self.fetching = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(expires_at: Ms) -> AdUnit {
        AdUnit::new(
            "home",
            vec![ResourceRef::new("https://cdn.test/a.png", ResourceKind::Image)],
            expires_at,
        )
    }

    #[test]
    fn zero_target_is_raised_to_one() {
        assert_eq!(InventoryQueue::new(0).target, 1);
    }

    #[test]
    fn malformed_candidates_are_dropped() {
        let mut q = InventoryQueue::new(2);
        let rejected = q.enqueue_candidates(vec![
            candidate(i64::MAX),
            AdUnit::new("home", vec![], i64::MAX),
            candidate(i64::MAX),
        ]);
        assert_eq!(rejected, 1);
        assert_eq!(q.incoming.len(), 2);
    }

    #[test]
    fn batch_is_bounded_by_deficit() {
        let mut q = InventoryQueue::new(3);
        q.enqueue_candidates((0..5).map(|_| candidate(i64::MAX)));
        let (ticket, issued) = q.open_batch();
        assert_eq!(issued.len(), 3);
        assert_eq!(q.pending, 3);
        assert_eq!(q.incoming.len(), 2);
        assert!(q.is_current(ticket));
        assert!(q.is_stocking());
    }

    #[test]
    fn batch_accounts_for_existing_stock() {
        let mut q = InventoryQueue::new(3);
        q.stocked.push_back(candidate(i64::MAX));
        q.stocked.push_back(candidate(i64::MAX));
        q.enqueue_candidates((0..5).map(|_| candidate(i64::MAX)));
        let (_, issued) = q.open_batch();
        assert_eq!(issued.len(), 1);
    }

    #[test]
    fn full_stock_opens_empty_batch() {
        let mut q = InventoryQueue::new(1);
        q.stocked.push_back(candidate(i64::MAX));
        q.enqueue_candidates(vec![candidate(i64::MAX)]);
        let (_, issued) = q.open_batch();
        assert!(issued.is_empty());
        assert!(!q.is_stocking());
        assert_eq!(q.incoming.len(), 1);
    }

    #[test]
    fn new_batch_makes_old_ticket_stale() {
        let mut q = InventoryQueue::new(2);
        q.enqueue_candidates((0..4).map(|_| candidate(i64::MAX)));
        let (first, _) = q.open_batch();
        let (second, _) = q.open_batch();
        assert!(!q.is_current(first));
        assert!(q.is_current(second));
    }

    #[test]
    fn latch_fires_once_per_arm() {
        let mut q = InventoryQueue::new(1);
        assert!(q.take_latch());
        assert!(!q.take_latch());
        q.arm_latch();
        assert!(q.take_latch());
    }

    #[test]
    fn evict_and_pop_skip_expired() {
        let mut q = InventoryQueue::new(3);
        q.stocked.push_back(candidate(100));
        q.stocked.push_back(candidate(i64::MAX));
        q.stocked.push_back(candidate(100));

        let (unit, evicted) = q.pop_ready(200);
        assert!(unit.is_some());
        assert_eq!(evicted, 1);

        assert_eq!(q.evict_expired(200), 1);
        assert!(q.stocked.is_empty());
    }

    #[test]
    fn phase_tracks_state() {
        let mut q = InventoryQueue::new(2);
        assert_eq!(q.phase(), StockPhase::Empty);
        q.fetching = true;
        assert_eq!(q.phase(), StockPhase::FetchingCandidates);
        q.fetching = false;
        q.enqueue_candidates((0..2).map(|_| candidate(i64::MAX)));
        q.open_batch();
        assert_eq!(q.phase(), StockPhase::Downloading);
        q.success = 2;
        q.stocked.push_back(candidate(i64::MAX));
        assert_eq!(q.phase(), StockPhase::Stocked);
        q.destroyed = true;
        assert_eq!(q.phase(), StockPhase::Destroyed);
    }
}
