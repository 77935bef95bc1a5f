//! Hard caps that keep one misconfigured host from exhausting memory.

pub const MAX_PLACEMENTS: usize = 1_024;
pub const MAX_PLACEMENT_ID_LEN: usize = 128;

/// Upper bound on a placement's configured stock size.
pub const MAX_TARGET_STOCK: usize = 32;

/// Candidates accepted from a single fetch; the rest are dropped.
pub const MAX_CANDIDATES_PER_FETCH: usize = 64;
