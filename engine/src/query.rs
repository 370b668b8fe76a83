//! Pagination rules for the latest-only query surface.

use crate::{
    error::{EngineError, Result},
    validator_set::Validator,
};

/// Validators returned per page when the caller does not say.
pub const DEFAULT_PER_PAGE: usize = 30;
/// Hard cap on validators per page.
pub const MAX_PER_PAGE: usize = 100;

/// One page of the latest validator set.
#[derive(Debug, Clone)]
pub struct ValidatorsPage {
    /// Height the snapshot belongs to (always the latest).
    pub block_height: u64,
    pub validators: Vec<Validator>,
    /// Entries on this page.
    pub count: usize,
    /// Entries across all pages.
    pub total: usize,
}

/// Clamp a per-page request into [1, MAX_PER_PAGE], defaulting when unset
/// or zero.
pub fn validate_per_page(per_page: Option<usize>) -> usize {
    match per_page {
        None | Some(0) => DEFAULT_PER_PAGE,
        Some(n) if n > MAX_PER_PAGE => MAX_PER_PAGE,
        Some(n) => n,
    }
}

/// Check a page request against the total count, defaulting to page 1.
/// Out-of-range pages are rejected with the valid range in the error.
pub fn validate_page(page: Option<usize>, per_page: usize, total: usize) -> Result<usize> {
    let pages = (total.saturating_sub(1)) / per_page + 1;
    match page {
        None => Ok(1),
        Some(p) if p >= 1 && p <= pages => Ok(p),
        Some(p) => Err(EngineError::PageOutOfRange { page: p, max: pages }),
    }
}

/// Entries to skip before the requested page starts.
pub fn skip_count(page: usize, per_page: usize) -> usize {
    (page - 1) * per_page
}
