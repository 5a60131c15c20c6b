/// Diagnostic counters. Nothing in the access layer makes decisions based on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuestAccessStats {
    /// Bounce mappings created for page-crossing accesses.
    pub cross_page_maps: u64,
    /// Bounce mappings created after the direct mapper gave up on a single page.
    pub phys_fallback_maps: u64,
    /// Physical-fallback mappings that may end up exiting to a handler.
    pub potential_exits: u64,
    /// Writes handed off to the full-service context.
    pub deferred_commits: u64,
    /// Deferred writes completed by
    /// [`GuestAccess::drain_deferred`](crate::GuestAccess::drain_deferred).
    pub drained_commits: u64,
}
