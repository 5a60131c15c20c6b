use tracing::warn;

use crate::access::{AccessFlags, ExecContext, ExecFlags, HandlerMode};
use crate::bounce::BounceBuffer;
use crate::bus::PhysAccess;
use crate::config::GuestAccessConfig;
use crate::deferred::DeferredWrite;
use crate::error::{AccessError, Result};
use crate::slots::{SlotTable, UnmapToken};
use crate::stats::GuestAccessStats;
use crate::status::PhysStatus;

/// Per-vCPU guest memory mapping state.
///
/// Owns the slot table, one bounce buffer per slot and the pending-completion record. `L` is the
/// page-exclusivity lock type of the direct mapper; slots created by
/// [`GuestAccess::map_direct`] keep their lock until commit or rollback hands it back to
/// [`PhysAccess::release_page_lock`].
///
/// One instance belongs to exactly one vCPU; nothing here is shared between vCPUs.
pub struct GuestAccess<L> {
    pub(crate) config: GuestAccessConfig,
    pub(crate) slots: SlotTable<L>,
    pub(crate) bounce: Vec<BounceBuffer>,
    pub(crate) context: ExecContext,
    pub(crate) exec: ExecFlags,
    pub(crate) debug_hits: u32,
    pub(crate) pass_up: PhysStatus,
    pub(crate) pending: Option<DeferredWrite>,
    pub(crate) stats: GuestAccessStats,
}

impl<L> GuestAccess<L> {
    pub fn new(config: GuestAccessConfig) -> Result<Self> {
        config.validate()?;
        let bounce = (0..config.slot_count)
            .map(|_| BounceBuffer::try_new(config.page_size))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            slots: SlotTable::new(config.slot_count),
            bounce,
            config,
            context: ExecContext::default(),
            exec: ExecFlags::empty(),
            debug_hits: 0,
            pass_up: PhysStatus::Ok,
            pending: None,
            stats: GuestAccessStats::default(),
        })
    }

    #[inline]
    pub fn config(&self) -> &GuestAccessConfig {
        &self.config
    }

    #[inline]
    pub fn context(&self) -> ExecContext {
        self.context
    }

    pub fn set_context(&mut self, context: ExecContext) {
        self.context = context;
    }

    #[inline]
    pub fn exec_flags(&self) -> ExecFlags {
        self.exec
    }

    pub fn set_exec_flags(&mut self, flags: ExecFlags) {
        self.exec = flags;
    }

    #[inline]
    pub(crate) fn handler_mode(&self) -> HandlerMode {
        HandlerMode::from(self.exec)
    }

    /// Number of slots currently holding a mapping.
    #[inline]
    pub fn active_mappings(&self) -> usize {
        self.slots.active()
    }

    /// Live flags of slot `index`; empty when the slot is free or out of range.
    #[inline]
    pub fn slot_access(&self, index: usize) -> AccessFlags {
        self.slots.access(index)
    }

    /// Data breakpoint hits accumulated by bounced accesses.
    #[inline]
    pub fn debug_hits(&self) -> u32 {
        self.debug_hits
    }

    pub fn take_debug_hits(&mut self) -> u32 {
        core::mem::take(&mut self.debug_hits)
    }

    /// Merged notices handed out since the last call, for the driver of the emulation step.
    pub fn take_pass_up_status(&mut self) -> PhysStatus {
        core::mem::take(&mut self.pass_up)
    }

    pub(crate) fn pass_up(&mut self, status: PhysStatus) {
        self.pass_up = self.pass_up.merge(status);
    }

    #[inline]
    pub fn stats(&self) -> &GuestAccessStats {
        &self.stats
    }

    /// Re-borrow the bounce buffer of a live mapping.
    pub fn bytes(&self, token: UnmapToken) -> Result<&[u8]> {
        let index = self.bounced_slot(token)?;
        Ok(self.bounce[index].data())
    }

    /// Re-borrow the bounce buffer of a live mapping for writing.
    pub fn bytes_mut(&mut self, token: UnmapToken) -> Result<&mut [u8]> {
        let index = self.bounced_slot(token)?;
        if !self.slots.access(index).is_write() {
            return Err(AccessError::misuse(token, "mapping is not writable"));
        }
        Ok(self.bounce[index].data_mut())
    }

    fn bounced_slot(&self, token: UnmapToken) -> Result<usize> {
        let index = self.slots.validate(token)?;
        if !self.slots.access(index).contains(AccessFlags::BOUNCE_BUFFERED) {
            return Err(AccessError::misuse(token, "mapping is not bounce buffered"));
        }
        Ok(index)
    }

    /// Free slot `index` and hand any page lock it held back to the direct mapper.
    pub(crate) fn release_slot<B>(&mut self, bus: &mut B, index: usize)
    where
        B: PhysAccess<PageLock = L>,
    {
        if let Some(lock) = self.slots.release(index) {
            bus.release_page_lock(lock);
        }
    }

    /// Drop every live slot without writing anything back.
    pub(crate) fn release_all<B>(&mut self, bus: &mut B)
    where
        B: PhysAccess<PageLock = L>,
    {
        for index in (0..self.slots.len()).rev() {
            if !self.slots.access(index).is_empty() {
                self.release_slot(bus, index);
            }
        }
        if self.slots.active() != 0 {
            warn!(
                active = self.slots.active(),
                "active mapping count out of sync with slot table"
            );
            self.slots.reset_active();
        }
    }
}
