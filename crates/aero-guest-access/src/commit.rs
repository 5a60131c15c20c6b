//! Commit/rollback coordinator.
//!
//! A bounce-buffered write is committed lower range first. A hard failure of the first range
//! skips the second entirely; a hard failure of the second range after the first landed leaves
//! the first range written, since physical writes cannot be taken back. In the fast context
//! either failure can instead be handed to the deferred completion relay.

use tracing::{debug, trace, warn};

use crate::access::{AccessFlags, ExecContext, HandlerMode};
use crate::bus::PhysAccess;
use crate::error::{AccessError, Result};
use crate::slots::UnmapToken;
use crate::status::{PhysStatus, StatusCode};
use crate::vcpu::GuestAccess;

impl<L> GuestAccess<L> {
    /// Write back (when bounce-buffered for writing) and free the mapping behind `token`.
    ///
    /// Returns the merged notice of the write-back phases, if any.
    pub fn commit_and_unmap<B>(
        &mut self,
        bus: &mut B,
        token: UnmapToken,
    ) -> Result<Option<StatusCode>>
    where
        B: PhysAccess<PageLock = L>,
    {
        let index = self.slots.validate(token)?;
        self.commit_slot(bus, index, false)
    }

    /// Like [`GuestAccess::commit_and_unmap`], but a hard write failure is queued for the
    /// full-service context instead of failing the instruction.
    ///
    /// When that happens the mapping counts as committed, the failure code is merged as a notice
    /// with any notice of an already committed first range, returned, and recorded in the
    /// pass-up status, and
    /// [`GuestAccess::has_pending_completion`] turns true. The caller must get to the
    /// full-service context and call [`GuestAccess::drain_deferred`] before anything depends on
    /// the write.
    pub fn commit_and_unmap_deferrable<B>(
        &mut self,
        bus: &mut B,
        token: UnmapToken,
    ) -> Result<Option<StatusCode>>
    where
        B: PhysAccess<PageLock = L>,
    {
        if self.context != ExecContext::Fast {
            return Err(AccessError::misuse(
                token,
                "deferrable commit outside the fast context",
            ));
        }
        let index = self.slots.validate(token)?;
        self.commit_slot(bus, index, true)
    }

    /// Free the mapping behind `token` without writing anything back.
    pub fn rollback_and_unmap<B>(&mut self, bus: &mut B, token: UnmapToken) -> Result<()>
    where
        B: PhysAccess<PageLock = L>,
    {
        let index = self.slots.validate(token)?;
        trace!(slot = index, "rolling back mapping");
        self.release_slot(bus, index);
        Ok(())
    }

    /// Discard every live mapping, e.g. after an instruction raised an exception.
    ///
    /// Only call this when [`GuestAccess::active_mappings`] is non-zero.
    pub fn rollback<B>(&mut self, bus: &mut B)
    where
        B: PhysAccess<PageLock = L>,
    {
        debug_assert!(self.slots.active() > 0, "rollback without live mappings");
        trace!(active = self.slots.active(), "rolling back all mappings");
        self.release_all(bus);
    }

    fn commit_slot<B>(
        &mut self,
        bus: &mut B,
        index: usize,
        may_defer: bool,
    ) -> Result<Option<StatusCode>>
    where
        B: PhysAccess<PageLock = L>,
    {
        let access = self.slots.access(index);
        if access.contains(AccessFlags::BOUNCE_BUFFERED | AccessFlags::WRITE) {
            return self.write_back(bus, index, may_defer);
        }
        trace!(slot = index, ?access, "unmapping without write-back");
        self.release_slot(bus, index);
        Ok(None)
    }

    fn write_back<B>(
        &mut self,
        bus: &mut B,
        index: usize,
        may_defer: bool,
    ) -> Result<Option<StatusCode>>
    where
        B: PhysAccess<PageLock = L>,
    {
        let mode = self.handler_mode();
        // The simple primitives have nothing a later context could do better.
        let may_defer = may_defer && mode == HandlerMode::Aware;

        let buffer = &self.bounce[index];
        if buffer.is_unassigned() {
            trace!(slot = index, "dropping write to unassigned memory");
            self.release_slot(bus, index);
            return Ok(None);
        }
        let first = buffer.first();
        let second = buffer.second();

        let mut status = write_phase(bus, first.addr, buffer.first_bytes(), mode);
        if let PhysStatus::Err(code) = status {
            warn!(
                first = format_args!("{:#x}/{}", first.addr, first.len),
                second = ?second,
                %code,
                may_defer,
                "bounce buffer write-back of first range failed"
            );
            if may_defer {
                let mut pending = AccessFlags::PENDING_WRITE_FIRST;
                if second.is_some() {
                    pending |= AccessFlags::PENDING_WRITE_SECOND;
                }
                return self.defer(bus, index, code, pending, PhysStatus::Ok);
            }
            self.release_slot(bus, index);
            return Err(AccessError::Handler(code));
        }

        if let Some(second) = second {
            let second_status = write_phase(bus, second.addr, buffer.second_bytes(), mode);
            if let PhysStatus::Err(code) = second_status {
                warn!(
                    first = format_args!("{:#x}/{}", first.addr, first.len),
                    second = format_args!("{:#x}/{}", second.addr, second.len),
                    %code,
                    may_defer,
                    "bounce buffer write-back of second range failed"
                );
                if may_defer {
                    return self.defer(
                        bus,
                        index,
                        code,
                        AccessFlags::PENDING_WRITE_SECOND,
                        status,
                    );
                }
                self.release_slot(bus, index);
                return Err(AccessError::Handler(code));
            }
            status = status.merge(second_status);
        }

        self.release_slot(bus, index);
        if let Some(code) = status.notice() {
            debug!(
                slot = index,
                first = format_args!("{:#x}/{}", first.addr, first.len),
                second = ?second,
                %code,
                "bounce buffer write-back returned notice"
            );
            self.pass_up(status);
        }
        Ok(status.notice())
    }
}

/// One write-back phase. Notices only exist for handler-aware writes.
pub(crate) fn write_phase<B>(bus: &mut B, gpa: u64, src: &[u8], mode: HandlerMode) -> PhysStatus
where
    B: PhysAccess + ?Sized,
{
    match bus.write_phys(gpa, src, mode) {
        PhysStatus::OkWithNotice(_) if mode == HandlerMode::Bypass => PhysStatus::Ok,
        status => status,
    }
}
