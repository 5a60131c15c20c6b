//! Deferred completion relay.
//!
//! The fast execution context cannot always finish a handler-backed write. Instead of failing
//! the instruction it stages the unfinished phases in a [`DeferredWrite`], lets the instruction
//! retire, and reports the failure code as a notice. The host orchestrator then switches to the
//! full-service context and calls [`GuestAccess::drain_deferred`] to replay exactly the phases
//! that are still outstanding, in address order.

use tracing::{debug, warn};

use crate::access::{AccessFlags, ExecContext, HandlerMode};
use crate::bounce::{try_alloc_zeroed, PhysRange};
use crate::bus::PhysAccess;
use crate::commit::write_phase;
use crate::error::{AccessError, Result};
use crate::status::{PhysStatus, StatusCode};
use crate::vcpu::GuestAccess;

/// A write handed from the fast context to the full-service context.
///
/// At most one exists per vCPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredWrite {
    access: AccessFlags,
    first: PhysRange,
    second: Option<PhysRange>,
    bytes: Box<[u8]>,
    cause: StatusCode,
    committed: PhysStatus,
}

impl DeferredWrite {
    /// Slot flags at hand-off time, including the pending markers.
    #[inline]
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    #[inline]
    pub fn first_pending(&self) -> bool {
        self.access.contains(AccessFlags::PENDING_WRITE_FIRST)
    }

    #[inline]
    pub fn second_pending(&self) -> bool {
        self.access.contains(AccessFlags::PENDING_WRITE_SECOND)
    }

    #[inline]
    pub fn first(&self) -> PhysRange {
        self.first
    }

    #[inline]
    pub fn second(&self) -> Option<PhysRange> {
        self.second
    }

    /// Status the fast context failed with.
    #[inline]
    pub fn cause(&self) -> StatusCode {
        self.cause
    }

    /// Status of the range that landed before the failure. Any notice it carries is reported
    /// again by the drain.
    #[inline]
    pub fn committed(&self) -> PhysStatus {
        self.committed
    }

    /// Bytes of both ranges, lower range first.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn first_bytes(&self) -> &[u8] {
        &self.bytes[..self.first.len]
    }

    fn second_bytes(&self) -> &[u8] {
        &self.bytes[self.first.len..]
    }
}

impl<L> GuestAccess<L> {
    #[inline]
    pub fn has_pending_completion(&self) -> bool {
        self.pending.is_some()
    }

    #[inline]
    pub fn pending_completion(&self) -> Option<&DeferredWrite> {
        self.pending.as_ref()
    }

    /// Stage the write of slot `index` for the full-service context and free every slot.
    ///
    /// `committed` is the status of a phase that already landed; its notice is passed up along
    /// with `cause`.
    pub(crate) fn defer<B>(
        &mut self,
        bus: &mut B,
        index: usize,
        cause: StatusCode,
        pending: AccessFlags,
        committed: PhysStatus,
    ) -> Result<Option<StatusCode>>
    where
        B: PhysAccess<PageLock = L>,
    {
        debug_assert!(pending.intersects(AccessFlags::PENDING_MASK));
        debug_assert!(committed.is_success());
        if committed.notice().is_some() {
            self.pass_up(committed);
        }
        if self.pending.is_some() {
            warn!(
                slot = index,
                %cause,
                "write failed while another deferred write is pending"
            );
            self.release_slot(bus, index);
            return Err(AccessError::ProtocolMisuse {
                token: None,
                reason: "a deferred write is already pending",
            });
        }

        let buffer = &self.bounce[index];
        let mut bytes = match try_alloc_zeroed(buffer.len()) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.release_slot(bus, index);
                return Err(err);
            }
        };
        bytes.copy_from_slice(buffer.data());
        let record = DeferredWrite {
            access: self.slots.access(index) | pending,
            first: buffer.first(),
            second: buffer.second(),
            bytes,
            cause,
            committed,
        };

        // Nothing stays mapped across the hand-off; the instruction retires as if committed.
        self.release_all(bus);
        debug!(
            first = format_args!("{:#x}/{}", record.first.addr, record.first.len),
            second = ?record.second,
            pending = ?(record.access & AccessFlags::PENDING_MASK),
            %cause,
            "write deferred to full-service context"
        );
        self.pending = Some(record);
        self.stats.deferred_commits += 1;

        let status = PhysStatus::OkWithNotice(cause);
        self.pass_up(status);
        Ok(committed.merge(status).notice())
    }

    /// Complete a pending deferred write, if any, and merge the outcome into `status`.
    ///
    /// `status` is whatever the emulation step ended with, usually the pass-up status. A notice
    /// equal to the deferral cause is consumed here since this call resolves it; a notice from a
    /// range the fast context already committed is reported again. Only the phases still marked
    /// pending are written; a phase the fast context already committed is never repeated.
    /// Without a pending write `status` is returned unchanged.
    pub fn drain_deferred<B>(&mut self, bus: &mut B, status: PhysStatus) -> Result<PhysStatus>
    where
        B: PhysAccess<PageLock = L>,
    {
        if self.context != ExecContext::Full {
            return Err(AccessError::ProtocolMisuse {
                token: None,
                reason: "deferred writes can only be drained in the full-service context",
            });
        }
        let Some(record) = self.pending.take() else {
            return Ok(status);
        };

        let mut status = match status {
            PhysStatus::OkWithNotice(code) if code == record.cause => PhysStatus::Ok,
            other => other,
        }
        .merge(record.committed);

        if record.first_pending() {
            let first = write_phase(
                bus,
                record.first.addr,
                record.first_bytes(),
                HandlerMode::Aware,
            );
            status = status.merge(first);
            debug!(
                gpa = format_args!("{:#x}", record.first.addr),
                len = record.first.len,
                result = ?first,
                merged = ?status,
                "drained deferred first range"
            );
        }

        if record.second_pending() {
            if let Some(second) = record.second {
                let result =
                    write_phase(bus, second.addr, record.second_bytes(), HandlerMode::Aware);
                status = status.merge(result);
                debug!(
                    gpa = format_args!("{:#x}", second.addr),
                    len = second.len,
                    ?result,
                    merged = ?status,
                    "drained deferred second range"
                );
            }
        }

        if self.slots.active() != 0 {
            warn!(
                active = self.slots.active(),
                "mappings live while draining deferred write"
            );
            self.release_all(bus);
        }
        self.slots.reset_active();
        self.stats.drained_commits += 1;
        Ok(status)
    }
}
