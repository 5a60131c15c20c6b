//! Bounce mapper: satisfies accesses the direct page mapper cannot.
//!
//! Two entry points populate a slot plus its bounce buffer:
//! - [`GuestAccess::map_cross_page`] for accesses straddling a page boundary, and
//! - [`GuestAccess::map_phys_fallback`] for single pages the direct mapper could not lock.
//!
//! Nothing is allocated until every translation and pre-fill read has succeeded, so a failed
//! mapping never needs cleanup.

use tracing::{debug, trace, warn};

use crate::access::{AccessFlags, ExecFlags, HandlerMode};
use crate::bounce::PhysRange;
use crate::bus::{DirectMapFailure, PhysAccess, Translate};
use crate::error::{AccessError, Result};
use crate::slots::UnmapToken;
use crate::status::{PhysStatus, StatusCode};
use crate::vcpu::GuestAccess;

/// Pattern presented for reads of unassigned guest-physical memory.
const UNASSIGNED_FILL: u8 = 0xFF;

/// A freshly created bounce mapping.
#[derive(Debug)]
pub struct Mapped<'a> {
    pub token: UnmapToken,
    /// Notice reported by the pre-fill reads. Also folded into the pass-up status.
    pub notice: Option<StatusCode>,
    /// The bounce buffer, exactly as long as the requested access.
    pub bytes: &'a mut [u8],
}

impl<L> GuestAccess<L> {
    /// Map `len` bytes at `gva` that cross into the next guest page.
    ///
    /// Both halves are translated and checked independently; translation faults are returned
    /// verbatim before anything is touched. Reads, executes and partial writes are pre-filled
    /// from guest memory, lower page first.
    pub fn map_cross_page<B>(
        &mut self,
        bus: &mut B,
        gva: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<Mapped<'_>>
    where
        B: Translate + PhysAccess<PageLock = L>,
    {
        let access = requested(access)?;
        let page_size = self.config.page_size;
        let mask = self.config.page_offset_mask();
        let first_len = page_size - (gva & mask) as usize;
        if len > page_size || len <= first_len {
            return Err(AccessError::InvalidLength { len, page_size });
        }
        let second_len = len - first_len;
        let index = self.slots.find_free()?;

        let gpa_first = bus.translate_and_check(gva, first_len, access)?;
        debug_assert_eq!(gpa_first & mask, gva & mask);
        let gva_second = gva.wrapping_add(first_len as u64);
        let gpa_second = bus.translate_and_check(gva_second, second_len, access)? & !mask;

        if self.exec.contains(ExecFlags::PENDING_DATA_BREAKPOINTS) {
            let hits = bus.check_data_breakpoints(gva, first_len, access)
                | bus.check_data_breakpoints(gva_second, second_len, access);
            if hits != 0 {
                debug!(
                    gva = format_args!("{gva:#x}"),
                    len,
                    hits = format_args!("{hits:#x}"),
                    ?access,
                    "data breakpoint hit by cross-page access"
                );
                self.debug_hits |= hits;
            }
        }

        let mode = self.handler_mode();
        let buffer = &mut self.bounce[index];
        let mut status = PhysStatus::Ok;
        let filled = if access.needs_prefill() {
            let (head, tail) = buffer.scratch(len).split_at_mut(first_len);
            status = read_phase(bus, gpa_first, head, mode)?;
            status = status.merge(read_phase(bus, gpa_second, tail, mode)?);
            len
        } else {
            0
        };
        buffer.poison(filled, len);
        buffer.record(
            PhysRange::new(gpa_first, first_len),
            Some(PhysRange::new(gpa_second, second_len)),
            false,
        );

        self.stats.cross_page_maps += 1;
        trace!(
            slot = index,
            gva = format_args!("{gva:#x}"),
            first = format_args!("{gpa_first:#x}/{first_len}"),
            second = format_args!("{gpa_second:#x}/{second_len}"),
            ?access,
            "bounce mapped cross-page access"
        );
        Ok(self.finish_bounce(index, access, status))
    }

    /// Bounce a single-page access at `gpa` after the direct mapper failed with `reason`.
    ///
    /// Only handler intercepts and unassigned memory can be bounced; any other reason is handed
    /// back as [`AccessError::NotBounceable`]. Unassigned memory reads as all ones and is never
    /// actually read.
    pub fn map_phys_fallback<B>(
        &mut self,
        bus: &mut B,
        gpa: u64,
        len: usize,
        access: AccessFlags,
        reason: DirectMapFailure,
    ) -> Result<Mapped<'_>>
    where
        B: PhysAccess<PageLock = L>,
    {
        if !reason.is_bounceable() {
            return Err(AccessError::NotBounceable(reason));
        }
        let access = requested(access)?;
        let page_size = self.config.page_size;
        let offset = (gpa & self.config.page_offset_mask()) as usize;
        if len == 0 || len > page_size - offset {
            return Err(AccessError::InvalidLength { len, page_size });
        }
        let index = self.slots.find_free()?;
        self.stats.potential_exits += 1;

        let unassigned = reason == DirectMapFailure::Unassigned;
        let mode = self.handler_mode();
        let buffer = &mut self.bounce[index];
        let mut status = PhysStatus::Ok;
        let filled = if access.needs_prefill() {
            let scratch = buffer.scratch(len);
            if unassigned {
                scratch.fill(UNASSIGNED_FILL);
            } else {
                status = read_phase(bus, gpa, scratch, mode)?;
            }
            len
        } else {
            0
        };
        buffer.poison(filled, len);
        buffer.record(PhysRange::new(gpa, len), None, unassigned);

        self.stats.phys_fallback_maps += 1;
        trace!(
            slot = index,
            gpa = format_args!("{gpa:#x}"),
            len,
            ?reason,
            ?access,
            "bounce mapped physical fallback"
        );
        Ok(self.finish_bounce(index, access, status))
    }

    /// Record a mapping the direct mapper satisfied in place.
    ///
    /// `lock` is the page-exclusivity lock it took, if any. The slot owns it until commit or
    /// rollback returns it through [`PhysAccess::release_page_lock`].
    pub fn map_direct(&mut self, access: AccessFlags, lock: Option<L>) -> Result<UnmapToken> {
        let access = requested(access)?;
        let index = self.slots.find_free()?;
        let flags = if lock.is_some() {
            access
        } else {
            access | AccessFlags::NOT_LOCKED
        };
        trace!(slot = index, ?flags, "direct mapping recorded");
        Ok(self.slots.occupy(index, flags, lock))
    }

    fn finish_bounce(
        &mut self,
        index: usize,
        access: AccessFlags,
        status: PhysStatus,
    ) -> Mapped<'_> {
        let token = self
            .slots
            .occupy(index, access | AccessFlags::BOUNCE_BUFFERED, None);
        let notice = status.notice();
        if notice.is_some() {
            self.pass_up(status);
        }
        Mapped {
            token,
            notice,
            bytes: self.bounce[index].data_mut(),
        }
    }
}

fn requested(access: AccessFlags) -> Result<AccessFlags> {
    let access = access & AccessFlags::REQUEST_MASK;
    if access.kind().is_empty() {
        return Err(AccessError::ProtocolMisuse {
            token: None,
            reason: "mapping requested without an access kind",
        });
    }
    Ok(access)
}

/// One pre-fill read. Hard failures abort the mapping; notices only exist for handler-aware
/// reads.
fn read_phase<B>(bus: &mut B, gpa: u64, dst: &mut [u8], mode: HandlerMode) -> Result<PhysStatus>
where
    B: PhysAccess + ?Sized,
{
    match bus.read_phys(gpa, dst, mode) {
        PhysStatus::Err(code) => {
            warn!(
                gpa = format_args!("{gpa:#x}"),
                len = dst.len(),
                %code,
                ?mode,
                "bounce buffer pre-fill read failed"
            );
            Err(AccessError::Handler(code))
        }
        PhysStatus::OkWithNotice(code) if mode == HandlerMode::Aware => {
            debug!(
                gpa = format_args!("{gpa:#x}"),
                len = dst.len(),
                %code,
                "pre-fill read returned notice"
            );
            Ok(PhysStatus::OkWithNotice(code))
        }
        _ => Ok(PhysStatus::Ok),
    }
}
