//! Per-vCPU mapping slots, unmap tokens and the active-mapping counter.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::access::AccessFlags;
use crate::error::{AccessError, Result};

static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(1);

/// Handle returned by every successful mapping.
///
/// A token is good for exactly one commit or rollback. It names the owning table, the slot, the
/// slot's generation at mapping time, and the access kind that was requested; any mismatch
/// against the live slot is reported as [`AccessError::ProtocolMisuse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnmapToken {
    table: u32,
    slot: u8,
    generation: u32,
    kind: AccessFlags,
}

impl UnmapToken {
    #[inline]
    pub fn slot(&self) -> usize {
        usize::from(self.slot)
    }

    /// Read/write/execute bits requested when the mapping was created.
    #[inline]
    pub fn kind(&self) -> AccessFlags {
        self.kind
    }
}

struct MappingSlot<L> {
    access: AccessFlags,
    generation: u32,
    lock: Option<L>,
}

impl<L> MappingSlot<L> {
    fn vacant() -> Self {
        Self {
            access: AccessFlags::empty(),
            generation: 0,
            lock: None,
        }
    }
}

pub(crate) struct SlotTable<L> {
    id: u32,
    slots: Vec<MappingSlot<L>>,
    active: usize,
    next: usize,
}

impl<L> SlotTable<L> {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            slots: (0..count).map(|_| MappingSlot::vacant()).collect(),
            active: 0,
            next: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn active(&self) -> usize {
        self.active
    }

    #[inline]
    pub(crate) fn access(&self, index: usize) -> AccessFlags {
        self.slots
            .get(index)
            .map_or(AccessFlags::empty(), |slot| slot.access)
    }

    /// First free slot, searching from the one after the most recently used.
    pub(crate) fn find_free(&self) -> Result<usize> {
        let count = self.slots.len();
        (0..count)
            .map(|i| (self.next + i) % count)
            .find(|&index| self.slots[index].access.is_empty())
            .ok_or(AccessError::NoFreeSlot { slots: count })
    }

    pub(crate) fn occupy(
        &mut self,
        index: usize,
        access: AccessFlags,
        lock: Option<L>,
    ) -> UnmapToken {
        debug_assert!(!access.is_empty());
        let count = self.slots.len();
        let slot = &mut self.slots[index];
        debug_assert!(slot.access.is_empty(), "slot {index} already in use");
        slot.generation = slot.generation.wrapping_add(1);
        slot.access = access;
        slot.lock = lock;
        let generation = slot.generation;
        self.active += 1;
        self.next = (index + 1) % count;
        UnmapToken {
            table: self.id,
            slot: index as u8,
            generation,
            kind: access.kind(),
        }
    }

    /// Check `token` against the live slot and return its index.
    pub(crate) fn validate(&self, token: UnmapToken) -> Result<usize> {
        if token.table != self.id {
            return Err(AccessError::misuse(token, "token belongs to another vCPU"));
        }
        let index = token.slot();
        let Some(slot) = self.slots.get(index) else {
            return Err(AccessError::misuse(token, "slot index out of range"));
        };
        if slot.access.is_empty() {
            return Err(AccessError::misuse(token, "slot is not mapped"));
        }
        if slot.generation != token.generation {
            return Err(AccessError::misuse(token, "stale token"));
        }
        if slot.access.kind() != token.kind {
            return Err(AccessError::misuse(
                token,
                "access kind does not match slot",
            ));
        }
        Ok(index)
    }

    /// Free the slot, returning any page lock it still holds.
    pub(crate) fn release(&mut self, index: usize) -> Option<L> {
        let slot = &mut self.slots[index];
        debug_assert!(!slot.access.is_empty(), "releasing free slot {index}");
        slot.access = AccessFlags::empty();
        debug_assert!(self.active > 0);
        self.active = self.active.saturating_sub(1);
        slot.lock.take()
    }

    pub(crate) fn reset_active(&mut self) {
        self.active = 0;
    }
}
