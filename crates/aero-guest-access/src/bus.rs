//! Collaborators the access layer consumes but does not implement.
//!
//! The guest address translator decides how a virtual address maps to physical memory, the
//! physical primitives route accesses through RAM or access handlers, and the page-exclusivity
//! locks belong to the direct mapper. This crate only sequences calls into them.

use crate::access::{AccessFlags, HandlerMode};
use crate::fault::TranslateFault;
use crate::status::{PhysStatus, StatusCode};

/// Guest virtual → physical translation with access checks.
pub trait Translate {
    /// Translate `gva` and validate that `len` bytes may be accessed as `access`.
    ///
    /// The returned address keeps the page offset of `gva`.
    fn translate_and_check(
        &mut self,
        gva: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<u64, TranslateFault>;

    /// Match `[gva, gva + len)` against armed data breakpoints. Returns the bitmask of hits to
    /// be folded into the vCPU's pending debug state.
    fn check_data_breakpoints(&mut self, _gva: u64, _len: usize, _access: AccessFlags) -> u32 {
        0
    }
}

/// Guest physical memory primitives.
///
/// Reads take `&mut self` because handler-backed ranges have side effects.
pub trait PhysAccess {
    /// Page-exclusivity lock handed out by the direct mapper.
    type PageLock;

    fn read_phys(&mut self, gpa: u64, dst: &mut [u8], mode: HandlerMode) -> PhysStatus;
    fn write_phys(&mut self, gpa: u64, src: &[u8], mode: HandlerMode) -> PhysStatus;

    fn release_page_lock(&mut self, lock: Self::PageLock);
}

impl<T: Translate + ?Sized> Translate for &mut T {
    #[inline]
    fn translate_and_check(
        &mut self,
        gva: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<u64, TranslateFault> {
        <T as Translate>::translate_and_check(&mut **self, gva, len, access)
    }

    #[inline]
    fn check_data_breakpoints(&mut self, gva: u64, len: usize, access: AccessFlags) -> u32 {
        <T as Translate>::check_data_breakpoints(&mut **self, gva, len, access)
    }
}

impl<T: PhysAccess + ?Sized> PhysAccess for &mut T {
    type PageLock = T::PageLock;

    #[inline]
    fn read_phys(&mut self, gpa: u64, dst: &mut [u8], mode: HandlerMode) -> PhysStatus {
        <T as PhysAccess>::read_phys(&mut **self, gpa, dst, mode)
    }

    #[inline]
    fn write_phys(&mut self, gpa: u64, src: &[u8], mode: HandlerMode) -> PhysStatus {
        <T as PhysAccess>::write_phys(&mut **self, gpa, src, mode)
    }

    #[inline]
    fn release_page_lock(&mut self, lock: Self::PageLock) {
        <T as PhysAccess>::release_page_lock(&mut **self, lock)
    }
}

/// Why the direct mapper could not lock a page for zero-copy access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMapFailure {
    /// An access handler intercepts writes to the page.
    CatchWrite,
    /// An access handler intercepts every access to the page.
    CatchAll,
    /// The range has no backing memory at all.
    Unassigned,
    /// Anything else; not recoverable by bouncing.
    Other(StatusCode),
}

impl DirectMapFailure {
    #[inline]
    pub fn is_bounceable(self) -> bool {
        !matches!(self, DirectMapFailure::Other(_))
    }
}
