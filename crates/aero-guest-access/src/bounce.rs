//! Bounce buffer store: per-slot scratch bytes plus the guest-physical ranges they stand for.

use crate::error::{AccessError, Result};

/// Fill for bytes the caller must overwrite before commit (debug builds only).
#[cfg(debug_assertions)]
const CANARY_UNFILLED: u8 = 0xCC;
/// Fill for the buffer tail beyond the mapped length (debug builds only).
#[cfg(debug_assertions)]
const CANARY_TAIL: u8 = 0xAA;

/// A guest-physical byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysRange {
    pub addr: u64,
    pub len: usize,
}

impl PhysRange {
    #[inline]
    pub fn new(addr: u64, len: usize) -> Self {
        Self { addr, len }
    }
}

pub(crate) struct BounceBuffer {
    first: PhysRange,
    second: Option<PhysRange>,
    unassigned: bool,
    bytes: Box<[u8]>,
}

impl BounceBuffer {
    pub(crate) fn try_new(page_size: usize) -> Result<Self> {
        Ok(Self {
            first: PhysRange::default(),
            second: None,
            unassigned: false,
            bytes: try_alloc_zeroed(page_size)?,
        })
    }

    #[inline]
    pub(crate) fn first(&self) -> PhysRange {
        self.first
    }

    #[inline]
    pub(crate) fn second(&self) -> Option<PhysRange> {
        self.second
    }

    #[inline]
    pub(crate) fn is_unassigned(&self) -> bool {
        self.unassigned
    }

    /// Mapped length: both ranges together.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.first.len + self.second.map_or(0, |r| r.len)
    }

    #[inline]
    pub(crate) fn data(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.bytes[..len]
    }

    #[inline]
    pub(crate) fn first_bytes(&self) -> &[u8] {
        &self.bytes[..self.first.len]
    }

    #[inline]
    pub(crate) fn second_bytes(&self) -> &[u8] {
        let start = self.first.len;
        &self.bytes[start..self.len()]
    }

    /// Scratch space for a mapping of `len` bytes, before the ranges are recorded.
    #[inline]
    pub(crate) fn scratch(&mut self, len: usize) -> &mut [u8] {
        &mut self.bytes[..len]
    }

    pub(crate) fn record(&mut self, first: PhysRange, second: Option<PhysRange>, unassigned: bool) {
        debug_assert!(first.len + second.map_or(0, |r| r.len) <= self.bytes.len());
        self.first = first;
        self.second = second;
        self.unassigned = unassigned;
    }

    /// Poison bytes the mapping did not pre-fill so reads of uninitialised scratch show up.
    #[cfg(debug_assertions)]
    pub(crate) fn poison(&mut self, filled: usize, len: usize) {
        self.bytes[filled..len].fill(CANARY_UNFILLED);
        self.bytes[len..].fill(CANARY_TAIL);
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn poison(&mut self, _filled: usize, _len: usize) {}
}

pub(crate) fn try_alloc_zeroed(len: usize) -> Result<Box<[u8]>> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| AccessError::ResourceExhaustion { bytes: len })?;
    bytes.resize(len, 0);
    Ok(bytes.into_boxed_slice())
}
