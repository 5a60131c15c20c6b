//! Access kinds and per-step execution state.

use bitflags::bitflags;

bitflags! {
    /// Access kind requested for a mapping plus the bookkeeping bits a slot carries while live.
    ///
    /// Only [`AccessFlags::REQUEST_MASK`] bits may be requested by callers; the remaining bits are
    /// owned by the slot table.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// A write that may leave some mapped bytes untouched, so the buffer must be pre-filled.
        const PARTIAL_WRITE = 1 << 8;
        /// The slot is backed by a bounce buffer rather than a direct page mapping.
        const BOUNCE_BUFFERED = 1 << 9;
        /// Direct mapping that holds no page-exclusivity lock.
        const NOT_LOCKED = 1 << 10;
        /// Deferred write whose first range has not been committed yet.
        const PENDING_WRITE_FIRST = 1 << 11;
        /// Deferred write whose second range has not been committed yet.
        const PENDING_WRITE_SECOND = 1 << 12;
    }
}

impl AccessFlags {
    pub const TYPE_MASK: AccessFlags = AccessFlags::READ
        .union(AccessFlags::WRITE)
        .union(AccessFlags::EXEC);

    pub const REQUEST_MASK: AccessFlags = AccessFlags::TYPE_MASK.union(AccessFlags::PARTIAL_WRITE);

    pub const PENDING_MASK: AccessFlags =
        AccessFlags::PENDING_WRITE_FIRST.union(AccessFlags::PENDING_WRITE_SECOND);

    pub const READ_WRITE: AccessFlags = AccessFlags::READ.union(AccessFlags::WRITE);

    /// The read/write/execute bits only.
    #[inline]
    pub fn kind(self) -> AccessFlags {
        self & Self::TYPE_MASK
    }

    #[inline]
    pub fn is_write(self) -> bool {
        self.contains(AccessFlags::WRITE)
    }

    /// Whether the current guest content must be read into the buffer before the caller sees it.
    ///
    /// Pure overwrites (write without [`AccessFlags::PARTIAL_WRITE`]) skip the read.
    #[inline]
    pub fn needs_prefill(self) -> bool {
        self.intersects(AccessFlags::READ | AccessFlags::EXEC | AccessFlags::PARTIAL_WRITE)
    }
}

bitflags! {
    /// Execution flags of the current emulation step.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ExecFlags: u32 {
        /// Use the handler-bypassing physical primitives.
        const BYPASS_HANDLERS = 1 << 0;
        /// Data breakpoints are armed and must be evaluated for bounced accesses.
        const PENDING_DATA_BREAKPOINTS = 1 << 1;
    }
}

/// Which physical read/write primitive to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// Route through access handlers (MMIO, write monitors, ...).
    Aware,
    /// Plain memory access that ignores access handlers.
    Bypass,
}

impl From<ExecFlags> for HandlerMode {
    #[inline]
    fn from(flags: ExecFlags) -> Self {
        if flags.contains(ExecFlags::BYPASS_HANDLERS) {
            HandlerMode::Bypass
        } else {
            HandlerMode::Aware
        }
    }
}

/// Execution context the emulator is currently running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecContext {
    /// Restricted context that cannot invoke the full memory-manager services. Hard write
    /// failures may be handed off to the full-service context.
    Fast,
    /// Full-service context; every physical access can be completed here.
    #[default]
    Full,
}
