//! Guest memory access layer for the instruction emulator.
//!
//! When an emulated instruction touches guest memory that cannot be mapped zero-copy, the
//! access is bounced through a per-slot scratch buffer:
//!
//! - accesses straddling a guest page boundary ([`GuestAccess::map_cross_page`]),
//! - pages intercepted by access handlers or without backing memory
//!   ([`GuestAccess::map_phys_fallback`]).
//!
//! Each mapping yields an [`UnmapToken`] that is consumed by exactly one
//! [`GuestAccess::commit_and_unmap`] or [`GuestAccess::rollback_and_unmap`]. Commit writes the
//! buffer back lower range first; rollback discards it so an aborted instruction leaves guest
//! memory untouched.
//!
//! In the restricted fast execution context, a write the physical layer cannot finish is handed
//! off through [`GuestAccess::commit_and_unmap_deferrable`] and completed later by
//! [`GuestAccess::drain_deferred`] from the full-service context.
//!
//! Translation, data breakpoints, physical reads/writes and page locks are supplied by the
//! caller through the [`Translate`] and [`PhysAccess`] traits.

#![forbid(unsafe_code)]

mod access;
mod bounce;
mod bus;
mod commit;
mod config;
mod deferred;
mod error;
mod fault;
mod map;
mod slots;
mod stats;
mod status;
mod vcpu;

pub use access::{AccessFlags, ExecContext, ExecFlags, HandlerMode};
pub use bounce::PhysRange;
pub use bus::{DirectMapFailure, PhysAccess, Translate};
pub use config::{GuestAccessConfig, DEFAULT_PAGE_SIZE, DEFAULT_SLOT_COUNT, MAX_SLOT_COUNT};
pub use deferred::DeferredWrite;
pub use error::{AccessError, ConfigError, Result};
pub use fault::TranslateFault;
pub use map::Mapped;
pub use slots::UnmapToken;
pub use stats::GuestAccessStats;
pub use status::{PhysStatus, StatusCode};
pub use vcpu::GuestAccess;
