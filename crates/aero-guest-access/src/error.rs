use thiserror::Error;

use crate::bus::DirectMapFailure;
use crate::fault::TranslateFault;
use crate::slots::UnmapToken;
use crate::status::StatusCode;

pub type Result<T> = std::result::Result<T, AccessError>;

/// Failures surfaced by the guest memory access layer.
///
/// Informational handler results are never errors; they travel as `Ok(Some(StatusCode))`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("guest address translation failed: {0}")]
    Translation(#[from] TranslateFault),

    #[error("failed to allocate {bytes} bytes of bounce buffer storage")]
    ResourceExhaustion { bytes: usize },

    #[error("all {slots} mapping slots are in use")]
    NoFreeSlot { slots: usize },

    #[error("physical access failed with status {0}")]
    Handler(StatusCode),

    /// Caller bug: stale, foreign or mismatched token, or an operation issued in the wrong
    /// execution context.
    #[error("unmap protocol misuse: {reason} (token {token:?})")]
    ProtocolMisuse {
        token: Option<UnmapToken>,
        reason: &'static str,
    },

    #[error("direct mapping failure {0:?} cannot be recovered by bouncing")]
    NotBounceable(DirectMapFailure),

    #[error("invalid access length {len} (page size {page_size})")]
    InvalidLength { len: usize, page_size: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AccessError {
    pub(crate) fn misuse(token: UnmapToken, reason: &'static str) -> Self {
        AccessError::ProtocolMisuse {
            token: Some(token),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("page size {page_size} must be a power of two no smaller than 16")]
    InvalidPageSize { page_size: usize },

    #[error("slot count {slot_count} must be within 1..={max}")]
    InvalidSlotCount { slot_count: usize, max: usize },
}
