use thiserror::Error;

/// Failure reported by the guest address translator.
///
/// The access layer never builds or inspects these; whatever the translator reports is handed
/// back to the caller untouched so it can raise the matching guest exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateFault {
    /// `#PF` with the faulting address and the error code the translator computed.
    #[error("#PF at {addr:#x} (error code {error_code:#x})")]
    PageFault { addr: u64, error_code: u32 },

    /// Non-canonical linear address (`#GP(0)`).
    #[error("non-canonical address {0:#x}")]
    NonCanonical(u64),
}
