use crate::error::ConfigError;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_SLOT_COUNT: usize = 3;
pub const MAX_SLOT_COUNT: usize = 8;

/// Sizing of the per-vCPU mapping state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAccessConfig {
    /// Guest page size in bytes. Bounce buffers are sized to one page.
    pub page_size: usize,
    /// Number of mapping slots per vCPU. An instruction rarely needs more than three
    /// simultaneous mappings (e.g. `MOVS` source + destination + stack).
    pub slot_count: usize,
}

impl Default for GuestAccessConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            slot_count: DEFAULT_SLOT_COUNT,
        }
    }
}

impl GuestAccessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two() || self.page_size < 16 {
            return Err(ConfigError::InvalidPageSize {
                page_size: self.page_size,
            });
        }
        if self.slot_count == 0 || self.slot_count > MAX_SLOT_COUNT {
            return Err(ConfigError::InvalidSlotCount {
                slot_count: self.slot_count,
                max: MAX_SLOT_COUNT,
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn page_offset_mask(&self) -> u64 {
        self.page_size as u64 - 1
    }
}
