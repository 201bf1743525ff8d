//! Flash geometry
//!
//! Derives the storage region from the hardware constants:
//!
//! ```text
//!  0x0 ┌────────────────────────┐
//!      │ application code       │
//!      ├────────────────────────┤ data_start_addr = (page_end - max_apps - 1) * page_size
//!      │ data page (app 1)      │
//!      │ ...                    │
//!      │ data page (app N)      │
//!      ├────────────────────────┤ data_end_addr = (page_end - 1) * page_size
//!      │ swap page              │
//!      ├────────────────────────┤ bootloader_boundary = page_end * page_size
//!      │ bootloader (optional)  │
//!      └────────────────────────┘ total_size
//! ```

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Smallest block that can be registered, whatever the configuration says
pub const MIN_BLOCK_SIZE: u16 = 4;

/// Bytes at the start of the swap page reserved for the commit header
pub const SWAP_HEADER_SIZE: u32 = 16;

/// Page layout of the flash, computed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashGeometry {
    pub page_size: u32,
    pub total_size: u32,
    pub bootloader_boundary: u32,
    pub max_applications: u32,
}

impl FlashGeometry {
    /// Build and validate a geometry.
    ///
    /// # Panics
    /// On a layout that leaves no room for the data pages and the swap page,
    /// or on unaligned boundaries. This is a firmware misconfiguration.
    pub fn new(page_size: u32, total_size: u32, bootloader_boundary: u32, max_applications: u32) -> Self {
        let geometry = Self {
            page_size,
            total_size,
            bootloader_boundary,
            max_applications,
        };
        if let Err(reason) = geometry.validate() {
            panic!("invalid flash geometry: {}", reason);
        }
        geometry
    }

    /// Check the layout without panicking
    ///
    /// Used where the geometry comes from outside the firmware (image
    /// files, command line).
    pub fn validate(&self) -> Result<(), String> {
        let page_size = self.page_size;
        if !page_size.is_power_of_two() {
            return Err(format!("page size {} is not a power of two", page_size));
        }
        if page_size <= SWAP_HEADER_SIZE || page_size > u32::from(u16::MAX) + 1 {
            return Err(format!("page size {} unsupported", page_size));
        }
        if self.total_size % page_size != 0 {
            return Err("flash size not page aligned".to_string());
        }
        if self.bootloader_boundary % page_size != 0 {
            return Err("bootloader boundary not page aligned".to_string());
        }
        if self.bootloader_boundary > self.total_size {
            return Err("bootloader boundary beyond flash".to_string());
        }
        if self.max_applications == 0 {
            return Err("at least one application is required".to_string());
        }
        if self.page_end() <= self.max_applications.saturating_add(1) {
            return Err(format!(
                "no room for {} data pages and a swap page",
                self.max_applications
            ));
        }
        Ok(())
    }

    /// Number of pages in the whole flash
    pub fn page_count(&self) -> u32 {
        self.total_size / self.page_size
    }

    /// Geometry described by a configuration, or the reason it is unusable
    pub fn try_from_config(config: &Config) -> Result<Self, String> {
        let geometry = Self::layout_of(config);
        geometry.validate()?;
        Ok(geometry)
    }

    fn layout_of(config: &Config) -> Self {
        let total_size = config.flash_size();
        Self {
            page_size: config.page_size,
            total_size,
            bootloader_boundary: config.bootloader_address.unwrap_or(total_size),
            max_applications: config.max_applications,
        }
    }

    /// Geometry described by a configuration
    pub fn from_config(config: &Config) -> Self {
        let geometry = Self::layout_of(config);
        Self::new(
            geometry.page_size,
            geometry.total_size,
            geometry.bootloader_boundary,
            geometry.max_applications,
        )
    }

    /// First page index above the storage region
    pub fn page_end(&self) -> u32 {
        self.bootloader_boundary / self.page_size
    }

    /// Address of the first data page
    pub fn data_start_addr(&self) -> u32 {
        (self.page_end() - self.max_applications - 1) * self.page_size
    }

    /// End of the data pages (exclusive)
    pub fn data_end_addr(&self) -> u32 {
        (self.page_end() - 1) * self.page_size
    }

    /// The swap page sits right above the data pages
    pub fn swap_addr(&self) -> u32 {
        self.data_end_addr()
    }

    /// Number of pages available for blocks
    pub fn data_pages(&self) -> u32 {
        (self.data_end_addr() - self.data_start_addr()) / self.page_size
    }

    /// Largest registrable block: one page minus the swap header
    pub fn max_block_size(&self) -> u16 {
        (self.page_size - SWAP_HEADER_SIZE) as u16
    }

    /// Start of the page containing `address`
    pub fn page_of(&self, address: u32) -> u32 {
        address - address % self.page_size
    }

    /// Whether `address` is the start of a data page
    pub fn is_data_page(&self, address: u32) -> bool {
        address % self.page_size == 0
            && address >= self.data_start_addr()
            && address < self.data_end_addr()
    }
}
