//! Configuration for pstore
//!
//! Hardware constants and storage limits with nRF51822 defaults.

/// Main configuration for a storage manager instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Flash Hardware
    // -------------------------------------------------------------------------
    /// Size of one erasable flash page (bytes)
    pub page_size: u32,

    /// Number of pages in the code flash
    pub code_pages: u32,

    /// Start of the bootloader, if one is installed.
    /// `None` means the storage region ends at the top of flash.
    pub bootloader_address: Option<u32>,

    // -------------------------------------------------------------------------
    // Storage Limits
    // -------------------------------------------------------------------------
    /// Maximum number of modules that may register blocks.
    /// One data page is reserved per application.
    pub max_applications: u32,

    /// Smallest block a module may register (bytes)
    pub min_block_size: u16,

    /// Maximum number of pending flash commands
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 1024,
            code_pages: 256,
            bootloader_address: Some(0x3_C000),
            max_applications: 2,
            min_block_size: 4,
            queue_capacity: 10,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Total size of the code flash (bytes)
    pub fn flash_size(&self) -> u32 {
        self.page_size.saturating_mul(self.code_pages)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the flash page size (in bytes)
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.config.page_size = bytes;
        self
    }

    /// Set the number of code flash pages
    pub fn code_pages(mut self, pages: u32) -> Self {
        self.config.code_pages = pages;
        self
    }

    /// Set the bootloader start address
    pub fn bootloader_address(mut self, address: u32) -> Self {
        self.config.bootloader_address = Some(address);
        self
    }

    /// Let the storage region run up to the top of flash
    pub fn without_bootloader(mut self) -> Self {
        self.config.bootloader_address = None;
        self
    }

    /// Set the maximum number of registered modules
    pub fn max_applications(mut self, count: u32) -> Self {
        self.config.max_applications = count;
        self
    }

    /// Set the minimum block size (in bytes)
    pub fn min_block_size(mut self, bytes: u16) -> Self {
        self.config.min_block_size = bytes;
        self
    }

    /// Set the command queue capacity
    pub fn queue_capacity(mut self, count: usize) -> Self {
        self.config.queue_capacity = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
