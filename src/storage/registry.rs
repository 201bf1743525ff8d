//! Block Registry
//!
//! Assigns `(module_id, block_id)` handles to data pages.
//!
//! Registration is kept in RAM only. Modules must register in the same order
//! with the same sizes on every boot so each block lands on the same page.

use tracing::info;

use crate::error::{AllocError, Result, StorageError};
use crate::flash::{FlashGeometry, MIN_BLOCK_SIZE};

/// Identifies a registered block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle {
    pub module_id: u32,
    pub block_id: u32,
}

/// Where a block lives in flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub handle: BlockHandle,
    /// Page-aligned start address of the block
    pub physical_offset: u32,
    pub size: u16,
}

impl BlockDescriptor {
    /// One past the last byte of the block
    pub fn end(&self) -> u32 {
        self.physical_offset + u32::from(self.size)
    }
}

/// In-memory table of registered blocks
#[derive(Debug)]
pub struct BlockRegistry {
    geometry: FlashGeometry,
    min_block_size: u16,
    /// Registered blocks, in registration (and page) order
    blocks: Vec<BlockDescriptor>,
    /// Distinct module ids seen so far
    modules: Vec<u32>,
    next_block_id: u32,
}

impl BlockRegistry {
    /// Create an empty registry.
    ///
    /// `min_block_size` below [`MIN_BLOCK_SIZE`] is raised to it.
    pub fn new(geometry: FlashGeometry, min_block_size: u16) -> Self {
        Self {
            geometry,
            min_block_size: min_block_size.max(MIN_BLOCK_SIZE),
            blocks: Vec::new(),
            modules: Vec::new(),
            next_block_id: 1,
        }
    }

    /// Allocate the next free data page to `module_id`
    ///
    /// On error the registry is left untouched.
    pub fn register(&mut self, module_id: u32, requested_size: u16) -> std::result::Result<BlockHandle, AllocError> {
        let max = self.max_block_size();
        if requested_size < self.min_block_size || requested_size > max {
            return Err(AllocError::InvalidBlockSize {
                size: requested_size,
                min: self.min_block_size,
                max,
            });
        }

        let known_module = self.modules.contains(&module_id);
        if !known_module && self.modules.len() as u32 >= self.geometry.max_applications {
            return Err(AllocError::TooManyModules {
                max: self.geometry.max_applications,
            });
        }

        // Blocks are handed out page by page from the bottom of the region
        let physical_offset =
            self.geometry.data_start_addr() + self.blocks.len() as u32 * self.geometry.page_size;
        if physical_offset >= self.geometry.data_end_addr() {
            return Err(AllocError::CapacityExceeded);
        }

        let handle = BlockHandle {
            module_id,
            block_id: self.next_block_id,
        };
        self.next_block_id += 1;
        if !known_module {
            self.modules.push(module_id);
        }
        self.blocks.push(BlockDescriptor {
            handle,
            physical_offset,
            size: requested_size,
        });

        info!(
            module_id,
            block_id = handle.block_id,
            size = requested_size,
            "registered block at {:#x}",
            physical_offset
        );
        Ok(handle)
    }

    /// Look up a handle registered in this session
    pub fn resolve(&self, handle: &BlockHandle) -> Result<&BlockDescriptor> {
        self.blocks
            .iter()
            .find(|block| block.handle == *handle)
            .ok_or(StorageError::UnknownHandle {
                module_id: handle.module_id,
                block_id: handle.block_id,
            })
    }

    /// The block stored on the page starting at `page`
    pub fn block_at(&self, page: u32) -> Option<&BlockDescriptor> {
        self.blocks.iter().find(|block| block.physical_offset == page)
    }

    /// Largest block size a module may request
    pub fn max_block_size(&self) -> u16 {
        self.geometry.max_block_size()
    }

    pub fn min_block_size(&self) -> u16 {
        self.min_block_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockDescriptor> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}
