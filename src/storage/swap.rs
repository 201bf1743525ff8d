//! Swap-Based Atomic Updater
//!
//! Rewrites a block through the swap page so a reset at any point leaves
//! either the old or the new content, never a mix.
//!
//! ## Swap Page Layout
//! ```text
//! ┌───────────┬───────────┬───────────┬───────────┬──────────────────────┐
//! │ Magic (4) │ Dest (4)  │  Len (4)  │ CRC32 (4) │ Image (Len bytes)    │
//! └───────────┴───────────┴───────────┴───────────┴──────────────────────┘
//! ```
//! The image is programmed first and the header last; a header whose CRC
//! matches the image marks the staging as committed.
//!
//! ## Sequence
//! 1. Program image, then header, into the swap page
//! 2. Erase the destination page
//! 3. Copy the image from swap to the destination
//! 4. Erase the swap page

use bytes::Bytes;
use tracing::{info, warn};

use crate::error::Result;
use crate::flash::{FlashGeometry, FlashPeripheral, ERASED_BYTE, SWAP_HEADER_SIZE};

use super::{BlockDescriptor, FlashOp, Plan};

/// Marks a committed swap header ("SWAP")
pub const SWAP_MAGIC: u32 = 0x5041_5753;

/// Commit record at the start of the swap page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapHeader {
    pub magic: u32,
    /// Page the image belongs to
    pub dest: u32,
    /// Image length in bytes
    pub len: u32,
    /// CRC32 of the image
    pub crc: u32,
}

impl SwapHeader {
    /// Header for staging `image` on its way to `dest`
    pub fn for_image(dest: u32, image: &[u8]) -> Self {
        Self {
            magic: SWAP_MAGIC,
            dest,
            len: image.len() as u32,
            crc: crc32fast::hash(image),
        }
    }

    pub fn to_bytes(&self) -> [u8; SWAP_HEADER_SIZE as usize] {
        let mut bytes = [0u8; SWAP_HEADER_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.dest.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.len.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SWAP_HEADER_SIZE as usize]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            magic: word(0),
            dest: word(4),
            len: word(8),
            crc: word(12),
        }
    }
}

/// What the swap page holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// Fully erased: idle
    Erased,
    /// A committed image waiting to be copied back
    Committed(SwapHeader),
    /// Anything else: staging was interrupted, the destination is intact
    Torn,
}

impl SwapState {
    pub fn is_erased(&self) -> bool {
        matches!(self, SwapState::Erased)
    }
}

/// Examine the swap page
pub fn inspect<F: FlashPeripheral>(flash: &F, geometry: &FlashGeometry) -> Result<SwapState> {
    let mut page = vec![0u8; geometry.page_size as usize];
    flash.read(geometry.swap_addr(), &mut page)?;

    if page.iter().all(|&b| b == ERASED_BYTE) {
        return Ok(SwapState::Erased);
    }

    let mut raw = [0u8; SWAP_HEADER_SIZE as usize];
    raw.copy_from_slice(&page[..SWAP_HEADER_SIZE as usize]);
    let header = SwapHeader::from_bytes(&raw);

    let image_start = SWAP_HEADER_SIZE as usize;
    let valid = header.magic == SWAP_MAGIC
        && geometry.is_data_page(header.dest)
        && header.len > 0
        && header.len <= u32::from(geometry.max_block_size())
        && crc32fast::hash(&page[image_start..image_start + header.len as usize]) == header.crc;

    Ok(if valid {
        SwapState::Committed(header)
    } else {
        SwapState::Torn
    })
}

/// Merge `data` at `offset` into the block's current content
pub fn merge<F: FlashPeripheral>(flash: &F, block: &BlockDescriptor, offset: u16, data: &[u8]) -> Result<Vec<u8>> {
    let mut image = vec![0u8; usize::from(block.size)];
    flash.read(block.physical_offset, &mut image)?;
    let start = usize::from(offset);
    image[start..start + data.len()].copy_from_slice(data);
    Ok(image)
}

/// Full clear-and-rewrite of `block` so that it ends up holding `image`
pub fn plan_rewrite(geometry: &FlashGeometry, block: &BlockDescriptor, image: Vec<u8>) -> Plan {
    let swap = geometry.swap_addr();
    let header = SwapHeader::for_image(block.physical_offset, &image);
    let len = image.len();

    let mut plan = Plan::direct([
        FlashOp::Program {
            address: swap + SWAP_HEADER_SIZE,
            data: Bytes::from(image),
        },
        FlashOp::Program {
            address: swap,
            data: Bytes::copy_from_slice(&header.to_bytes()),
        },
        FlashOp::ErasePage {
            page: block.physical_offset,
        },
        FlashOp::Copy {
            source: swap + SWAP_HEADER_SIZE,
            dest: block.physical_offset,
            len,
        },
        FlashOp::ErasePage { page: swap },
    ]);
    plan.uses_swap = true;
    plan
}

/// Operations that return the swap page to the erased state
pub fn plan_recovery(geometry: &FlashGeometry, state: SwapState) -> Plan {
    let swap = geometry.swap_addr();
    match state {
        SwapState::Erased => Plan::empty(),
        SwapState::Torn => {
            warn!("swap page holds an interrupted staging, discarding it");
            Plan::direct([FlashOp::ErasePage { page: swap }])
        }
        SwapState::Committed(header) => {
            info!(dest = header.dest, len = header.len, "completing interrupted swap update");
            let mut plan = Plan::direct([
                FlashOp::ErasePage { page: header.dest },
                FlashOp::Copy {
                    source: swap + SWAP_HEADER_SIZE,
                    dest: header.dest,
                    len: header.len as usize,
                },
                FlashOp::ErasePage { page: swap },
            ]);
            plan.recovery_target = Some(header.dest);
            plan
        }
    }
}
