//! Flash Module
//!
//! The boundary to the flash peripheral.
//!
//! ## Responsibilities
//! - Describe the flash layout (`FlashGeometry`)
//! - Abstract the peripheral: immediate reads, asynchronous program/erase
//! - Model the system events the platform raises when an operation finishes
//!
//! ## Operation Model
//! ```text
//!   start_write / start_erase_page          (returns immediately)
//!            │
//!            ▼
//!   ┌─────────────────┐   SysEvent::FlashOperationSuccess
//!   │ flash peripheral├─────────────────────────────────────►  platform event dispatcher
//!   └─────────────────┘   SysEvent::FlashOperationError
//! ```
//! Only one program or erase may be in flight at a time. Writes can only
//! clear bits (1 → 0); an erase sets a whole page back to `0xFF`.

mod geometry;
mod sim;

pub use geometry::{FlashGeometry, MIN_BLOCK_SIZE, SWAP_HEADER_SIZE};
pub use sim::{FlashImage, SimulatedFlash};

use thiserror::Error;

/// Value of an erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

/// Hardware code reported when the peripheral rejects an operation up front
pub const CODE_BUSY: u32 = 0x11;

/// Hardware code reported for an out-of-range or misaligned access
pub const CODE_INVALID_ADDRESS: u32 = 0x10;

/// Synchronous flash access errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashError {
    /// The access falls outside of the flash memory.
    #[error("access of {len} bytes at {address:#x} is out of bounds")]
    OutOfBounds { address: u32, len: usize },

    /// An erase address is not page aligned.
    #[error("address {address:#x} is not page aligned")]
    Unaligned { address: u32 },

    /// Another program or erase is still in flight.
    #[error("flash peripheral busy")]
    Busy,
}

impl FlashError {
    /// Hardware code used when this error surfaces as a failed command
    pub fn code(&self) -> u32 {
        match self {
            FlashError::OutOfBounds { .. } | FlashError::Unaligned { .. } => CODE_INVALID_ADDRESS,
            FlashError::Busy => CODE_BUSY,
        }
    }
}

/// System events delivered by the platform event dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysEvent {
    /// The in-flight program/erase finished
    FlashOperationSuccess,

    /// The in-flight program/erase failed
    FlashOperationError { code: u32 },

    /// Any other system event (clock, power, ...); ignored by storage
    Other(u32),
}

impl SysEvent {
    /// Whether this event concerns the flash peripheral
    pub fn is_flash_event(&self) -> bool {
        !matches!(self, SysEvent::Other(_))
    }
}

/// A NOR flash peripheral with asynchronous program and erase
///
/// `read` completes immediately. `start_write` and `start_erase_page` return
/// once the operation is accepted; the outcome arrives later as a
/// [`SysEvent`] through the platform dispatcher.
pub trait FlashPeripheral {
    /// Read `buf.len()` bytes starting at `address`
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Begin programming `data` at `address` (bits can only be cleared)
    fn start_write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Begin erasing the page starting at `page_address`
    fn start_erase_page(&mut self, page_address: u32) -> Result<(), FlashError>;
}
