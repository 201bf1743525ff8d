//! Simulated flash peripheral
//!
//! In-memory NOR flash with the same asynchronous contract as the hardware:
//! `start_*` only latches the operation, and the platform side (tests, the
//! CLI) calls [`SimulatedFlash::complete_pending`] to let it finish and
//! obtain the resulting [`SysEvent`].
//!
//! Supports:
//! - 1 → 0 only programming, page erase back to `0xFF`
//! - Injected hardware failures
//! - Power loss mid-operation (half applied) or between operations
//! - Per-page erase counters
//! - Saving/loading the whole device as an image file

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

use super::{FlashError, FlashGeometry, FlashPeripheral, SysEvent, ERASED_BYTE};

/// Magic prefix of an image file
const IMAGE_MAGIC: [u8; 4] = *b"PSFI";

/// On-disk form of a simulated flash device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashImage {
    pub geometry: FlashGeometry,
    pub contents: Vec<u8>,
    pub erase_counts: Vec<u32>,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Write { address: u32, data: Vec<u8> },
    Erase { page: u32 },
}

#[derive(Debug)]
struct SimState {
    geometry: FlashGeometry,
    contents: Vec<u8>,
    erase_counts: Vec<u32>,
    pending: Option<PendingOp>,
    fail_next: Option<u32>,
    operations: u64,
}

/// Cloneable handle to a simulated flash device
///
/// All clones share the same memory, so a test can keep one handle for
/// driving completions and fault injection while the storage manager owns
/// another.
#[derive(Debug, Clone)]
pub struct SimulatedFlash {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedFlash {
    /// Create a fully erased device
    pub fn new(geometry: FlashGeometry) -> Self {
        let pages = geometry.page_count() as usize;
        Self::from_image(FlashImage {
            geometry,
            contents: vec![ERASED_BYTE; geometry.total_size as usize],
            erase_counts: vec![0; pages],
        })
    }

    /// Recreate a device from an image
    pub fn from_image(image: FlashImage) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                geometry: image.geometry,
                contents: image.contents,
                erase_counts: image.erase_counts,
                pending: None,
                fail_next: None,
                operations: 0,
            })),
        }
    }

    /// Snapshot the device (an in-flight operation is not included)
    pub fn image(&self) -> FlashImage {
        let state = self.state.lock();
        FlashImage {
            geometry: state.geometry,
            contents: state.contents.clone(),
            erase_counts: state.erase_counts.clone(),
        }
    }

    /// Write the device to an image file
    pub fn save_image(&self, path: &Path) -> Result<()> {
        let mut bytes = IMAGE_MAGIC.to_vec();
        bytes.extend(bincode::serialize(&self.image())?);
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Load a device from an image file
    pub fn load_image(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let payload = bytes
            .strip_prefix(&IMAGE_MAGIC[..])
            .ok_or_else(|| StorageError::Image("missing image magic".to_string()))?;
        let image: FlashImage = bincode::deserialize(payload)?;

        image
            .geometry
            .validate()
            .map_err(|reason| StorageError::Image(format!("bad geometry: {}", reason)))?;
        if image.contents.len() != image.geometry.total_size as usize {
            return Err(StorageError::Image(format!(
                "image holds {} bytes, geometry expects {}",
                image.contents.len(),
                image.geometry.total_size
            )));
        }
        if image.erase_counts.len() != image.geometry.page_count() as usize {
            return Err(StorageError::Image(format!(
                "image has {} erase counters for {} pages",
                image.erase_counts.len(),
                image.geometry.page_count()
            )));
        }
        Ok(Self::from_image(image))
    }

    pub fn geometry(&self) -> FlashGeometry {
        self.state.lock().geometry
    }

    // =========================================================================
    // Platform Side
    // =========================================================================

    /// Whether a program/erase is waiting to complete
    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Finish the in-flight operation and return the event the hardware raises.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn complete_pending(&self) -> Option<SysEvent> {
        let mut state = self.state.lock();
        let op = state.pending.take()?;
        state.operations += 1;

        if let Some(code) = state.fail_next.take() {
            return Some(SysEvent::FlashOperationError { code });
        }

        state.apply(&op, None);
        Some(SysEvent::FlashOperationSuccess)
    }

    /// Lose power in the middle of the in-flight operation.
    ///
    /// Half of the write (or the first half of the page for an erase) lands
    /// on flash, no event is raised.
    pub fn tear_pending(&self) {
        let mut state = self.state.lock();
        if let Some(op) = state.pending.take() {
            let len = match &op {
                PendingOp::Write { data, .. } => data.len() / 2,
                PendingOp::Erase { .. } => state.geometry.page_size as usize / 2,
            };
            state.apply(&op, Some(len));
        }
    }

    /// Lose power between operations: anything in flight never happens.
    pub fn power_cycle(&self) {
        self.state.lock().pending = None;
    }

    /// Make the next completed operation report a hardware error
    pub fn fail_next(&self, code: u32) {
        self.state.lock().fail_next = Some(code);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Raw flash contents
    pub fn contents(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        state.contents[address as usize..address as usize + len].to_vec()
    }

    /// Overwrite flash contents directly, bypassing NOR rules (test setup)
    pub fn inject(&self, address: u32, data: &[u8]) {
        let mut state = self.state.lock();
        let start = address as usize;
        state.contents[start..start + data.len()].copy_from_slice(data);
    }

    /// Times the page containing `address` has been erased
    pub fn erase_count(&self, address: u32) -> u32 {
        let state = self.state.lock();
        state.erase_counts[(address / state.geometry.page_size) as usize]
    }

    /// Erases across the whole device
    pub fn total_erase_count(&self) -> u32 {
        self.state.lock().erase_counts.iter().sum()
    }

    /// Operations completed (successfully or not) since creation
    pub fn operations(&self) -> u64 {
        self.state.lock().operations
    }
}

impl SimState {
    fn check_range(&self, address: u32, len: usize) -> std::result::Result<(), FlashError> {
        let end = address as u64 + len as u64;
        if end > self.geometry.total_size as u64 {
            return Err(FlashError::OutOfBounds { address, len });
        }
        Ok(())
    }

    /// Apply an operation; `limit` truncates it (power loss).
    fn apply(&mut self, op: &PendingOp, limit: Option<usize>) {
        match op {
            PendingOp::Write { address, data } => {
                let len = limit.unwrap_or(data.len()).min(data.len());
                let start = *address as usize;
                for (cell, byte) in self.contents[start..start + len].iter_mut().zip(data) {
                    *cell &= *byte;
                }
            }
            PendingOp::Erase { page } => {
                let page_size = self.geometry.page_size as usize;
                let len = limit.unwrap_or(page_size).min(page_size);
                let start = *page as usize;
                self.contents[start..start + len].fill(ERASED_BYTE);
                if limit.is_none() {
                    self.erase_counts[start / page_size] += 1;
                }
            }
        }
    }
}

impl FlashPeripheral for SimulatedFlash {
    fn read(&self, address: u32, buf: &mut [u8]) -> std::result::Result<(), FlashError> {
        let state = self.state.lock();
        state.check_range(address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&state.contents[start..start + buf.len()]);
        Ok(())
    }

    fn start_write(&mut self, address: u32, data: &[u8]) -> std::result::Result<(), FlashError> {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return Err(FlashError::Busy);
        }
        state.check_range(address, data.len())?;
        state.pending = Some(PendingOp::Write {
            address,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn start_erase_page(&mut self, page_address: u32) -> std::result::Result<(), FlashError> {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return Err(FlashError::Busy);
        }
        if page_address % state.geometry.page_size != 0 {
            return Err(FlashError::Unaligned {
                address: page_address,
            });
        }
        state.check_range(page_address, state.geometry.page_size as usize)?;
        state.pending = Some(PendingOp::Erase { page: page_address });
        Ok(())
    }
}
