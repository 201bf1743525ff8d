//! # pstore
//!
//! Persistent storage for a battery-powered BLE peripheral on raw NOR flash:
//! - One page-aligned block per registration
//! - Queued flash commands, one operation in flight at a time
//! - Atomic clear-and-rewrite through a swap page, finished after power loss
//! - Completion reported asynchronously to the block's owner
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               GeneralService (config record)                │
//! └─────────────────────┬───────────────────────▲───────────────┘
//!        register/load/ │                       │ on_complete
//!        store/update   ▼                       │
//! ┌─────────────────────────────────────────────┴───────────────┐
//! │                     StorageManager                          │
//! │         (registry · swap updater · event demux)             │
//! └─────────────────────┬───────────────────────▲───────────────┘
//!                       │                       │ SysEvent
//!                       ▼                       │
//!               ┌───────────────┐       ┌───────┴───────┐
//!               │ CommandQueue  │──────►│     Flash     │
//!               │ (FIFO, 1 op)  │ ops   │  peripheral   │
//!               └───────────────┘       └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod flash;
pub mod service;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use error::{AllocError, Result, StorageError};
pub use flash::{FlashGeometry, FlashPeripheral, SimulatedFlash, SysEvent};
pub use storage::{BlockHandle, Completion, StorageManager};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of pstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
