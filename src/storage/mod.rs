//! Storage Module
//!
//! Page-based persistent storage on top of a [`FlashPeripheral`](crate::flash::FlashPeripheral).
//!
//! ## Responsibilities
//! - Hand out one data page per registered block
//! - Queue store/update/clear commands; one flash operation in flight at a time
//! - Rewrite programmed blocks atomically through the swap page
//! - Route asynchronous completions back to the block's owner
//!
//! ## Command Lifecycle
//! ```text
//!   store/update/clear ──► Pending ──► Active ──┬──► Completed ──► on_complete(Ok)
//!                          (FIFO)      (plan of  │
//!                                      flash ops)└──► Failed ─────► on_complete(Err)
//! ```

mod command;
mod manager;
mod queue;
mod registry;
pub mod swap;

pub use command::{Command, CommandId, CommandKind, Completion, CompletionHandler, FlashOp, Plan};
pub use manager::{StorageManager, SysEventSink};
pub use queue::{CommandQueue, Finished, PendingCommand};
pub use registry::{BlockDescriptor, BlockHandle, BlockRegistry};
pub use swap::{SwapHeader, SwapState};
