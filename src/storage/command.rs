//! Command definitions
//!
//! A `Command` is what a module asks for; a `Plan` is the sequence of flash
//! operations it turns into once it becomes active.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::Result;

use super::BlockHandle;

/// Identifier assigned to a command when it is enqueued
pub type CommandId = u64;

/// Command types, as reported to completion handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    Store = 0x01,
    Update = 0x02,
    Clear = 0x03,
    ClearAll = 0x04,
    Recover = 0x05,
}

/// A queued flash command
#[derive(Debug, Clone)]
pub enum Command {
    /// Write `data` at the start of the block
    Store { handle: BlockHandle, data: Bytes },

    /// Rewrite `data` at `offset` inside the block
    Update {
        handle: BlockHandle,
        offset: u16,
        data: Bytes,
    },

    /// Erase the block
    Clear { handle: BlockHandle },

    /// Erase every registered block
    ClearAll,

    /// Bring the swap page back to the erased state (internal)
    Recover,
}

impl Command {
    /// Get the command kind
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Store { .. } => CommandKind::Store,
            Command::Update { .. } => CommandKind::Update,
            Command::Clear { .. } => CommandKind::Clear,
            Command::ClearAll => CommandKind::ClearAll,
            Command::Recover => CommandKind::Recover,
        }
    }

    /// The block this command targets, if it targets exactly one
    pub fn handle(&self) -> Option<BlockHandle> {
        match self {
            Command::Store { handle, .. }
            | Command::Update { handle, .. }
            | Command::Clear { handle } => Some(*handle),
            Command::ClearAll | Command::Recover => None,
        }
    }
}

/// Delivered to a block's completion handler when one of its commands ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub handle: BlockHandle,
    pub kind: CommandKind,
    pub result: Result<()>,
}

/// Per-block completion handler, registered together with the block
pub type CompletionHandler = Box<dyn FnMut(&Completion) + Send>;

/// A single program or erase issued to the flash peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOp {
    /// Program bytes at an absolute address
    Program { address: u32, data: Bytes },

    /// Erase one page
    ErasePage { page: u32 },

    /// Program `len` bytes read from `source` (at issue time) to `dest`
    Copy { source: u32, dest: u32, len: usize },
}

/// What a command does once it becomes active
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub ops: VecDeque<FlashOp>,
    /// The plan stages data in the swap page
    pub uses_swap: bool,
    /// Page a swap recovery rewrites, if any
    pub recovery_target: Option<u32>,
}

impl Plan {
    /// A plan that needs no flash access
    pub fn empty() -> Self {
        Self::default()
    }

    /// A plan of plain operations
    pub fn direct(ops: impl IntoIterator<Item = FlashOp>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}
