//! Command Queue
//!
//! Bounded FIFO of flash commands in front of the flash peripheral.
//!
//! ## Rules
//! - At most one command is active; the rest wait in submission order
//! - The active command's plan is issued one flash operation at a time
//! - The next operation is issued only after the completion event of the
//!   previous one arrives
//! - A failed operation ends its command; the queue moves on
//!
//! The queue owns the flash peripheral. Nothing else programs or erases it.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::flash::{FlashPeripheral, SysEvent};

use super::{Command, CommandId, CommandKind, FlashOp, Plan};

/// A command waiting for its turn
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub id: CommandId,
    pub command: Command,
}

/// A command that reached a terminal state
#[derive(Debug, Clone)]
pub struct Finished {
    pub id: CommandId,
    pub command: Command,
    pub uses_swap: bool,
    pub recovery_target: Option<u32>,
    pub result: Result<()>,
}

/// The command currently driving the flash peripheral
#[derive(Debug)]
struct ActiveCommand {
    pending: PendingCommand,
    plan: Plan,
    /// Operation issued to the peripheral and awaiting its event
    in_flight: Option<FlashOp>,
}

/// Serializes flash commands
pub struct CommandQueue<F> {
    flash: F,
    pending: VecDeque<PendingCommand>,
    active: Option<ActiveCommand>,
    capacity: usize,
    next_id: CommandId,
}

impl<F: FlashPeripheral> CommandQueue<F> {
    /// Create a queue that owns `flash`
    pub fn new(flash: F, capacity: usize) -> Self {
        Self {
            flash,
            pending: VecDeque::with_capacity(capacity),
            active: None,
            capacity,
            next_id: 1,
        }
    }

    /// Append a command behind everything already queued
    pub fn enqueue(&mut self, command: Command) -> Result<CommandId> {
        if self.pending.len() >= self.capacity {
            warn!(kind = ?command.kind(), "command queue full");
            return Err(StorageError::QueueFull {
                capacity: self.capacity,
            });
        }
        let id = self.allocate_id();
        debug!(id, kind = ?command.kind(), "enqueued");
        self.pending.push_back(PendingCommand { id, command });
        Ok(id)
    }

    /// Put an internal command at the head of the queue.
    ///
    /// Does not count against the capacity.
    pub fn enqueue_front(&mut self, command: Command) -> CommandId {
        let id = self.allocate_id();
        debug!(id, kind = ?command.kind(), "enqueued at front");
        self.pending.push_front(PendingCommand { id, command });
        id
    }

    /// Take the next command to activate.
    ///
    /// Returns `None` while a command is still active.
    pub fn next_pending(&mut self) -> Option<PendingCommand> {
        if self.active.is_some() {
            return None;
        }
        self.pending.pop_front()
    }

    /// Make `pending` the active command and issue the first operation of its plan.
    ///
    /// Returns the finished command right away if the plan is empty or the
    /// peripheral refuses the first operation.
    pub fn activate(&mut self, pending: PendingCommand, plan: Plan) -> Option<Finished> {
        debug_assert!(self.active.is_none(), "only one command may be active");
        debug!(id = pending.id, kind = ?pending.command.kind(), ops = plan.len(), "activated");
        self.active = Some(ActiveCommand {
            pending,
            plan,
            in_flight: None,
        });
        self.issue_next()
    }

    /// Feed a platform event to the active command.
    ///
    /// Returns the command if this event ended it.
    pub fn on_flash_event(&mut self, event: SysEvent) -> Option<Finished> {
        let in_flight = self
            .active
            .as_mut()
            .and_then(|active| active.in_flight.take());
        let Some(op) = in_flight else {
            warn!(?event, "flash event with no operation in flight");
            return None;
        };

        match event {
            SysEvent::FlashOperationSuccess => {
                debug!(?op, "flash operation complete");
                self.issue_next()
            }
            SysEvent::FlashOperationError { code } => {
                warn!(?op, code, "flash operation failed");
                self.finish(Err(StorageError::FlashOpFailed { code }))
            }
            SysEvent::Other(_) => {
                // Not ours; keep waiting for the real completion
                if let Some(active) = self.active.as_mut() {
                    active.in_flight = Some(op);
                }
                None
            }
        }
    }

    /// Issue the next operation of the active plan, or finish it
    fn issue_next(&mut self) -> Option<Finished> {
        let active = self.active.as_mut()?;
        let Some(op) = active.plan.ops.pop_front() else {
            return self.finish(Ok(()));
        };

        let issued = match &op {
            FlashOp::Program { address, data } => self.flash.start_write(*address, data),
            FlashOp::ErasePage { page } => self.flash.start_erase_page(*page),
            FlashOp::Copy { source, dest, len } => {
                let mut buf = vec![0u8; *len];
                self.flash
                    .read(*source, &mut buf)
                    .and_then(|_| self.flash.start_write(*dest, &buf))
            }
        };

        match issued {
            Ok(()) => {
                debug!(?op, "flash operation issued");
                if let Some(active) = self.active.as_mut() {
                    active.in_flight = Some(op);
                }
                None
            }
            Err(e) => {
                warn!(?op, error = %e, "flash peripheral rejected operation");
                self.finish(Err(StorageError::FlashOpFailed { code: e.code() }))
            }
        }
    }

    fn finish(&mut self, result: Result<()>) -> Option<Finished> {
        let active = self.active.take()?;
        Some(Finished {
            id: active.pending.id,
            command: active.pending.command,
            uses_swap: active.plan.uses_swap,
            recovery_target: active.plan.recovery_target,
            result,
        })
    }

    fn allocate_id(&mut self) -> CommandId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Read access to the flash (reads need no queuing)
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Number of commands waiting (the active one excluded)
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// No command active and none waiting
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }

    /// Kind of the active command
    pub fn active_kind(&self) -> Option<CommandKind> {
        self.active.as_ref().map(|active| active.pending.command.kind())
    }
}
