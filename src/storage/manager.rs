//! Storage Manager
//!
//! Public face of the storage layer used by modules.
//!
//! ## Responsibilities
//! - Register blocks and resolve handles
//! - Serve `load` straight from flash
//! - Turn store/update/clear requests into queued commands
//! - Receive flash events from the platform and route each completion to
//!   the handler of the block whose command finished
//! - Detect an interrupted swap update at startup and finish it first

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::flash::{FlashGeometry, FlashPeripheral, SimulatedFlash, SysEvent, ERASED_BYTE};

use super::queue::{CommandQueue, Finished};
use super::swap::{self, SwapState};
use super::{
    BlockDescriptor, BlockHandle, BlockRegistry, Command, CommandId, CommandKind, Completion,
    CompletionHandler, FlashOp, Plan,
};

/// Cloneable entry point for the platform's system event dispatcher
///
/// Sending only pushes a marker on a channel; the work happens in
/// [`StorageManager::process`] on the main loop.
#[derive(Debug, Clone)]
pub struct SysEventSink {
    tx: Sender<SysEvent>,
}

impl SysEventSink {
    /// Forward a system event; non-flash events are dropped
    pub fn notify(&self, event: SysEvent) {
        if event.is_flash_event() && self.tx.send(event).is_err() {
            warn!(?event, "storage manager gone, dropping flash event");
        }
    }
}

/// Manages the persistent storage region
///
/// ## Concurrency:
/// - Single-threaded: every method except event delivery runs on the main loop
/// - Flash events may be raised from anywhere through a [`SysEventSink`]
/// - The registry is only written by `register`, normally before steady state
pub struct StorageManager<F> {
    config: Config,
    geometry: FlashGeometry,
    registry: BlockRegistry,
    handlers: HashMap<BlockHandle, CompletionHandler>,
    queue: CommandQueue<F>,
    events_tx: Sender<SysEvent>,
    events_rx: Receiver<SysEvent>,

    /// Pages a failed recovery left unreadable
    corrupt: BTreeSet<u32>,
    /// Page whose committed swap image is still being copied back
    recovering: Option<u32>,
    /// Swap page left non-erased by a failed recovery
    swap_dirty: bool,
    /// Destination of the committed image left in a dirty swap page
    swap_owner: Option<u32>,
}

impl<F: FlashPeripheral> StorageManager<F> {
    /// Take ownership of the flash and prepare the storage region
    ///
    /// On startup:
    /// 1. Derive the flash geometry (panics on a misconfigured layout)
    /// 2. Create the registry and command queue
    /// 3. Inspect the swap page; if it is not erased, queue a recovery
    ///    ahead of everything else
    ///
    /// The recovery runs like any other command once the main loop calls
    /// [`process`](Self::process).
    pub fn open(config: Config, flash: F) -> Result<Self> {
        let geometry = FlashGeometry::from_config(&config);
        let registry = BlockRegistry::new(geometry, config.min_block_size);
        let queue = CommandQueue::new(flash, config.queue_capacity);
        let (events_tx, events_rx) = channel::unbounded();

        info!(
            data_start = geometry.data_start_addr(),
            data_end = geometry.data_end_addr(),
            swap = geometry.swap_addr(),
            "storage region ready"
        );

        let mut manager = Self {
            config,
            geometry,
            registry,
            handlers: HashMap::new(),
            queue,
            events_tx,
            events_rx,
            corrupt: BTreeSet::new(),
            recovering: None,
            swap_dirty: false,
            swap_owner: None,
        };
        if manager.recover()? {
            warn!("swap page not erased at startup, recovery queued");
        }
        Ok(manager)
    }

    // =========================================================================
    // Module API
    // =========================================================================

    /// Register a block of `size` bytes for `module_id`
    ///
    /// `on_complete` receives every completion for commands on this block.
    pub fn register(
        &mut self,
        module_id: u32,
        size: u16,
        on_complete: impl FnMut(&Completion) + Send + 'static,
    ) -> Result<BlockHandle> {
        let handle = self.registry.register(module_id, size)?;
        let handler: CompletionHandler = Box::new(on_complete);
        self.handlers.insert(handle, handler);
        Ok(handle)
    }

    /// Read the block's current flash content
    pub fn load(&self, handle: &BlockHandle) -> Result<Vec<u8>> {
        let block = self.registry.resolve(handle)?;
        self.check_readable(block)?;

        let mut data = vec![0u8; usize::from(block.size)];
        self.queue.flash().read(block.physical_offset, &mut data)?;
        Ok(data)
    }

    /// Write `data` at the start of the block
    ///
    /// An erased block is programmed directly. Programmed content is
    /// replaced through the swap page, so `load` returns `data` either way.
    pub fn store(&mut self, handle: &BlockHandle, data: impl Into<Bytes>) -> Result<CommandId> {
        let data = data.into();
        self.check_range(handle, 0, data.len())?;
        self.queue.enqueue(Command::Store {
            handle: *handle,
            data,
        })
    }

    /// Rewrite `data` at `offset` inside the block
    ///
    /// Bytes that are still erased are programmed in place; anything else
    /// goes through the swap page.
    pub fn update(&mut self, handle: &BlockHandle, offset: u16, data: impl Into<Bytes>) -> Result<CommandId> {
        let data = data.into();
        self.check_range(handle, offset, data.len())?;
        self.queue.enqueue(Command::Update {
            handle: *handle,
            offset,
            data,
        })
    }

    /// Erase the block
    pub fn clear(&mut self, handle: &BlockHandle) -> Result<CommandId> {
        self.registry.resolve(handle)?;
        self.queue.enqueue(Command::Clear { handle: *handle })
    }

    /// Erase every registered block
    pub fn clear_all(&mut self) -> Result<CommandId> {
        self.queue.enqueue(Command::ClearAll)
    }

    /// Queue a swap recovery pass ahead of all pending commands
    ///
    /// Returns `false` if the swap page is already erased.
    pub fn recover(&mut self) -> Result<bool> {
        let state = swap::inspect(self.queue.flash(), &self.geometry)?;
        if state.is_erased() {
            return Ok(false);
        }
        if let SwapState::Committed(header) = state {
            self.recovering = Some(header.dest);
        }
        self.queue.enqueue_front(Command::Recover);
        Ok(true)
    }

    // =========================================================================
    // Platform API
    // =========================================================================

    /// System event entry point for the platform dispatcher
    pub fn sys_event_handler(&self, event: SysEvent) {
        self.event_sink().notify(event);
    }

    /// A handle the platform can keep to deliver events
    pub fn event_sink(&self) -> SysEventSink {
        SysEventSink {
            tx: self.events_tx.clone(),
        }
    }

    /// Main-loop pass
    ///
    /// 1. Apply every flash event received since the last pass
    /// 2. Activate queued commands until one is waiting on the hardware
    ///
    /// Returns the number of completions delivered to handlers.
    pub fn process(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(done) = self.queue.on_flash_event(event) {
                delivered += self.finish(done);
            }
        }

        while let Some(pending) = self.queue.next_pending() {
            let finished = match self.lower(&pending.command) {
                Ok(plan) => self.queue.activate(pending, plan),
                Err(e) => Some(Finished {
                    id: pending.id,
                    command: pending.command,
                    uses_swap: false,
                    recovery_target: None,
                    result: Err(e),
                }),
            };
            match finished {
                Some(done) => delivered += self.finish(done),
                None => break,
            }
        }
        delivered
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_readable(&self, block: &BlockDescriptor) -> Result<()> {
        let page = block.physical_offset;
        if self.corrupt.contains(&page) {
            return Err(StorageError::BlockCorrupt { page });
        }
        if self.recovering == Some(page) {
            return Err(StorageError::RecoveryPending { page });
        }
        Ok(())
    }

    fn check_range(&self, handle: &BlockHandle, offset: u16, len: usize) -> Result<()> {
        let block = self.registry.resolve(handle)?;
        if usize::from(offset) + len > usize::from(block.size) {
            return Err(StorageError::InvalidRange {
                offset,
                len,
                size: block.size,
            });
        }
        Ok(())
    }

    /// Turn the command about to become active into flash operations
    fn lower(&self, command: &Command) -> Result<Plan> {
        match command {
            Command::Store { handle, data } => {
                let block = self.registry.resolve(handle)?;
                self.lower_update(block, 0, data)
            }
            Command::Update {
                handle,
                offset,
                data,
            } => {
                let block = self.registry.resolve(handle)?;
                self.lower_update(block, *offset, data)
            }
            Command::Clear { handle } => {
                let block = self.registry.resolve(handle)?;
                let page = block.physical_offset;
                let mut plan = Plan::direct([FlashOp::ErasePage { page }]);
                if self.swap_dirty && self.swap_owner.map_or(true, |owner| owner == page) {
                    plan.ops.push_back(FlashOp::ErasePage {
                        page: self.geometry.swap_addr(),
                    });
                    plan.uses_swap = true;
                }
                Ok(plan)
            }
            Command::ClearAll => {
                let mut plan = Plan::direct(
                    self.registry
                        .iter()
                        .map(|block| FlashOp::ErasePage {
                            page: block.physical_offset,
                        }),
                );
                if self.swap_dirty {
                    plan.ops.push_back(FlashOp::ErasePage {
                        page: self.geometry.swap_addr(),
                    });
                    plan.uses_swap = true;
                }
                Ok(plan)
            }
            Command::Recover => {
                let state = swap::inspect(self.queue.flash(), &self.geometry)?;
                Ok(swap::plan_recovery(&self.geometry, state))
            }
        }
    }

    fn lower_update(&self, block: &BlockDescriptor, offset: u16, data: &Bytes) -> Result<Plan> {
        let page = block.physical_offset;
        if self.corrupt.contains(&page) {
            return Err(StorageError::BlockCorrupt { page });
        }

        let address = page + u32::from(offset);
        let mut current = vec![0u8; data.len()];
        self.queue.flash().read(address, &mut current)?;

        if current[..] == data[..] {
            debug!(page, offset, "update matches flash content, skipping");
            return Ok(Plan::empty());
        }
        if current.iter().all(|&b| b == ERASED_BYTE) {
            debug!(page, offset, "update target erased, programming in place");
            return Ok(Plan::direct([FlashOp::Program {
                address,
                data: data.clone(),
            }]));
        }

        if self.swap_dirty {
            return Err(StorageError::RecoveryPending {
                page: self.swap_owner.unwrap_or(self.geometry.swap_addr()),
            });
        }
        let image = swap::merge(self.queue.flash(), block, offset, data)?;
        Ok(swap::plan_rewrite(&self.geometry, block, image))
    }

    /// Settle a finished command and notify its owner(s)
    fn finish(&mut self, done: Finished) -> usize {
        let kind = done.command.kind();
        match done.command {
            Command::Recover => {
                self.finish_recovery(done.recovery_target, &done.result);
                0
            }
            Command::ClearAll => {
                if done.result.is_ok() {
                    self.corrupt.clear();
                    if done.uses_swap {
                        self.mark_swap_clean();
                    }
                }
                let handles: Vec<BlockHandle> = self.registry.iter().map(|block| block.handle).collect();
                for handle in &handles {
                    self.notify(*handle, kind, done.result.clone());
                }
                handles.len()
            }
            Command::Store { handle, .. } | Command::Update { handle, .. } | Command::Clear { handle } => {
                match &done.result {
                    Ok(()) if kind == CommandKind::Clear => {
                        if let Ok(block) = self.registry.resolve(&handle) {
                            let page = block.physical_offset;
                            self.corrupt.remove(&page);
                        }
                        if done.uses_swap {
                            self.mark_swap_clean();
                        }
                    }
                    Err(e) if kind != CommandKind::Clear && done.uses_swap => {
                        warn!(id = done.id, error = %e, "swap update failed, restoring swap page");
                        if let Err(e) = self.recover() {
                            warn!(error = %e, "could not inspect swap page");
                        }
                    }
                    _ => {}
                }
                self.notify(handle, kind, done.result);
                1
            }
        }
    }

    fn finish_recovery(&mut self, target: Option<u32>, result: &Result<()>) {
        self.recovering = None;
        match result {
            Ok(()) => {
                info!(?target, "swap recovery complete");
                if let Some(page) = target {
                    self.corrupt.remove(&page);
                }
                self.mark_swap_clean();
            }
            Err(e) => {
                warn!(?target, error = %e, "swap recovery failed");
                if let Some(page) = target {
                    self.corrupt.insert(page);
                }
                self.swap_dirty = true;
                self.swap_owner = target;
            }
        }
    }

    fn mark_swap_clean(&mut self) {
        self.swap_dirty = false;
        self.swap_owner = None;
    }

    fn notify(&mut self, handle: BlockHandle, kind: CommandKind, result: Result<()>) {
        let completion = Completion { handle, kind, result };
        debug!(?completion, "command complete");
        match self.handlers.get_mut(&handle) {
            Some(handler) => handler(&completion),
            None => warn!(?handle, "no completion handler for block"),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Read-only access to the flash
    pub fn flash(&self) -> &F {
        self.queue.flash()
    }

    /// Commands waiting behind the active one
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// No command active or pending
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Whether a failed recovery left this block unreadable
    pub fn is_corrupt(&self, handle: &BlockHandle) -> bool {
        self.registry
            .resolve(handle)
            .map(|block| self.corrupt.contains(&block.physical_offset))
            .unwrap_or(false)
    }

    /// Current state of the swap page
    pub fn swap_state(&self) -> Result<SwapState> {
        swap::inspect(self.queue.flash(), &self.geometry)
    }
}

impl StorageManager<SimulatedFlash> {
    /// Drive the simulated hardware until the queue drains
    ///
    /// Stops early if a command is active but nothing is in flight (the
    /// device lost power). Returns the number of completions delivered.
    pub fn run_until_idle(&mut self) -> usize {
        let mut delivered = self.process();
        while !self.is_idle() {
            let Some(event) = self.queue.flash().complete_pending() else {
                break;
            };
            self.sys_event_handler(event);
            delivered += self.process();
        }
        delivered
    }
}
