//! Tests for CommandQueue
//!
//! These tests verify:
//! - Bounded FIFO behaviour (capacity, ordering, front insertion)
//! - Single active command, one flash operation in flight
//! - Plan execution driven by completion events
//! - Failure handling (hardware error, rejected operation)

use bytes::Bytes;
use pstore::config::Config;
use pstore::flash::{FlashGeometry, SimulatedFlash, SysEvent, CODE_BUSY};
use pstore::storage::{BlockHandle, Command, CommandQueue, FlashOp, Plan};
use pstore::StorageError;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_queue(capacity: usize) -> (CommandQueue<SimulatedFlash>, SimulatedFlash, FlashGeometry) {
    let geometry = FlashGeometry::from_config(&Config::default());
    let flash = SimulatedFlash::new(geometry);
    (CommandQueue::new(flash.clone(), capacity), flash, geometry)
}

fn handle(block_id: u32) -> BlockHandle {
    BlockHandle {
        module_id: 1,
        block_id,
    }
}

fn clear(block_id: u32) -> Command {
    Command::Clear {
        handle: handle(block_id),
    }
}

// =============================================================================
// FIFO Tests
// =============================================================================

#[test]
fn test_enqueue_up_to_capacity() {
    let (mut queue, _flash, _geometry) = setup_queue(3);

    for i in 0..3 {
        queue.enqueue(clear(i)).unwrap();
    }
    let result = queue.enqueue(clear(99));

    assert_eq!(result, Err(StorageError::QueueFull { capacity: 3 }));
    assert_eq!(queue.len(), 3);
}

#[test]
fn test_commands_leave_in_submission_order() {
    let (mut queue, _flash, _geometry) = setup_queue(10);

    let ids: Vec<_> = (1..=3).map(|i| queue.enqueue(clear(i)).unwrap()).collect();

    let mut popped = Vec::new();
    while let Some(pending) = queue.next_pending() {
        popped.push(pending.id);
    }
    assert_eq!(popped, ids);
}

#[test]
fn test_enqueue_front_jumps_the_line_and_ignores_capacity() {
    let (mut queue, _flash, _geometry) = setup_queue(1);

    queue.enqueue(clear(1)).unwrap();
    let recover_id = queue.enqueue_front(Command::Recover);

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.next_pending().unwrap().id, recover_id);
}

#[test]
fn test_next_pending_blocked_while_active() {
    let (mut queue, _flash, geometry) = setup_queue(10);
    queue.enqueue(clear(1)).unwrap();
    queue.enqueue(clear(2)).unwrap();

    let first = queue.next_pending().unwrap();
    let plan = Plan::direct([FlashOp::ErasePage {
        page: geometry.data_start_addr(),
    }]);
    assert!(queue.activate(first, plan).is_none());

    assert!(queue.has_active());
    assert!(queue.next_pending().is_none());
    assert_eq!(queue.len(), 1);
}

// =============================================================================
// Plan Execution Tests
// =============================================================================

#[test]
fn test_plan_runs_one_operation_per_event() {
    let (mut queue, flash, geometry) = setup_queue(10);
    let page = geometry.data_start_addr();
    queue.enqueue(clear(1)).unwrap();

    let pending = queue.next_pending().unwrap();
    let plan = Plan::direct([
        FlashOp::Program {
            address: page,
            data: Bytes::from_static(b"ab"),
        },
        FlashOp::Program {
            address: page + 2,
            data: Bytes::from_static(b"cd"),
        },
    ]);
    assert!(queue.activate(pending, plan).is_none());

    // First op in flight, second not yet issued
    assert_eq!(flash.contents(page, 4), vec![0xFF; 4]);
    let event = flash.complete_pending().unwrap();
    assert!(queue.on_flash_event(event).is_none());
    assert_eq!(flash.contents(page, 4), b"ab\xFF\xFF".to_vec());

    let event = flash.complete_pending().unwrap();
    let finished = queue.on_flash_event(event).unwrap();
    assert!(finished.result.is_ok());
    assert_eq!(flash.contents(page, 4), b"abcd".to_vec());
    assert!(queue.is_idle());
}

#[test]
fn test_empty_plan_finishes_immediately() {
    let (mut queue, flash, _geometry) = setup_queue(10);
    queue.enqueue(clear(1)).unwrap();

    let pending = queue.next_pending().unwrap();
    let finished = queue.activate(pending, Plan::empty()).unwrap();

    assert!(finished.result.is_ok());
    assert!(!queue.has_active());
    assert!(!flash.has_pending());
}

#[test]
fn test_copy_reads_source_when_issued() {
    let (mut queue, flash, geometry) = setup_queue(10);
    let source = geometry.swap_addr();
    let dest = geometry.data_start_addr();
    flash.inject(source, b"swapped!");
    queue.enqueue(clear(1)).unwrap();

    let pending = queue.next_pending().unwrap();
    let plan = Plan::direct([FlashOp::Copy {
        source,
        dest,
        len: 8,
    }]);
    queue.activate(pending, plan);
    let event = flash.complete_pending().unwrap();
    queue.on_flash_event(event).unwrap();

    assert_eq!(flash.contents(dest, 8), b"swapped!".to_vec());
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_hardware_error_fails_command_and_drops_rest_of_plan() {
    let (mut queue, flash, geometry) = setup_queue(10);
    let page = geometry.data_start_addr();
    queue.enqueue(clear(1)).unwrap();
    queue.enqueue(clear(2)).unwrap();

    let pending = queue.next_pending().unwrap();
    let plan = Plan::direct([
        FlashOp::ErasePage { page },
        FlashOp::Program {
            address: page,
            data: Bytes::from_static(&[0x00]),
        },
    ]);
    queue.activate(pending, plan);
    flash.fail_next(0x03);

    let event = flash.complete_pending().unwrap();
    let finished = queue.on_flash_event(event).unwrap();

    assert_eq!(finished.result, Err(StorageError::FlashOpFailed { code: 0x03 }));
    assert!(!flash.has_pending());
    // The next command is still there
    assert_eq!(queue.next_pending().unwrap().command.handle(), Some(handle(2)));
}

#[test]
fn test_rejected_operation_fails_command() {
    let (mut queue, mut flash, geometry) = setup_queue(10);
    let page = geometry.data_start_addr();
    queue.enqueue(clear(1)).unwrap();

    // Occupy the peripheral behind the queue's back
    pstore::flash::FlashPeripheral::start_erase_page(&mut flash, page).unwrap();

    let pending = queue.next_pending().unwrap();
    let finished = queue
        .activate(pending, Plan::direct([FlashOp::ErasePage { page }]))
        .unwrap();

    assert_eq!(finished.result, Err(StorageError::FlashOpFailed { code: CODE_BUSY }));
}

#[test]
fn test_event_without_active_command_is_ignored() {
    let (mut queue, _flash, _geometry) = setup_queue(10);

    assert!(queue.on_flash_event(SysEvent::FlashOperationSuccess).is_none());
    assert!(queue.is_idle());
}

#[test]
fn test_other_system_events_do_not_complete_operations() {
    let (mut queue, flash, geometry) = setup_queue(10);
    queue.enqueue(clear(1)).unwrap();

    let pending = queue.next_pending().unwrap();
    queue.activate(
        pending,
        Plan::direct([FlashOp::ErasePage {
            page: geometry.data_start_addr(),
        }]),
    );

    assert!(queue.on_flash_event(SysEvent::Other(7)).is_none());
    assert!(queue.has_active());

    let event = flash.complete_pending().unwrap();
    assert!(queue.on_flash_event(event).unwrap().result.is_ok());
}
