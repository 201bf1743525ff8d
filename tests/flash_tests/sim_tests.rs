//! Tests for SimulatedFlash
//!
//! These tests verify:
//! - NOR semantics (programming only clears bits, erase restores 0xFF)
//! - Asynchronous contract: one operation in flight, completion events
//! - Fault injection and power loss
//! - Image file persistence

use pstore::config::Config;
use pstore::flash::{FlashError, FlashGeometry, FlashImage, FlashPeripheral, SimulatedFlash, SysEvent};
use pstore::StorageError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_flash() -> (SimulatedFlash, FlashGeometry) {
    let geometry = FlashGeometry::from_config(&Config::default());
    (SimulatedFlash::new(geometry), geometry)
}

fn write_now(flash: &mut SimulatedFlash, address: u32, data: &[u8]) {
    flash.start_write(address, data).unwrap();
    assert_eq!(flash.complete_pending(), Some(SysEvent::FlashOperationSuccess));
}

fn erase_now(flash: &mut SimulatedFlash, page: u32) {
    flash.start_erase_page(page).unwrap();
    assert_eq!(flash.complete_pending(), Some(SysEvent::FlashOperationSuccess));
}

// =============================================================================
// NOR Semantics Tests
// =============================================================================

#[test]
fn test_new_flash_is_erased() {
    let (flash, geometry) = setup_flash();

    let contents = flash.contents(geometry.data_start_addr(), 64);
    assert!(contents.iter().all(|&b| b == 0xFF));
}

#[test]
fn test_write_then_read() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    write_now(&mut flash, addr, b"PSTO");

    let mut buf = [0u8; 4];
    flash.read(addr, &mut buf).unwrap();
    assert_eq!(&buf, b"PSTO");
}

#[test]
fn test_write_only_clears_bits() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    write_now(&mut flash, addr, &[0x0F]);
    write_now(&mut flash, addr, &[0xF3]);

    // 0x0F & 0xF3
    assert_eq!(flash.contents(addr, 1), vec![0x03]);
}

#[test]
fn test_erase_restores_page_and_counts() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    write_now(&mut flash, addr, &[0x00; 32]);
    erase_now(&mut flash, addr);
    erase_now(&mut flash, addr);

    assert!(flash.contents(addr, 32).iter().all(|&b| b == 0xFF));
    assert_eq!(flash.erase_count(addr), 2);
    assert_eq!(flash.total_erase_count(), 2);
}

// =============================================================================
// Asynchronous Contract Tests
// =============================================================================

#[test]
fn test_write_not_visible_until_completed() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    flash.start_write(addr, &[0x11; 4]).unwrap();
    assert!(flash.has_pending());
    assert_eq!(flash.contents(addr, 4), vec![0xFF; 4]);

    flash.complete_pending();
    assert!(!flash.has_pending());
    assert_eq!(flash.contents(addr, 4), vec![0x11; 4]);
}

#[test]
fn test_second_operation_while_busy_is_rejected() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    flash.start_write(addr, &[0x11; 4]).unwrap();

    assert_eq!(flash.start_erase_page(addr), Err(FlashError::Busy));
    assert_eq!(flash.start_write(addr, &[0x22]), Err(FlashError::Busy));
}

#[test]
fn test_complete_without_pending_returns_none() {
    let (flash, _geometry) = setup_flash();

    assert_eq!(flash.complete_pending(), None);
}

#[test]
fn test_out_of_bounds_and_unaligned() {
    let (mut flash, geometry) = setup_flash();

    let mut buf = [0u8; 8];
    assert!(matches!(
        flash.read(geometry.total_size - 4, &mut buf),
        Err(FlashError::OutOfBounds { .. })
    ));
    assert!(matches!(
        flash.start_erase_page(geometry.data_start_addr() + 4),
        Err(FlashError::Unaligned { .. })
    ));
    assert!(matches!(
        flash.start_write(geometry.total_size, &[0]),
        Err(FlashError::OutOfBounds { .. })
    ));
}

#[test]
fn test_clones_share_memory() {
    let (mut flash, geometry) = setup_flash();
    let observer = flash.clone();
    let addr = geometry.data_start_addr();

    flash.start_write(addr, &[0x42]).unwrap();
    assert!(observer.has_pending());

    observer.complete_pending();
    assert_eq!(flash.contents(addr, 1), vec![0x42]);
}

// =============================================================================
// Fault Injection Tests
// =============================================================================

#[test]
fn test_injected_failure_reports_error_and_leaves_flash() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    flash.fail_next(0x0D);
    flash.start_write(addr, &[0x00; 4]).unwrap();

    assert_eq!(
        flash.complete_pending(),
        Some(SysEvent::FlashOperationError { code: 0x0D })
    );
    assert_eq!(flash.contents(addr, 4), vec![0xFF; 4]);

    // Only the next operation fails
    write_now(&mut flash, addr, &[0x00; 4]);
}

#[test]
fn test_tear_pending_write_applies_half() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    flash.start_write(addr, &[0x55; 16]).unwrap();
    flash.tear_pending();

    assert!(!flash.has_pending());
    assert_eq!(flash.contents(addr, 8), vec![0x55; 8]);
    assert_eq!(flash.contents(addr + 8, 8), vec![0xFF; 8]);
}

#[test]
fn test_tear_pending_erase_is_partial() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();
    let half = geometry.page_size / 2;

    write_now(&mut flash, addr, &vec![0x00; geometry.page_size as usize]);
    flash.start_erase_page(addr).unwrap();
    flash.tear_pending();

    assert!(flash.contents(addr, half as usize).iter().all(|&b| b == 0xFF));
    assert!(flash.contents(addr + half, half as usize).iter().all(|&b| b == 0x00));
    assert_eq!(flash.erase_count(addr), 0);
}

#[test]
fn test_power_cycle_drops_in_flight_operation() {
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    flash.start_write(addr, &[0x00; 4]).unwrap();
    flash.power_cycle();

    assert!(!flash.has_pending());
    assert_eq!(flash.contents(addr, 4), vec![0xFF; 4]);
}

// =============================================================================
// Image File Tests
// =============================================================================

#[test]
fn test_image_save_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("flash.img");
    let (mut flash, geometry) = setup_flash();
    let addr = geometry.data_start_addr();

    write_now(&mut flash, addr, b"persist me");
    erase_now(&mut flash, geometry.swap_addr());
    flash.save_image(&path).unwrap();

    let reloaded = SimulatedFlash::load_image(&path).unwrap();
    assert_eq!(reloaded.geometry(), geometry);
    assert_eq!(reloaded.contents(addr, 10), b"persist me".to_vec());
    assert_eq!(reloaded.erase_count(geometry.swap_addr()), 1);
}

#[test]
fn test_load_image_rejects_garbage() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("garbage.img");
    std::fs::write(&path, b"not an image").unwrap();

    let result = SimulatedFlash::load_image(&path);
    assert!(matches!(result, Err(StorageError::Image(_))));
}

#[test]
fn test_load_missing_image_is_io_error() {
    let temp_dir = TempDir::new().unwrap();

    let result = SimulatedFlash::load_image(&temp_dir.path().join("missing.img"));
    assert!(matches!(result, Err(StorageError::Io(_))));
}

#[test]
fn test_load_image_rejects_impossible_geometry() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad_geometry.img");
    // Page size is not a power of two; only a hand-made image can say this
    let geometry = FlashGeometry {
        page_size: 1000,
        total_size: 64 * 1000,
        bootloader_boundary: 64 * 1000,
        max_applications: 2,
    };
    SimulatedFlash::from_image(FlashImage {
        geometry,
        contents: vec![0xFF; 64 * 1000],
        erase_counts: vec![0; 64],
    })
    .save_image(&path)
    .unwrap();

    let result = SimulatedFlash::load_image(&path);
    assert!(matches!(result, Err(StorageError::Image(_))));
}

#[test]
fn test_load_image_rejects_wrong_erase_counter_count() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("short_counters.img");
    let (flash, _geometry) = setup_flash();
    let mut image = flash.image();
    image.erase_counts.truncate(3);
    SimulatedFlash::from_image(image).save_image(&path).unwrap();

    let result = SimulatedFlash::load_image(&path);
    assert!(matches!(result, Err(StorageError::Image(_))));
}
