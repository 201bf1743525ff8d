//! Service Module
//!
//! Consumers of the storage manager.
//!
//! The BLE GATT plumbing lives outside this crate; services see it through
//! small traits ([`BleStack`], [`TemperatureSensor`]) and keep their state in
//! blocks they register with the [`StorageManager`](crate::storage::StorageManager).

mod general;
mod record;

pub use general::{BleStack, GeneralService, TemperatureSensor, GENERAL_SERVICE_MODULE_ID};
pub use record::{ConfigRecord, Field, RecordError, FIELD_LEN, FIRMWARE_UNSET};
