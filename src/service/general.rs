//! General Service
//!
//! Device-level characteristics: temperature, name, device type, room and
//! firmware revision.
//!
//! Characteristic writes only change the record in RAM. Writing flash is
//! done on demand through [`GeneralService::save_persistent_storage`]: a
//! flash write costs as much wear for a few bytes as for the whole block, so
//! the record is saved as one unit when the caller decides it is time.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::flash::FlashPeripheral;
use crate::storage::{BlockHandle, Completion, StorageManager};

use super::ConfigRecord;

/// Module id the service registers its block under
pub const GENERAL_SERVICE_MODULE_ID: u32 = 0x4753;

/// The BLE stack, as seen by the service
pub trait BleStack {
    /// Name currently advertised
    fn device_name(&self) -> String;

    /// Change the advertised name (not persisted)
    fn set_device_name(&mut self, name: &str);
}

/// Temperature source sampled on every tick
pub trait TemperatureSensor {
    fn read_celsius(&mut self) -> i32;
}

/// Owner of the configuration record block
pub struct GeneralService<S> {
    stack: S,
    handle: BlockHandle,
    record: ConfigRecord,
    temperature: i32,
    last_completion: Arc<Mutex<Option<Completion>>>,
}

impl<S: BleStack> GeneralService<S> {
    /// Register the record block and load it
    ///
    /// Call once per boot, in the same registration order every time.
    pub fn create<F: FlashPeripheral>(stack: S, storage: &mut StorageManager<F>) -> Result<Self> {
        let last_completion = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&last_completion);
        let handle = storage.register(
            GENERAL_SERVICE_MODULE_ID,
            ConfigRecord::SIZE as u16,
            move |completion: &Completion| {
                *slot.lock() = Some(completion.clone());
            },
        )?;

        let mut service = Self {
            stack,
            handle,
            record: ConfigRecord::default(),
            temperature: 0,
            last_completion,
        };
        service.load_persistent_storage(storage)?;
        Ok(service)
    }

    /// Load the record from flash into RAM
    ///
    /// A record without a name takes the name the stack advertises; a stored
    /// name is pushed to the stack. A record that cannot be decoded is
    /// replaced by the defaults until the next save.
    pub fn load_persistent_storage<F: FlashPeripheral>(&mut self, storage: &StorageManager<F>) -> Result<()> {
        let bytes = storage.load(&self.handle)?;
        self.record = match ConfigRecord::decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "stored configuration unreadable, using defaults");
                ConfigRecord::default()
            }
        };

        if self.record.name().is_empty() {
            let advertised = self.stack.device_name();
            if let Err(e) = self.record.set_name(&advertised) {
                warn!(error = %e, "advertised name does not fit the record");
            }
        } else {
            self.stack.set_device_name(self.record.name());
        }
        info!(name = self.record.name(), room = self.record.room(), "configuration loaded");
        Ok(())
    }

    /// Queue the in-memory record for writing to flash
    ///
    /// Completion is reported later through [`last_completion`](Self::last_completion).
    pub fn save_persistent_storage<F: FlashPeripheral>(&self, storage: &mut StorageManager<F>) -> Result<()> {
        *self.last_completion.lock() = None;
        storage.update(&self.handle, 0, self.record.encode().to_vec())?;
        debug!("configuration save queued");
        Ok(())
    }

    // =========================================================================
    // Characteristic Writes
    // =========================================================================

    /// Rename the device; the BLE name changes now, flash on the next save
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.record.set_name(name)?;
        self.stack.set_device_name(name);
        Ok(())
    }

    pub fn set_room(&mut self, room: &str) -> Result<()> {
        self.record.set_room(room)?;
        Ok(())
    }

    pub fn set_device_type(&mut self, device_type: &str) -> Result<()> {
        self.record.set_device_type(device_type)?;
        Ok(())
    }

    pub fn set_firmware_version(&mut self, version: i32) {
        self.record.firmware_version = version;
    }

    /// Update the temperature characteristic
    pub fn set_temperature(&mut self, temperature: i32) {
        self.temperature = temperature;
    }

    /// Non-urgent work for this main-loop pass
    pub fn tick(&mut self, sensor: &mut impl TemperatureSensor) {
        self.set_temperature(sensor.read_celsius());
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn temperature(&self) -> i32 {
        self.temperature
    }

    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Most recent completion for the record block, if any since the last save
    pub fn last_completion(&self) -> Option<Completion> {
        self.last_completion.lock().clone()
    }
}
