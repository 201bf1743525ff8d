//! Configuration record
//!
//! Fixed-layout encoding of the GeneralService settings. The layout is
//! explicit byte by byte, so it does not depend on struct padding.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬───────────────┐
//! │ Name (32)    │ Room (32)    │ Type (32)    │ Firmware (4)  │
//! └──────────────┴──────────────┴──────────────┴───────────────┘
//! ```
//! Strings are UTF-8 padded with NUL. A field starting with `0xFF` was never
//! written (erased flash) and decodes as empty; an erased firmware word
//! decodes as `-1`.

use thiserror::Error;

use crate::flash::ERASED_BYTE;

/// Bytes reserved for each string field
pub const FIELD_LEN: usize = 32;

/// Firmware version of a record that was never written
pub const FIRMWARE_UNSET: i32 = -1;

const NAME_OFFSET: usize = 0;
const ROOM_OFFSET: usize = NAME_OFFSET + FIELD_LEN;
const TYPE_OFFSET: usize = ROOM_OFFSET + FIELD_LEN;
const FIRMWARE_OFFSET: usize = TYPE_OFFSET + FIELD_LEN;

/// Record field names, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Room,
    DeviceType,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::Name => "name",
            Field::Room => "room",
            Field::DeviceType => "device type",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{field} is {len} bytes, at most 32 fit")]
    FieldTooLong { field: Field, len: usize },

    #[error("{field} contains a NUL byte")]
    EmbeddedNul { field: Field },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: Field },

    #[error("record needs {expected} bytes, got {got}")]
    WrongSize { expected: usize, got: usize },
}

/// Settings persisted by the GeneralService
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    name: String,
    room: String,
    device_type: String,
    pub firmware_version: i32,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            room: String::new(),
            device_type: String::new(),
            firmware_version: FIRMWARE_UNSET,
        }
    }
}

impl ConfigRecord {
    /// Encoded size in bytes
    pub const SIZE: usize = FIRMWARE_OFFSET + 4;

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), RecordError> {
        self.name = validate(Field::Name, name)?;
        Ok(())
    }

    pub fn set_room(&mut self, room: &str) -> Result<(), RecordError> {
        self.room = validate(Field::Room, room)?;
        Ok(())
    }

    pub fn set_device_type(&mut self, device_type: &str) -> Result<(), RecordError> {
        self.device_type = validate(Field::DeviceType, device_type)?;
        Ok(())
    }

    /// Encode to the fixed layout
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        for (offset, value) in [
            (NAME_OFFSET, &self.name),
            (ROOM_OFFSET, &self.room),
            (TYPE_OFFSET, &self.device_type),
        ] {
            bytes[offset..offset + value.len()].copy_from_slice(value.as_bytes());
        }
        bytes[FIRMWARE_OFFSET..].copy_from_slice(&self.firmware_version.to_le_bytes());
        bytes
    }

    /// Decode from the fixed layout
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() != Self::SIZE {
            return Err(RecordError::WrongSize {
                expected: Self::SIZE,
                got: bytes.len(),
            });
        }

        let firmware = &bytes[FIRMWARE_OFFSET..FIRMWARE_OFFSET + 4];
        let firmware_version = i32::from_le_bytes([firmware[0], firmware[1], firmware[2], firmware[3]]);

        Ok(Self {
            name: decode_field(Field::Name, &bytes[NAME_OFFSET..NAME_OFFSET + FIELD_LEN])?,
            room: decode_field(Field::Room, &bytes[ROOM_OFFSET..ROOM_OFFSET + FIELD_LEN])?,
            device_type: decode_field(Field::DeviceType, &bytes[TYPE_OFFSET..TYPE_OFFSET + FIELD_LEN])?,
            firmware_version,
        })
    }
}

fn validate(field: Field, value: &str) -> Result<String, RecordError> {
    if value.len() > FIELD_LEN {
        return Err(RecordError::FieldTooLong {
            field,
            len: value.len(),
        });
    }
    if value.as_bytes().contains(&0) {
        return Err(RecordError::EmbeddedNul { field });
    }
    Ok(value.to_string())
}

fn decode_field(field: Field, raw: &[u8]) -> Result<String, RecordError> {
    if raw.first() == Some(&ERASED_BYTE) {
        return Ok(String::new());
    }
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| RecordError::InvalidUtf8 { field })
}
