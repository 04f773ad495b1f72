//! Sensor slot configuration blocks.
//!
//! Each slot owns one 64-byte block in the configuration store:
//!
//! Binary format:
//! - sensor_type: 2 bytes (u16 LE, 0xFFFF when erased)
//! - slot: 1 byte
//! - tag: 5 bytes (zero padded)
//! - reading_cycle: 1 byte
//! - reserved: 7 bytes
//! - specific: 48 bytes (postcard encoded driver configuration)

use super::{CommonConfig, MAX_TAG_LEN, is_valid_tag};

/// Size of one slot block in the configuration store
pub const SLOT_BLOCK_LEN: usize = 64;

/// Size of the common header at the start of a block
pub const COMMON_HEADER_LEN: usize = 16;

/// Size of the driver-specific partition
pub const SPECIFIC_PARTITION_LEN: usize = SLOT_BLOCK_LEN - COMMON_HEADER_LEN;

/// Type code of an erased block
pub const EMPTY_SENSOR_TYPE: u16 = 0xFFFF;

const TYPE_OFFSET: usize = 0;
const SLOT_OFFSET: usize = 2;
const TAG_OFFSET: usize = 3;
const READING_CYCLE_OFFSET: usize = TAG_OFFSET + MAX_TAG_LEN;

/// A decoded slot block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    pub common: CommonConfig,
    pub specific: [u8; SPECIFIC_PARTITION_LEN],
}

impl SlotConfig {
    /// The all-bits-set block written when a slot is cleared.
    pub const fn erased() -> [u8; SLOT_BLOCK_LEN] {
        [0xFF; SLOT_BLOCK_LEN]
    }

    /// Type code stored in a raw block, without decoding the rest.
    pub fn stored_type(bytes: &[u8; SLOT_BLOCK_LEN]) -> u16 {
        u16::from_le_bytes([bytes[TYPE_OFFSET], bytes[TYPE_OFFSET + 1]])
    }

    pub fn to_bytes(&self) -> [u8; SLOT_BLOCK_LEN] {
        let mut bytes = [0u8; SLOT_BLOCK_LEN];

        bytes[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&self.common.sensor_type.to_le_bytes());
        bytes[SLOT_OFFSET] = self.common.slot;
        let tag = self.common.tag.as_bytes();
        bytes[TAG_OFFSET..TAG_OFFSET + tag.len()].copy_from_slice(tag);
        bytes[READING_CYCLE_OFFSET] = self.common.reading_cycle;
        bytes[COMMON_HEADER_LEN..].copy_from_slice(&self.specific);

        bytes
    }

    /// Decodes a block. Returns `None` for an erased block.
    ///
    /// A tag that could not have been configured (not text, or holding a
    /// comma or quote) decodes as empty. An out of range reading cycle takes
    /// its default.
    pub fn from_bytes(bytes: &[u8; SLOT_BLOCK_LEN]) -> Option<Self> {
        let sensor_type = Self::stored_type(bytes);
        if sensor_type == EMPTY_SENSOR_TYPE {
            return None;
        }

        let mut common = CommonConfig::new(sensor_type);
        common.slot = bytes[SLOT_OFFSET];
        let raw_tag = &bytes[TAG_OFFSET..TAG_OFFSET + MAX_TAG_LEN];
        let len = raw_tag.iter().position(|b| *b == 0).unwrap_or(MAX_TAG_LEN);
        match core::str::from_utf8(&raw_tag[..len]) {
            Ok(tag) if is_valid_tag(tag) => {
                let _ = common.tag.push_str(tag);
            }
            Ok("") => {}
            _ => log::warn!("Slot {} has an unreadable tag", common.slot),
        }
        common.reading_cycle = bytes[READING_CYCLE_OFFSET];
        common.apply_defaults();

        let mut specific = [0u8; SPECIFIC_PARTITION_LEN];
        specific.copy_from_slice(&bytes[COMMON_HEADER_LEN..]);

        Some(Self { common, specific })
    }
}
