//! Binary configuration format shared with the device firmware
//!
//! Layout:
//! - byte 0: reserved, always `0x00`
//! - byte 1: bits 0-2 encryption, bit 3 dhcp
//! - per string field, in [`ConfigField::STRINGS`] order: a length byte followed
//!   by one byte per character
//!
//! The bytes travel as lowercase hex without separators.

use crate::{
    error::FormatError,
    types::{ConfigField, ConfigRecord, MAX_STRING_LEN},
};
use hex::FromHexError;

const RESERVED_BYTE: u8 = 0x00;
const HEADER_LEN: usize = 2;
const ENCRYPTION_MASK: u8 = 0x07;
const DHCP_SHIFT: u8 = 3;

/// Encode a record into the hex payload expected by the firmware.
///
/// Never fails: encryption is masked to its low 3 bits, characters are
/// truncated to one byte and strings are cut at 255 characters. Validate the
/// record first to catch values that would not survive this.
pub fn encode(record: &ConfigRecord) -> String {
    let mut bytes = vec![RESERVED_BYTE, flags(record)];

    for field in ConfigField::STRINGS {
        let value = record.string(field).unwrap_or_default();
        let encoded: Vec<u8> = value
            .chars()
            .take(MAX_STRING_LEN)
            .map(|c| u32::from(c) as u8)
            .collect();

        // take() above keeps the length within one byte
        bytes.push(encoded.len() as u8);
        bytes.extend_from_slice(&encoded);
    }

    hex::encode(bytes)
}

/// Decode a hex payload read from the device.
///
/// Fields are length prefixed and consumed strictly in order. A payload that
/// ends between two fields leaves the remaining fields at their defaults, a
/// length byte pointing past the end is an error. Trailing bytes are ignored.
pub fn decode(payload: &str) -> Result<ConfigRecord, FormatError> {
    let payload = payload.trim();
    let bytes = hex::decode(payload).map_err(|e| match e {
        FromHexError::InvalidHexCharacter { c, index } => FormatError::InvalidHex {
            character: c,
            index,
        },
        FromHexError::OddLength | FromHexError::InvalidStringLength => FormatError::OddLength {
            len: payload.len(),
        },
    })?;

    if bytes.len() < HEADER_LEN {
        return Err(FormatError::MissingHeader { len: bytes.len() });
    }

    let mut record = ConfigRecord {
        encryption: bytes[1] & ENCRYPTION_MASK,
        dhcp: (bytes[1] >> DHCP_SHIFT) & 0x01 == 1,
        ..Default::default()
    };

    let mut offset = HEADER_LEN;
    for field in ConfigField::STRINGS {
        let Some(&len) = bytes.get(offset) else {
            break;
        };

        let start = offset + 1;
        let end = start + usize::from(len);
        let Some(raw) = bytes.get(start..end) else {
            return Err(FormatError::Truncated {
                field,
                offset,
                declared: usize::from(len),
                available: bytes.len() - start,
            });
        };

        if let Some(target) = record.string_mut(field) {
            *target = raw.iter().copied().map(char::from).collect();
        }
        offset = end;
    }

    Ok(record)
}

fn flags(record: &ConfigRecord) -> u8 {
    let mut flags = record.encryption & ENCRYPTION_MASK;
    if record.dhcp {
        flags |= 1 << DHCP_SHIFT;
    }
    flags
}

/// Payload written by a device configured as "Felux" on "YourWIFI".
#[cfg(test)]
pub(crate) const FIXTURE: &str = "00dc0546656c757808596f7572574946490b596f7572506173736b65790566656c75780c3139322e3136382e302e313007382e382e382e340b3139322e3136382e302e310d3235352e3235352e3235352e30";
