//! Pure byte-slice ↔ typed-value codec.
//!
//! This is the single authority for binary interpretation of Modbus
//! register payloads: it owns byte-order handling, 32-bit register-word
//! swapping, and length validation. Nothing here touches I/O — callers
//! hand it bytes already read from (or about to be written to) the wire.
//!
//! Word swap happens before byte-order interpretation, and only ever
//! applies to 4-byte payloads.

use crate::model::{ByteOrder, DataType, PointValue};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("length mismatch for {data_type:?}: expected {expected}, got {observed}")]
    LengthMismatch {
        data_type: DataType,
        expected: usize,
        observed: usize,
    },
    #[error("raw payload must be non-empty")]
    EmptyRawPayload,
}

/// Swap the two 16-bit words of a 4-byte payload. No-op for any other length.
fn swap_words(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 4 {
        vec![bytes[2], bytes[3], bytes[0], bytes[1]]
    } else {
        bytes.to_vec()
    }
}

fn read_u16(bytes: &[u8], order: ByteOrder) -> u16 {
    match order {
        ByteOrder::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
        ByteOrder::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
    }
}

fn read_u32(bytes: &[u8], order: ByteOrder) -> u32 {
    match order {
        ByteOrder::Big => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ByteOrder::Little => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn write_u16(value: u16, order: ByteOrder) -> Vec<u8> {
    match order {
        ByteOrder::Big => value.to_be_bytes().to_vec(),
        ByteOrder::Little => value.to_le_bytes().to_vec(),
    }
}

fn write_u32(value: u32, order: ByteOrder) -> Vec<u8> {
    match order {
        ByteOrder::Big => value.to_be_bytes().to_vec(),
        ByteOrder::Little => value.to_le_bytes().to_vec(),
    }
}

/// Decode a raw byte slice into a typed [`PointValue`].
///
/// `raw` points pass their bytes through verbatim — no length check, no
/// byte-order or swap interpretation — per the codec's `raw` rule.
pub fn decode(
    bytes: &[u8],
    data_type: DataType,
    byte_order: ByteOrder,
    swap: bool,
) -> Result<PointValue, CodecError> {
    if data_type == DataType::Raw {
        if bytes.is_empty() {
            return Err(CodecError::EmptyRawPayload);
        }
        return Ok(PointValue::Raw(bytes.to_vec()));
    }

    if let Some(expected) = data_type.implied_byte_len() {
        if bytes.len() != expected {
            return Err(CodecError::LengthMismatch {
                data_type,
                expected,
                observed: bytes.len(),
            });
        }
    }

    let word = if swap && bytes.len() == 4 {
        swap_words(bytes)
    } else {
        bytes.to_vec()
    };

    Ok(match data_type {
        DataType::Uint16 => PointValue::Uint16(read_u16(&word, byte_order)),
        DataType::Int16 => PointValue::Int16(read_u16(&word, byte_order) as i16),
        DataType::Uint32 => PointValue::Uint32(read_u32(&word, byte_order)),
        DataType::Int32 => PointValue::Int32(read_u32(&word, byte_order) as i32),
        DataType::Float32 => PointValue::Float32(f32::from_bits(read_u32(&word, byte_order))),
        DataType::Bool => PointValue::Bool(word[0] != 0),
        DataType::Raw => unreachable!("handled above"),
    })
}

/// Encode a typed [`PointValue`] into wire bytes, the inverse of [`decode`].
pub fn encode(value: &PointValue, byte_order: ByteOrder, swap: bool) -> Vec<u8> {
    let bytes = match value {
        PointValue::Uint16(v) => write_u16(*v, byte_order),
        PointValue::Int16(v) => write_u16(*v as u16, byte_order),
        PointValue::Uint32(v) => write_u32(*v, byte_order),
        PointValue::Int32(v) => write_u32(*v as u32, byte_order),
        PointValue::Float32(v) => write_u32(v.to_bits(), byte_order),
        PointValue::Bool(v) => return vec![if *v { 1 } else { 0 }, 0],
        PointValue::Raw(bytes) => return bytes.clone(),
    };
    if swap && bytes.len() == 4 {
        swap_words(&bytes)
    } else {
        bytes
    }
}
