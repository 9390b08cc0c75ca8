//! Point and device configuration model.
//!
//! These types are the parsed, validated form of the fleet configuration
//! JSON document (see [`crate::config`]). They are immutable for the
//! lifetime of a bus worker generation — a hot reload produces fresh
//! values rather than mutating these in place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus function code family a point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuncCode {
    /// Holding registers (function codes 0x03 / 0x06 / 0x10).
    Hr,
    /// Input registers (function code 0x04).
    Ir,
    /// Coils (function codes 0x01 / 0x05 / 0x0F).
    Co,
    /// Discrete inputs (function code 0x02).
    Di,
}

impl fmt::Display for FuncCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FuncCode::Hr => "hr",
            FuncCode::Ir => "ir",
            FuncCode::Co => "co",
            FuncCode::Di => "di",
        };
        f.write_str(s)
    }
}

impl FuncCode {
    /// Whether this function code family addresses bit-sized registers
    /// (coils / discrete inputs) rather than 16-bit word registers.
    pub fn is_bit_addressed(self) -> bool {
        matches!(self, FuncCode::Co | FuncCode::Di)
    }
}

/// Engineering data type a point's raw bytes decode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Bool,
    Raw,
}

impl DataType {
    /// Register count implied by this data type (in 16-bit words), or
    /// `None` for `raw`, whose length is whatever the point declares.
    pub fn implied_reg_count(self) -> Option<u16> {
        match self {
            DataType::Uint16 | DataType::Int16 | DataType::Bool => Some(1),
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => Some(2),
            DataType::Raw => None,
        }
    }

    /// Byte length implied by this data type, or `None` for `raw`.
    pub fn implied_byte_len(self) -> Option<usize> {
        self.implied_reg_count().map(|regs| regs as usize * 2)
    }
}

/// Byte order within each 16-bit register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Big,
    Little,
}

/// Declared access mode of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    R,
    W,
    Rw,
}

impl AccessMode {
    /// Points the planner and decode pool consider — `r` and `rw`, never `w`.
    pub fn is_readable(self) -> bool {
        matches!(self, AccessMode::R | AccessMode::Rw)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, AccessMode::W | AccessMode::Rw)
    }
}

/// A named, typed window into a device's register space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub func_code: FuncCode,
    pub reg_addr: u16,
    pub reg_num: u16,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub swap_reg: bool,
    pub rw: AccessMode,
    /// Purely informational for the core engine; carried through to
    /// dispatch sinks so downstream consumers can render engineering units.
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl Point {
    /// The register count the planner should actually use for this point:
    /// the data-type-implied count if one exists and disagrees with the
    /// declared `reg_num`, else the declared count.
    ///
    /// Geometry correction lives here rather than failing hard — per
    /// [`crate::planner`], a point is never rejected for a register-count
    /// mismatch, only corrected with a warning recorded on its batch group.
    pub fn effective_reg_count(&self) -> u16 {
        self.data_type
            .implied_reg_count()
            .unwrap_or(self.reg_num.max(1))
    }

    /// `true` if the declared `reg_num` disagrees with the data type's
    /// implied register count (always `false` for `raw`).
    pub fn has_geometry_mismatch(&self) -> bool {
        match self.data_type.implied_reg_count() {
            Some(implied) => implied != self.reg_num,
            None => false,
        }
    }
}

/// Modbus-adapter-specific connection parameters, a closed tagged variant
/// per transport mode rather than a loosely-typed JSON map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModbusParams {
    Tcp {
        address: String,
        #[serde(default = "default_timeout_ms", rename = "timeoutMs")]
        timeout_ms: u64,
    },
    Rtu {
        #[serde(rename = "serialPort")]
        serial_port: String,
        #[serde(default = "default_baud_rate", rename = "baudRate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits", rename = "dataBits")]
        data_bits: u8,
        #[serde(default = "default_parity")]
        parity: Parity,
        #[serde(default = "default_stop_bits", rename = "stopBits")]
        stop_bits: u8,
        #[serde(default = "default_timeout_ms", rename = "timeoutMs")]
        timeout_ms: u64,
    },
}

fn default_timeout_ms() -> u64 {
    2000
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_parity() -> Parity {
    Parity::None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
}

/// One field device: its transport parameters, cadence, and point table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub bus_id: String,
    pub adapter_name: String,
    pub slave_id: u8,
    #[serde(default)]
    pub interval_ms: u64,
    pub params: ModbusParams,
    #[serde(default)]
    pub points: Vec<Point>,
}

/// Default poll cadence applied when `intervalMs` is unset or non-positive.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

impl Device {
    /// Effective poll cadence: the configured value, or [`DEFAULT_INTERVAL_MS`]
    /// if unset or non-positive.
    pub fn effective_interval_ms(&self) -> u64 {
        if self.interval_ms == 0 {
            DEFAULT_INTERVAL_MS
        } else {
            self.interval_ms
        }
    }
}

/// A typed value carried by a decoded snapshot or a control write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PointValue {
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    Raw(Vec<u8>),
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Uint16(v) => write!(f, "{v}"),
            PointValue::Int16(v) => write!(f, "{v}"),
            PointValue::Uint32(v) => write!(f, "{v}"),
            PointValue::Int32(v) => write!(f, "{v}"),
            PointValue::Float32(v) => write!(f, "{v}"),
            PointValue::Bool(v) => write!(f, "{v}"),
            PointValue::Raw(bytes) => write!(f, "{bytes:02x?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_interval_defaults_when_unset() {
        let dev = Device {
            name: "d1".into(),
            bus_id: "b1".into(),
            adapter_name: "modbus".into(),
            slave_id: 1,
            interval_ms: 0,
            params: ModbusParams::Tcp {
                address: "127.0.0.1:502".into(),
                timeout_ms: 2000,
            },
            points: vec![],
        };
        assert_eq!(dev.effective_interval_ms(), DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn geometry_mismatch_detected_and_corrected() {
        let pt = Point {
            name: "p1".into(),
            desc: String::new(),
            func_code: FuncCode::Hr,
            reg_addr: 0,
            reg_num: 1,
            data_type: DataType::Float32,
            byte_order: ByteOrder::Big,
            swap_reg: false,
            rw: AccessMode::R,
            scale: None,
            unit: None,
        };
        assert!(pt.has_geometry_mismatch());
        assert_eq!(pt.effective_reg_count(), 2);
    }
}
