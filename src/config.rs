//! Fleet configuration loading and validation.
//!
//! The fleet document is a JSON array of [`Device`] records. Loading is a
//! strict two-step: parse, then validate — a syntactically valid document
//! with a structurally invalid record (duplicate name, empty bus id, a
//! point referencing an address family the adapter can't serve) is
//! rejected before it ever reaches a bus worker.

use crate::model::Device;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("device {name:?}: {reason}")]
    InvalidDevice { name: String, reason: String },
    #[error("duplicate device name: {0:?}")]
    DuplicateDevice(String),
}

/// Load and validate the fleet document at `path`.
pub fn load_fleet(path: impl AsRef<Path>) -> Result<Vec<Device>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_fleet(&text, &path.display().to_string())
}

/// Parse and validate a fleet document already read into memory. Split out
/// from [`load_fleet`] so the hot-reload watcher and tests can feed it
/// in-memory text without touching the filesystem.
pub fn parse_fleet(text: &str, source_label: &str) -> Result<Vec<Device>, ConfigError> {
    let devices: Vec<Device> = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: source_label.to_string(),
        source,
    })?;

    let mut seen = HashSet::new();
    for device in &devices {
        if !seen.insert(device.name.clone()) {
            return Err(ConfigError::DuplicateDevice(device.name.clone()));
        }
        validate_device(device)?;
    }
    Ok(devices)
}

fn validate_device(device: &Device) -> Result<(), ConfigError> {
    if device.name.trim().is_empty() {
        return Err(ConfigError::InvalidDevice {
            name: device.name.clone(),
            reason: "name must not be empty".into(),
        });
    }
    if device.bus_id.trim().is_empty() {
        return Err(ConfigError::InvalidDevice {
            name: device.name.clone(),
            reason: "busId must not be empty".into(),
        });
    }
    if device.adapter_name.trim().is_empty() {
        return Err(ConfigError::InvalidDevice {
            name: device.name.clone(),
            reason: "adapterName must not be empty".into(),
        });
    }
    let mut point_names = HashSet::new();
    for point in &device.points {
        if point.name.trim().is_empty() {
            return Err(ConfigError::InvalidDevice {
                name: device.name.clone(),
                reason: "point name must not be empty".into(),
            });
        }
        if !point_names.insert(point.name.clone()) {
            return Err(ConfigError::InvalidDevice {
                name: device.name.clone(),
                reason: format!("duplicate point name: {:?}", point.name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn happy_path_json() -> &'static str {
        r#"[
            {
                "name": "meter-1",
                "busId": "bus-a",
                "adapterName": "modbus",
                "slaveId": 1,
                "intervalMs": 1000,
                "params": { "mode": "tcp", "address": "127.0.0.1:502" },
                "points": [
                    {
                        "name": "voltage",
                        "funcCode": "hr",
                        "regAddr": 0,
                        "regNum": 2,
                        "dataType": "float32",
                        "byteOrder": "big",
                        "rw": "r"
                    }
                ]
            }
        ]"#
    }

    #[test]
    fn happy_path_parses_one_device() {
        let devices = parse_fleet(happy_path_json(), "test").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].points.len(), 1);
    }

    #[test]
    fn malformed_json_reports_parse_error() {
        let err = parse_fleet("{ not valid json", "test").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn duplicate_device_names_are_rejected() {
        let text = format!("[{d}, {d}]", d = &happy_path_json()[1..happy_path_json().len() - 1]);
        let err = parse_fleet(&text, "test").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDevice(_)));
    }

    #[test]
    fn empty_bus_id_is_rejected() {
        let text = happy_path_json().replace(r#""busId": "bus-a""#, r#""busId": "  ""#);
        let err = parse_fleet(&text, "test").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDevice { .. }));
    }

    #[test]
    fn duplicate_point_names_within_a_device_are_rejected() {
        let text = happy_path_json().replace(
            r#""points": [
                    {
                        "name": "voltage","#,
            r#""points": [
                    {
                        "name": "voltage",
                        "funcCode": "hr",
                        "regAddr": 4,
                        "regNum": 1,
                        "dataType": "uint16",
                        "byteOrder": "big",
                        "rw": "r"
                    },
                    {
                        "name": "voltage","#,
        );
        let err = parse_fleet(&text, "test").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDevice { .. }));
    }
}
