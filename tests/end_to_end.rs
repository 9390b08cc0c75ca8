//! End-to-end pipeline: bus worker batch-collects a device's points, the
//! decode pool turns the raw bytes into typed values, all driven by an
//! in-memory fake adapter (no real Modbus socket).

mod common;

use daqd::model::{AccessMode, ByteOrder, DataType, Device, FuncCode, ModbusParams, Point};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn device() -> Device {
    Device {
        name: "meter-1".into(),
        bus_id: "b1".into(),
        adapter_name: "fake".into(),
        slave_id: 1,
        interval_ms: 20,
        params: ModbusParams::Tcp {
            address: "fake://meter-1".into(),
            timeout_ms: 100,
        },
        points: vec![
            Point {
                name: "p10".into(),
                desc: String::new(),
                func_code: FuncCode::Hr,
                reg_addr: 10,
                reg_num: 1,
                data_type: DataType::Uint16,
                byte_order: ByteOrder::Big,
                swap_reg: false,
                rw: AccessMode::R,
                scale: None,
                unit: None,
            },
            Point {
                name: "p11".into(),
                desc: String::new(),
                func_code: FuncCode::Hr,
                reg_addr: 11,
                reg_num: 1,
                data_type: DataType::Uint16,
                byte_order: ByteOrder::Big,
                swap_reg: false,
                rw: AccessMode::R,
                scale: None,
                unit: None,
            },
            Point {
                name: "p13".into(),
                desc: String::new(),
                func_code: FuncCode::Hr,
                reg_addr: 13,
                reg_num: 1,
                data_type: DataType::Uint16,
                byte_order: ByteOrder::Big,
                swap_reg: false,
                rw: AccessMode::R,
                scale: None,
                unit: None,
            },
        ],
    }
}

#[tokio::test]
async fn batch_collect_decodes_every_point_across_two_groups() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = common::fake_registry(calls).await;
    let adapter = registry
        .create("fake", &ModbusParams::Tcp { address: "fake://meter-1".into(), timeout_ms: 100 }, 1)
        .await
        .unwrap();

    let (raw_tx, raw_rx) = mpsc::channel(16);
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(16);
    let _decode_handles = daqd::decode::spawn_pool(2, raw_rx, snapshot_tx);

    let bus = daqd::bus::spawn("b1".into(), adapter, vec![device()], raw_tx);

    let snapshot = tokio::time::timeout(Duration::from_secs(1), snapshot_rx.recv())
        .await
        .expect("snapshot should arrive within 1s")
        .expect("channel should stay open");

    assert_eq!(snapshot.device_name, "meter-1");
    let names: Vec<&str> = snapshot.points.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"p10"));
    assert!(names.contains(&"p11"));
    assert!(names.contains(&"p13"));
    for point in &snapshot.points {
        assert!(point.value.is_ok(), "point {} should decode cleanly", point.name);
    }

    bus.shutdown().await;
}
