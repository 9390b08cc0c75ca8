//! Per-bus worker: the serialization boundary around one physical Modbus
//! link. A bus worker owns its adapter exclusively — no other task ever
//! calls into it — so every read and write against that wire is naturally
//! ordered without a lock.
//!
//! Every loop iteration runs a non-blocking try-control-first check before
//! the main `select!`, so a pending control write is never starved behind
//! a scheduled poll tick.

use crate::adapter::{AdapterError, ProtocolAdapter};
use crate::codec;
use crate::model::{Device, FuncCode, Point, PointValue};
use crate::planner::{self, BatchGroup};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, Clone)]
pub enum WriteError {
    #[error("device {0:?} not found on this bus")]
    DeviceNotFound(String),
    #[error("point {0:?} not found on device")]
    PointNotFound(String),
    #[error("point {0:?} is not writable")]
    NotWritable(String),
    #[error("bus is shutting down")]
    BusShuttingDown,
    #[error("control queue is full")]
    QueueFull,
    #[error("adapter error: {0}")]
    Adapter(String),
}

/// One control write, submitted out-of-band from the poll cycle.
pub struct WriteTask {
    pub device_name: String,
    pub point_name: String,
    pub value: PointValue,
    pub resp_tx: oneshot::Sender<Result<(), WriteError>>,
}

/// Raw bytes read for one point in a poll pass, before decode.
#[derive(Debug, Clone)]
pub struct RawPointResult {
    pub point: Point,
    pub bytes: Result<Vec<u8>, String>,
}

/// One device's poll-pass output, handed to the decode pool.
#[derive(Debug, Clone)]
pub struct RawCollectResult {
    pub device_name: String,
    pub bus_id: String,
    pub points: Vec<RawPointResult>,
    pub timestamp: DateTime<Utc>,
}

/// Handle to a running bus worker: the control-write submission endpoint
/// and a way to ask it to stop.
pub struct BusHandle {
    ctrl_tx: mpsc::Sender<WriteTask>,
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

/// Control queue depth; small and bounded so a stalled bus backs up writers
/// quickly instead of silently queuing forever.
const CTRL_QUEUE_CAPACITY: usize = 8;

impl BusHandle {
    /// Submit a control write and await its result. Returns
    /// [`WriteError::QueueFull`] immediately if the control queue is full,
    /// never blocking the caller behind the poll cycle.
    pub async fn write(
        &self,
        device_name: impl Into<String>,
        point_name: impl Into<String>,
        value: PointValue,
    ) -> Result<(), WriteError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let task = WriteTask {
            device_name: device_name.into(),
            point_name: point_name.into(),
            value,
            resp_tx,
        };
        self.ctrl_tx
            .try_send(task)
            .map_err(|_| WriteError::QueueFull)?;
        resp_rx.await.unwrap_or(Err(WriteError::BusShuttingDown))
    }

    /// Signal the worker to stop and wait for its loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = self.join.await;
    }
}

struct Inner {
    bus_id: String,
    adapter: Box<dyn ProtocolAdapter>,
    devices: Vec<Device>,
    raw_tx: mpsc::Sender<RawCollectResult>,
    last_collected: HashMap<String, Instant>,
}

/// Spawn a bus worker owning `adapter` on its own task and return a handle
/// to it. `devices` must all share the same `bus_id` (the manager is
/// responsible for the grouping).
pub fn spawn(
    bus_id: String,
    adapter: Box<dyn ProtocolAdapter>,
    devices: Vec<Device>,
    raw_tx: mpsc::Sender<RawCollectResult>,
) -> BusHandle {
    let (ctrl_tx, ctrl_rx) = mpsc::channel(CTRL_QUEUE_CAPACITY);
    let (stop_tx, stop_rx) = oneshot::channel();

    let inner = Inner {
        bus_id,
        adapter,
        devices,
        raw_tx,
        last_collected: HashMap::new(),
    };

    let join = tokio::spawn(run(inner, ctrl_rx, stop_rx));

    BusHandle {
        ctrl_tx,
        stop_tx: Some(stop_tx),
        join,
    }
}

fn tick_interval(devices: &[Device]) -> Duration {
    let min_ms = devices
        .iter()
        .map(Device::effective_interval_ms)
        .min()
        .unwrap_or(crate::model::DEFAULT_INTERVAL_MS);
    Duration::from_millis(min_ms.max(1))
}

async fn run(
    mut inner: Inner,
    mut ctrl_rx: mpsc::Receiver<WriteTask>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    info!(bus_id = %inner.bus_id, devices = inner.devices.len(), "bus worker starting");
    let mut ticker = interval(tick_interval(&inner.devices));

    loop {
        // Try control first: a pending write is serviced before the next
        // select even considers the poll tick, so control never waits
        // behind a scheduled collection.
        if let Ok(task) = ctrl_rx.try_recv() {
            handle_control(&mut inner, task).await;
            continue;
        }

        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                break;
            }
            Some(task) = ctrl_rx.recv() => {
                handle_control(&mut inner, task).await;
            }
            _ = ticker.tick() => {
                do_batch_collect(&mut inner).await;
            }
        }
    }

    drain_on_shutdown(ctrl_rx).await;
    let _ = inner.adapter.disconnect().await;
    info!(bus_id = %inner.bus_id, "bus worker stopped");
}

async fn drain_on_shutdown(mut ctrl_rx: mpsc::Receiver<WriteTask>) {
    ctrl_rx.close();
    while let Ok(task) = ctrl_rx.try_recv() {
        let _ = task.resp_tx.send(Err(WriteError::BusShuttingDown));
    }
}

async fn handle_control(inner: &mut Inner, task: WriteTask) {
    let result = handle_control_inner(inner, &task).await;
    let _ = task.resp_tx.send(result);
}

async fn handle_control_inner(inner: &mut Inner, task: &WriteTask) -> Result<(), WriteError> {
    let device = inner
        .devices
        .iter()
        .find(|d| d.name == task.device_name)
        .ok_or_else(|| WriteError::DeviceNotFound(task.device_name.clone()))?;

    let point = device
        .points
        .iter()
        .find(|p| p.name == task.point_name)
        .ok_or_else(|| WriteError::PointNotFound(task.point_name.clone()))?;

    if !point.rw.is_writable() {
        return Err(WriteError::NotWritable(task.point_name.clone()));
    }

    ensure_connected(inner).await.map_err(|e| WriteError::Adapter(e.to_string()))?;

    let bytes = codec::encode(&task.value, point.byte_order, point.swap_reg);
    inner
        .adapter
        .write(point.func_code, point.reg_addr, &bytes)
        .await
        .map_err(|e| WriteError::Adapter(e.to_string()))
}

async fn ensure_connected(inner: &mut Inner) -> Result<(), AdapterError> {
    inner.adapter.connect().await
}

async fn do_batch_collect(inner: &mut Inner) {
    if let Err(e) = ensure_connected(inner).await {
        warn!(bus_id = %inner.bus_id, error = %e, "bus reconnect failed, skipping this cycle");
        return;
    }

    let now = Instant::now();
    for device in inner.devices.clone() {
        let due = inner
            .last_collected
            .get(&device.name)
            .map(|last| now.duration_since(*last) >= Duration::from_millis(device.effective_interval_ms()))
            .unwrap_or(true);
        if !due {
            continue;
        }
        inner.last_collected.insert(device.name.clone(), now);
        collect_device(inner, &device).await;
    }
}

async fn collect_device(inner: &mut Inner, device: &Device) {
    let groups = planner::plan(&device.points);
    let mut results = Vec::new();

    for group in &groups {
        if group.geometry_warning {
            warn!(
                bus_id = %inner.bus_id,
                device = %device.name,
                func_code = %group.func_code,
                start_addr = group.start_addr,
                "batch group has a register-count geometry mismatch, corrected",
            );
        }

        match inner
            .adapter
            .read(group.func_code, group.start_addr, group.quantity)
            .await
        {
            Ok(bytes) => results.extend(split_group_bytes(group, &bytes)),
            Err(e) => {
                error!(
                    bus_id = %inner.bus_id,
                    device = %device.name,
                    func_code = %group.func_code,
                    "batch read failed: {e}",
                );
                for point in &group.points {
                    results.push(RawPointResult {
                        point: point.clone(),
                        bytes: Err(e.to_string()),
                    });
                }
            }
        }
    }

    let collect_result = RawCollectResult {
        device_name: device.name.clone(),
        bus_id: inner.bus_id.clone(),
        points: results,
        timestamp: Utc::now(),
    };

    if inner.raw_tx.try_send(collect_result).is_err() {
        warn!(
            bus_id = %inner.bus_id,
            device = %device.name,
            "raw result channel full, dropping this poll pass",
        );
    } else {
        debug!(bus_id = %inner.bus_id, device = %device.name, "poll pass queued for decode");
    }
}

/// Split one batch group's response bytes back out per covered point.
/// Word-addressed families (hr/ir) pack 2 bytes per register; bit-addressed
/// families (co/di) pack 1 byte per coil in the adapter's decoded form.
fn split_group_bytes(group: &BatchGroup, bytes: &[u8]) -> Vec<RawPointResult> {
    let unit_width = if group.func_code.is_bit_addressed() { 1 } else { 2 };
    group
        .points
        .iter()
        .map(|p| {
            let offset = (p.reg_addr - group.start_addr) as usize * unit_width;
            let len = if group.func_code.is_bit_addressed() {
                1
            } else {
                p.effective_reg_count() as usize * 2
            };
            let slice = bytes.get(offset..offset + len).map(|s| s.to_vec());
            RawPointResult {
                point: p.clone(),
                bytes: slice.ok_or_else(|| "short batch read response".to_string()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccessMode, ByteOrder, DataType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeAdapter {
        connected: bool,
        read_calls: Arc<AtomicUsize>,
        write_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProtocolAdapter for FakeAdapter {
        async fn connect(&mut self) -> Result<(), AdapterError> {
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), AdapterError> {
            self.connected = false;
            Ok(())
        }

        async fn read(
            &mut self,
            _func_code: FuncCode,
            _start_addr: u16,
            quantity: u16,
        ) -> Result<Vec<u8>, AdapterError> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0u8; quantity as usize * 2])
        }

        async fn write(
            &mut self,
            _func_code: FuncCode,
            _addr: u16,
            _bytes: &[u8],
        ) -> Result<(), AdapterError> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn point(name: &str, rw: AccessMode) -> Point {
        Point {
            name: name.into(),
            desc: String::new(),
            func_code: FuncCode::Hr,
            reg_addr: 0,
            reg_num: 1,
            data_type: DataType::Uint16,
            byte_order: ByteOrder::Big,
            swap_reg: false,
            rw,
            scale: None,
            unit: None,
        }
    }

    fn device_with_point(rw: AccessMode) -> Device {
        Device {
            name: "d1".into(),
            bus_id: "b1".into(),
            adapter_name: "modbus".into(),
            slave_id: 1,
            interval_ms: 50,
            params: crate::model::ModbusParams::Tcp {
                address: "127.0.0.1:502".into(),
                timeout_ms: 100,
            },
            points: vec![point("p0", rw)],
        }
    }

    #[tokio::test]
    async fn control_write_reaches_adapter_for_writable_point() {
        let write_calls = Arc::new(AtomicUsize::new(0));
        let adapter = FakeAdapter {
            connected: false,
            read_calls: Arc::new(AtomicUsize::new(0)),
            write_calls: write_calls.clone(),
        };
        let (raw_tx, _raw_rx) = mpsc::channel(10);
        let handle = spawn(
            "b1".into(),
            Box::new(adapter),
            vec![device_with_point(AccessMode::Rw)],
            raw_tx,
        );

        let result = handle
            .write("d1", "p0", PointValue::Uint16(42))
            .await;
        assert!(result.is_ok());
        assert_eq!(write_calls.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn control_write_to_read_only_point_is_rejected() {
        let adapter = FakeAdapter {
            connected: false,
            read_calls: Arc::new(AtomicUsize::new(0)),
            write_calls: Arc::new(AtomicUsize::new(0)),
        };
        let (raw_tx, _raw_rx) = mpsc::channel(10);
        let handle = spawn(
            "b1".into(),
            Box::new(adapter),
            vec![device_with_point(AccessMode::R)],
            raw_tx,
        );

        let result = handle.write("d1", "p0", PointValue::Uint16(1)).await;
        assert!(matches!(result, Err(WriteError::NotWritable(_))));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_fails_pending_writes_with_bus_shutting_down() {
        let adapter = FakeAdapter {
            connected: false,
            read_calls: Arc::new(AtomicUsize::new(0)),
            write_calls: Arc::new(AtomicUsize::new(0)),
        };
        let (raw_tx, _raw_rx) = mpsc::channel(10);
        let handle = spawn(
            "b1".into(),
            Box::new(adapter),
            vec![device_with_point(AccessMode::Rw)],
            raw_tx,
        );
        handle.shutdown().await;
    }

    #[test]
    fn split_group_bytes_slices_contiguous_registers_per_point() {
        let points = vec![point("a", AccessMode::R), {
            let mut p = point("b", AccessMode::R);
            p.reg_addr = 1;
            p
        }];
        let group = BatchGroup {
            func_code: FuncCode::Hr,
            start_addr: 0,
            quantity: 2,
            points: points.clone(),
            geometry_warning: false,
        };
        let bytes = vec![0x00, 0x01, 0x00, 0x02];
        let results = split_group_bytes(&group, &bytes);
        assert_eq!(results[0].bytes.as_ref().unwrap(), &vec![0x00, 0x01]);
        assert_eq!(results[1].bytes.as_ref().unwrap(), &vec![0x00, 0x02]);
    }
}
