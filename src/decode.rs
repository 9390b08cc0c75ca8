//! Decode pool: a fixed-size worker pool that turns raw poll-pass bytes
//! into typed point values and hands the result on to dispatch.
//!
//! N workers drain one shared input channel, each decoding a whole
//! device's raw result before handing it downstream. Ordering across
//! devices is not preserved: two devices' snapshots can complete in
//! either order relative to each other.

use crate::bus::RawCollectResult;
use crate::codec;
use crate::model::PointValue;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// One point's decode outcome within a snapshot.
#[derive(Debug, Clone)]
pub struct DecodedPoint {
    pub name: String,
    pub value: Result<PointValue, String>,
}

/// A device's fully decoded poll pass, ready for dispatch.
#[derive(Debug, Clone)]
pub struct DecodedSnapshot {
    pub device_name: String,
    pub bus_id: String,
    pub points: Vec<DecodedPoint>,
    pub timestamp: DateTime<Utc>,
}

/// Default worker count when the CLI doesn't override it.
pub const DEFAULT_WORKERS: usize = 4;

/// Spawn `worker_count` decode workers draining `raw_rx` and publishing
/// decoded snapshots on the returned channel. Workers pull from the same
/// `mpsc::Receiver` concurrently, so two devices' snapshots can be decoded
/// out of order relative to each other — decode has no cross-device
/// ordering requirement.
pub fn spawn_pool(
    worker_count: usize,
    mut raw_rx: mpsc::Receiver<RawCollectResult>,
    snapshot_tx: mpsc::Sender<DecodedSnapshot>,
) -> Vec<JoinHandle<()>> {
    let worker_count = worker_count.max(1);
    let (work_tx, work_rx) = async_channel(worker_count);

    let feeder = {
        let work_tx = work_tx.clone();
        tokio::spawn(async move {
            while let Some(raw) = raw_rx.recv().await {
                if work_tx.send(raw).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut handles = vec![feeder];
    for _ in 0..worker_count {
        let work_rx = work_rx.clone();
        let snapshot_tx = snapshot_tx.clone();
        handles.push(tokio::spawn(async move {
            while let Ok(raw) = work_rx.recv().await {
                let snapshot = decode_one(raw);
                if snapshot_tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        }));
    }
    handles
}

/// Tiny multi-consumer queue: `tokio::sync::mpsc` has one receiver, so
/// fanning a single input stream out to N decode workers needs something
/// cloneable on the receive side. `async-channel` isn't in the dependency
/// set; a `Receiver` wrapped in a mutex gives the same effect without
/// adding one.
fn async_channel<T: Send + 'static>(
    capacity: usize,
) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1) * 4);
    (tx, SharedReceiver::new(rx))
}

#[derive(Clone)]
struct SharedReceiver<T> {
    inner: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T: Send + 'static> SharedReceiver<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    async fn recv(&self) -> Result<T, RecvClosed> {
        self.inner.lock().await.recv().await.ok_or(RecvClosed)
    }
}

struct RecvClosed;

fn decode_one(raw: RawCollectResult) -> DecodedSnapshot {
    let points = raw
        .points
        .into_iter()
        .map(|rp| {
            let value = match rp.bytes {
                Ok(bytes) => codec::decode(&bytes, rp.point.data_type, rp.point.byte_order, rp.point.swap_reg)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            if let Err(ref e) = value {
                warn!(device = %raw.device_name, point = %rp.point.name, error = %e, "point decode failed");
            }
            DecodedPoint {
                name: rp.point.name,
                value,
            }
        })
        .collect();

    DecodedSnapshot {
        device_name: raw.device_name,
        bus_id: raw.bus_id,
        points,
        timestamp: raw.timestamp,
    }
}
