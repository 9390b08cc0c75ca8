//! Fleet manager: owns every bus worker generation, applies hot reloads,
//! and wires the decode pool and dispatch sink in front of them.
//!
//! A reload groups devices by bus id, stops every running bus worker, and
//! starts a fresh one per bus group from the new config. An incrementing
//! generation counter identifies each set of bus workers so a slow-to-stop
//! old worker can never be mistaken for the new one.

use crate::adapter::AdapterRegistry;
use crate::bus::{self, BusHandle};
use crate::config;
use crate::decode;
use crate::model::Device;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("adapter {adapter_name:?} for device {device_name:?}: {source}")]
    Adapter {
        device_name: String,
        adapter_name: String,
        #[source]
        source: crate::adapter::AdapterError,
    },
}

/// File-watch debounce window: config editors tend to emit several write
/// events for one logical save, and a naive watcher would reload once per
/// event.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(300);

struct Generation {
    id: u64,
    buses: HashMap<String, BusHandle>,
}

pub struct Manager {
    config_path: PathBuf,
    adapters: AdapterRegistry,
    raw_tx: mpsc::Sender<bus::RawCollectResult>,
    _decode_handles: Vec<tokio::task::JoinHandle<()>>,
    next_generation: u64,
    current: Mutex<Option<Generation>>,
}

impl Manager {
    /// The raw-result channel and decode pool are created once here and
    /// outlive every reload generation; only the bus workers feeding them
    /// are replaced on reload.
    pub fn new(
        config_path: impl Into<PathBuf>,
        adapters: AdapterRegistry,
        snapshot_tx: mpsc::Sender<decode::DecodedSnapshot>,
        raw_channel_capacity: usize,
        decode_workers: usize,
    ) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel(raw_channel_capacity.max(1));
        let decode_handles = decode::spawn_pool(decode_workers, raw_rx, snapshot_tx);
        Self {
            config_path: config_path.into(),
            adapters,
            raw_tx,
            _decode_handles: decode_handles,
            next_generation: 0,
            current: Mutex::new(None),
        }
    }

    /// Load the fleet config, stop every bus worker in the previous
    /// generation, then start a fresh one grouped by `busId`. Stop always
    /// completes before any new bus is started: two workers must never
    /// hold the same physical bus at once.
    pub async fn reload(&mut self) -> Result<(), ManagerError> {
        let devices = config::load_fleet(&self.config_path)?;
        let by_bus = group_by_bus(devices);

        let generation_id = self.next_generation;
        self.next_generation += 1;

        let previous = self.current.lock().await.take();
        if let Some(previous) = previous {
            info!(generation = previous.id, "stopping previous bus worker generation");
            for (bus_id, handle) in previous.buses {
                info!(bus_id = %bus_id, "stopping bus worker");
                handle.shutdown().await;
            }
        }

        let mut new_buses = HashMap::new();
        for (bus_id, devices) in by_bus {
            match self.start_bus(generation_id, bus_id.clone(), devices).await {
                Ok(handle) => {
                    new_buses.insert(bus_id, handle);
                }
                Err(e) => {
                    error!(bus_id = %bus_id, error = %e, "skipping bus group, adapter resolution failed");
                }
            }
        }

        *self.current.lock().await = Some(Generation {
            id: generation_id,
            buses: new_buses,
        });

        info!(generation = generation_id, "fleet reload complete");
        Ok(())
    }

    async fn start_bus(
        &self,
        generation_id: u64,
        bus_id: String,
        devices: Vec<Device>,
    ) -> Result<BusHandle, ManagerError> {
        // Every device on a bus shares one physical adapter connection; the
        // first device's params/adapter name govern the bus-level adapter.
        let primary = devices.first().expect("group_by_bus never yields an empty group");
        let adapter = self
            .adapters
            .create(&primary.adapter_name, &primary.params, primary.slave_id)
            .await
            .map_err(|source| ManagerError::Adapter {
                device_name: primary.name.clone(),
                adapter_name: primary.adapter_name.clone(),
                source,
            })?;

        info!(
            generation = generation_id,
            bus_id = %bus_id,
            devices = devices.len(),
            "starting bus worker",
        );
        Ok(bus::spawn(bus_id, adapter, devices, self.raw_tx.clone()))
    }

    /// Submit a control write against a running device, routed by the
    /// device's `busId` in the current generation.
    pub async fn write(
        &self,
        bus_id: &str,
        device_name: impl Into<String>,
        point_name: impl Into<String>,
        value: crate::model::PointValue,
    ) -> Result<(), WriteRouteError> {
        let guard = self.current.lock().await;
        let generation = guard.as_ref().ok_or(WriteRouteError::NoActiveGeneration)?;
        let handle = generation
            .buses
            .get(bus_id)
            .ok_or_else(|| WriteRouteError::UnknownBus(bus_id.to_string()))?;
        handle
            .write(device_name, point_name, value)
            .await
            .map_err(WriteRouteError::Write)
    }

    pub async fn shutdown(&mut self) {
        if let Some(generation) = self.current.lock().await.take() {
            for (bus_id, handle) in generation.buses {
                info!(bus_id = %bus_id, "stopping bus worker on shutdown");
                handle.shutdown().await;
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteRouteError {
    #[error("no fleet generation is active yet")]
    NoActiveGeneration,
    #[error("bus {0:?} not found in current generation")]
    UnknownBus(String),
    #[error(transparent)]
    Write(#[from] bus::WriteError),
}

fn group_by_bus(devices: Vec<Device>) -> HashMap<String, Vec<Device>> {
    let mut groups: HashMap<String, Vec<Device>> = HashMap::new();
    for device in devices {
        groups.entry(device.bus_id.clone()).or_default().push(device);
    }
    groups
}

/// Watch the config file's parent directory and debounce-trigger
/// `reload_fn` on writes to the file itself. Runs until the watcher
/// channel closes (process shutdown).
pub async fn watch_and_reload<F, Fut>(config_path: PathBuf, mut reload_fn: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), ManagerError>>,
{
    let (tx, mut rx) = mpsc::channel(16);
    let watch_path = config_path.clone();

    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
        let _ = tx.blocking_send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create config file watcher");
            return;
        }
    };

    let watch_dir = parent_dir(&watch_path);
    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!(error = %e, dir = %watch_dir.display(), "failed to watch config directory");
        return;
    }

    let mut last_event = tokio::time::Instant::now() - RELOAD_DEBOUNCE;
    while let Some(res) = rx.recv().await {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "config watcher error");
                continue;
            }
        };
        if !event.paths.iter().any(|p| p == &config_path) {
            continue;
        }
        if !matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
            continue;
        }

        let now = tokio::time::Instant::now();
        if now.duration_since(last_event) < RELOAD_DEBOUNCE {
            continue;
        }
        last_event = now;

        tokio::time::sleep(RELOAD_DEBOUNCE).await;
        info!("config file changed, reloading fleet");
        if let Err(e) = reload_fn().await {
            error!(error = %e, "hot reload failed, previous generation kept running");
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_by_bus_partitions_devices() {
        let devices = vec![
            Device {
                name: "d1".into(),
                bus_id: "b1".into(),
                adapter_name: "modbus".into(),
                slave_id: 1,
                interval_ms: 1000,
                params: crate::model::ModbusParams::Tcp {
                    address: "127.0.0.1:502".into(),
                    timeout_ms: 2000,
                },
                points: vec![],
            },
            Device {
                name: "d2".into(),
                bus_id: "b2".into(),
                adapter_name: "modbus".into(),
                slave_id: 2,
                interval_ms: 1000,
                params: crate::model::ModbusParams::Tcp {
                    address: "127.0.0.1:503".into(),
                    timeout_ms: 2000,
                },
                points: vec![],
            },
        ];
        let groups = group_by_bus(devices);
        assert_eq!(groups.len(), 2);
        assert!(groups.contains_key("b1"));
        assert!(groups.contains_key("b2"));
    }
}
