//! Protocol adapter contract and the name-keyed adapter registry.
//!
//! A [`ProtocolAdapter`] is the capability interface a bus worker drives:
//! connect, disconnect, typed reads, typed writes. Concrete adapters are
//! obtained through [`AdapterRegistry`], a read-mostly name → factory map
//! populated once at process initialization: register by name at startup,
//! look up by name on every device admission.
//!
//! `params` is a closed, tagged [`crate::model::ModbusParams`] enum rather
//! than an untyped map, so each adapter factory can destructure its own
//! variant directly instead of probing string keys at runtime.

mod modbus_rtu;
mod modbus_tcp;

pub use modbus_rtu::RtuAdapter;
pub use modbus_tcp::TcpAdapter;

use crate::model::{FuncCode, ModbusParams};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unsupported function code: {0:?}")]
    UnsupportedFunction(FuncCode),
    #[error("adapter not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("adapter factory not registered: {0}")]
    FactoryNotFound(String),
    #[error("write payload length {len} is not a multiple of the register/coil width for {func_code:?}")]
    InvalidWriteLength { func_code: FuncCode, len: usize },
}

/// The capability set every protocol adapter variant implements.
///
/// `connect`/`disconnect` are idempotent; reconnect retries are the bus
/// worker's responsibility, not the adapter's.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    async fn connect(&mut self) -> Result<(), AdapterError>;
    async fn disconnect(&mut self) -> Result<(), AdapterError>;

    /// Read `quantity` registers/coils of `func_code` starting at `start_addr`,
    /// returning the response payload with all Modbus framing stripped.
    async fn read(
        &mut self,
        func_code: FuncCode,
        start_addr: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, AdapterError>;

    /// Write `bytes` to `func_code` starting at `addr`. A 2-byte payload
    /// writes a single coil/register; anything larger writes multiple.
    async fn write(
        &mut self,
        func_code: FuncCode,
        addr: u16,
        bytes: &[u8],
    ) -> Result<(), AdapterError>;
}

/// Factory signature registered per adapter name.
pub type AdapterFactory =
    Arc<dyn Fn(&ModbusParams, u8) -> Result<Box<dyn ProtocolAdapter>, AdapterError> + Send + Sync>;

/// Read-mostly name → factory map, populated at process initialization and
/// consulted on every reload. Concurrent reads are the common case; writes
/// (registration) happen only at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: Arc<RwLock<HashMap<String, AdapterFactory>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with the built-in `modbus` adapter (TCP + RTU,
    /// selected by [`ModbusParams`]'s variant) registered under its name.
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        registry
            .register("modbus", Arc::new(modbus_factory))
            .await;
        registry
    }

    pub async fn register(&self, name: impl Into<String>, factory: AdapterFactory) {
        self.factories.write().await.insert(name.into(), factory);
    }

    pub async fn create(
        &self,
        name: &str,
        params: &ModbusParams,
        slave_id: u8,
    ) -> Result<Box<dyn ProtocolAdapter>, AdapterError> {
        let factories = self.factories.read().await;
        let factory = factories
            .get(name)
            .ok_or_else(|| AdapterError::FactoryNotFound(name.to_string()))?;
        factory(params, slave_id)
    }
}

fn modbus_factory(
    params: &ModbusParams,
    slave_id: u8,
) -> Result<Box<dyn ProtocolAdapter>, AdapterError> {
    match params {
        ModbusParams::Tcp { address, timeout_ms } => Ok(Box::new(TcpAdapter::new(
            address.clone(),
            slave_id,
            *timeout_ms,
        ))),
        ModbusParams::Rtu {
            serial_port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            timeout_ms,
        } => Ok(Box::new(RtuAdapter::new(
            serial_port.clone(),
            *baud_rate,
            *data_bits,
            *parity,
            *stop_bits,
            slave_id,
            *timeout_ms,
        ))),
    }
}

/// Split a coil/register write payload into the single-vs-multiple
/// decision plus the Modbus quantity, per the adapter write contract:
/// bit-addressed families (coil/discrete) pack 8 values per byte, word
/// families (holding/input) pack one value per 2 bytes.
pub(crate) fn write_quantity(func_code: FuncCode, len: usize) -> u16 {
    if func_code.is_bit_addressed() {
        (len * 8) as u16
    } else {
        (len / 2) as u16
    }
}
