use async_trait::async_trait;
use daqd::adapter::{AdapterError, ProtocolAdapter};
use daqd::model::{FuncCode, ModbusParams};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum FakeCall {
    Read { at: Instant, func_code: FuncCode },
    Write { at: Instant, func_code: FuncCode, addr: u16 },
}

/// In-memory fake adapter: never touches a socket or serial port, records
/// every call so tests can assert ordering and timing.
pub struct FakeAdapter {
    calls: Arc<Mutex<Vec<FakeCall>>>,
    read_bytes: Vec<u8>,
}

impl FakeAdapter {
    pub fn new(calls: Arc<Mutex<Vec<FakeCall>>>, read_bytes: Vec<u8>) -> Self {
        Self { calls, read_bytes }
    }
}

#[async_trait]
impl ProtocolAdapter for FakeAdapter {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn read(
        &mut self,
        func_code: FuncCode,
        _start_addr: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, AdapterError> {
        self.calls.lock().unwrap().push(FakeCall::Read {
            at: Instant::now(),
            func_code,
        });
        let mut bytes = self.read_bytes.clone();
        bytes.resize(quantity as usize * 2, 0);
        Ok(bytes)
    }

    async fn write(
        &mut self,
        func_code: FuncCode,
        addr: u16,
        _bytes: &[u8],
    ) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().push(FakeCall::Write {
            at: Instant::now(),
            func_code,
            addr,
        });
        Ok(())
    }
}

/// Build an [`AdapterRegistry`] whose `"fake"` factory always returns a
/// [`FakeAdapter`] sharing `calls` so the test can inspect call history
/// after the bus worker has run.
pub async fn fake_registry(calls: Arc<Mutex<Vec<FakeCall>>>) -> daqd::adapter::AdapterRegistry {
    let registry = daqd::adapter::AdapterRegistry::new();
    registry
        .register(
            "fake",
            Arc::new(move |_params: &ModbusParams, _slave_id: u8| {
                Ok(Box::new(FakeAdapter::new(calls.clone(), vec![0u8; 64]))
                    as Box<dyn ProtocolAdapter>)
            }),
        )
        .await;
    registry
}
