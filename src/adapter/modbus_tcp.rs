//! TCP transport for the `modbus` adapter, backed by `tokio-modbus`'s TCP
//! client. The underlying `Context` is opened once by `connect` and reused
//! across calls; reconnect on failure is the bus worker's job, not this
//! adapter's.

use super::{write_quantity, AdapterError, ProtocolAdapter};
use crate::model::FuncCode;
use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::slave::Slave;

pub struct TcpAdapter {
    address: String,
    slave_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl TcpAdapter {
    pub fn new(address: String, slave_id: u8, timeout_ms: u64) -> Self {
        Self {
            address,
            slave_id,
            timeout: Duration::from_millis(timeout_ms),
            ctx: None,
        }
    }

    fn ctx_mut(&mut self) -> Result<&mut Context, AdapterError> {
        self.ctx.as_mut().ok_or(AdapterError::NotConnected)
    }
}

#[async_trait]
impl ProtocolAdapter for TcpAdapter {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let addr = self
            .address
            .parse()
            .map_err(|e| AdapterError::Transport(format!("invalid address {}: {e}", self.address)))?;
        let slave = Slave(self.slave_id);
        let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| AdapterError::Transport("connect timed out".into()))?
            .map_err(|e| AdapterError::Transport(e.to_string()))?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.ctx = None;
        Ok(())
    }

    async fn read(
        &mut self,
        func_code: FuncCode,
        start_addr: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, AdapterError> {
        let timeout = self.timeout;
        let ctx = self.ctx_mut()?;
        let fut = async {
            match func_code {
                FuncCode::Hr => ctx
                    .read_holding_registers(start_addr, quantity)
                    .await
                    .map(|r| r.map(registers_to_bytes)),
                FuncCode::Ir => ctx
                    .read_input_registers(start_addr, quantity)
                    .await
                    .map(|r| r.map(registers_to_bytes)),
                FuncCode::Co => ctx
                    .read_coils(start_addr, quantity)
                    .await
                    .map(|r| r.map(|bits| coils_to_bytes(&bits))),
                FuncCode::Di => ctx
                    .read_discrete_inputs(start_addr, quantity)
                    .await
                    .map(|r| r.map(|bits| coils_to_bytes(&bits))),
            }
        };
        let outcome = tokio::time::timeout(timeout, fut).await;
        let result = match outcome {
            Err(_) => Err(AdapterError::Transport("read timed out".into())),
            Ok(Err(e)) => Err(AdapterError::Transport(e.to_string())),
            Ok(Ok(Err(exc))) => Err(AdapterError::Transport(exc.to_string())),
            Ok(Ok(Ok(bytes))) => Ok(bytes),
        };
        if result.is_err() {
            // A failed read leaves the context in an unknown state; drop it
            // so the next `connect()` actually redials instead of no-opping.
            self.ctx = None;
        }
        result
    }

    async fn write(
        &mut self,
        func_code: FuncCode,
        addr: u16,
        bytes: &[u8],
    ) -> Result<(), AdapterError> {
        let timeout = self.timeout;
        let qty = write_quantity(func_code, bytes.len());
        let ctx = self.ctx_mut()?;
        let fut = async {
            match func_code {
                FuncCode::Hr if qty == 1 => {
                    let word = bytes_to_register(bytes);
                    ctx.write_single_register(addr, word).await
                }
                FuncCode::Hr => {
                    let words = bytes_to_registers(bytes);
                    ctx.write_multiple_registers(addr, &words).await
                }
                FuncCode::Co if qty == 1 => {
                    ctx.write_single_coil(addr, bytes[0] != 0).await
                }
                FuncCode::Co => {
                    let bits = bytes_to_coils(bytes, qty);
                    ctx.write_multiple_coils(addr, &bits).await
                }
                FuncCode::Ir | FuncCode::Di => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "read-only function code",
                    ))
                }
            }
        };
        let outcome = tokio::time::timeout(timeout, fut).await;
        let result = match outcome {
            Err(_) => Err(AdapterError::Transport("write timed out".into())),
            Ok(Err(e)) => Err(AdapterError::Transport(e.to_string())),
            Ok(Ok(Err(exc))) => Err(AdapterError::Transport(exc.to_string())),
            Ok(Ok(Ok(()))) => Ok(()),
        };
        if result.is_err() {
            self.ctx = None;
        }
        result
    }
}

/// tokio-modbus read methods return `Result<Result<T, Exception>, io::Error>`;
/// outer is transport, inner is the Modbus protocol exception.
fn registers_to_bytes(regs: Vec<u16>) -> Vec<u8> {
    regs.iter().flat_map(|r| r.to_be_bytes()).collect()
}

fn coils_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.iter().map(|&b| if b { 1 } else { 0 }).collect()
}

fn bytes_to_register(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn bytes_to_registers(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

fn bytes_to_coils(bytes: &[u8], qty: u16) -> Vec<bool> {
    bytes
        .iter()
        .take(qty as usize)
        .map(|&b| b != 0)
        .collect()
}
