//! RTU transport for the `modbus` adapter, backed by `tokio-modbus`'s RTU
//! client over a `tokio-serial` port. Connection parameters mirror what a
//! serial field bus actually needs: baud rate, data bits, parity, stop bits.

use super::{write_quantity, AdapterError, ProtocolAdapter};
use crate::model::{FuncCode, Parity as ModelParity};
use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::slave::Slave;
use tokio_serial::{DataBits, SerialStream, StopBits};

pub struct RtuAdapter {
    serial_port: String,
    baud_rate: u32,
    data_bits: u8,
    parity: ModelParity,
    stop_bits: u8,
    slave_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl RtuAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        serial_port: String,
        baud_rate: u32,
        data_bits: u8,
        parity: ModelParity,
        stop_bits: u8,
        slave_id: u8,
        timeout_ms: u64,
    ) -> Self {
        Self {
            serial_port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            slave_id,
            timeout: Duration::from_millis(timeout_ms),
            ctx: None,
        }
    }

    fn ctx_mut(&mut self) -> Result<&mut Context, AdapterError> {
        self.ctx.as_mut().ok_or(AdapterError::NotConnected)
    }

    fn data_bits(&self) -> DataBits {
        match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> StopBits {
        match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        }
    }

    fn parity(&self) -> tokio_serial::Parity {
        match self.parity {
            ModelParity::None => tokio_serial::Parity::None,
            ModelParity::Even => tokio_serial::Parity::Even,
            ModelParity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for RtuAdapter {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let builder = tokio_serial::new(&self.serial_port, self.baud_rate)
            .data_bits(self.data_bits())
            .stop_bits(self.stop_bits())
            .parity(self.parity());
        let port = SerialStream::open(&builder)
            .map_err(|e| AdapterError::Transport(format!("open {}: {e}", self.serial_port)))?;
        let slave = Slave(self.slave_id);
        let ctx = rtu::attach_slave(port, slave);
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
                    let word = u16::from_be_bytes([bytes[0], bytes[1]]);
                    ctx.write_single_register(addr, word).await
                }
                FuncCode::Hr => {
                    let words: Vec<u16> = bytes
                        .chunks_exact(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect();
                    ctx.write_multiple_registers(addr, &words).await
                }
                FuncCode::Co if qty == 1 => ctx.write_single_coil(addr, bytes[0] != 0).await,
                FuncCode::Co => {
                    let bits: Vec<bool> = bytes.iter().take(qty as usize).map(|&b| b != 0).collect();
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

fn registers_to_bytes(regs: Vec<u16>) -> Vec<u8> {
    regs.iter().flat_map(|r| r.to_be_bytes()).collect()
}

fn coils_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.iter().map(|&b| if b { 1 } else { 0 }).collect()
}
