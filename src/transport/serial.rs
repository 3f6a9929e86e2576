//! RS-232 serial transport on the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, StopBits};

use crate::error::TransportError;
use crate::transport::{Parity, Transport};

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    pub fn open(
        port_name: &str,
        baud: u32,
        data_bits: u8,
        parity: Parity,
        stop_bits: u8,
        rts_cts: bool,
        dtr: bool,
    ) -> Result<Self, TransportError> {
        let data_bits = match data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(TransportError::ConfigRejected(format!(
                    "unsupported data bits: {other}"
                )))
            }
        };
        let stop_bits = match stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(TransportError::ConfigRejected(format!(
                    "unsupported stop bits: {other}"
                )))
            }
        };
        let parity = match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let flow = if rts_cts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let mut port = serialport::new(port_name, baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| map_open_error(port_name, e))?;

        port.write_data_terminal_ready(dtr)
            .map_err(|e| TransportError::ConfigRejected(format!("DTR setup failed: {e}")))?;

        debug!("serial port {port_name} open at {baud} baud");
        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

fn map_open_error(port_name: &str, err: serialport::Error) -> TransportError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => TransportError::NotFound(port_name.to_string()),
        serialport::ErrorKind::InvalidInput => TransportError::ConfigRejected(err.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(port_name.to_string())
        }
        serialport::ErrorKind::Io(kind) => {
            TransportError::Io(io::Error::new(kind, err.to_string()))
        }
        serialport::ErrorKind::Unknown => TransportError::ConfigRejected(err.to_string()),
    }
}

fn serial_io_error(err: serialport::Error) -> TransportError {
    TransportError::Io(io::Error::other(err.to_string()))
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(bytes.len())
    }

    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Vec::new());
        }
        let port = self.port_mut()?;
        port.set_timeout(remaining).map_err(serial_io_error)?;

        let mut buf = [0u8; 256];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.port_mut()?
            .clear(ClearBuffer::All)
            .map_err(serial_io_error)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(port) = self.port.take() {
            drop(port);
            debug!("serial port {} closed", self.name);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.name)
    }
}
