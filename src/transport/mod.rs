//! Byte-stream transports for instrument communication.
//!
//! All three physical paths to the instruments — RS-232 serial, raw TCP, and
//! the CP2110-style USB HID-to-UART bridge — implement the same [`Transport`]
//! contract. Device-specific configuration (baud rate, flow control, VID/PID)
//! is supplied only when opening; above this layer nothing knows or cares
//! which concrete transport is active.

pub mod mock;
#[cfg(feature = "transport_serial")]
pub mod serial;
pub mod tcp;
#[cfg(feature = "transport_usb_bridge")]
pub mod usb_bridge;

use std::time::Instant;

use serde::Deserialize;

use crate::error::TransportError;

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control negotiated through the USB bridge chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BridgeFlowControl {
    Off,
    #[default]
    RtsCts,
}

/// How to reach the instrument. Immutable once a transport is opened from it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// RS-232 serial port.
    Serial {
        port: String,
        #[serde(default = "default_baud")]
        baud: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default)]
        parity: Parity,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        #[serde(default = "default_true")]
        rts_cts: bool,
        #[serde(default)]
        dtr: bool,
    },
    /// Raw TCP socket to the instrument's LAN interface.
    Tcp {
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
    /// USB HID-to-UART bridge chip (CP2110 class).
    UsbBridge {
        #[serde(default = "default_bridge_vid")]
        vendor_id: u16,
        #[serde(default = "default_bridge_pid")]
        product_id: u16,
        #[serde(default)]
        device_index: usize,
        #[serde(default = "default_baud")]
        baud: u32,
        #[serde(default)]
        flow_control: BridgeFlowControl,
    },
}

fn default_baud() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

/// Factory port of the analyzer's LAN interface.
fn default_tcp_port() -> u16 {
    10733
}

/// Silicon Labs bridge chip as mounted in the analyzer.
fn default_bridge_vid() -> u16 {
    0x10C4
}

fn default_bridge_pid() -> u16 {
    0x8805
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp {
            host: "192.168.15.100".to_string(),
            port: default_tcp_port(),
        }
    }
}

impl TransportConfig {
    /// Open a transport for this configuration.
    ///
    /// The USB bridge variant also negotiates the UART side of the bridge
    /// (baud, parity, flow control) before returning; callers never see that
    /// as a separate step.
    pub fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        match self {
            TransportConfig::Serial {
                port,
                baud,
                data_bits,
                parity,
                stop_bits,
                rts_cts,
                dtr,
            } => {
                #[cfg(feature = "transport_serial")]
                {
                    serial::SerialTransport::open(
                        port, *baud, *data_bits, *parity, *stop_bits, *rts_cts, *dtr,
                    )
                    .map(|t| Box::new(t) as Box<dyn Transport>)
                }
                #[cfg(not(feature = "transport_serial"))]
                {
                    let _ = (port, baud, data_bits, parity, stop_bits, rts_cts, dtr);
                    Err(TransportError::ConfigRejected(
                        "serial transport not compiled in; rebuild with --features transport_serial"
                            .to_string(),
                    ))
                }
            }
            TransportConfig::Tcp { host, port } => tcp::TcpTransport::open(host, *port)
                .map(|t| Box::new(t) as Box<dyn Transport>),
            TransportConfig::UsbBridge {
                vendor_id,
                product_id,
                device_index,
                baud,
                flow_control,
            } => {
                #[cfg(feature = "transport_usb_bridge")]
                {
                    usb_bridge::UsbBridgeTransport::open(
                        *vendor_id,
                        *product_id,
                        *device_index,
                        *baud,
                        *flow_control,
                    )
                    .map(|t| Box::new(t) as Box<dyn Transport>)
                }
                #[cfg(not(feature = "transport_usb_bridge"))]
                {
                    let _ = (vendor_id, product_id, device_index, baud, flow_control);
                    Err(TransportError::ConfigRejected(
                        "USB bridge transport not compiled in; rebuild with --features transport_usb_bridge"
                            .to_string(),
                    ))
                }
            }
        }
    }
}

/// Uniform byte-stream contract over the physical paths to an instrument.
///
/// Every wait is deadline-bounded; there is no unbounded blocking call in
/// this contract. Implementations own their OS/vendor handle exclusively and
/// are not shared across threads.
pub trait Transport: Send {
    /// Write raw bytes, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever bytes are available before `deadline`.
    ///
    /// Returns an empty buffer when the deadline passes with nothing
    /// received; that is a normal outcome, not an error.
    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, TransportError>;

    /// Discard any buffered unread bytes in both directions.
    ///
    /// Called before every command send: the instruments are known to emit
    /// unsolicited status bytes between exchanges, and stale input corrupts
    /// framing of the next reply.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}
