//! USB HID-to-UART bridge transport (Silicon Labs CP2110 class) on `hidapi`.
//!
//! The analyzer's USB port is not a CDC serial device: it exposes a HID
//! interface behind which the bridge chip runs a real UART into the
//! instrument. Opening therefore has two halves — claim the HID interface,
//! then configure the UART side *through* the bridge with feature reports —
//! and both happen inside [`UsbBridgeTransport::open`]; callers never see
//! the negotiation.
//!
//! Data moves in interrupt reports whose report ID doubles as the payload
//! length (IDs 0x01..=0x3F carry 1..=63 bytes).

use std::io;
use std::time::Instant;

use hidapi::{HidApi, HidDevice, HidError};
use log::debug;

use crate::error::TransportError;
use crate::transport::{BridgeFlowControl, Transport};

/// Feature report: enable/disable the UART behind the bridge.
const REPORT_UART_ENABLE: u8 = 0x41;
/// Feature report: purge the bridge's TX/RX FIFOs.
const REPORT_PURGE_FIFOS: u8 = 0x43;
/// Feature report: UART configuration (baud, parity, flow, bits, stop).
const REPORT_UART_CONFIG: u8 = 0x50;

const PURGE_BOTH_FIFOS: u8 = 0x03;
const MAX_REPORT_PAYLOAD: usize = 63;

pub struct UsbBridgeTransport {
    device: Option<HidDevice>,
    label: String,
}

impl UsbBridgeTransport {
    pub fn open(
        vendor_id: u16,
        product_id: u16,
        device_index: usize,
        baud: u32,
        flow_control: BridgeFlowControl,
    ) -> Result<Self, TransportError> {
        let label = format!("{vendor_id:04x}:{product_id:04x}#{device_index}");

        let api = HidApi::new()
            .map_err(|e| TransportError::ConfigRejected(format!("HID subsystem: {e}")))?;
        let info = api
            .device_list()
            .filter(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .nth(device_index)
            .ok_or_else(|| TransportError::NotFound(format!("no HID bridge at {label}")))?;

        let device = info.open_device(&api).map_err(|e| match e {
            HidError::HidApiError { message } if message.contains("busy") => {
                TransportError::AlreadyOpen
            }
            other => TransportError::PermissionDenied(format!("{label}: {other}")),
        })?;

        // UART config report: baud (big-endian), parity, flow, data bits
        // (encoded as bits - 5), stop bits. 8N1 with configurable flow.
        let mut config = [0u8; 9];
        config[0] = REPORT_UART_CONFIG;
        config[1..5].copy_from_slice(&baud.to_be_bytes());
        config[5] = 0;
        config[6] = match flow_control {
            BridgeFlowControl::Off => 0,
            BridgeFlowControl::RtsCts => 1,
        };
        config[7] = 3;
        config[8] = 0;
        device
            .send_feature_report(&config)
            .map_err(|e| TransportError::ConfigRejected(format!("UART config: {e}")))?;

        device
            .send_feature_report(&[REPORT_UART_ENABLE, 0x01])
            .map_err(|e| TransportError::ConfigRejected(format!("UART enable: {e}")))?;

        device
            .send_feature_report(&[REPORT_PURGE_FIFOS, PURGE_BOTH_FIFOS])
            .map_err(|e| TransportError::ConfigRejected(format!("FIFO purge: {e}")))?;

        debug!("USB bridge {label} open, UART at {baud} baud");
        Ok(Self {
            device: Some(device),
            label,
        })
    }

    fn device_ref(&self) -> Result<&HidDevice, TransportError> {
        self.device.as_ref().ok_or(TransportError::Closed)
    }
}

fn hid_io_error(err: HidError) -> TransportError {
    TransportError::Io(io::Error::other(err.to_string()))
}

impl Transport for UsbBridgeTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let device = self.device_ref()?;
        let mut written = 0usize;
        for chunk in bytes.chunks(MAX_REPORT_PAYLOAD) {
            let mut report = Vec::with_capacity(chunk.len() + 1);
            report.push(chunk.len() as u8);
            report.extend_from_slice(chunk);
            device.write(&report).map_err(hid_io_error)?;
            written += chunk.len();
        }
        Ok(written)
    }

    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Vec::new());
        }
        let device = self.device_ref()?;
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;

        let mut buf = [0u8; 64];
        let n = device
            .read_timeout(&mut buf, timeout_ms.max(1))
            .map_err(hid_io_error)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        // Report ID is the payload length for data reports; anything else
        // (status interrupts) carries no UART bytes.
        let payload = buf[0] as usize;
        if payload == 0 || payload > MAX_REPORT_PAYLOAD {
            return Ok(Vec::new());
        }
        let available = payload.min(n.saturating_sub(1));
        Ok(buf[1..1 + available].to_vec())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.device_ref()?
            .send_feature_report(&[REPORT_PURGE_FIFOS, PURGE_BOTH_FIFOS])
            .map_err(hid_io_error)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(device) = self.device.take() {
            // Best-effort UART disable before releasing the interface.
            let _ = device.send_feature_report(&[REPORT_UART_ENABLE, 0x00]);
            drop(device);
            debug!("USB bridge {} closed", self.label);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("usb-bridge:{}", self.label)
    }
}
