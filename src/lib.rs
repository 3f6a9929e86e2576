//! Transport-agnostic command channel for SCPI-like bench instruments.
//!
//! The crate talks to line-oriented instruments (power analyzers,
//! programmable AC/DC sources) over three interchangeable byte transports —
//! RS-232 serial, raw TCP, and a USB HID-to-UART bridge — and layers on top
//! of them:
//!
//! - [`channel::CommandChannel`]: one command/reply exchange at a time, with
//!   retry, per-attempt deadlines, and buffer-clearing discipline.
//! - [`prober`]: resolves which spelling of a query the connected firmware
//!   dialect accepts, once, at startup.
//! - [`stream::StreamSession`]: the polling loop that turns the resolved
//!   query into timestamped measurements on console and CSV sinks, skipping
//!   bad cycles instead of dying.
//!
//! Device-specific setup sequences are plain `Command` lists supplied by the
//! caller; the core neither knows nor cares what they mean.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod framer;
pub mod measurement;
pub mod prober;
pub mod protocol;
pub mod sink;
pub mod stream;
pub mod transport;

pub use cancel::CancelToken;
pub use channel::{CommandChannel, RetryPolicy};
pub use config::Settings;
pub use error::{ChannelError, TransportError};
pub use measurement::{Measurement, PollCycle};
pub use protocol::{parse_field, Command, Reply, VariantSet};
pub use sink::{ConsoleSink, CsvSink, MeasurementSink};
pub use stream::{StreamSession, StreamSettings, StreamSummary};
pub use transport::{Transport, TransportConfig};
