//! Measurement records produced by the polling loop.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ChannelError;
use crate::protocol::{parse_field, Reply};

/// One parsed value from one channel at one instant. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// 1-based channel index, assigned positionally from the reply fields.
    pub channel: usize,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// All measurements from one successful poll cycle, plus the session-relative
/// elapsed time the sinks log alongside them.
#[derive(Debug, Clone)]
pub struct PollCycle {
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub measurements: Vec<Measurement>,
}

impl PollCycle {
    /// Parse every reply field as one positional channel measurement.
    ///
    /// Fails with the offending field's index and text if any field is not a
    /// finite number — including the empty fields produced when the device
    /// returns fewer values than the split assumed.
    pub fn from_reply(reply: &Reply, unit: &str, elapsed: Duration) -> Result<Self, ChannelError> {
        let measurements = reply
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                parse_field(i, field).map(|value| Measurement {
                    channel: i + 1,
                    value,
                    unit: unit.to_string(),
                    timestamp: reply.received_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            timestamp: reply.received_at,
            elapsed,
            measurements,
        })
    }
}
