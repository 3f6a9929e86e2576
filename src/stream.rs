//! The polling loop: resolved query → parsed measurements → sinks.
//!
//! A [`StreamSession`] owns the command channel for its lifetime and releases
//! the transport exactly once on the way out, whether it ends by
//! cancellation, transport loss, or sink failure. Individual bad polls are
//! logged and skipped — an isolated hiccup must not abort a long-running
//! capture session.

use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::channel::CommandChannel;
use crate::error::ChannelError;
use crate::measurement::PollCycle;
use crate::protocol::Command;
use crate::sink::MeasurementSink;

/// Streaming parameters, fixed for the session.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    pub unit: String,
    pub channel_count: usize,
    /// Best-effort command returning the instrument to local/front-panel
    /// control at teardown; its failure is logged and swallowed.
    pub farewell: Option<Command>,
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub cycles: u64,
    pub skipped: u64,
}

pub struct StreamSession {
    channel: CommandChannel,
    settings: StreamSettings,
}

impl StreamSession {
    pub fn new(channel: CommandChannel, settings: StreamSettings) -> Self {
        Self { channel, settings }
    }

    /// Poll `resolved` until the token fires or the transport is lost.
    ///
    /// Per cycle: execute, parse every field positionally, emit to every
    /// sink. Timeouts, exhausted retries and malformed replies skip the
    /// cycle; only transport loss and sink failures end the session early.
    /// The inter-cycle sleep subtracts the cycle's own elapsed time so
    /// device latency jitter does not compound into drift.
    pub fn run(
        mut self,
        resolved: &Command,
        sinks: &mut [Box<dyn MeasurementSink>],
        cancel: &CancelToken,
    ) -> Result<StreamSummary> {
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.begin(self.settings.channel_count, &self.settings.unit) {
                self.shutdown();
                return Err(err);
            }
        }

        let started = Instant::now();
        let mut summary = StreamSummary {
            cycles: 0,
            skipped: 0,
        };
        let mut fatal: Option<anyhow::Error> = None;

        loop {
            if cancel.is_fired() {
                info!("cancellation requested, ending stream");
                break;
            }
            let cycle_start = Instant::now();

            match self.channel.execute_cancellable(resolved, Some(cancel)) {
                Ok(reply) => {
                    match PollCycle::from_reply(&reply, &self.settings.unit, started.elapsed()) {
                        Ok(cycle) if cycle.measurements.len() == self.settings.channel_count => {
                            if let Err(err) = emit(sinks, &cycle) {
                                error!("sink failure, ending stream: {err:#}");
                                fatal = Some(err);
                                break;
                            }
                            summary.cycles += 1;
                        }
                        Ok(cycle) => {
                            warn!(
                                "skipping cycle: got {} fields, expected {}",
                                cycle.measurements.len(),
                                self.settings.channel_count
                            );
                            summary.skipped += 1;
                        }
                        Err(err) => {
                            warn!("skipping cycle: {err}");
                            summary.skipped += 1;
                        }
                    }
                }
                Err(ChannelError::Cancelled) => {
                    info!("cancellation requested, ending stream");
                    break;
                }
                Err(ChannelError::Transport(t)) if !t.is_transient() => {
                    error!("transport lost, ending stream: {t}");
                    fatal = Some(t.into());
                    break;
                }
                Err(err) => {
                    warn!("poll failed, skipping cycle: {err}");
                    summary.skipped += 1;
                }
            }

            let budget = self
                .settings
                .poll_interval
                .saturating_sub(cycle_start.elapsed());
            if !budget.is_zero() && cancel.wait(budget) {
                info!("cancellation requested, ending stream");
                break;
            }
        }

        self.shutdown();
        info!(
            "stream ended: {} cycles emitted, {} skipped",
            summary.cycles, summary.skipped
        );
        match fatal {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Best-effort farewell, then release the transport. Always runs.
    fn shutdown(&mut self) {
        if let Some(farewell) = self.settings.farewell.clone() {
            match self.channel.send_line(&farewell.text) {
                Ok(()) => debug!("sent farewell {:?}", farewell.text),
                Err(err) => warn!("farewell {:?} not delivered: {err}", farewell.text),
            }
        }
        if let Err(err) = self.channel.close() {
            warn!("transport close failed: {err}");
        }
    }
}

fn emit(sinks: &mut [Box<dyn MeasurementSink>], cycle: &PollCycle) -> Result<()> {
    for sink in sinks.iter_mut() {
        sink.record(cycle)?;
    }
    Ok(())
}
