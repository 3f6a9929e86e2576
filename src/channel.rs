//! Serialized command/reply exchange with bounded retry.
//!
//! A [`CommandChannel`] owns its transport for the channel's whole lifetime
//! and runs exactly one command/response pair at a time — the instruments
//! reply to the *last* command received, so interleaving breaks correlation
//! even over a full-duplex socket. Exclusivity is enforced by `&mut self` on
//! [`CommandChannel::execute`]: there is no way to pipeline through a shared
//! handle.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::error::{ChannelError, TransportError};
use crate::framer::LineFramer;
use crate::protocol::{Command, Reply};
use crate::transport::Transport;

/// Settle time after fire-and-forget setup commands; the instruments need a
/// beat before accepting the next line.
const BARE_COMMAND_SETTLE: Duration = Duration::from_millis(200);

/// Retry behavior as data, shared by every exchange on a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per command; at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Deadline for one send-and-read exchange.
    #[serde(with = "humantime_serde", default = "default_per_attempt_timeout")]
    pub per_attempt_timeout: Duration,
    /// Pause between failed attempts.
    #[serde(with = "humantime_serde", default = "default_inter_attempt_delay")]
    pub inter_attempt_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_per_attempt_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_inter_attempt_delay() -> Duration {
    Duration::from_millis(200)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            per_attempt_timeout: default_per_attempt_timeout(),
            inter_attempt_delay: default_inter_attempt_delay(),
        }
    }
}

/// One half-duplex conversation with an instrument.
pub struct CommandChannel {
    transport: Box<dyn Transport>,
    framer: LineFramer,
    policy: RetryPolicy,
}

impl CommandChannel {
    pub fn new(transport: Box<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            framer: LineFramer::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport_description(&self) -> String {
        self.transport.describe()
    }

    /// Run one command to completion under the channel's retry policy.
    pub fn execute(&mut self, command: &Command) -> Result<Reply, ChannelError> {
        self.execute_cancellable(command, None)
    }

    /// Like [`CommandChannel::execute`], but a fired token observed between
    /// attempts abandons the retry loop with [`ChannelError::Cancelled`].
    /// The in-flight attempt still finishes or times out naturally, so
    /// cancellation latency is bounded by one per-attempt timeout.
    pub fn execute_cancellable(
        &mut self,
        command: &Command,
        cancel: Option<&CancelToken>,
    ) -> Result<Reply, ChannelError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = ChannelError::Timeout(self.policy.per_attempt_timeout);

        for attempt in 1..=attempts {
            if let Some(token) = cancel {
                if token.is_fired() {
                    return Err(ChannelError::Cancelled);
                }
            }
            if attempt > 1 {
                let delay = self.policy.inter_attempt_delay;
                match cancel {
                    Some(token) if token.wait(delay) => return Err(ChannelError::Cancelled),
                    Some(_) => {}
                    None => thread::sleep(delay),
                }
            }

            match self.attempt(command) {
                Ok(reply) => {
                    if attempt > 1 {
                        debug!("{:?} succeeded on attempt {attempt}", command.text);
                    }
                    return Ok(reply);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        "{:?} attempt {attempt}/{attempts} failed: {err}",
                        command.text
                    );
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ChannelError::ExhaustedRetries {
            command: command.text.clone(),
            attempts,
            last: Box::new(last),
        })
    }

    /// One reset → write → read exchange.
    fn attempt(&mut self, command: &Command) -> Result<Reply, ChannelError> {
        // Stale bytes from a prior exchange would corrupt framing of this
        // reply; drop them on both sides of the conversation.
        self.framer.clear();
        self.transport.reset()?;

        let mut wire = command.text.clone().into_bytes();
        wire.push(b'\n');
        self.transport.write(&wire)?;
        debug!("TX {}", command.text);

        if !command.expects_reply {
            return Ok(Reply::acknowledgement());
        }

        let deadline = Instant::now() + self.policy.per_attempt_timeout;
        let line = self.framer.read_line(self.transport.as_mut(), deadline)?;
        debug!("RX {}", line.text);

        if line.text.trim().is_empty() {
            return Err(ChannelError::EmptyReply);
        }
        Ok(Reply::from_line(line.text))
    }

    /// Run an ordered device setup sequence, with a settle pause after each
    /// fire-and-forget command.
    pub fn run_sequence(&mut self, commands: &[Command]) -> Result<(), ChannelError> {
        for command in commands {
            let reply = self.execute(command)?;
            if command.expects_reply {
                debug!("{} => {}", command.text, reply.text);
            } else {
                thread::sleep(BARE_COMMAND_SETTLE);
            }
        }
        Ok(())
    }

    /// Fire one line at the device without retry and without waiting for a
    /// reply. Used for best-effort farewells where failure is acceptable.
    pub fn send_line(&mut self, text: &str) -> Result<(), ChannelError> {
        self.transport.reset()?;
        let mut wire = text.as_bytes().to_vec();
        wire.push(b'\n');
        self.transport.write(&wire)?;
        debug!("TX {text}");
        Ok(())
    }

    /// Release the transport. Idempotent at the transport level.
    pub fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::Ordering;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_millis(30),
            inter_attempt_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn round_trips_an_echoed_command() {
        let mut channel = CommandChannel::new(Box::new(MockTransport::echo()), fast_policy());
        let reply = channel.execute(&Command::query("*IDN?")).unwrap();
        assert_eq!(reply.text, "*IDN?");
    }

    #[test]
    fn identity_scenario_splits_fields() {
        let mock = MockTransport::new(|line| {
            (line == "*IDN?").then(|| "Vendor,Model,12345,1,0,3".to_string())
        });
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let reply = channel.execute(&Command::query("*IDN?")).unwrap();
        assert_eq!(
            reply.fields,
            vec!["Vendor", "Model", "12345", "1", "0", "3"]
        );
    }

    #[test]
    fn silent_device_exhausts_retries_with_attempt_count() {
        let mock = MockTransport::silent();
        let sent = mock.sent_log();
        let policy = fast_policy();
        let mut channel = CommandChannel::new(Box::new(mock), policy.clone());

        let start = Instant::now();
        let err = channel.execute(&Command::query("READ?")).unwrap_err();
        let elapsed = start.elapsed();

        match err {
            ChannelError::ExhaustedRetries { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ChannelError::Timeout(_)));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(sent.lock().unwrap().len(), 3);
        // 3 × 30ms timeouts + 2 × 10ms delays, with scheduling slack.
        assert!(elapsed >= Duration::from_millis(90));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn closed_transport_aborts_without_retry() {
        let mut mock = MockTransport::silent();
        mock.close().unwrap();
        let sent = mock.sent_log();
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let err = channel.execute(&Command::query("READ?")).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Transport(TransportError::Closed)
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_reply_is_retried() {
        // First reply is a bare terminator, second is real data.
        let mut calls = 0;
        let mock = MockTransport::new(move |_| {
            calls += 1;
            Some(if calls == 1 {
                "\n".to_string()
            } else {
                "42.0".to_string()
            })
        });
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let reply = channel.execute(&Command::query("READ?")).unwrap();
        assert_eq!(reply.text, "42.0");
    }

    #[test]
    fn device_error_reply_is_communication_success() {
        let mock = MockTransport::new(|_| Some("ERR -113,\"Undefined header\"".to_string()));
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let reply = channel.execute(&Command::query("BOGUS?")).unwrap();
        assert!(reply.is_device_error());
    }

    #[test]
    fn fired_token_stops_the_retry_loop() {
        let mock = MockTransport::silent();
        let sent = mock.sent_log();
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let token = CancelToken::new();
        token.fire();
        let err = channel
            .execute_cancellable(&Command::query("READ?"), Some(&token))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Cancelled));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn bare_commands_skip_the_read() {
        let mock = MockTransport::silent();
        let sent = mock.sent_log();
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let reply = channel.execute(&Command::bare("*CLS")).unwrap();
        assert!(reply.text.is_empty());
        assert_eq!(sent.lock().unwrap().as_slice(), ["*CLS".to_string()]);
    }

    #[test]
    fn close_releases_exactly_once() {
        let mock = MockTransport::echo();
        let closes = mock.close_counter();
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        channel.close().unwrap();
        channel.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
