//! Scripted in-process transport for tests and the `--mock` demo device.
//!
//! A responder closure maps each complete command line the "device" receives
//! to an optional reply line. Write and close counts are observable through
//! shared handles so tests can assert on retry attempts and exactly-once
//! close behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::Transport;

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

pub struct MockTransport {
    responder: Responder,
    inbox: VecDeque<u8>,
    partial: Vec<u8>,
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    closed: bool,
    terminate_replies: bool,
}

impl MockTransport {
    pub fn new(responder: impl FnMut(&str) -> Option<String> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            inbox: VecDeque::new(),
            partial: Vec::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
            closed: false,
            terminate_replies: true,
        }
    }

    /// Like [`MockTransport::new`], but reply bytes go out exactly as the
    /// responder produced them — no terminator is appended. Lets tests
    /// simulate a device that truncates mid-line.
    pub fn new_raw(responder: impl FnMut(&str) -> Option<String> + Send + 'static) -> Self {
        let mut mock = Self::new(responder);
        mock.terminate_replies = false;
        mock
    }

    /// Device that echoes every command line back verbatim.
    pub fn echo() -> Self {
        Self::new(|line| Some(line.to_string()))
    }

    /// Device that never answers anything.
    pub fn silent() -> Self {
        Self::new(|_| None)
    }

    /// Plausible three-channel analyzer for offline demo runs: answers
    /// identity queries and the stock `READ? VOLTS:CH…` spelling with
    /// slowly drifting mains-like voltages.
    pub fn demo() -> Self {
        let mut tick = 0u64;
        Self::new(move |line| {
            if line == "*IDN?" {
                return Some("Vendor,M2000,12345,1,0,3".to_string());
            }
            if line.starts_with("READ?") && line.contains("VOLTS:CH") {
                tick += 1;
                let t = tick as f64;
                return Some(format!(
                    "{:.3},{:.3},{:.3}",
                    118.0 + (t * 0.7).sin() * 0.4,
                    117.8 + (t * 0.9).cos() * 0.3,
                    118.2 + (t * 0.5).sin() * 0.5,
                ));
            }
            // Bare setup commands and unknown queries get no reply.
            None
        })
    }

    /// Handle onto the log of command lines the device has received.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    /// Handle onto the number of effective closes (idempotent re-closes are
    /// not counted).
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.partial.extend_from_slice(bytes);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(line.clone());
            if let Some(reply) = (self.responder)(&line) {
                self.inbox.extend(reply.as_bytes());
                if self.terminate_replies && !reply.ends_with('\n') {
                    self.inbox.push_back(b'\n');
                }
            }
        }
        Ok(bytes.len())
    }

    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.inbox.is_empty() {
            // Nothing pending; burn a slice of the deadline like a real
            // device that has not answered yet.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                std::thread::sleep(remaining.min(Duration::from_millis(2)));
            }
            return Ok(Vec::new());
        }
        Ok(self.inbox.drain(..).collect())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.inbox.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_replies_line_by_line() {
        let mut mock = MockTransport::echo();
        mock.write(b"*IDN?\n").unwrap();
        let got = mock
            .read_available(Instant::now() + Duration::from_millis(10))
            .unwrap();
        assert_eq!(got, b"*IDN?\n");
    }

    #[test]
    fn reset_discards_pending_reply() {
        let mut mock = MockTransport::echo();
        mock.write(b"STALE\n").unwrap();
        mock.reset().unwrap();
        let got = mock
            .read_available(Instant::now() + Duration::from_millis(5))
            .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn close_is_idempotent_but_counted_once() {
        let mut mock = MockTransport::silent();
        let closes = mock.close_counter();
        mock.close().unwrap();
        mock.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            mock.write(b"X\n"),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn partial_writes_accumulate_into_one_command() {
        let mut mock = MockTransport::echo();
        let log = mock.sent_log();
        mock.write(b"READ? VOL").unwrap();
        mock.write(b"TS:CH1\n").unwrap();
        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["READ? VOLTS:CH1".to_string()]
        );
    }
}
