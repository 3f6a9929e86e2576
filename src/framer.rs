//! Accumulates transport bytes into newline-terminated lines under a deadline.

use std::time::Instant;

use crate::error::ChannelError;
use crate::transport::Transport;

/// One `\n`-terminated unit as received from the device.
///
/// `raw` holds the line bytes without the terminator; `text` is the decoded
/// form with any trailing `\r` stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub raw: Vec<u8>,
    pub text: String,
}

/// Stateful line assembler.
///
/// Bytes received after a terminator are retained for the next call, so a
/// device that pipelines two lines into one burst loses nothing. A timed-out
/// partial line is discarded wholesale: a truncated read is not a valid reply
/// and must never be interpreted as one.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any buffered bytes (stale leftovers from a prior exchange).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Read one line, polling the transport until `deadline`.
    pub fn read_line(
        &mut self,
        transport: &mut dyn Transport,
        deadline: Instant,
    ) -> Result<Line, ChannelError> {
        let budget = deadline.saturating_duration_since(Instant::now());
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                let text = String::from_utf8_lossy(&raw).to_string();
                return Ok(Line { raw, text });
            }

            if Instant::now() >= deadline {
                // All-or-nothing: a partial line is worthless.
                self.buffer.clear();
                return Err(ChannelError::Timeout(budget));
            }

            let chunk = transport.read_available(deadline)?;
            self.buffer.extend_from_slice(&chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    #[test]
    fn strips_carriage_return() {
        let mut mock = MockTransport::new(|_| Some("118.301\r\n".to_string()));
        let mut framer = LineFramer::new();
        mock.write(b"READ?\n").unwrap();
        let line = framer.read_line(&mut mock, soon()).unwrap();
        assert_eq!(line.text, "118.301");
        assert_eq!(line.raw, b"118.301");
    }

    #[test]
    fn retains_bytes_after_terminator_for_next_call() {
        // Two lines arrive in one burst; both must come out intact.
        let mut mock = MockTransport::new(|_| Some("first\nsecond\n".to_string()));
        let mut framer = LineFramer::new();
        mock.write(b"GO\n").unwrap();
        let a = framer.read_line(&mut mock, soon()).unwrap();
        let b = framer.read_line(&mut mock, soon()).unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
    }

    #[test]
    fn timeout_discards_partial_line() {
        // Truncated reply with no terminator: the framer must time out and
        // forget the fragment rather than splice it onto the next reply.
        let mut replied = false;
        let mut mock = MockTransport::new_raw(move |_| {
            if replied {
                Some("late-tail\n".to_string())
            } else {
                replied = true;
                Some("118.".to_string())
            }
        });
        let mut framer = LineFramer::new();
        mock.write(b"GO\n").unwrap();
        let err = framer
            .read_line(&mut mock, Instant::now() + Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));

        // Next exchange must see only its own reply, not "118.late-tail".
        mock.write(b"GO\n").unwrap();
        let line = framer.read_line(&mut mock, soon()).unwrap();
        assert_eq!(line.text, "late-tail");
    }

    #[test]
    fn timeout_on_silent_device() {
        let mut mock = MockTransport::silent();
        let mut framer = LineFramer::new();
        let start = Instant::now();
        let err = framer
            .read_line(&mut mock, start + Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
