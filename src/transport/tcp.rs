//! Raw TCP transport for the instrument's LAN interface.
//!
//! The analyzer listens on a plain socket (factory port 10733) and speaks the
//! same newline-terminated protocol as the serial path. Deadlines map onto
//! `set_read_timeout`; the half-duplex discipline comes from the channel
//! layer, not from the socket.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::TransportError;
use crate::transport::Transport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpTransport {
    pub fn open(host: &str, port: u16) -> Result<Self, TransportError> {
        let peer = format!("{host}:{port}");
        let addr = peer
            .to_socket_addrs()
            .map_err(|e| TransportError::NotFound(format!("{peer}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::NotFound(format!("{peer}: no address")))?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| {
            match e.kind() {
                io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(peer.clone()),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut => {
                    TransportError::NotFound(format!("{peer}: {e}"))
                }
                _ => TransportError::Io(e),
            }
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConfigRejected(format!("nodelay: {e}")))?;

        debug!("connected to {peer}");
        Ok(Self {
            stream: Some(stream),
            peer,
        })
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream_mut()?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(bytes.len())
    }

    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Vec::new());
        }
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(remaining))?;

        let mut buf = [0u8; 256];
        match stream.read(&mut buf) {
            // Orderly shutdown by the peer: the session is over.
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let stream = self.stream_mut()?;
        stream.set_nonblocking(true)?;
        let mut discarded = 0usize;
        let mut buf = [0u8; 256];
        let outcome = loop {
            match stream.read(&mut buf) {
                Ok(0) => break Err(TransportError::Closed),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(TransportError::Io(e)),
            }
        };
        stream.set_nonblocking(false)?;
        if discarded > 0 {
            debug!("discarded {discarded} stale bytes from {}", self.peer);
        }
        outcome
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("closed connection to {}", self.peer);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.peer)
    }
}
