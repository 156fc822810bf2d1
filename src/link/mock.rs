//! In-memory transports for running the station without hardware.
//!
//! [`MockTransport::pair`] behaves like a connected socket pair. [`MockConnector`]
//! hands out a fresh pair on every successful connect and passes the far end to the
//! test (the "vehicle") through a channel.

use super::transport::{Connector, Transport, POLL_INTERVAL};
use crate::error::LinkError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    ready: Condvar,
    closed: AtomicBool,
}

impl Pipe {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _guard = self.bytes.lock();
        self.ready.notify_all();
    }
}

/// One end of an in-memory duplex stream
#[derive(Clone)]
pub struct MockTransport {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

impl MockTransport {
    pub fn pair() -> (MockTransport, MockTransport) {
        let a = Arc::new(Pipe::default());
        let b = Arc::new(Pipe::default());
        (
            MockTransport { rx: Arc::clone(&a), tx: Arc::clone(&b) },
            MockTransport { rx: b, tx: a },
        )
    }

    /// Hang up both directions, as if the cable was pulled
    pub fn hang_up(&self) {
        self.rx.close();
        self.tx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.rx.closed.load(Ordering::SeqCst) || self.tx.closed.load(Ordering::SeqCst)
    }

    /// Bytes waiting to be read on this end
    pub fn pending(&self) -> usize {
        self.rx.bytes.lock().len()
    }

    /// Read everything currently buffered on this end without waiting
    pub fn take_pending(&self) -> Vec<u8> {
        self.rx.bytes.lock().drain(..).collect()
    }

    /// Read one newline-terminated line, waiting up to `timeout`
    pub fn read_line_timeout(&self, timeout: std::time::Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut bytes = self.rx.bytes.lock();
        loop {
            if let Some(pos) = bytes.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = bytes.drain(..=pos).collect();
                return Some(String::from_utf8_lossy(&line).trim_end().to_string());
            }
            if self.rx.ready.wait_until(&mut bytes, deadline).timed_out() {
                return None;
            }
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + POLL_INTERVAL;
        let mut bytes = self.rx.bytes.lock();
        loop {
            if !bytes.is_empty() {
                let n = buffer.len().min(bytes.len());
                for (slot, byte) in buffer.iter_mut().zip(bytes.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if self.rx.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            if self.rx.ready.wait_until(&mut bytes, deadline).timed_out() {
                return Err(io::ErrorKind::TimedOut.into());
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.tx.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.tx.bytes.lock().extend(data.iter().copied());
        self.tx.ready.notify_all();
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }

    fn shutdown(&mut self) {
        self.hang_up();
    }
}

/// Connector that produces [`MockTransport`] pairs on demand
pub struct MockConnector {
    name: String,
    available: AtomicBool,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
    peers: Sender<MockTransport>,
}

impl MockConnector {
    /// Returns the connector and the receiver that yields the far end of each connection.
    pub fn new(name: &str) -> (Self, Receiver<MockTransport>) {
        let (tx, rx) = unbounded();
        (
            Self {
                name: name.to_string(),
                available: AtomicBool::new(true),
                attempts: AtomicUsize::new(0),
                attempt_times: Mutex::new(Vec::new()),
                peers: tx,
            },
            rx,
        )
    }

    /// While unavailable every connect attempt fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, LinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().push(Instant::now());

        if !self.available.load(Ordering::SeqCst) {
            return Err(LinkError::Connect {
                endpoint: self.endpoint(),
                reason: "endpoint unavailable".into(),
            });
        }

        let (near, far) = MockTransport::pair();
        // Nobody listening for the far end is not an error for the station side.
        let _ = self.peers.send(far);
        Ok(Box::new(near))
    }

    fn endpoint(&self) -> String {
        format!("mock:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pair_moves_bytes_both_ways() {
        let (mut a, mut b) = MockTransport::pair();
        a.write_all(b"hello\n").unwrap();
        b.write_all(b"back").unwrap();

        assert_eq!(b.read_line_timeout(Duration::from_millis(100)).as_deref(), Some("hello"));

        let mut buf = [0u8; 8];
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"back");
    }

    #[test]
    fn test_read_times_out_then_reports_hangup() {
        let (mut a, b) = MockTransport::pair();
        let mut buf = [0u8; 4];
        let err = a.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        b.hang_up();
        assert_eq!(a.read(&mut buf).unwrap(), 0);
        assert!(a.write_all(b"x").is_err());
    }

    #[test]
    fn test_connector_availability() {
        let (connector, peers) = MockConnector::new("serial");
        assert!(connector.connect().is_ok());
        assert!(peers.try_recv().is_ok());

        connector.set_available(false);
        assert!(matches!(connector.connect(), Err(LinkError::Connect { .. })));
        assert_eq!(connector.attempts(), 2);
    }
}
