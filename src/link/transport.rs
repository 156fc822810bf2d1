//! Byte-stream transports behind a [`LinkChannel`](super::LinkChannel)

use crate::error::LinkError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long a single blocking read may wait before the caller gets to re-check its
/// deadline and the close flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Open duplex byte stream
///
/// `read` follows `std::io::Read`, except that a poll timeout surfaces as
/// `ErrorKind::TimedOut` or `WouldBlock` and `Ok(0)` always means the peer hung up.
pub trait Transport: Send {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Second handle on the same stream, so reads and writes lock independently
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;

    /// Tear the stream down so reads on every clone return promptly
    fn shutdown(&mut self) {}
}

/// Knows how to (re)open one endpoint
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Transport>, LinkError>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self) -> Result<Box<dyn Transport>, LinkError> {
        (**self).connect()
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}

/// Serial transport for the control/telemetry link
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buffer) {
            // serial reads never signal EOF, an empty read is just a quiet line
            Ok(0) => Err(io::ErrorKind::TimedOut.into()),
            other => other,
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport { port }))
    }
}

pub struct SerialConnector {
    pub path: String,
    pub baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, LinkError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_INTERVAL)
            .open()
            .map_err(|e| LinkError::Connect {
                endpoint: self.endpoint(),
                reason: e.to_string(),
            })?;

        info!("opened serial port {} at {} baud", self.path, self.baud_rate);
        Ok(Box::new(SerialTransport { port }))
    }

    fn endpoint(&self) -> String {
        format!("serial:{}", self.path)
    }
}

/// TCP transport for the video link
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an already connected stream (accepted sockets on the vehicle side).
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buffer)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.stream, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport {
            stream: self.stream.try_clone()?,
        }))
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("tcp shutdown: {}", e);
        }
    }
}

pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, LinkError> {
        let fail = |reason: String| LinkError::Connect {
            endpoint: self.endpoint(),
            reason,
        };

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| fail(e.to_string()))?;

        let mut last_err = String::from("no address resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    let transport = TcpTransport::from_stream(stream).map_err(|e| fail(e.to_string()))?;
                    info!("connected to {}", addr);
                    return Ok(Box::new(transport));
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(fail(last_err))
    }

    fn endpoint(&self) -> String {
        format!("tcp:{}:{}", self.host, self.port)
    }
}
