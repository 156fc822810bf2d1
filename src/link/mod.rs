pub mod backoff;
pub mod mock;
pub mod transport;

pub use backoff::Backoff;
pub use transport::{Connector, SerialConnector, TcpConnector, TcpTransport, Transport, POLL_INTERVAL};

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::LinkError;

//lines longer than this are garbage (wrong baud rate, binary noise)
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState{
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Faulted = 3,
}

impl LinkState{
    fn from_u8(val: u8) -> Self{
        match val{
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            3 => LinkState::Faulted,
            _ => LinkState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str{
        match self{
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Faulted => "faulted",
        }
    }
}

impl std::fmt::Display for LinkState{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result{
        f.write_str(self.as_str())
    }
}

//read half plus bytes received but not yet handed out
struct LinkReader{
    transport: Box<dyn Transport>,
    pending: Vec<u8>,
}

//duplex byte stream with independent read and write locks, so a blocked
//read never holds up a command write
pub struct LinkChannel{
    name: &'static str,
    connector: Box<dyn Connector>,
    state: AtomicU8,
    closed: AtomicBool,
    reader: Mutex<Option<LinkReader>>,
    writer: Mutex<Option<Box<dyn Transport>>>,
}

impl LinkChannel{
    //channel in Disconnected state, nothing opened yet
    pub fn new(name: &'static str, connector: Box<dyn Connector>) -> Self{
        LinkChannel{
            name,
            connector,
            state: AtomicU8::new(LinkState::Disconnected as u8),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    //create and connect in one go
    pub fn open(name: &'static str, connector: Box<dyn Connector>) -> Result<Self, LinkError>{
        let channel = Self::new(name, connector);
        channel.connect()?;
        Ok(channel)
    }

    pub fn name(&self) -> &'static str{
        self.name
    }

    pub fn endpoint(&self) -> String{
        self.connector.endpoint()
    }

    pub fn state(&self) -> LinkState{
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool{
        self.state() == LinkState::Connected
    }

    pub fn is_closed(&self) -> bool{
        self.closed.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: LinkState){
        let prev = LinkState::from_u8(self.state.swap(state as u8, Ordering::SeqCst));
        if prev != state{
            debug!("{} link {} -> {}", self.name, prev, state);
        }
    }

    //(re)open the endpoint. the old transport, if any, is dropped first
    pub fn connect(&self) -> Result<(), LinkError>{
        if self.is_closed(){
            return Err(LinkError::Closed);
        }
        self.drop_transport();
        self.set_state(LinkState::Connecting);

        let opened = self.connector.connect().and_then(|transport|{
            let write_half = transport.try_clone()?;
            Ok((transport, write_half))
        });

        match opened{
            Ok((read_half, write_half)) =>{
                *self.reader.lock() = Some(LinkReader{ transport: read_half, pending: Vec::new() });
                *self.writer.lock() = Some(write_half);

                //close() may have raced with the connect
                if self.is_closed(){
                    self.drop_transport();
                    self.set_state(LinkState::Disconnected);
                    return Err(LinkError::Closed);
                }
                self.set_state(LinkState::Connected);
                info!("{} link connected to {}", self.name, self.connector.endpoint());
                Ok(())
            }
            Err(e) =>{
                self.set_state(LinkState::Faulted);
                Err(e)
            }
        }
    }

    //mark the channel broken. the owner decides when to reconnect
    pub fn mark_faulted(&self){
        if self.is_closed(){
            return;
        }
        if self.state() != LinkState::Faulted{
            warn!("{} link faulted", self.name);
        }
        self.set_state(LinkState::Faulted);
        if let Some(writer) = self.writer.lock().as_mut(){
            writer.shutdown();
        }
    }

    //unblocks any in-flight read with Closed. a closed channel stays closed
    pub fn close(&self){
        self.closed.store(true, Ordering::SeqCst);
        if let Some(writer) = self.writer.lock().as_mut(){
            writer.shutdown();
        }
        self.drop_transport();
        self.set_state(LinkState::Disconnected);
    }

    fn drop_transport(&self){
        if let Some(mut writer) = self.writer.lock().take(){
            writer.shutdown();
        }
        //the reader lock is held for at most one poll interval by an in-flight read
        self.reader.lock().take();
    }

    //read up to and excluding the next '\n'; a trailing '\r' is stripped
    pub fn read_line(&self, timeout: Duration) -> Result<Vec<u8>, LinkError>{
        let deadline = Instant::now() + timeout;
        let mut guard = self.reader.lock();

        loop{
            self.check_readable()?;
            let reader = guard.as_mut().ok_or(LinkError::Closed)?;

            if let Some(pos) = reader.pending.iter().position(|&b| b == b'\n'){
                let mut line: Vec<u8> = reader.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r'){
                    line.pop();
                }
                return Ok(line);
            }

            if reader.pending.len() > MAX_LINE_LEN{
                warn!("{} link: discarding {} bytes without newline", self.name, reader.pending.len());
                reader.pending.clear();
            }

            if Instant::now() >= deadline{
                return Err(LinkError::Timeout(timeout));
            }
            self.fill(reader)?;
        }
    }

    //read exactly n bytes. on timeout the bytes received so far stay buffered
    //for the next call
    pub fn read_exact(&self, n: usize, timeout: Duration) -> Result<Vec<u8>, LinkError>{
        let deadline = Instant::now() + timeout;
        let mut guard = self.reader.lock();

        loop{
            self.check_readable()?;
            let reader = guard.as_mut().ok_or(LinkError::Closed)?;

            if reader.pending.len() >= n{
                return Ok(reader.pending.drain(..n).collect());
            }
            if Instant::now() >= deadline{
                return Err(LinkError::Timeout(timeout));
            }
            self.fill(reader)?;
        }
    }

    //bytes buffered but not yet consumed
    pub fn pending_len(&self) -> usize{
        self.reader.lock().as_ref().map(|r| r.pending.len()).unwrap_or(0)
    }

    //drop any partially received data (used to resync after a framing error)
    pub fn discard_pending(&self) -> usize{
        match self.reader.lock().as_mut(){
            Some(reader) =>{
                let n = reader.pending.len();
                reader.pending.clear();
                n
            }
            None => 0,
        }
    }

    //push bytes back to the front of the read buffer
    pub fn unread(&self, bytes: &[u8]){
        if let Some(reader) = self.reader.lock().as_mut(){
            reader.pending.splice(0..0, bytes.iter().copied());
        }
    }

    fn check_readable(&self) -> Result<(), LinkError>{
        if self.is_closed(){
            return Err(LinkError::Closed);
        }
        match self.state(){
            LinkState::Connected => Ok(()),
            _ => Err(LinkError::Closed),
        }
    }

    //one poll-interval read into pending
    fn fill(&self, reader: &mut LinkReader) -> Result<(), LinkError>{
        let mut buf = [0u8; 1024];
        match reader.transport.read(&mut buf){
            Ok(0) => Err(LinkError::Closed),
            Ok(n) =>{
                reader.pending.extend_from_slice(&buf[..n]);
                Ok(())
            }
            Err(ref e) if is_poll_timeout(e) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(LinkError::Io(e)),
        }
    }

    //write and flush. fails with Unavailable when not connected
    pub fn write(&self, bytes: &[u8]) -> Result<usize, LinkError>{
        if self.is_closed(){
            return Err(LinkError::Closed);
        }
        if !self.is_connected(){
            return Err(LinkError::Unavailable(self.name));
        }

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(LinkError::Unavailable(self.name))?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(bytes.len())
    }
}

impl Drop for LinkChannel{
    fn drop(&mut self){
        self.drop_transport();
    }
}

pub(crate) fn is_poll_timeout(e: &io::Error) -> bool{
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
