/**
 * Telemetry Multiplexer
 *
 * Owns the two link channels and their read loops:
 * 1. Serial loop: newline records -> controller snapshots and sensor readings
 * 2. Video loop: FrameCodec header + payload -> frames
 *
 * Outbound commands are encoded here and written through the command queue.
 * Each loop reconnects its own channel with bounded exponential backoff, so a
 * fault on one channel never stalls the other.
 */

mod queue;
mod serial;
mod video;

pub use queue::{CommandQueue, SendOutcome};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::StationConfig;
use crate::error::StationError;
use crate::link::{Backoff, Connector, LinkChannel, LinkState, SerialConnector, TcpConnector};
use crate::protocol::{frame, ActuatorCommand, Frame, STREAM_START, STREAM_STOP};
use crate::pubsub::EventSink;
use crate::ring_buffer::Supersede;
use crate::telemetry::{ControllerState, SensorReading};

/// Which of the two data channels an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Serial,
    Video,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Serial => "serial",
            ChannelKind::Video => "video",
        }
    }
}

/// Decoded inbound event
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Controller(ControllerState),
    Sensor(SensorReading),
    Frame(Arc<Frame>),
    Link { channel: ChannelKind, state: LinkState },
}

impl Supersede for TelemetryEvent {
    fn is_supersedable(&self) -> bool {
        !matches!(self, TelemetryEvent::Link { .. })
    }
}

/// Timing and sizing for the multiplexer
#[derive(Debug, Clone)]
pub struct MuxSettings {
    pub serial_timeout: Duration,
    pub video_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub command_queue_capacity: usize,
    /// Send the stream-start byte as soon as the video channel connects
    pub auto_start_video: bool,
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            serial_timeout: Duration::from_millis(1000),
            video_timeout: Duration::from_millis(2000),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            command_queue_capacity: 32,
            auto_start_video: true,
        }
    }
}

impl From<&StationConfig> for MuxSettings {
    fn from(config: &StationConfig) -> Self {
        Self {
            serial_timeout: config.serial.timeout(),
            video_timeout: config.video.timeout(),
            backoff_initial: Duration::from_millis(config.link.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.link.backoff_max_ms),
            command_queue_capacity: config.link.command_queue_capacity,
            auto_start_video: config.video.auto_start,
        }
    }
}

/// State shared between the multiplexer handle and its read loops
pub(crate) struct Shared {
    pub(crate) serial: LinkChannel,
    pub(crate) video: LinkChannel,
    pub(crate) commands: CommandQueue,
    pub(crate) streaming: AtomicBool,
    pub(crate) running: AtomicBool,
    pub(crate) settings: MuxSettings,
    pub(crate) sink: Arc<dyn EventSink<TelemetryEvent>>,
}

impl Shared {
    fn emit_link(&self, channel: ChannelKind, state: LinkState) {
        self.sink.emit(TelemetryEvent::Link { channel, state });
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, waking early on shutdown. Returns false if shutting down.
    fn sleep_while_running(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
        false
    }

    /// Reopen `channel` until it connects or the multiplexer shuts down.
    ///
    /// Emits Faulted once per outage (unless the read loop already did) and
    /// Connected once the channel is back.
    fn reconnect(&self, kind: ChannelKind, channel: &LinkChannel, backoff: &mut Backoff) -> bool {
        debug!("{} link connecting to {}", kind.as_str(), channel.endpoint());
        let mut reported = channel.state() == LinkState::Faulted;
        while self.is_running() {
            match channel.connect() {
                Ok(()) => {
                    if backoff.attempts() > 0 {
                        info!("{} link restored after {} attempts", kind.as_str(), backoff.attempts());
                    }
                    backoff.reset();
                    self.emit_link(kind, LinkState::Connected);
                    return true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("{} connect failed: {} (retry in {:?})", kind.as_str(), e, delay);
                    if !reported {
                        reported = true;
                        self.emit_link(kind, LinkState::Faulted);
                    }
                    if !self.sleep_while_running(delay) {
                        break;
                    }
                }
            }
        }
        false
    }

    fn channel(&self, kind: ChannelKind) -> &LinkChannel {
        match kind {
            ChannelKind::Serial => &self.serial,
            ChannelKind::Video => &self.video,
        }
    }

    /// Push the current stream on/off request to the vehicle. Returns true if written.
    fn send_stream_control(&self) -> bool {
        let on = self.streaming.load(Ordering::SeqCst);
        let byte = if on { STREAM_START } else { STREAM_STOP };
        match self.video.write(&[byte]) {
            Ok(_) => {
                debug!("video stream {}", if on { "start" } else { "stop" });
                true
            }
            Err(e) => {
                debug!("video stream control not sent: {}", e);
                if e.is_fault() {
                    self.video.mark_faulted();
                }
                false
            }
        }
    }
}

/// Owns both channels and their read loop threads
pub struct TelemetryMultiplexer {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TelemetryMultiplexer {
    /// Build connectors from the configuration and start both loops
    pub fn from_config(config: &StationConfig, sink: Arc<dyn EventSink<TelemetryEvent>>) -> Self {
        let serial = SerialConnector::new(&config.serial.port, config.serial.baud_rate);
        let video = TcpConnector::new(&config.video.host, config.video.port, config.video.timeout());
        Self::start(Box::new(serial), Box::new(video), MuxSettings::from(config), sink)
    }

    /// Start both read loops. Channels connect in the background.
    pub fn start(
        serial: Box<dyn Connector>,
        video: Box<dyn Connector>,
        settings: MuxSettings,
        sink: Arc<dyn EventSink<TelemetryEvent>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            serial: LinkChannel::new("serial", serial),
            video: LinkChannel::new("video", video),
            commands: CommandQueue::new(settings.command_queue_capacity),
            streaming: AtomicBool::new(settings.auto_start_video),
            running: AtomicBool::new(true),
            settings,
            sink,
        });

        let serial_loop = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("mux-serial".into())
                .spawn(move || serial::run(&shared))
        };
        let video_loop = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("mux-video".into())
                .spawn(move || video::run(&shared))
        };

        let mut handles = Vec::new();
        for spawned in [serial_loop, video_loop] {
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("failed to spawn read loop: {}", e),
            }
        }

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Encode and write a command, or queue it while the serial link is down
    pub fn send_command(&self, command: ActuatorCommand) -> Result<SendOutcome, StationError> {
        command.encode()?;
        Ok(self.shared.commands.submit(command, &self.shared.serial))
    }

    /// Write one encoded frame to the video channel
    pub fn send_frame(&self, frame: &Frame) -> Result<(), StationError> {
        let video = &self.shared.video;
        if !video.is_connected() {
            return Err(StationError::LinkUnavailable("video"));
        }
        video.write(&frame::encode(frame)).map_err(|e| {
            warn!("frame write failed: {}", e);
            if e.is_fault() {
                video.mark_faulted();
            }
            StationError::LinkUnavailable("video")
        })?;
        Ok(())
    }

    /// Ask the vehicle to start or stop streaming. The request is remembered and
    /// re-sent whenever the video channel reconnects. Returns true if it reached
    /// the vehicle now.
    pub fn set_video_streaming(&self, on: bool) -> bool {
        self.shared.streaming.store(on, Ordering::SeqCst);
        self.shared.video.is_connected() && self.shared.send_stream_control()
    }

    pub fn video_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
    }

    pub fn link_state(&self, channel: ChannelKind) -> LinkState {
        self.shared.channel(channel).state()
    }

    /// Commands waiting for the serial link
    pub fn queued_commands(&self) -> usize {
        self.shared.commands.len()
    }

    pub fn dropped_commands(&self) -> u64 {
        self.shared.commands.dropped()
    }

    /// Stop both loops and close the channels. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!("multiplexer shutting down");
        }
        self.shared.serial.close();
        self.shared.video.close();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("read loop panicked");
            }
        }
    }
}

impl Drop for TelemetryMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
