/**
 * Station Controller
 *
 * Single consumer of the station inbox:
 * 1. Applies telemetry, link and liveness events to the TelemetryState
 * 2. Turns operator actions into mode transitions and actuator commands
 * 3. Forwards controller input to the drive mixer while in Manual
 * 4. Forces EmergencyStop when both channels stay down past the grace period
 *
 * Front ends never touch the state directly: they dispatch actions into the
 * inbox and read published snapshots through a subscriber.
 */

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::mixer::{DriveMixer, DriveOutput};
use super::mode::{transition, ModeEffect, ModeEvent, VehicleMode};
use crate::config::{ConfigStore, StationConfig};
use crate::error::StationError;
use crate::link::{Connector, LinkState, SerialConnector, TcpConnector};
use crate::liveness::{LivenessMonitor, LivenessStatus, PingProber, Prober};
use crate::mux::{ChannelKind, MuxSettings, TelemetryEvent, TelemetryMultiplexer};
use crate::protocol::ActuatorCommand;
use crate::pubsub::{EventSink, Inbox, Publisher, Subscriber};
use crate::ring_buffer::Supersede;
use crate::telemetry::{FrameSample, SensorValue, TelemetryState};

/// How long `dispatch` waits for the consumer loop to act on an action
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Operator request from a front end
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    Start,
    Stop,
    EmergencyStop,
    AutonomousConfirm,
    Reset,
    UpdateConfig { key: String, value: String },
    PingVehicle,
    EnableCamera(bool),
    SaveConfig,
}

impl FromStr for UiAction {
    type Err = StationError;

    /// Operator command words: `start`, `stop`, `estop`, `auto`, `reset`, `ping`,
    /// `save`, `camera on|off`, `set <key> <value>`
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();
        let action = match verb.as_str() {
            "start" => UiAction::Start,
            "stop" => UiAction::Stop,
            "estop" | "emergency_stop" => UiAction::EmergencyStop,
            "auto" | "autonomous" => UiAction::AutonomousConfirm,
            "reset" => UiAction::Reset,
            "ping" => UiAction::PingVehicle,
            "save" => UiAction::SaveConfig,
            "camera" => match words.next() {
                Some("on") => UiAction::EnableCamera(true),
                Some("off") => UiAction::EnableCamera(false),
                _ => return Err(StationError::UnknownAction(line.trim().to_string())),
            },
            "set" => {
                let key = words.next();
                let value = words.collect::<Vec<_>>().join(" ");
                match key {
                    Some(key) if !value.is_empty() => UiAction::UpdateConfig {
                        key: key.to_string(),
                        value,
                    },
                    _ => return Err(StationError::UnknownAction(line.trim().to_string())),
                }
            }
            _ => return Err(StationError::UnknownAction(line.trim().to_string())),
        };
        Ok(action)
    }
}

type Reply = Sender<Result<(), StationError>>;

/// Everything that flows into the station inbox
#[derive(Debug)]
pub enum StationEvent {
    Telemetry(TelemetryEvent),
    Liveness(LivenessStatus),
    Action(UiAction, Option<Reply>),
}

impl From<TelemetryEvent> for StationEvent {
    fn from(event: TelemetryEvent) -> Self {
        StationEvent::Telemetry(event)
    }
}

impl From<LivenessStatus> for StationEvent {
    fn from(status: LivenessStatus) -> Self {
        StationEvent::Liveness(status)
    }
}

impl Supersede for StationEvent {
    fn is_supersedable(&self) -> bool {
        match self {
            StationEvent::Telemetry(event) => event.is_supersedable(),
            StationEvent::Liveness(_) => true,
            StationEvent::Action(..) => false,
        }
    }
}

/// State owned by the consumer loop
pub(crate) struct StationCore {
    state: TelemetryState,
    store: ConfigStore,
    config: StationConfig,
    mixer: DriveMixer,
    mux: TelemetryMultiplexer,
    liveness: Option<LivenessMonitor>,
    publisher: Publisher<TelemetryState>,
    //armed by the first Connected -> down edge, so a station that never linked up
    //does not latch at boot
    both_down_since: Option<Instant>,
    link_seen: bool,
    grace_fired: bool,
    dirty: bool,
}

impl StationCore {
    fn new(
        store: ConfigStore,
        config: StationConfig,
        mux: TelemetryMultiplexer,
        liveness: Option<LivenessMonitor>,
        publisher: Publisher<TelemetryState>,
    ) -> Self {
        let mixer = DriveMixer::from_config(&config.drive);
        let neutral = mixer.neutral();
        let state = TelemetryState {
            camera_enabled: config.video.auto_start,
            motors: neutral.motors,
            servos: neutral.servos,
            ..TelemetryState::default()
        };

        let mut core = Self {
            state,
            store,
            config,
            mixer,
            mux,
            liveness,
            publisher,
            both_down_since: None,
            link_seen: false,
            grace_fired: false,
            dirty: true,
        };
        core.publish();
        core
    }

    pub(crate) fn state(&self) -> &TelemetryState {
        &self.state
    }

    fn handle(&mut self, event: StationEvent) {
        match event {
            StationEvent::Telemetry(event) => self.apply_telemetry(event),
            StationEvent::Liveness(status) => {
                self.state.liveness = Some(status);
                self.dirty = true;
            }
            StationEvent::Action(action, reply) => {
                let result = self.apply_action(action);
                if let Err(e) = &result {
                    warn!("action rejected: {}", e);
                    self.state.last_error = Some(e.to_string());
                    self.dirty = true;
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn apply_telemetry(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Controller(controller) => {
                self.state.controller = controller;
                self.state.controller_updated_at = Some(SystemTime::now());
                if self.state.mode == VehicleMode::Manual {
                    let output = self.mixer.drive(&controller);
                    self.send_changed(output);
                }
            }
            TelemetryEvent::Sensor(mut reading) => {
                if let SensorValue::Temperature(t) = reading.value {
                    reading.value = SensorValue::Temperature(t.to_unit(self.config.sensors.temperature_unit));
                }
                self.state.apply_reading(reading);
            }
            TelemetryEvent::Frame(frame) => {
                self.state.last_frame = Some(FrameSample {
                    frame,
                    captured_at: SystemTime::now(),
                });
            }
            TelemetryEvent::Link { channel, state } => {
                match channel {
                    ChannelKind::Serial => self.state.serial_link = state,
                    ChannelKind::Video => self.state.video_link = state,
                }
                info!("{} link {}", channel.as_str(), state);
                self.track_outage(Instant::now());
            }
        }
        self.dirty = true;
    }

    fn track_outage(&mut self, now: Instant) {
        let both_down =
            self.state.serial_link != LinkState::Connected && self.state.video_link != LinkState::Connected;
        if !both_down {
            self.link_seen = true;
            self.both_down_since = None;
            self.grace_fired = false;
        } else if self.link_seen && self.both_down_since.is_none() {
            self.both_down_since = Some(now);
        }
    }

    /// Force EmergencyStop, whatever the mode, once both channels have been down
    /// for longer than the grace period. Fires once per outage.
    fn check_grace(&mut self, now: Instant) {
        let grace = Duration::from_millis(self.config.station.grace_period_ms);
        let expired = self
            .both_down_since
            .map(|since| now.saturating_duration_since(since) > grace)
            .unwrap_or(false);
        if !expired || self.grace_fired {
            return;
        }
        self.grace_fired = true;

        let e = StationError::GracePeriodExceeded(grace);
        warn!("{}", e);
        self.state.last_error = Some(e.to_string());
        if let Err(e) = self.mode_event(ModeEvent::GracePeriodExceeded) {
            warn!("forced emergency stop failed: {}", e);
        }
        self.dirty = true;
    }

    fn apply_action(&mut self, action: UiAction) -> Result<(), StationError> {
        debug!("action {:?}", action);
        match action {
            UiAction::Start => {
                let link_connected = self.mux.link_state(ChannelKind::Serial) == LinkState::Connected;
                self.mode_event(ModeEvent::Start { link_connected })
            }
            UiAction::Stop => self.mode_event(ModeEvent::Stop),
            UiAction::EmergencyStop => self.mode_event(ModeEvent::EmergencyStop),
            UiAction::AutonomousConfirm => self.mode_event(ModeEvent::AutonomousConfirm),
            UiAction::Reset => {
                self.mode_event(ModeEvent::Reset)?;
                self.state.last_error = None;
                Ok(())
            }
            UiAction::UpdateConfig { key, value } => self.update_config(key, value),
            UiAction::PingVehicle => {
                match &self.liveness {
                    Some(monitor) => monitor.probe_now(),
                    None => debug!("liveness monitor disabled, ping ignored"),
                }
                Ok(())
            }
            UiAction::EnableCamera(on) => {
                self.state.camera_enabled = on;
                self.dirty = true;
                if !self.mux.set_video_streaming(on) {
                    debug!("camera request held until the video link connects");
                }
                Ok(())
            }
            UiAction::SaveConfig => {
                self.store.save()?;
                info!("configuration saved");
                Ok(())
            }
        }
    }

    fn update_config(&mut self, key: String, value: String) -> Result<(), StationError> {
        let mut store = self.store.clone();
        store.set(&key, &value)?;
        let config = store.snapshot()?;

        info!("config {} = {}", key, value);
        let command = ActuatorCommand::SetConfig { key, value };
        command.encode()?;

        self.store = store;
        self.mixer = DriveMixer::from_config(&config.drive);
        self.config = config;
        self.mux.send_command(command)?;
        Ok(())
    }

    fn mode_event(&mut self, event: ModeEvent) -> Result<(), StationError> {
        let from = self.state.mode;
        let t = transition(from, event)?;
        if t.to != from {
            info!("mode {} -> {} ({})", from, t.to, event.as_str());
        }
        self.state.mode = t.to;
        self.dirty = true;

        match t.effect {
            ModeEffect::None => {}
            ModeEffect::BeginForwarding => {
                self.send(ActuatorCommand::Start)?;
                let output = self.mixer.drive(&self.state.controller);
                self.send_all(output)?;
            }
            ModeEffect::HandOff => info!("joystick forwarding stopped, autonomous policy in control"),
            ModeEffect::SendNeutral => {
                self.send_all(self.mixer.neutral())?;
                self.send(ActuatorCommand::Stop)?;
            }
            ModeEffect::SendEmergencyStop => {
                self.send(ActuatorCommand::EmergencyStop)?;
                let neutral = self.mixer.neutral();
                self.state.motors = neutral.motors;
                self.state.servos = neutral.servos;
            }
        }
        Ok(())
    }

    fn send(&self, command: ActuatorCommand) -> Result<(), StationError> {
        let outcome = self.mux.send_command(command)?;
        debug!("command {:?}", outcome);
        Ok(())
    }

    fn send_all(&mut self, output: DriveOutput) -> Result<(), StationError> {
        for command in output.commands() {
            self.send(command)?;
        }
        self.state.motors = output.motors;
        self.state.servos = output.servos;
        Ok(())
    }

    //only actuators whose setpoint moved
    fn send_changed(&mut self, output: DriveOutput) {
        let previous = DriveOutput {
            motors: self.state.motors,
            servos: self.state.servos,
        };
        let changed = output
            .commands()
            .into_iter()
            .zip(previous.commands())
            .filter(|(new, old)| new != old)
            .map(|(new, _)| new);

        for command in changed {
            if let Err(e) = self.send(command) {
                warn!("drive command not sent: {}", e);
            }
        }
        self.state.motors = output.motors;
        self.state.servos = output.servos;
    }

    fn publish(&mut self) {
        if self.dirty {
            self.publisher.publish(self.state.clone());
            self.dirty = false;
        }
    }

    fn shutdown(&mut self) {
        if let Some(monitor) = self.liveness.take() {
            monitor.shutdown();
        }
        self.mux.shutdown();
    }
}

/// Handle on a running station
///
/// Owns the consumer thread; dropping the handle shuts everything down.
pub struct StationController {
    inbox: Arc<Inbox<StationEvent>>,
    publisher: Publisher<TelemetryState>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StationController {
    /// Start against the serial port, video host and vehicle named in `store`
    pub fn start(store: ConfigStore) -> Result<Self, StationError> {
        let config = store.snapshot()?;
        let serial = SerialConnector::new(&config.serial.port, config.serial.baud_rate);
        let video = TcpConnector::new(&config.video.host, config.video.port, config.video.timeout());
        let prober: Option<Arc<dyn Prober>> = if config.vehicle.liveness_enabled {
            Some(Arc::new(PingProber))
        } else {
            None
        };
        Self::start_with(store, Box::new(serial), Box::new(video), prober)
    }

    /// Start with explicit connectors and prober (`None` disables liveness probing)
    pub fn start_with(
        store: ConfigStore,
        serial: Box<dyn Connector>,
        video: Box<dyn Connector>,
        prober: Option<Arc<dyn Prober>>,
    ) -> Result<Self, StationError> {
        let config = store.snapshot()?;
        let inbox = Arc::new(Inbox::new(config.link.inbox_capacity));

        let telemetry_sink: Arc<dyn EventSink<TelemetryEvent>> = inbox.clone();
        let mux = TelemetryMultiplexer::start(serial, video, MuxSettings::from(&config), telemetry_sink);

        let liveness = prober.map(|prober| {
            let sink: Arc<dyn EventSink<LivenessStatus>> = inbox.clone();
            LivenessMonitor::spawn(&config.vehicle, prober, sink)
        });

        let publisher = Publisher::new("/station/telemetry");
        let poll = Duration::from_millis(config.station.poll_interval_ms.max(1));
        let mut core = StationCore::new(store, config, mux, liveness, publisher.clone());

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let inbox = Arc::clone(&inbox);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("station".into())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        if let Some(event) = inbox.recv_timeout(poll) {
                            core.handle(event);
                            while let Some(event) = inbox.try_recv() {
                                core.handle(event);
                            }
                        }
                        core.check_grace(Instant::now());
                        core.publish();
                    }
                    core.shutdown();
                    // nobody will answer these any more
                    for event in inbox.drain() {
                        if let StationEvent::Action(_, Some(reply)) = event {
                            let _ = reply.send(Err(StationError::NotRunning));
                        }
                    }
                    debug!("station loop exiting");
                })
                .map_err(|e| StationError::Config(crate::error::ConfigError::Io(e)))?
        };

        info!("station started");
        Ok(Self {
            inbox,
            publisher,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Apply an action and wait for the outcome
    pub fn dispatch(&self, action: UiAction) -> Result<(), StationError> {
        if !self.is_running() {
            return Err(StationError::NotRunning);
        }
        let (tx, rx) = bounded(1);
        self.inbox.push(StationEvent::Action(action, Some(tx)));
        match rx.recv_timeout(DISPATCH_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) if self.is_running() => {
                Err(StationError::DispatchTimeout(DISPATCH_TIMEOUT))
            }
            Err(_) => Err(StationError::NotRunning),
        }
    }

    /// Queue an action without waiting; errors show up in `TelemetryState::last_error`
    pub fn post(&self, action: UiAction) {
        self.inbox.push(StationEvent::Action(action, None));
    }

    pub fn subscribe(&self) -> Subscriber<TelemetryState> {
        self.publisher.subscribe()
    }

    /// Most recently published state
    pub fn latest(&self) -> TelemetryState {
        self.publisher
            .topic()
            .peek_latest()
            .map(|(state, _)| state)
            .unwrap_or_default()
    }

    /// Events lost to inbox backpressure
    pub fn dropped_events(&self) -> u64 {
        self.inbox.dropped()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("station loop panicked");
            }
            info!("station stopped");
        }
    }
}

impl Drop for StationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
