/**
 * Telemetry data model
 *
 * Controller input, sensor readings and the aggregate TelemetryState that the
 * station publishes to front ends. Every sensor value carries the time it was
 * decoded so a front end can tell fresh values from stale ones.
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::{TemperatureUnit, MOTOR_COUNT, SERVO_COUNT};
use crate::link::LinkState;
use crate::liveness::LivenessStatus;
use crate::protocol::frame::Frame;
use crate::station::mode::VehicleMode;

/// Number of buttons carried by every controller record
pub const BUTTON_COUNT: usize = 10;

/// One 3-axis joystick, each axis in [-1.0, 1.0]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Joystick {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Joystick {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: x.clamp(-1.0, 1.0),
            y: y.clamp(-1.0, 1.0),
            z: z.clamp(-1.0, 1.0),
        }
    }
}

/// Latest joystick and button state from the operator's controller
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub left: Joystick,
    pub right: Joystick,
    /// `buttons[0]` is button 1
    pub buttons: [bool; BUTTON_COUNT],
}

impl ControllerState {
    /// Axes in record order: lx, ly, lz, rx, ry, rz
    pub fn axes(&self) -> [f32; 6] {
        [
            self.left.x,
            self.left.y,
            self.left.z,
            self.right.x,
            self.right.y,
            self.right.z,
        ]
    }

    /// Pressed state of a 1-based button index. Out of range reads as released.
    pub fn button(&self, index: usize) -> bool {
        index
            .checked_sub(1)
            .and_then(|i| self.buttons.get(i))
            .copied()
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    pub value: f32,
    pub unit: TemperatureUnit,
}

impl Temperature {
    pub fn to_unit(self, unit: TemperatureUnit) -> Temperature {
        let value = match (self.unit, unit) {
            (TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit) => self.value * 9.0 / 5.0 + 32.0,
            (TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius) => (self.value - 32.0) * 5.0 / 9.0,
            _ => self.value,
        };
        Temperature { value, unit }
    }
}

/// Decoded sensor value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    Depth { meters: f32 },
    Temperature(Temperature),
    Humidity { percent: f32 },
    /// Battery pack 1..=4
    Battery { index: u8, volts: f32 },
    Imu { roll: f32, pitch: f32, yaw: f32 },
    Acoustic {
        sound_velocity: f32,
        frequency: f32,
        signal_strength: f32,
    },
}

/// Slot a reading occupies in [`TelemetryState::sensors`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorKey {
    Depth,
    Temperature,
    Humidity,
    Battery(u8),
    Imu,
    Acoustic,
}

impl SensorValue {
    pub fn key(&self) -> SensorKey {
        match self {
            SensorValue::Depth { .. } => SensorKey::Depth,
            SensorValue::Temperature(_) => SensorKey::Temperature,
            SensorValue::Humidity { .. } => SensorKey::Humidity,
            SensorValue::Battery { index, .. } => SensorKey::Battery(*index),
            SensorValue::Imu { .. } => SensorKey::Imu,
            SensorValue::Acoustic { .. } => SensorKey::Acoustic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub value: SensorValue,
    pub captured_at: SystemTime,
}

impl SensorReading {
    pub fn new(value: SensorValue) -> Self {
        Self {
            value,
            captured_at: SystemTime::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed().unwrap_or_default()
    }
}

/// Last received video frame
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub frame: Arc<Frame>,
    pub captured_at: SystemTime,
}

/// Everything a front end renders
///
/// Owned and mutated only by the station consumer loop; front ends receive clones
/// through a subscription.
#[derive(Debug, Clone)]
pub struct TelemetryState {
    pub mode: VehicleMode,
    pub controller: ControllerState,
    pub controller_updated_at: Option<SystemTime>,
    pub sensors: BTreeMap<SensorKey, SensorReading>,
    pub serial_link: LinkState,
    pub video_link: LinkState,
    pub liveness: Option<LivenessStatus>,
    pub last_frame: Option<FrameSample>,
    pub camera_enabled: bool,
    /// Last commanded actuator values, neutral until the first command
    pub motors: [u16; MOTOR_COUNT],
    pub servos: [u16; SERVO_COUNT],
    /// Most recent operator-facing error
    pub last_error: Option<String>,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self {
            mode: VehicleMode::Idle,
            controller: ControllerState::default(),
            controller_updated_at: None,
            sensors: BTreeMap::new(),
            serial_link: LinkState::Disconnected,
            video_link: LinkState::Disconnected,
            liveness: None,
            last_frame: None,
            camera_enabled: false,
            motors: [0; MOTOR_COUNT],
            servos: [0; SERVO_COUNT],
            last_error: None,
        }
    }
}

impl TelemetryState {
    /// Last-write-wins replacement of the reading in its slot
    pub fn apply_reading(&mut self, reading: SensorReading) {
        self.sensors.insert(reading.value.key(), reading);
    }

    pub fn reading(&self, key: SensorKey) -> Option<&SensorReading> {
        self.sensors.get(&key)
    }

    /// A reading counts as live only while the serial link is Connected and it is
    /// younger than `max_age`.
    pub fn is_live(&self, key: SensorKey, max_age: Duration) -> bool {
        if self.serial_link != LinkState::Connected {
            return false;
        }
        self.sensors
            .get(&key)
            .map(|r| r.age() <= max_age)
            .unwrap_or(false)
    }

    pub fn depth(&self) -> Option<f32> {
        match self.reading(SensorKey::Depth)?.value {
            SensorValue::Depth { meters } => Some(meters),
            _ => None,
        }
    }

    pub fn orientation(&self) -> Option<(f32, f32, f32)> {
        match self.reading(SensorKey::Imu)?.value {
            SensorValue::Imu { roll, pitch, yaw } => Some((roll, pitch, yaw)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_lookup_is_one_based() {
        let mut state = ControllerState::default();
        state.buttons[0] = true;
        assert!(state.button(1));
        assert!(!state.button(2));
        assert!(!state.button(0));
        assert!(!state.button(11));
    }

    #[test]
    fn test_joystick_clamps() {
        let j = Joystick::new(1.5, -3.0, 0.25);
        assert_eq!(j, Joystick { x: 1.0, y: -1.0, z: 0.25 });
    }

    #[test]
    fn test_temperature_conversion() {
        let c = Temperature { value: 100.0, unit: TemperatureUnit::Celsius };
        let f = c.to_unit(TemperatureUnit::Fahrenheit);
        assert!((f.value - 212.0).abs() < 1e-4);
        let back = f.to_unit(TemperatureUnit::Celsius);
        assert!((back.value - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_readings_replace_per_slot() {
        let mut state = TelemetryState::default();
        state.apply_reading(SensorReading::new(SensorValue::Depth { meters: 1.0 }));
        state.apply_reading(SensorReading::new(SensorValue::Battery { index: 1, volts: 12.0 }));
        state.apply_reading(SensorReading::new(SensorValue::Battery { index: 2, volts: 11.5 }));
        state.apply_reading(SensorReading::new(SensorValue::Depth { meters: 2.5 }));

        assert_eq!(state.sensors.len(), 3);
        assert_eq!(state.depth(), Some(2.5));
    }

    #[test]
    fn test_not_live_without_serial_link() {
        let mut state = TelemetryState::default();
        state.apply_reading(SensorReading::new(SensorValue::Humidity { percent: 40.0 }));
        assert!(!state.is_live(SensorKey::Humidity, Duration::from_secs(60)));

        state.serial_link = LinkState::Connected;
        assert!(state.is_live(SensorKey::Humidity, Duration::from_secs(60)));

        state.serial_link = LinkState::Faulted;
        assert!(!state.is_live(SensorKey::Humidity, Duration::from_secs(60)));
    }
}
