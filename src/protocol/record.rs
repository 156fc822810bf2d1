//! Serial record format
//!
//! Newline-terminated, comma-separated ASCII in both directions.
//!
//! Inbound (vehicle/controller to station):
//!
//! | Record | Layout |
//! |---|---|
//! | controller | `lx,ly,lz,rx,ry,rz,b1,...,b10` (16 fields, buttons `True`/`False`) |
//! | depth | `DEPTH,meters` |
//! | temperature | `TEMP,value,C` or `TEMP,value,F` |
//! | humidity | `HUM,percent` |
//! | battery | `BAT,index,volts` (index 1..=4) |
//! | imu | `IMU,roll,pitch,yaw` (degrees) |
//! | acoustic | `ACOUSTIC,sound_velocity,frequency,signal_strength` |
//!
//! Outbound (station to vehicle):
//!
//! | Command | Layout |
//! |---|---|
//! | motor speed | `MOTOR,index,value` (index 1..=8) |
//! | servo position | `SERVO,index,value` (index 1..=3) |
//! | config push | `CONFIG,key,value` |
//! | start / stop / e-stop | `START` / `STOP` / `ESTOP` |

use crate::config::{TemperatureUnit, MOTOR_COUNT, SERVO_COUNT};
use crate::error::{EncodeError, ParseError};
use crate::telemetry::{ControllerState, Joystick, SensorValue, Temperature, BUTTON_COUNT};

/// Fields in a controller record: six axes then ten buttons
pub const CONTROLLER_FIELDS: usize = 6 + BUTTON_COUNT;
pub const BATTERY_COUNT: u8 = 4;

/// A decoded inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRecord {
    Controller(ControllerState),
    Sensor(SensorValue),
}

/// Command sent from the station to the vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorCommand {
    SetMotorSpeed { index: u8, value: u16 },
    SetServoPosition { index: u8, value: u16 },
    SetConfig { key: String, value: String },
    Start,
    Stop,
    EmergencyStop,
}

impl ActuatorCommand {
    /// Commands that must never be evicted from a full queue
    pub fn is_critical(&self) -> bool {
        matches!(self, ActuatorCommand::EmergencyStop)
    }

    /// Single line, newline included
    pub fn encode(&self) -> Result<String, EncodeError> {
        let line = match self {
            ActuatorCommand::SetMotorSpeed { index, value } => format!("MOTOR,{},{}", index, value),
            ActuatorCommand::SetServoPosition { index, value } => format!("SERVO,{},{}", index, value),
            ActuatorCommand::SetConfig { key, value } => {
                check_field("config key", key)?;
                check_field("config value", value)?;
                format!("CONFIG,{},{}", key, value)
            }
            ActuatorCommand::Start => "START".to_string(),
            ActuatorCommand::Stop => "STOP".to_string(),
            ActuatorCommand::EmergencyStop => "ESTOP".to_string(),
        };
        Ok(line + "\n")
    }

    /// Inverse of [`encode`](Self::encode), used on the vehicle side and in tests
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let fields = split_line(line)?;
        let tag = fields[0];
        match tag {
            "MOTOR" | "SERVO" => {
                expect_fields(tag_name(tag), &fields, 3)?;
                let max = (if tag == "MOTOR" { MOTOR_COUNT } else { SERVO_COUNT }) as u8;
                let index = parse_index(&fields, 1, max)?;
                let value = fields[2]
                    .parse::<u16>()
                    .map_err(|_| invalid_number(2, fields[2]))?;
                Ok(if tag == "MOTOR" {
                    ActuatorCommand::SetMotorSpeed { index, value }
                } else {
                    ActuatorCommand::SetServoPosition { index, value }
                })
            }
            "CONFIG" => {
                expect_fields("config", &fields, 3)?;
                Ok(ActuatorCommand::SetConfig {
                    key: fields[1].to_string(),
                    value: fields[2].to_string(),
                })
            }
            "START" => Ok(ActuatorCommand::Start),
            "STOP" => Ok(ActuatorCommand::Stop),
            "ESTOP" => Ok(ActuatorCommand::EmergencyStop),
            other => Err(ParseError::UnknownTag(other.to_string())),
        }
    }
}

fn tag_name(tag: &str) -> &'static str {
    match tag {
        "MOTOR" => "motor",
        "SERVO" => "servo",
        _ => "command",
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), EncodeError> {
    if value.is_empty() || value.contains([',', '\n', '\r']) {
        return Err(EncodeError {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn split_line(line: &str) -> Result<Vec<&str>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']).trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(line.split(',').map(str::trim).collect())
}

fn expect_fields(record: &'static str, fields: &[&str], expected: usize) -> Result<(), ParseError> {
    if fields.len() != expected {
        return Err(ParseError::FieldCount {
            record,
            expected,
            actual: fields.len(),
        });
    }
    Ok(())
}

fn invalid_number(index: usize, value: &str) -> ParseError {
    ParseError::InvalidNumber {
        index,
        value: value.to_string(),
    }
}

fn parse_f32(fields: &[&str], index: usize) -> Result<f32, ParseError> {
    fields[index]
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid_number(index, fields[index]))
}

fn parse_index(fields: &[&str], index: usize, max: u8) -> Result<u8, ParseError> {
    let value = fields[index]
        .parse::<u8>()
        .map_err(|_| invalid_number(index, fields[index]))?;
    if value == 0 || value > max {
        return Err(ParseError::InvalidIndex { index: value, max });
    }
    Ok(value)
}

fn parse_button(fields: &[&str], index: usize) -> Result<bool, ParseError> {
    match fields[index] {
        "True" | "true" | "1" => Ok(true),
        "False" | "false" | "0" => Ok(false),
        other => Err(ParseError::InvalidBool {
            index,
            value: other.to_string(),
        }),
    }
}

/// Parse a controller record. Fails as a whole; no partial state is produced.
pub fn parse_controller(line: &str) -> Result<ControllerState, ParseError> {
    let fields = split_line(line)?;
    expect_fields("controller", &fields, CONTROLLER_FIELDS)?;

    let mut axes = [0.0f32; 6];
    for (i, axis) in axes.iter_mut().enumerate() {
        *axis = parse_f32(&fields, i)?;
    }

    let mut buttons = [false; BUTTON_COUNT];
    for (i, button) in buttons.iter_mut().enumerate() {
        *button = parse_button(&fields, 6 + i)?;
    }

    Ok(ControllerState {
        left: Joystick::new(axes[0], axes[1], axes[2]),
        right: Joystick::new(axes[3], axes[4], axes[5]),
        buttons,
    })
}

/// Parse a tagged sensor record.
pub fn parse_sensor(line: &str) -> Result<SensorValue, ParseError> {
    let fields = split_line(line)?;
    match fields[0] {
        "DEPTH" => {
            expect_fields("depth", &fields, 2)?;
            Ok(SensorValue::Depth {
                meters: parse_f32(&fields, 1)?,
            })
        }
        "TEMP" => {
            expect_fields("temperature", &fields, 3)?;
            let unit = match fields[2] {
                "C" | "c" => TemperatureUnit::Celsius,
                "F" | "f" => TemperatureUnit::Fahrenheit,
                other => return Err(ParseError::UnknownTag(other.to_string())),
            };
            Ok(SensorValue::Temperature(Temperature {
                value: parse_f32(&fields, 1)?,
                unit,
            }))
        }
        "HUM" => {
            expect_fields("humidity", &fields, 2)?;
            Ok(SensorValue::Humidity {
                percent: parse_f32(&fields, 1)?,
            })
        }
        "BAT" => {
            expect_fields("battery", &fields, 3)?;
            Ok(SensorValue::Battery {
                index: parse_index(&fields, 1, BATTERY_COUNT)?,
                volts: parse_f32(&fields, 2)?,
            })
        }
        "IMU" => {
            expect_fields("imu", &fields, 4)?;
            Ok(SensorValue::Imu {
                roll: parse_f32(&fields, 1)?,
                pitch: parse_f32(&fields, 2)?,
                yaw: parse_f32(&fields, 3)?,
            })
        }
        "ACOUSTIC" => {
            expect_fields("acoustic", &fields, 4)?;
            Ok(SensorValue::Acoustic {
                sound_velocity: parse_f32(&fields, 1)?,
                frequency: parse_f32(&fields, 2)?,
                signal_strength: parse_f32(&fields, 3)?,
            })
        }
        other => Err(ParseError::UnknownTag(other.to_string())),
    }
}

/// Classify and parse one inbound line.
///
/// Lines whose first field starts with a letter are sensor records, anything else is
/// treated as a controller record.
pub fn parse_inbound(line: &str) -> Result<InboundRecord, ParseError> {
    let first = line.trim_start().chars().next().ok_or(ParseError::Empty)?;
    if first.is_ascii_alphabetic() {
        parse_sensor(line).map(InboundRecord::Sensor)
    } else {
        parse_controller(line).map(InboundRecord::Controller)
    }
}

/// Encode a sensor value in its inbound record form (vehicle side and tests).
pub fn encode_sensor(value: &SensorValue) -> String {
    match value {
        SensorValue::Depth { meters } => format!("DEPTH,{}\n", meters),
        SensorValue::Temperature(t) => {
            let unit = match t.unit {
                TemperatureUnit::Celsius => "C",
                TemperatureUnit::Fahrenheit => "F",
            };
            format!("TEMP,{},{}\n", t.value, unit)
        }
        SensorValue::Humidity { percent } => format!("HUM,{}\n", percent),
        SensorValue::Battery { index, volts } => format!("BAT,{},{}\n", index, volts),
        SensorValue::Imu { roll, pitch, yaw } => format!("IMU,{},{},{}\n", roll, pitch, yaw),
        SensorValue::Acoustic {
            sound_velocity,
            frequency,
            signal_strength,
        } => format!("ACOUSTIC,{},{},{}\n", sound_velocity, frequency, signal_strength),
    }
}

/// Encode a controller state in record form.
pub fn encode_controller(state: &ControllerState) -> String {
    let mut fields: Vec<String> = state.axes().iter().map(|a| a.to_string()).collect();
    fields.extend(
        state
            .buttons
            .iter()
            .map(|&b| if b { "True" } else { "False" }.to_string()),
    );
    fields.join(",") + "\n"
}
