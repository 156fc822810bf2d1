/**
 * Drive Mixer
 *
 * Converts controller axes (lx, ly, lz, rx, ry, rz) into per-motor and
 * per-servo setpoints using the configured mix table. Outputs are scaled into
 * the configured min..max range with neutral at the midpoint.
 */

use crate::config::{DriveConfig, AXIS_COUNT, MOTOR_COUNT, SERVO_COUNT};
use crate::protocol::ActuatorCommand;
use crate::telemetry::ControllerState;

/// Motor and servo setpoints for one controller snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveOutput {
    pub motors: [u16; MOTOR_COUNT],
    pub servos: [u16; SERVO_COUNT],
}

impl DriveOutput {
    /// One command per actuator, motors first
    pub fn commands(&self) -> Vec<ActuatorCommand> {
        let motors = self.motors.iter().enumerate().map(|(i, &value)| ActuatorCommand::SetMotorSpeed {
            index: i as u8 + 1,
            value,
        });
        let servos = self.servos.iter().enumerate().map(|(i, &value)| ActuatorCommand::SetServoPosition {
            index: i as u8 + 1,
            value,
        });
        motors.chain(servos).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DriveMixer {
    /// Contribution of each axis to each motor [8 motors x 6 axes]
    mix_matrix: [[f32; AXIS_COUNT]; MOTOR_COUNT],
    servo_axes: [usize; SERVO_COUNT],
    motor_range: (u16, u16),
    servo_range: (u16, u16),
}

impl Default for DriveMixer {
    fn default() -> Self {
        Self::from_config(&DriveConfig::default())
    }
}

impl DriveMixer {
    pub fn from_config(config: &DriveConfig) -> Self {
        Self {
            mix_matrix: config.motor_mix,
            servo_axes: config.servo_axes,
            motor_range: (config.motor_min, config.motor_max),
            servo_range: (config.servo_min, config.servo_max),
        }
    }

    /// Normalised motor demand in [-1, 1]
    pub fn mix(&self, axes: &[f32; AXIS_COUNT]) -> [f32; MOTOR_COUNT] {
        let mut output = [0.0f32; MOTOR_COUNT];
        for (out, row) in output.iter_mut().zip(self.mix_matrix.iter()) {
            let sum: f32 = row.iter().zip(axes.iter()).map(|(w, a)| w * a).sum();
            *out = sum.clamp(-1.0, 1.0);
        }
        output
    }

    /// Map a demand in [-1, 1] onto `min..=max`: -1 -> min, 0 -> midpoint, 1 -> max
    pub fn scale(demand: f32, (min, max): (u16, u16)) -> u16 {
        let demand = if demand.is_finite() { demand.clamp(-1.0, 1.0) } else { 0.0 };
        let mid = (min as f32 + max as f32) / 2.0;
        let half = (max as f32 - min as f32) / 2.0;
        (mid + demand * half).round().clamp(min as f32, max as f32) as u16
    }

    pub fn drive(&self, state: &ControllerState) -> DriveOutput {
        let axes = state.axes();
        let demand = self.mix(&axes);

        let mut motors = [0u16; MOTOR_COUNT];
        for (m, d) in motors.iter_mut().zip(demand.iter()) {
            *m = Self::scale(*d, self.motor_range);
        }

        let mut servos = [0u16; SERVO_COUNT];
        for (s, &axis) in servos.iter_mut().zip(self.servo_axes.iter()) {
            let demand = axes.get(axis).copied().unwrap_or(0.0);
            *s = Self::scale(demand, self.servo_range);
        }

        DriveOutput { motors, servos }
    }

    /// Every actuator at its midpoint
    pub fn neutral(&self) -> DriveOutput {
        DriveOutput {
            motors: [Self::scale(0.0, self.motor_range); MOTOR_COUNT],
            servos: [Self::scale(0.0, self.servo_range); SERVO_COUNT],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Joystick;

    #[test]
    fn test_neutral_input() {
        let mixer = DriveMixer::default();
        let out = mixer.drive(&ControllerState::default());
        assert_eq!(out, mixer.neutral());
        assert!(out.motors.iter().all(|&m| m == 1500));
        assert!(out.servos.iter().all(|&s| s == 1500));
    }

    #[test]
    fn test_surge_and_clamping() {
        let mixer = DriveMixer::default();
        let state = ControllerState {
            left: Joystick::new(0.0, 1.0, 0.0),
            right: Joystick::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let out = mixer.drive(&state);
        // surge + yaw saturates the first motor and cancels on the second
        assert_eq!(out.motors[0], 2000);
        assert_eq!(out.motors[1], 1500);
        assert!(out.motors.iter().all(|&m| (1000..=2000).contains(&m)));
    }

    #[test]
    fn test_scale_respects_range() {
        assert_eq!(DriveMixer::scale(-1.0, (1100, 1900)), 1100);
        assert_eq!(DriveMixer::scale(0.0, (1100, 1900)), 1500);
        assert_eq!(DriveMixer::scale(5.0, (1100, 1900)), 1900);
        assert_eq!(DriveMixer::scale(f32::NAN, (1100, 1900)), 1500);
    }

    #[test]
    fn test_commands_cover_every_actuator() {
        let cmds = DriveMixer::default().neutral().commands();
        assert_eq!(cmds.len(), MOTOR_COUNT + SERVO_COUNT);
        assert_eq!(cmds[0], ActuatorCommand::SetMotorSpeed { index: 1, value: 1500 });
        assert_eq!(cmds[MOTOR_COUNT], ActuatorCommand::SetServoPosition { index: 1, value: 1500 });
    }
}
