/**
 * Vehicle mode state machine
 *
 * Idle -> Manual -> Autonomous, with EmergencyStop reachable from anywhere and
 * left only through an explicit Reset. The transition function is pure; the
 * caller carries out the returned effect.
 */

use std::fmt;

use crate::error::StationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VehicleMode {
    #[default]
    Idle,
    Manual,
    Autonomous,
    EmergencyStop,
}

impl VehicleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleMode::Idle => "idle",
            VehicleMode::Manual => "manual",
            VehicleMode::Autonomous => "autonomous",
            VehicleMode::EmergencyStop => "emergency_stop",
        }
    }
}

impl fmt::Display for VehicleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to change mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// Operator start; carries whether the serial link is Connected right now
    Start { link_connected: bool },
    AutonomousConfirm,
    Stop,
    EmergencyStop,
    /// Both channels down longer than the grace period
    GracePeriodExceeded,
    Reset,
}

impl ModeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeEvent::Start { .. } => "start",
            ModeEvent::AutonomousConfirm => "autonomous_confirm",
            ModeEvent::Stop => "stop",
            ModeEvent::EmergencyStop => "emergency_stop",
            ModeEvent::GracePeriodExceeded => "grace_period_exceeded",
            ModeEvent::Reset => "reset",
        }
    }
}

/// What the controller must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEffect {
    None,
    /// Send Start and begin forwarding controller input as actuator commands
    BeginForwarding,
    /// Stop forwarding raw joystick input, the autonomous policy takes over
    HandOff,
    /// Stop forwarding and send one neutral command set plus Stop
    SendNeutral,
    /// Send EmergencyStop immediately
    SendEmergencyStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: VehicleMode,
    pub effect: ModeEffect,
}

impl Transition {
    fn to(to: VehicleMode, effect: ModeEffect) -> Self {
        Self { to, effect }
    }

    fn stay(mode: VehicleMode) -> Self {
        Self { to: mode, effect: ModeEffect::None }
    }
}

/// Apply `event` in `from`. Errors leave the mode unchanged.
pub fn transition(from: VehicleMode, event: ModeEvent) -> Result<Transition, StationError> {
    use ModeEffect as E;
    use VehicleMode as M;

    let invalid = || StationError::InvalidTransition {
        mode: from.as_str(),
        event: event.as_str(),
    };

    match (from, event) {
        (_, ModeEvent::EmergencyStop) => Ok(Transition::to(M::EmergencyStop, E::SendEmergencyStop)),

        // already latched, nothing new to send
        (M::EmergencyStop, ModeEvent::GracePeriodExceeded) => Ok(Transition::stay(from)),
        (_, ModeEvent::GracePeriodExceeded) => Ok(Transition::to(M::EmergencyStop, E::SendEmergencyStop)),

        (M::EmergencyStop, ModeEvent::Reset) => Ok(Transition::to(M::Idle, E::None)),
        (M::EmergencyStop, _) => Err(StationError::EmergencyStopLatched),

        (M::Idle, ModeEvent::Start { link_connected: true }) => Ok(Transition::to(M::Manual, E::BeginForwarding)),
        (M::Idle, ModeEvent::Start { link_connected: false }) => Err(StationError::LinkUnavailable("serial")),

        (M::Manual, ModeEvent::AutonomousConfirm) => Ok(Transition::to(M::Autonomous, E::HandOff)),

        (M::Manual | M::Autonomous, ModeEvent::Stop) => Ok(Transition::to(M::Idle, E::SendNeutral)),
        (M::Idle, ModeEvent::Stop | ModeEvent::Reset) => Ok(Transition::stay(M::Idle)),

        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [VehicleMode; 4] = [
        VehicleMode::Idle,
        VehicleMode::Manual,
        VehicleMode::Autonomous,
        VehicleMode::EmergencyStop,
    ];

    fn apply(mode: VehicleMode, event: ModeEvent) -> VehicleMode {
        transition(mode, event).map(|t| t.to).unwrap_or(mode)
    }

    #[test]
    fn test_start_requires_link() {
        let err = transition(VehicleMode::Idle, ModeEvent::Start { link_connected: false }).unwrap_err();
        assert!(matches!(err, StationError::LinkUnavailable("serial")));

        let t = transition(VehicleMode::Idle, ModeEvent::Start { link_connected: true }).unwrap();
        assert_eq!(t, Transition { to: VehicleMode::Manual, effect: ModeEffect::BeginForwarding });
    }

    #[test]
    fn test_estop_from_any_state_latches() {
        for mode in ALL {
            let t = transition(mode, ModeEvent::EmergencyStop).unwrap();
            assert_eq!(t.to, VehicleMode::EmergencyStop);
            assert_eq!(t.effect, ModeEffect::SendEmergencyStop);

            let after = apply(t.to, ModeEvent::Start { link_connected: true });
            assert_eq!(after, VehicleMode::EmergencyStop);
            assert!(matches!(
                transition(t.to, ModeEvent::Start { link_connected: true }),
                Err(StationError::EmergencyStopLatched)
            ));
            assert_eq!(apply(t.to, ModeEvent::Reset), VehicleMode::Idle);
        }
    }

    #[test]
    fn test_full_cycle() {
        let mut mode = VehicleMode::Idle;
        mode = apply(mode, ModeEvent::Start { link_connected: true });
        assert_eq!(mode, VehicleMode::Manual);
        mode = apply(mode, ModeEvent::AutonomousConfirm);
        assert_eq!(mode, VehicleMode::Autonomous);

        let t = transition(mode, ModeEvent::Stop).unwrap();
        assert_eq!(t, Transition { to: VehicleMode::Idle, effect: ModeEffect::SendNeutral });
    }

    #[test]
    fn test_autonomous_needs_manual() {
        assert!(matches!(
            transition(VehicleMode::Idle, ModeEvent::AutonomousConfirm),
            Err(StationError::InvalidTransition { mode: "idle", event: "autonomous_confirm" })
        ));
    }

    #[test]
    fn test_grace_period_latches_from_any_mode() {
        for mode in [VehicleMode::Idle, VehicleMode::Manual, VehicleMode::Autonomous] {
            let t = transition(mode, ModeEvent::GracePeriodExceeded).unwrap();
            assert_eq!(t, Transition { to: VehicleMode::EmergencyStop, effect: ModeEffect::SendEmergencyStop });
        }

        let t = transition(VehicleMode::EmergencyStop, ModeEvent::GracePeriodExceeded).unwrap();
        assert_eq!(t, Transition { to: VehicleMode::EmergencyStop, effect: ModeEffect::None });

        // an idle station that lost both links still needs a reset
        let latched = apply(VehicleMode::Idle, ModeEvent::GracePeriodExceeded);
        assert!(matches!(
            transition(latched, ModeEvent::Start { link_connected: true }),
            Err(StationError::EmergencyStopLatched)
        ));
    }
}
