//! Generic `RobotIo` trait: the single seam between the control loop and a
//! robot arm.
//!
//! Transports (REST bridge, direct servo bus, simulator) implement this trait
//! and are selected once at startup via [`RobotIoMode`].  The loop never
//! inspects which transport it is talking to.

use std::fmt;
use std::str::FromStr;

use armpilot_types::PilotError;
use serde::{Deserialize, Serialize};

/// A robot arm that can report its joint state and accept a joint target.
pub trait RobotIo: Send {
    /// Stable identifier used in logs and fault messages, e.g. `"http_robot"`.
    fn id(&self) -> &str;

    /// Read the current joint values in the transport's raw units and
    /// channel order.
    ///
    /// The reading is returned unvalidated; length and finiteness are checked
    /// by the state normalizer.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Actuation`] if the robot cannot be reached or the
    /// reply cannot be decoded.
    fn read_state(&mut self) -> Result<Vec<f32>, PilotError>;

    /// Command the arm to the 6-entry target `action`.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Actuation`] if the command is rejected or cannot
    /// be delivered.
    fn send_action(&mut self, action: &[f32]) -> Result<(), PilotError>;

    /// Release the underlying connection.  Called exactly once by the owner.
    fn close(&mut self) {}
}

/// How the client talks to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotIoMode {
    /// No robot attached; actions are only reported.
    #[default]
    None,
    /// REST bridge exposing `/joints/read` and `/joints/write`.
    Http,
    /// Servos driven directly over a serial bus.
    Direct,
}

impl FromStr for RobotIoMode {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RobotIoMode::None),
            "http" => Ok(RobotIoMode::Http),
            "direct" => Ok(RobotIoMode::Direct),
            other => Err(PilotError::Config(format!(
                "unsupported io_mode {other:?} (expected none, http or direct)"
            ))),
        }
    }
}

impl fmt::Display for RobotIoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobotIoMode::None => write!(f, "none"),
            RobotIoMode::Http => write!(f, "http"),
            RobotIoMode::Direct => write!(f, "direct"),
        }
    }
}

/// Shorthand for building a [`PilotError::Actuation`].
pub(crate) fn actuation_fault(component: &str, details: impl Into<String>) -> PilotError {
    PilotError::Actuation {
        component: component.to_string(),
        details: details.into(),
    }
}

#[cfg(test)]
mod tests {
    use armpilot_types::JointState;

    use super::*;

    /// Minimal in-process robot used only for tests.
    struct MockRobot {
        state: JointState,
    }

    impl RobotIo for MockRobot {
        fn id(&self) -> &str {
            "mock_robot"
        }

        fn read_state(&mut self) -> Result<Vec<f32>, PilotError> {
            Ok(self.state.0.to_vec())
        }

        fn send_action(&mut self, action: &[f32]) -> Result<(), PilotError> {
            self.state = JointState::from_slice(action)
                .map_err(|e| actuation_fault("mock_robot", e.to_string()))?;
            Ok(())
        }
    }

    #[test]
    fn mock_robot_echoes_last_action() {
        let mut robot = MockRobot {
            state: JointState::ZERO,
        };
        robot.send_action(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        let state = robot.read_state().unwrap();
        assert!((state[5] - 0.6).abs() < f32::EPSILON);
        assert!(matches!(
            robot.send_action(&[0.0; 3]),
            Err(PilotError::Actuation { .. })
        ));
    }

    #[test]
    fn io_mode_parses_known_values() {
        assert_eq!("none".parse::<RobotIoMode>().unwrap(), RobotIoMode::None);
        assert_eq!("HTTP".parse::<RobotIoMode>().unwrap(), RobotIoMode::Http);
        assert_eq!("direct".parse::<RobotIoMode>().unwrap(), RobotIoMode::Direct);
        assert!(matches!(
            "lerobot".parse::<RobotIoMode>(),
            Err(PilotError::Config(_))
        ));
    }

    #[test]
    fn io_mode_display_matches_parse() {
        for mode in [RobotIoMode::None, RobotIoMode::Http, RobotIoMode::Direct] {
            assert_eq!(mode.to_string().parse::<RobotIoMode>().unwrap(), mode);
        }
    }
}
