//! Direct servo-bus control of a 6-motor arm.
//!
//! Each motor is a [`Servo`] identified by its joint name.  [`DirectArmIo`]
//! resolves the six SO-101 joints by name, in bus order, and adapts them to
//! the [`RobotIo`] seam so the control loop can drive the arm without a
//! bridge process in between.
//!
//! # Units
//!
//! When `use_degrees` is set the servos report and accept degrees for the five
//! arm joints.  Reads are converted to radians and writes back to degrees so
//! the rest of the system only ever sees radians.  The gripper stays in its
//! native 0–100 range either way.

use std::collections::HashMap;

use armpilot_types::{ARM_JOINT_COUNT, JOINT_COUNT, PilotError};
use tracing::{debug, info};

use crate::robot_io::{RobotIo, actuation_fault};

const COMPONENT: &str = "direct_robot";

/// Motor names in bus order: five arm joints followed by the gripper.
pub const MOTOR_NAMES: [&str; JOINT_COUNT] = [
    "shoulder_pan",
    "shoulder_lift",
    "elbow_flex",
    "wrist_flex",
    "wrist_roll",
    "gripper",
];

/// A position-controlled motor on the arm's bus.
pub trait Servo: Send {
    /// Stable identifier, one of [`MOTOR_NAMES`].
    fn id(&self) -> &str;

    /// Command the servo to `target` (servo units).
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Actuation`] if the command cannot be applied.
    fn set_position(&mut self, target: f32) -> Result<(), PilotError>;

    /// Read back the servo's present position (servo units).
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Actuation`] if the bus read fails.
    fn read_position(&mut self) -> Result<f32, PilotError>;

    /// Disable torque and release the bus handle.
    fn release(&mut self) {}
}

/// A 6-servo arm driven directly over its bus.
pub struct DirectArmIo {
    robot_id: String,
    servos: HashMap<String, Box<dyn Servo>>,
    use_degrees: bool,
}

impl DirectArmIo {
    /// Build the arm from `servos`, which must contain every name in
    /// [`MOTOR_NAMES`].
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Actuation`] when a joint has no servo.
    pub fn new(
        robot_id: impl Into<String>,
        servos: Vec<Box<dyn Servo>>,
        use_degrees: bool,
    ) -> Result<Self, PilotError> {
        let servos: HashMap<String, Box<dyn Servo>> = servos
            .into_iter()
            .map(|s| (s.id().to_string(), s))
            .collect();
        if let Some(missing) = MOTOR_NAMES.iter().find(|n| !servos.contains_key(**n)) {
            return Err(actuation_fault(
                COMPONENT,
                format!("servo '{missing}' is not registered"),
            ));
        }
        let robot_id = robot_id.into();
        info!(robot_id = %robot_id, use_degrees, "direct arm connected");
        Ok(Self {
            robot_id,
            servos,
            use_degrees,
        })
    }

    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    fn servo(&mut self, name: &str) -> Result<&mut Box<dyn Servo>, PilotError> {
        self.servos
            .get_mut(name)
            .ok_or_else(|| actuation_fault(COMPONENT, format!("servo '{name}' is not registered")))
    }
}

impl RobotIo for DirectArmIo {
    fn id(&self) -> &str {
        COMPONENT
    }

    fn read_state(&mut self) -> Result<Vec<f32>, PilotError> {
        let mut values = vec![0.0; JOINT_COUNT];
        for (i, name) in MOTOR_NAMES.iter().enumerate() {
            values[i] = self.servo(name)?.read_position()?;
        }
        if self.use_degrees {
            for v in values.iter_mut().take(ARM_JOINT_COUNT) {
                *v = v.to_radians();
            }
        }
        Ok(values)
    }

    fn send_action(&mut self, action: &[f32]) -> Result<(), PilotError> {
        if action.len() < JOINT_COUNT {
            return Err(actuation_fault(
                COMPONENT,
                format!("expected {JOINT_COUNT} targets, got {}", action.len()),
            ));
        }
        let use_degrees = self.use_degrees;
        for (i, name) in MOTOR_NAMES.iter().enumerate() {
            let target = if use_degrees && i < ARM_JOINT_COUNT {
                action[i].to_degrees()
            } else {
                action[i]
            };
            self.servo(name)?.set_position(target)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        for name in MOTOR_NAMES {
            if let Some(servo) = self.servos.get_mut(name) {
                debug!(servo = name, "releasing servo");
                servo.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimServo;

    fn sim_servos() -> Vec<Box<dyn Servo>> {
        MOTOR_NAMES
            .iter()
            .map(|n| SimServo::new(*n) as Box<dyn Servo>)
            .collect()
    }

    #[test]
    fn missing_servo_is_rejected() {
        let mut servos = sim_servos();
        servos.pop();
        let err = DirectArmIo::new("so101", servos, false).err().unwrap();
        assert!(err.to_string().contains("gripper"));
    }

    #[test]
    fn radians_pass_through_without_degree_mode() {
        let mut arm = DirectArmIo::new("so101", sim_servos(), false).unwrap();
        let target = [0.1, -0.2, 0.3, -0.4, 0.5, 42.0];
        arm.send_action(&target).unwrap();
        let state = arm.read_state().unwrap();
        for (got, want) in state.iter().zip(target.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn degree_mode_converts_joints_but_not_gripper() {
        let mut servos = sim_servos();
        // shoulder_pan reports 90 degrees, gripper reports 50 (0..100 range).
        servos[0] = SimServo::with_position("shoulder_pan", 90.0) as Box<dyn Servo>;
        servos[5] = SimServo::with_position("gripper", 50.0) as Box<dyn Servo>;
        let mut arm = DirectArmIo::new("so101", servos, true).unwrap();

        let state = arm.read_state().unwrap();
        assert!((state[0] - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!((state[5] - 50.0).abs() < f32::EPSILON);

        arm.send_action(&[std::f32::consts::PI, 0.0, 0.0, 0.0, 0.0, 10.0])
            .unwrap();
        let state = arm.read_state().unwrap();
        assert!((state[0] - std::f32::consts::PI).abs() < 1e-5);
        assert!((state[5] - 10.0).abs() < f32::EPSILON);
    }

    #[test]
    fn short_action_is_an_actuation_fault() {
        let mut arm = DirectArmIo::new("so101", sim_servos(), false).unwrap();
        assert!(matches!(
            arm.send_action(&[0.0; 5]),
            Err(PilotError::Actuation { .. })
        ));
    }
}
