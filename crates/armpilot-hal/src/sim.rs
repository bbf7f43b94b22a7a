//! In-process simulated drivers for headless runs and CI without hardware.
//!
//! [`SimRobotIo`] records every commanded action and reports the last one as
//! its joint state.  [`SimCamera`] produces a deterministic gradient frame.
//! [`SimRig`] wires three simulated cameras into a [`CameraRig`].
//!
//! # Example
//!
//! ```rust
//! use armpilot_hal::camera::{FrameSource, TOP};
//! use armpilot_hal::sim::SimRig;
//!
//! let mut frames = SimRig::new(224, 224).build();
//! let frame = frames.capture(TOP).expect("sim capture must succeed");
//! assert_eq!((frame.width, frame.height), (224, 224));
//! ```

use std::sync::{Arc, Mutex};

use armpilot_types::{ActionVector, JOINT_COUNT, PilotError, RgbImage};

use crate::camera::{Camera, CameraRig, SIDE, TOP, WRIST};
use crate::robot_io::{RobotIo, actuation_fault};
use crate::servo::Servo;

// ────────────────────────────────────────────────────────────────────────────
// Servo
// ────────────────────────────────────────────────────────────────────────────

/// A simulated servo that reaches every commanded position instantly.
pub struct SimServo {
    id: String,
    position: f32,
}

impl SimServo {
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Self::with_position(id, 0.0)
    }

    /// Create a servo that starts at `position`.
    pub fn with_position(id: impl Into<String>, position: f32) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            position,
        })
    }
}

impl Servo for SimServo {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_position(&mut self, target: f32) -> Result<(), PilotError> {
        self.position = target;
        Ok(())
    }

    fn read_position(&mut self) -> Result<f32, PilotError> {
        Ok(self.position)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Robot
// ────────────────────────────────────────────────────────────────────────────

/// Shared record of what a [`SimRobotIo`] has been asked to do.
#[derive(Debug, Default)]
pub struct SimRobotLog {
    pub actions: Vec<ActionVector>,
    pub reads: usize,
    pub closes: usize,
}

/// A simulated arm that tracks the last commanded action as its state.
pub struct SimRobotIo {
    reading: Vec<f32>,
    log: Arc<Mutex<SimRobotLog>>,
    fail_send_after: Option<usize>,
}

impl SimRobotIo {
    pub fn new() -> Self {
        Self::with_reading(vec![0.0; JOINT_COUNT])
    }

    /// Start from a specific raw joint reading.  Any length is accepted, so
    /// malformed readings can be simulated too.
    pub fn with_reading(reading: Vec<f32>) -> Self {
        Self {
            reading,
            log: Arc::new(Mutex::new(SimRobotLog::default())),
            fail_send_after: None,
        }
    }

    /// Reject every `send_action` after the first `n` succeed.
    pub fn fail_send_after(mut self, n: usize) -> Self {
        self.fail_send_after = Some(n);
        self
    }

    /// Handle to the shared log, usable after the robot has been moved.
    pub fn log(&self) -> Arc<Mutex<SimRobotLog>> {
        Arc::clone(&self.log)
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut SimRobotLog) -> T) -> T {
        let mut guard = self.log.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

impl Default for SimRobotIo {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotIo for SimRobotIo {
    fn id(&self) -> &str {
        "sim_robot"
    }

    fn read_state(&mut self) -> Result<Vec<f32>, PilotError> {
        self.with_log(|log| log.reads += 1);
        Ok(self.reading.clone())
    }

    fn send_action(&mut self, action: &[f32]) -> Result<(), PilotError> {
        let sent = self.with_log(|log| log.actions.len());
        if self.fail_send_after.is_some_and(|n| sent >= n) {
            return Err(actuation_fault("sim_robot", "simulated bus fault"));
        }
        if let Some(head) = action.get(..JOINT_COUNT) {
            self.reading = head.to_vec();
        }
        self.with_log(|log| log.actions.push(action.to_vec()));
        Ok(())
    }

    fn close(&mut self) {
        self.with_log(|log| log.closes += 1);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera producing a deterministic gradient frame.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    frame: u64,
    fail_after: Option<u64>,
}

impl SimCamera {
    /// A 640×480 camera, the native size of the SO-100 USB cameras.
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Self::with_size(id, 640, 480)
    }

    pub fn with_size(id: impl Into<String>, width: u32, height: u32) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            width,
            height,
            frame: 0,
            fail_after: None,
        })
    }

    /// Fail every capture after the first `n` succeed.
    pub fn failing_after(mut self: Box<Self>, n: u64) -> Box<Self> {
        self.fail_after = Some(n);
        self
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<RgbImage, PilotError> {
        if self.fail_after.is_some_and(|n| self.frame >= n) {
            return Err(PilotError::SensorCapture {
                source_id: self.id.clone(),
                details: "simulated device disconnect".to_string(),
            });
        }
        let shift = (self.frame % 256) as u32;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(shift as u8);
            }
        }
        self.frame += 1;
        RgbImage::from_raw(self.width, self.height, data)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a [`CameraRig`] of simulated `top`, `wrist` and `side`
/// cameras.
pub struct SimRig {
    rig: CameraRig,
}

impl SimRig {
    pub fn new(width: u32, height: u32) -> Self {
        let rig = CameraRig::new(width, height)
            .with_camera(SimCamera::new(TOP))
            .with_camera(SimCamera::new(WRIST))
            .with_camera(SimCamera::new(SIDE));
        Self { rig }
    }

    /// Replace one of the default cameras, e.g. with a failing one.
    pub fn with_camera(mut self, camera: Box<dyn Camera>) -> Self {
        self.rig.register(camera);
        self
    }

    pub fn build(self) -> CameraRig {
        self.rig
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FrameSource;

    #[test]
    fn sim_servo_records_position() {
        let mut servo = SimServo::new("elbow_flex");
        assert!((servo.read_position().unwrap() - 0.0).abs() < f32::EPSILON);
        servo.set_position(1.57).unwrap();
        assert!((servo.read_position().unwrap() - 1.57).abs() < f32::EPSILON);
    }

    #[test]
    fn sim_robot_logs_actions_and_echoes_state() {
        let mut robot = SimRobotIo::new();
        let log = robot.log();
        robot.send_action(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        let state = robot.read_state().unwrap();
        assert!((state[2] - 0.3).abs() < f32::EPSILON);
        robot.close();

        let log = log.lock().unwrap();
        assert_eq!(log.actions.len(), 1);
        assert_eq!(log.reads, 1);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn sim_robot_injected_send_failure() {
        let mut robot = SimRobotIo::new().fail_send_after(1);
        robot.send_action(&[0.0; 6]).unwrap();
        assert!(matches!(
            robot.send_action(&[0.0; 6]),
            Err(PilotError::Actuation { .. })
        ));
    }

    #[test]
    fn sim_camera_frames_change_over_time() {
        let mut cam = SimCamera::with_size("top", 4, 4);
        let a = cam.capture().unwrap();
        let b = cam.capture().unwrap();
        assert_eq!(a.data.len(), 48);
        assert_ne!(a, b);
    }

    #[test]
    fn sim_camera_fails_after_limit() {
        let mut cam = SimCamera::with_size("wrist", 2, 2).failing_after(1);
        assert!(cam.capture().is_ok());
        assert!(matches!(
            cam.capture(),
            Err(PilotError::SensorCapture { .. })
        ));
    }

    #[test]
    fn sim_rig_serves_all_three_cameras() {
        let mut rig = SimRig::new(32, 32).build();
        assert_eq!(rig.len(), 3);
        for name in [TOP, WRIST, SIDE] {
            let frame = rig.capture(name).unwrap();
            assert_eq!((frame.width, frame.height), (32, 32));
        }
    }
}
