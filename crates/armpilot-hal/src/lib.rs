//! `armpilot-hal` – Hardware Abstraction Layer
//!
//! Capability traits for everything the control loop touches on the robot
//! side, plus the concrete drivers selected at startup.
//!
//! # Modules
//!
//! - [`robot_io`] – [`RobotIo`][robot_io::RobotIo]: read joint state, send a
//!   joint target.  [`RobotIoMode`][robot_io::RobotIoMode] selects the
//!   transport.
//! - [`http_io`] – [`HttpRobotIo`][http_io::HttpRobotIo]: REST bridge
//!   transport (`/joints/read`, `/joints/write`).
//! - [`servo`] – [`Servo`][servo::Servo] and
//!   [`DirectArmIo`][servo::DirectArmIo]: six named servos driven directly,
//!   with optional degree conversion.
//! - [`camera`] – [`Camera`][camera::Camera],
//!   [`FrameSource`][camera::FrameSource] and the letterbox
//!   [`resize_with_pad`][camera::resize_with_pad].
//! - [`sim`] – simulated servos, robot and cameras for headless runs.

pub mod camera;
pub mod http_io;
pub mod robot_io;
pub mod servo;
pub mod sim;

pub use camera::{Camera, CameraRig, FrameSource, resize_with_pad};
pub use http_io::HttpRobotIo;
pub use robot_io::{RobotIo, RobotIoMode};
pub use servo::{DirectArmIo, MOTOR_NAMES, Servo};
pub use sim::{SimCamera, SimRig, SimRobotIo, SimServo};
