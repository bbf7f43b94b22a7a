//! Typed observation records, one per policy-server input layout.
//!
//! The server expects a flat mapping whose keys depend on the checkpoint it
//! was trained with.  Rather than building an untyped map every tick, each
//! layout gets its own record whose serde attributes carry the wire keys.  A
//! missing camera is caught when the record is assembled, not by the server.

use std::fmt;
use std::str::FromStr;

use armpilot_types::cameras::{SIDE, TOP, WRIST};
use armpilot_types::{ARM_JOINT_COUNT, GRIPPER_INDEX, JointState, PilotError, RgbImage};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Server-side input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSchema {
    /// SO-100 single arm: three cameras, dotted keys.
    #[default]
    So100,
    /// phospho layout: main + secondary camera.
    Phospho,
    /// LIBERO layout: scene + wrist image.
    Libero,
    /// DROID layout: split joint/gripper state, exterior + wrist image.
    Droid,
}

impl ObservationSchema {
    pub const ALL: [ObservationSchema; 4] = [
        ObservationSchema::So100,
        ObservationSchema::Phospho,
        ObservationSchema::Libero,
        ObservationSchema::Droid,
    ];

    /// Cameras this layout needs, in capture order.
    pub fn cameras(&self) -> &'static [&'static str] {
        match self {
            ObservationSchema::So100 => &[TOP, WRIST, SIDE],
            ObservationSchema::Phospho
            | ObservationSchema::Libero
            | ObservationSchema::Droid => &[TOP, WRIST],
        }
    }
}

impl FromStr for ObservationSchema {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "so100" => Ok(ObservationSchema::So100),
            "phospho" => Ok(ObservationSchema::Phospho),
            "libero" => Ok(ObservationSchema::Libero),
            "droid" => Ok(ObservationSchema::Droid),
            other => Err(PilotError::Config(format!(
                "unknown observation schema {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ObservationSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObservationSchema::So100 => "so100",
            ObservationSchema::Phospho => "phospho",
            ObservationSchema::Libero => "libero",
            ObservationSchema::Droid => "droid",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct So100Observation {
    #[serde(rename = "observation.state", serialize_with = "ser_state")]
    pub state: JointState,
    #[serde(rename = "observation.images.top", serialize_with = "ser_image")]
    pub top: RgbImage,
    #[serde(rename = "observation.images.wrist", serialize_with = "ser_image")]
    pub wrist: RgbImage,
    #[serde(rename = "observation.images.side", serialize_with = "ser_image")]
    pub side: RgbImage,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhosphoObservation {
    #[serde(rename = "observation/state", serialize_with = "ser_state")]
    pub state: JointState,
    #[serde(rename = "observation/images.main.left", serialize_with = "ser_image")]
    pub main: RgbImage,
    #[serde(rename = "observation/images.secondary_0", serialize_with = "ser_image")]
    pub secondary: RgbImage,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiberoObservation {
    #[serde(rename = "observation/state", serialize_with = "ser_state")]
    pub state: JointState,
    #[serde(rename = "observation/image", serialize_with = "ser_image")]
    pub image: RgbImage,
    #[serde(rename = "observation/wrist_image", serialize_with = "ser_image")]
    pub wrist_image: RgbImage,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DroidObservation {
    #[serde(rename = "observation/joint_position")]
    pub joint_position: [f32; ARM_JOINT_COUNT],
    #[serde(rename = "observation/gripper_position")]
    pub gripper_position: [f32; 1],
    #[serde(rename = "observation/exterior_image_1_left", serialize_with = "ser_image")]
    pub exterior_image: RgbImage,
    #[serde(rename = "observation/wrist_image_left", serialize_with = "ser_image")]
    pub wrist_image: RgbImage,
    pub prompt: String,
}

/// One tick's observation in the layout the server expects.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ObservationBundle {
    So100(So100Observation),
    Phospho(PhosphoObservation),
    Libero(LiberoObservation),
    Droid(DroidObservation),
}

/// Frames captured for one tick, keyed by camera name.
#[derive(Debug, Default)]
pub struct CapturedFrames {
    frames: Vec<(&'static str, RgbImage)>,
}

impl CapturedFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, camera: &'static str, image: RgbImage) {
        self.frames.retain(|(name, _)| *name != camera);
        self.frames.push((camera, image));
    }

    fn take(&mut self, camera: &str) -> Result<RgbImage, PilotError> {
        let pos = self
            .frames
            .iter()
            .position(|(name, _)| *name == camera)
            .ok_or_else(|| PilotError::SensorCapture {
                source_id: camera.to_string(),
                details: format!("no frame captured for camera '{camera}'"),
            })?;
        Ok(self.frames.swap_remove(pos).1)
    }
}

impl ObservationBundle {
    /// Build the record for `schema` from a normalized state, the tick's
    /// frames and the task prompt.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::SensorCapture`] when a camera the layout needs is
    /// absent from `frames`.
    pub fn assemble(
        schema: ObservationSchema,
        state: JointState,
        mut frames: CapturedFrames,
        prompt: &str,
    ) -> Result<Self, PilotError> {
        let prompt = prompt.to_string();
        let bundle = match schema {
            ObservationSchema::So100 => ObservationBundle::So100(So100Observation {
                state,
                top: frames.take(TOP)?,
                wrist: frames.take(WRIST)?,
                side: frames.take(SIDE)?,
                prompt,
            }),
            ObservationSchema::Phospho => ObservationBundle::Phospho(PhosphoObservation {
                state,
                main: frames.take(TOP)?,
                secondary: frames.take(WRIST)?,
                prompt,
            }),
            ObservationSchema::Libero => ObservationBundle::Libero(LiberoObservation {
                state,
                image: frames.take(TOP)?,
                wrist_image: frames.take(WRIST)?,
                prompt,
            }),
            ObservationSchema::Droid => {
                let mut joint_position = [0.0; ARM_JOINT_COUNT];
                joint_position.copy_from_slice(state.joints());
                ObservationBundle::Droid(DroidObservation {
                    joint_position,
                    gripper_position: [state.0[GRIPPER_INDEX]],
                    exterior_image: frames.take(TOP)?,
                    wrist_image: frames.take(WRIST)?,
                    prompt,
                })
            }
        };
        Ok(bundle)
    }

    pub fn schema(&self) -> ObservationSchema {
        match self {
            ObservationBundle::So100(_) => ObservationSchema::So100,
            ObservationBundle::Phospho(_) => ObservationSchema::Phospho,
            ObservationBundle::Libero(_) => ObservationSchema::Libero,
            ObservationBundle::Droid(_) => ObservationSchema::Droid,
        }
    }

    /// The normalized joint state carried by this observation.
    pub fn state(&self) -> JointState {
        match self {
            ObservationBundle::So100(o) => o.state,
            ObservationBundle::Phospho(o) => o.state,
            ObservationBundle::Libero(o) => o.state,
            ObservationBundle::Droid(o) => {
                let mut values = [0.0; 6];
                values[..ARM_JOINT_COUNT].copy_from_slice(&o.joint_position);
                values[GRIPPER_INDEX] = o.gripper_position[0];
                JointState(values)
            }
        }
    }

    /// Encode as the JSON text frame sent to the server.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Inference`] if serialization fails.
    pub fn to_wire(&self) -> Result<String, PilotError> {
        serde_json::to_string(self)
            .map_err(|e| PilotError::Inference(format!("failed to encode observation: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ─────────────────────────────────────────────────────────────────────────────

/// ndarray-style envelope for image buffers.
#[derive(Serialize)]
struct NdArray<'a> {
    dtype: &'static str,
    shape: [u32; 3],
    data: &'a [u8],
}

fn ser_image<S: Serializer>(image: &RgbImage, s: S) -> Result<S::Ok, S::Error> {
    NdArray {
        dtype: "uint8",
        shape: [image.height, image.width, 3],
        data: &image.data,
    }
    .serialize(s)
}

fn ser_state<S: Serializer>(state: &JointState, s: S) -> Result<S::Ok, S::Error> {
    state.0.serialize(s)
}
