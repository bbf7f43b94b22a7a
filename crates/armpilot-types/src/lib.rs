//! `armpilot-types` – shared data model for the armpilot workspace.
//!
//! Every crate in the workspace speaks in these types: joint state vectors,
//! joint-order permutations, limit intervals, RGB frames, action chunks, and
//! the [`PilotError`] taxonomy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of entries in a joint-state vector: 5 arm joints plus the gripper.
pub const JOINT_COUNT: usize = 6;

/// Number of arm joints (every entry except the trailing gripper).
pub const ARM_JOINT_COUNT: usize = 5;

/// Index of the gripper entry inside a [`JointState`].
pub const GRIPPER_INDEX: usize = 5;

/// Well-known camera names shared by capture and observation assembly.
pub mod cameras {
    /// Overhead camera giving scene context.
    pub const TOP: &str = "top";
    /// Camera mounted on the wrist.
    pub const WRIST: &str = "wrist";
    /// Side-facing camera.
    pub const SIDE: &str = "side";
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by sensors, normalization, inference and actuation.
///
/// The actuation loop applies a different recovery policy to each variant, so
/// callers must keep them distinct rather than collapsing them into strings.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PilotError {
    /// A camera or other sensor source could not produce a frame.
    #[error("Sensor capture failed on {source_id}: {details}")]
    SensorCapture { source_id: String, details: String },

    /// A joint-state vector was rejected (wrong length, non-finite, bad unit).
    #[error("Invalid joint state: {0}")]
    InvalidState(String),

    /// A joint-order sequence is not a complete permutation of `0..6`.
    #[error("Invalid joint order permutation: {0}")]
    InvalidPermutation(String),

    /// The policy server call failed or returned an unusable action chunk.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The robot I/O sink rejected or failed to apply a command.
    #[error("Actuation fault on {component}: {details}")]
    Actuation { component: String, details: String },

    /// A configuration value could not be parsed or is out of range.
    #[error("Configuration error: {0}")]
    Config(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Units
// ─────────────────────────────────────────────────────────────────────────────

/// Angular unit tag attached to a raw joint-state reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    #[default]
    Rad,
    Deg,
}

impl FromStr for AngleUnit {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rad" => Ok(AngleUnit::Rad),
            "deg" => Ok(AngleUnit::Deg),
            other => Err(PilotError::InvalidState(format!(
                "unsupported state unit {other:?} (expected \"rad\" or \"deg\")"
            ))),
        }
    }
}

impl fmt::Display for AngleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleUnit::Rad => write!(f, "rad"),
            AngleUnit::Deg => write!(f, "deg"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Joint state
// ─────────────────────────────────────────────────────────────────────────────

/// A 6-entry joint-state vector: 5 arm joint angles followed by the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointState(pub [f32; JOINT_COUNT]);

impl JointState {
    /// The all-zero safe state substituted when a reading is rejected.
    pub const ZERO: JointState = JointState([0.0; JOINT_COUNT]);

    /// Build a state from an arbitrary slice.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::InvalidState`] if `values` does not hold exactly
    /// [`JOINT_COUNT`] entries.
    pub fn from_slice(values: &[f32]) -> Result<Self, PilotError> {
        let arr: [f32; JOINT_COUNT] = values.try_into().map_err(|_| {
            PilotError::InvalidState(format!(
                "expected state of length {JOINT_COUNT}, got {}",
                values.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// The 5 arm joint entries.
    pub fn joints(&self) -> &[f32] {
        &self.0[..ARM_JOINT_COUNT]
    }

    pub fn gripper(&self) -> f32 {
        self.0[GRIPPER_INDEX]
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Joint order permutation
// ─────────────────────────────────────────────────────────────────────────────

/// Mapping from raw sensor channel order to the canonical model order.
///
/// Entry `k` names the raw channel that lands at canonical position `k`.
/// Construction guarantees a complete permutation of `0..6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointOrder([usize; JOINT_COUNT]);

impl JointOrder {
    pub const IDENTITY: JointOrder = JointOrder([0, 1, 2, 3, 4, 5]);

    /// Validate `indices` as a permutation of `0..6`.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::InvalidPermutation`] when the sequence has the
    /// wrong length, an out-of-range index, or a duplicate.
    pub fn new(indices: &[usize]) -> Result<Self, PilotError> {
        if indices.len() != JOINT_COUNT {
            return Err(PilotError::InvalidPermutation(format!(
                "expected {JOINT_COUNT} indices, got {}",
                indices.len()
            )));
        }
        let mut seen = [false; JOINT_COUNT];
        for &idx in indices {
            if idx >= JOINT_COUNT {
                return Err(PilotError::InvalidPermutation(format!(
                    "index {idx} out of range 0..{JOINT_COUNT}"
                )));
            }
            if seen[idx] {
                return Err(PilotError::InvalidPermutation(format!(
                    "index {idx} appears more than once"
                )));
            }
            seen[idx] = true;
        }
        let mut order = [0; JOINT_COUNT];
        order.copy_from_slice(indices);
        Ok(Self(order))
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn indices(&self) -> &[usize; JOINT_COUNT] {
        &self.0
    }

    /// Reorder `state` into canonical order.
    pub fn apply(&self, state: &JointState) -> JointState {
        let mut out = [0.0; JOINT_COUNT];
        for (dst, &src) in out.iter_mut().zip(self.0.iter()) {
            *dst = state.0[src];
        }
        JointState(out)
    }
}

impl Default for JointOrder {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl FromStr for JointOrder {
    type Err = PilotError;

    /// Parse a comma-separated index list such as `"0,1,2,3,4,5"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let indices = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse::<usize>().map_err(|_| {
                    PilotError::InvalidPermutation(format!("invalid index {p:?} in {s:?}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&indices)
    }
}

impl fmt::Display for JointOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Limits
// ─────────────────────────────────────────────────────────────────────────────

/// A closed interval `[lo, hi]` used to clamp a single state entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: f32,
    pub hi: f32,
}

impl Interval {
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] if either bound is non-finite or
    /// `lo > hi`.
    pub fn new(lo: f32, hi: f32) -> Result<Self, PilotError> {
        if !lo.is_finite() || !hi.is_finite() || lo > hi {
            return Err(PilotError::Config(format!("invalid interval ({lo}, {hi})")));
        }
        Ok(Self { lo, hi })
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.lo, self.hi)
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.lo && value <= self.hi
    }
}

impl FromStr for Interval {
    type Err = PilotError;

    /// Parse a parenthesised pair such as `"(-2.5,2.5)"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let inner = t
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| PilotError::Config(format!("invalid limits entry {t:?}")))?;
        let (lo, hi) = inner
            .split_once(',')
            .ok_or_else(|| PilotError::Config(format!("invalid limits entry {t:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<f32>()
                .map_err(|_| PilotError::Config(format!("invalid bound {v:?} in {t:?}")))
        };
        Self::new(parse(lo)?, parse(hi)?)
    }
}

/// Per-joint clamp intervals for the 5 arm joints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimits(pub [Interval; ARM_JOINT_COUNT]);

impl JointLimits {
    /// Apply the same interval to every arm joint.
    pub fn uniform(interval: Interval) -> Self {
        Self([interval; ARM_JOINT_COUNT])
    }
}

impl FromStr for JointLimits {
    type Err = PilotError;

    /// Parse semicolon-separated pairs, e.g.
    /// `"(-2.5,2.5);(-2.5,2.5);(-2.5,2.5);(-2.5,2.5);(-3.14,3.14)"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pairs = s
            .split(';')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(Interval::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        let arr: [Interval; ARM_JOINT_COUNT] = pairs.as_slice().try_into().map_err(|_| {
            PilotError::Config(format!(
                "expected {ARM_JOINT_COUNT} joint limit entries, got {}",
                pairs.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Images
// ─────────────────────────────────────────────────────────────────────────────

/// An 8-bit interleaved RGB image (`height × width × 3`, row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbImage {
    /// An all-black image of the given size.
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    /// Wrap raw pixel data, checking that its length matches the dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::SensorCapture`] when the buffer size is wrong.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, PilotError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(PilotError::SensorCapture {
                source_id: "rgb_image".to_string(),
                details: format!(
                    "buffer of {} bytes does not match {width}x{height}x3 ({expected})",
                    data.len()
                ),
            });
        }
        Ok(Self { width, height, data })
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actions
// ─────────────────────────────────────────────────────────────────────────────

/// A single multi-dimensional action command.
pub type ActionVector = Vec<f32>;

/// The ordered action rows returned by one inference call.
///
/// Rows all share the same dimensionality. A chunk is immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionChunk {
    rows: Vec<ActionVector>,
}

impl ActionChunk {
    /// # Errors
    ///
    /// Returns [`PilotError::Inference`] when `rows` is empty, the rows
    /// disagree on width, or any value is non-finite.
    pub fn new(rows: Vec<ActionVector>) -> Result<Self, PilotError> {
        let Some(first) = rows.first() else {
            return Err(PilotError::Inference("action chunk is empty".to_string()));
        };
        let dim = first.len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(PilotError::Inference(format!(
                    "action row {i} has {} values, expected {dim}",
                    row.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(PilotError::Inference(format!(
                    "action row {i} contains non-finite values"
                )));
            }
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of every row.
    pub fn dim(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn row(&self, index: usize) -> Option<&ActionVector> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[ActionVector] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_unit_parses_case_insensitively() {
        assert_eq!("RAD".parse::<AngleUnit>().unwrap(), AngleUnit::Rad);
        assert_eq!(" deg ".parse::<AngleUnit>().unwrap(), AngleUnit::Deg);
        assert!(matches!(
            "grad".parse::<AngleUnit>(),
            Err(PilotError::InvalidState(_))
        ));
    }

    #[test]
    fn joint_state_rejects_wrong_length() {
        assert!(JointState::from_slice(&[0.0; 6]).is_ok());
        assert!(matches!(
            JointState::from_slice(&[0.0; 5]),
            Err(PilotError::InvalidState(_))
        ));
    }

    #[test]
    fn joint_order_parses_and_applies() {
        let order: JointOrder = "5,4,3,2,1,0".parse().unwrap();
        let out = order.apply(&JointState([0.0, 1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(out, JointState([5.0, 4.0, 3.0, 2.0, 1.0, 0.0]));
        assert!(!order.is_identity());
        assert!(JointOrder::default().is_identity());
    }

    #[test]
    fn joint_order_rejects_non_permutations() {
        for bad in [
            &[0, 1, 2, 3, 4][..],
            &[0, 1, 2, 3, 4, 5, 0][..],
            &[0, 1, 2, 3, 4, 4][..],
            &[0, 1, 2, 3, 4, 6][..],
        ] {
            assert!(
                matches!(JointOrder::new(bad), Err(PilotError::InvalidPermutation(_))),
                "{bad:?} must be rejected"
            );
        }
        assert!(matches!(
            "0,1,x,3,4,5".parse::<JointOrder>(),
            Err(PilotError::InvalidPermutation(_))
        ));
    }

    #[test]
    fn joint_order_display_roundtrips() {
        let order: JointOrder = "1,0,2,3,5,4".parse().unwrap();
        assert_eq!(order.to_string(), "1,0,2,3,5,4");
    }

    #[test]
    fn interval_parses_pair() {
        let i: Interval = "(-2.5, 2.5)".parse().unwrap();
        assert_eq!(i, Interval { lo: -2.5, hi: 2.5 });
        assert!("-2.5,2.5".parse::<Interval>().is_err());
        assert!("(3,1)".parse::<Interval>().is_err());
    }

    #[test]
    fn joint_limits_require_five_entries() {
        let ok: JointLimits = "(-1,1);(-1,1);(-1,1);(-1,1);(-3,3)".parse().unwrap();
        assert!((ok.0[4].hi - 3.0).abs() < f32::EPSILON);
        assert!(matches!(
            "(-1,1);(-1,1)".parse::<JointLimits>(),
            Err(PilotError::Config(_))
        ));
    }

    #[test]
    fn rgb_image_checks_buffer_size() {
        assert!(RgbImage::from_raw(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            RgbImage::from_raw(2, 2, vec![0; 11]),
            Err(PilotError::SensorCapture { .. })
        ));
    }

    #[test]
    fn action_chunk_validates_rows() {
        let chunk = ActionChunk::new(vec![vec![0.0; 6]; 3]).unwrap();
        assert_eq!(chunk.len(), 3);
        assert_eq!(chunk.dim(), 6);
        assert!(ActionChunk::new(vec![]).is_err());
        assert!(ActionChunk::new(vec![vec![0.0; 6], vec![0.0; 5]]).is_err());
        assert!(ActionChunk::new(vec![vec![f32::NAN; 6]]).is_err());
    }

    #[test]
    fn pilot_error_display() {
        let err = PilotError::Actuation {
            component: "http_robot".to_string(),
            details: "503".to_string(),
        };
        assert!(err.to_string().contains("http_robot"));
        let json = serde_json::to_string(&err).unwrap();
        let back: PilotError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
