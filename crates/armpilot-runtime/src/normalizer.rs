//! [`StateNormalizer`] – raw joint readings to canonical model input.
//!
//! Steps run in a fixed order: validate, convert units, reorder, clamp.
//! Clamping happens after reordering, so limits are expressed in canonical
//! joint order.

use armpilot_types::{
    ARM_JOINT_COUNT, AngleUnit, GRIPPER_INDEX, Interval, JOINT_COUNT, JointLimits, JointOrder,
    JointState, PilotError,
};

/// Validated normalization settings, parsed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StateNormalizer {
    pub units: AngleUnit,
    pub order: JointOrder,
    pub joint_limits: Option<JointLimits>,
    pub gripper_limits: Option<Interval>,
}

impl StateNormalizer {
    /// Radian input, identity order, no limits.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn with_units(mut self, units: AngleUnit) -> Self {
        self.units = units;
        self
    }

    pub fn with_order(mut self, order: JointOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_joint_limits(mut self, limits: JointLimits) -> Self {
        self.joint_limits = Some(limits);
        self
    }

    pub fn with_gripper_limits(mut self, limits: Interval) -> Self {
        self.gripper_limits = Some(limits);
        self
    }

    /// Normalize one raw reading.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::InvalidState`] when `raw` does not hold exactly
    /// six finite values.
    pub fn normalize(&self, raw: &[f32]) -> Result<JointState, PilotError> {
        validate(raw).map(|state| self.transform(state))
    }

    /// Convert, reorder and clamp an already validated reading.
    fn transform(&self, mut state: JointState) -> JointState {
        if self.units == AngleUnit::Deg {
            for v in &mut state.0[..ARM_JOINT_COUNT] {
                *v = v.to_radians();
            }
        }
        let mut state = self.order.apply(&state);
        if let Some(limits) = &self.joint_limits {
            for (v, interval) in state.0[..ARM_JOINT_COUNT].iter_mut().zip(limits.0.iter()) {
                *v = interval.clamp(*v);
            }
        }
        if let Some(gripper) = &self.gripper_limits {
            state.0[GRIPPER_INDEX] = gripper.clamp(state.0[GRIPPER_INDEX]);
        }
        state
    }
}

/// Normalize `raw` from untyped settings.
///
/// Equivalent to building a [`StateNormalizer`] and calling
/// [`StateNormalizer::normalize`], with the unit tag and order validated on
/// every call.
///
/// # Errors
///
/// - [`PilotError::InvalidState`] for a bad length, non-finite value, or
///   unknown unit tag.
/// - [`PilotError::InvalidPermutation`] when `order` is not a complete
///   permutation of `0..6`.
pub fn normalize_state(
    raw: &[f32],
    units: &str,
    order: &[usize],
    joint_limits: Option<&JointLimits>,
    gripper_limits: Option<&Interval>,
) -> Result<JointState, PilotError> {
    // The reading is checked before the settings, so a bad length is
    // reported even when the unit tag or order is also wrong.
    let state = validate(raw)?;
    let normalizer = StateNormalizer {
        units: units.parse()?,
        order: JointOrder::new(order)?,
        joint_limits: joint_limits.copied(),
        gripper_limits: gripper_limits.copied(),
    };
    Ok(normalizer.transform(state))
}

fn validate(raw: &[f32]) -> Result<JointState, PilotError> {
    if raw.len() != JOINT_COUNT {
        return Err(PilotError::InvalidState(format!(
            "expected {JOINT_COUNT} values, got {}: {raw:?}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(PilotError::InvalidState(format!(
            "non-finite value in {raw:?}"
        )));
    }
    JointState::from_slice(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: [f32; 6] = [0.1, -0.2, 0.3, -0.4, 0.5, 42.0];

    #[test]
    fn identity_on_canonical_input() {
        let out = StateNormalizer::identity().normalize(&CANONICAL).unwrap();
        assert_eq!(out.0, CANONICAL);
    }

    #[test]
    fn degrees_round_trip_within_tolerance() {
        let degrees = [10.0, -45.0, 90.0, 179.5, -0.25, 37.0];
        let out = StateNormalizer::identity()
            .with_units(AngleUnit::Deg)
            .normalize(&degrees)
            .unwrap();
        for (i, (&rad, &deg)) in out.0[..5].iter().zip(degrees.iter()).enumerate() {
            assert!((rad.to_degrees() - deg).abs() < 1e-5 * deg.abs().max(1.0), "joint {i}");
        }
        assert_eq!(out.gripper(), 37.0, "gripper is never unit-converted");
    }

    #[test]
    fn permutation_moves_raw_channels() {
        let order: JointOrder = "5,0,1,2,3,4".parse().unwrap();
        let out = StateNormalizer::identity()
            .with_order(order)
            .normalize(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        assert_eq!(out.0, [5.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn incomplete_permutations_are_rejected() {
        for order in [&[0, 1, 2, 3, 4][..], &[0, 1, 2, 3, 4, 4], &[0, 1, 2, 3, 4, 6]] {
            let err = normalize_state(&CANONICAL, "rad", order, None, None).unwrap_err();
            assert!(matches!(err, PilotError::InvalidPermutation(_)), "{order:?}");
        }
    }

    #[test]
    fn clamps_joints_and_gripper() {
        let limits = JointLimits::uniform(Interval::new(-1.0, 1.0).unwrap());
        let gripper = Interval::new(0.0, 1.0).unwrap();
        let out = StateNormalizer::identity()
            .with_joint_limits(limits)
            .with_gripper_limits(gripper)
            .normalize(&[5.0, -5.0, 0.5, 1.0, -1.0, 30.0])
            .unwrap();
        assert_eq!(out.0, [1.0, -1.0, 0.5, 1.0, -1.0, 1.0]);
        assert!(out.joints().iter().all(|&v| limits.0[0].contains(v)));
    }

    #[test]
    fn zero_degrees_with_limits_stays_zero() {
        let limits = JointLimits::uniform(Interval::new(-1.0, 1.0).unwrap());
        let gripper = Interval::new(0.0, 1.0).unwrap();
        let out = normalize_state(&[0.0; 6], "deg", &[0, 1, 2, 3, 4, 5], Some(&limits), Some(&gripper))
            .unwrap();
        assert_eq!(out, JointState::ZERO);
    }

    #[test]
    fn rejects_wrong_length_and_non_finite() {
        let n = StateNormalizer::identity();
        assert!(matches!(n.normalize(&[0.0; 5]), Err(PilotError::InvalidState(_))));
        assert!(matches!(n.normalize(&[0.0; 7]), Err(PilotError::InvalidState(_))));
        let mut raw = [0.0; 6];
        raw[3] = f32::NAN;
        assert!(matches!(n.normalize(&raw), Err(PilotError::InvalidState(_))));
        raw[3] = f32::INFINITY;
        assert!(matches!(n.normalize(&raw), Err(PilotError::InvalidState(_))));
    }

    #[test]
    fn unknown_unit_tag_is_invalid_state() {
        let err = normalize_state(&CANONICAL, "grad", &[0, 1, 2, 3, 4, 5], None, None).unwrap_err();
        assert!(matches!(err, PilotError::InvalidState(_)));
    }

    #[test]
    fn length_is_checked_before_unit_and_order() {
        let err = normalize_state(&[0.0; 3], "grad", &[0], None, None).unwrap_err();
        assert!(matches!(err, PilotError::InvalidState(ref m) if m.contains("expected 6")));
    }
}
