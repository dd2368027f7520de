use serde::{Deserialize, Serialize};

use crate::evidence::{Direction, Driver, EvidenceClaim};
use crate::policy::IngestionPolicy;

/// Baseline used for delta computation when the snapshot has no value at a path.
#[must_use]
pub fn default_value(driver: Driver) -> f64 {
    match driver {
        Driver::Growth => 0.05,
        Driver::Margin => 0.10,
        Driver::Wacc => 0.08,
        Driver::S2c => 2.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppliedValue {
    /// Value read from the snapshot; `None` when the field was absent.
    pub before: Option<f64>,
    /// Value the delta was applied to: `before`, or the driver default.
    pub baseline: f64,
    pub after: f64,
    pub cap_applied: bool,
}

impl AppliedValue {
    /// Driver default that stood in for a missing `before`.
    #[must_use]
    pub fn assumed_baseline(&self) -> Option<f64> {
        match self.before {
            Some(_) => None,
            None => Some(self.baseline),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeApplier {
    growth_cap: f64,
    margin_cap: f64,
    nudge: f64,
}

impl Default for ChangeApplier {
    fn default() -> Self {
        Self::new(&IngestionPolicy::default())
    }
}

impl ChangeApplier {
    #[must_use]
    pub fn new(policy: &IngestionPolicy) -> Self {
        Self {
            growth_cap: policy.cap_for(Driver::Growth).unwrap_or(0.05),
            margin_cap: policy.cap_for(Driver::Margin).unwrap_or(0.02),
            nudge: policy.default_nudge,
        }
    }

    #[must_use]
    pub fn cap_for(&self, driver: Driver) -> Option<f64> {
        match driver {
            Driver::Growth => Some(self.growth_cap),
            Driver::Margin => Some(self.margin_cap),
            Driver::Wacc | Driver::S2c => None,
        }
    }

    /// Compute the value `claim` proposes for a field currently holding `before`.
    ///
    /// The signed delta is clamped to the driver cap before it is added, so the cap
    /// bounds the move regardless of where the baseline sits.
    #[must_use]
    pub fn apply(&self, before: Option<f64>, claim: &EvidenceClaim) -> AppliedValue {
        let baseline = before.unwrap_or_else(|| default_value(claim.driver));

        if claim.direction == Direction::Unclear {
            return AppliedValue { before, baseline, after: baseline, cap_applied: false };
        }

        let magnitude = match claim.magnitude_value {
            Some(value) => claim.magnitude_units.normalize(value),
            None => self.nudge,
        };
        let mut delta = claim.direction.sign() * magnitude;

        let mut cap_applied = false;
        if let Some(cap) = self.cap_for(claim.driver) {
            if delta.abs() > cap {
                delta = cap.copysign(delta);
                cap_applied = true;
            }
        }

        AppliedValue { before, baseline, after: baseline + delta, cap_applied }
    }
}
