use serde::{Deserialize, Serialize};

use crate::evidence::{Driver, EvidenceClaim};

const GROWTH_BOUNDS: (f64, f64) = (-0.5, 2.0);
const MARGIN_BOUNDS: (f64, f64) = (-0.2, 0.8);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Set by the engine once the value has actually been written.
    pub applied: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub caps_triggered: Vec<String>,
}

/// Checks a proposed value against the run threshold and reasonableness bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Validator {
    confidence_threshold: f64,
}

impl Validator {
    #[must_use]
    pub fn new(confidence_threshold: f64) -> Self {
        Self { confidence_threshold }
    }

    #[must_use]
    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Evaluate one proposed change. Errors make the result invalid. A triggered cap
    /// or a missing `before` value only adds a warning.
    #[must_use]
    pub fn validate(
        &self,
        before: Option<f64>,
        after: f64,
        claim: &EvidenceClaim,
        cap_applied: bool,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut caps_triggered = Vec::new();

        if claim.confidence < self.confidence_threshold {
            errors.push(format!(
                "Claim confidence {} below threshold {}",
                claim.confidence, self.confidence_threshold
            ));
        }

        if !after.is_finite() {
            errors.push(format!("Proposed {} value {after} is not finite", claim.driver.as_str()));
        } else {
            match claim.driver {
                Driver::Growth if !within(after, GROWTH_BOUNDS) => errors.push(format!(
                    "Growth rate {} outside reasonable bounds [-50%, 200%]",
                    percent(after)
                )),
                Driver::Margin if !within(after, MARGIN_BOUNDS) => errors.push(format!(
                    "Operating margin {} outside reasonable bounds [-20%, 80%]",
                    percent(after)
                )),
                _ => {}
            }
        }

        if before.is_none() {
            warnings.push(format!(
                "No existing {} value at target; driver default used as baseline",
                claim.driver.as_str()
            ));
        }

        if cap_applied {
            caps_triggered.push(format!("{}_safety_cap", claim.driver.as_str()));
            warnings.push(format!("Safety cap applied to {} change", claim.driver.as_str()));
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            applied: false,
            errors,
            warnings,
            caps_triggered,
        }
    }
}

fn within(value: f64, (low, high): (f64, f64)) -> bool {
    (low..=high).contains(&value)
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
