//! Ingestion policy: the knobs an ingestion run is allowed to vary.
//! Loaded from YAML; every field has a default.

use serde::{Deserialize, Serialize};

use crate::evidence::{Driver, Horizon};
use crate::LedgerError;

/// Hard per-application ceiling on a growth delta, in basis points.
pub const HARD_GROWTH_CAP_BPS: u32 = 500;
/// Hard per-application ceiling on a margin delta, in basis points.
pub const HARD_MARGIN_CAP_BPS: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionPolicy {
    /// Minimum claim confidence for a change to be applied (default: 0.80)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Growth delta cap per application in bps; may only be tightened (default: 500)
    #[serde(default = "default_growth_cap_bps")]
    pub growth_cap_bps: u32,
    /// Margin delta cap per application in bps; may only be tightened (default: 200)
    #[serde(default = "default_margin_cap_bps")]
    pub margin_cap_bps: u32,
    /// Magnitude used when a claim states a direction but no value (default: 0.01)
    #[serde(default = "default_nudge")]
    pub default_nudge: f64,
    /// Refuse bundles that have not been frozen (default: false)
    #[serde(default)]
    pub require_frozen: bool,
    /// Record what would change but hand back the snapshot untouched (default: false)
    #[serde(default)]
    pub dry_run: bool,
}

fn default_confidence_threshold() -> f64 {
    0.80
}

fn default_growth_cap_bps() -> u32 {
    HARD_GROWTH_CAP_BPS
}

fn default_margin_cap_bps() -> u32 {
    HARD_MARGIN_CAP_BPS
}

fn default_nudge() -> f64 {
    0.01
}

impl Default for IngestionPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            growth_cap_bps: default_growth_cap_bps(),
            margin_cap_bps: default_margin_cap_bps(),
            default_nudge: default_nudge(),
            require_frozen: false,
            dry_run: false,
        }
    }
}

impl IngestionPolicy {
    /// Parse and validate a policy document.
    ///
    /// # Errors
    /// Returns [`LedgerError::Policy`] for malformed YAML, unknown keys or values that
    /// fail [`IngestionPolicy::validate`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LedgerError> {
        let policy: Self = serde_yaml::from_str(yaml)
            .map_err(|err| LedgerError::Policy(format!("invalid policy document: {err}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// # Errors
    /// Returns [`LedgerError::Policy`] when the threshold is outside `[0, 1]`, a cap is
    /// zero or looser than the hard cap, or the nudge is not a positive finite number.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.confidence_threshold.is_finite() || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(LedgerError::Policy(format!(
                "confidence_threshold MUST be in [0.0, 1.0], got {}",
                self.confidence_threshold
            )));
        }

        if self.growth_cap_bps == 0 || self.growth_cap_bps > HARD_GROWTH_CAP_BPS {
            return Err(LedgerError::Policy(format!(
                "growth_cap_bps MUST be in 1..={HARD_GROWTH_CAP_BPS}, got {}",
                self.growth_cap_bps
            )));
        }

        if self.margin_cap_bps == 0 || self.margin_cap_bps > HARD_MARGIN_CAP_BPS {
            return Err(LedgerError::Policy(format!(
                "margin_cap_bps MUST be in 1..={HARD_MARGIN_CAP_BPS}, got {}",
                self.margin_cap_bps
            )));
        }

        if !self.default_nudge.is_finite() || self.default_nudge <= 0.0 {
            return Err(LedgerError::Policy(format!(
                "default_nudge MUST be a positive finite number, got {}",
                self.default_nudge
            )));
        }

        Ok(())
    }

    /// Per-application delta cap for `driver` in model units, if the driver is capped.
    #[must_use]
    pub fn cap_for(&self, driver: Driver) -> Option<f64> {
        match driver {
            Driver::Growth => Some(f64::from(self.growth_cap_bps) / 10_000.0),
            Driver::Margin => Some(f64::from(self.margin_cap_bps) / 10_000.0),
            Driver::Wacc | Driver::S2c => None,
        }
    }

    /// Cap identifier recorded as a change's `applied_rule`, e.g. `growth_cap_y1_500bps`.
    #[must_use]
    pub fn rule_label(&self, driver: Driver, horizon: Horizon) -> String {
        let cap = match driver {
            Driver::Growth => format!("{}bps", self.growth_cap_bps),
            Driver::Margin => format!("{}bps", self.margin_cap_bps),
            Driver::Wacc | Driver::S2c => "uncapped".to_string(),
        };
        format!("{}_cap_{}_{cap}", driver.as_str(), horizon.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let policy = match IngestionPolicy::from_yaml_str("{}") {
            Ok(policy) => policy,
            Err(err) => panic!("empty policy failed to parse: {err}"),
        };
        assert_eq!(policy, IngestionPolicy::default());
        assert_eq!(policy.cap_for(Driver::Growth), Some(0.05));
        assert_eq!(policy.cap_for(Driver::Margin), Some(0.02));
        assert_eq!(policy.cap_for(Driver::Wacc), None);
    }

    #[test]
    fn caps_may_be_tightened() {
        let yaml = "confidence_threshold: 0.9\ngrowth_cap_bps: 250\nrequire_frozen: true\ndry_run: true\n";
        let policy = match IngestionPolicy::from_yaml_str(yaml) {
            Ok(policy) => policy,
            Err(err) => panic!("policy failed to parse: {err}"),
        };
        assert_eq!(policy.growth_cap_bps, 250);
        assert_eq!(policy.margin_cap_bps, HARD_MARGIN_CAP_BPS);
        assert!(policy.require_frozen);
        assert!(policy.dry_run);
        assert_eq!(policy.rule_label(Driver::Growth, Horizon::Y1), "growth_cap_y1_250bps");
        assert_eq!(policy.rule_label(Driver::S2c, Horizon::LongTerm), "s2c_cap_LT_uncapped");
    }

    #[test]
    fn loosened_caps_and_bad_values_are_rejected() {
        for yaml in [
            "growth_cap_bps: 800",
            "margin_cap_bps: 0",
            "confidence_threshold: 1.5",
            "default_nudge: -0.01",
            "max_changes: 3",
        ] {
            match IngestionPolicy::from_yaml_str(yaml) {
                Err(LedgerError::Policy(_)) => {}
                other => panic!("expected policy error for `{yaml}`, got {other:?}"),
            }
        }
    }
}
