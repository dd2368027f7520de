//! Model-PR log: the change list an ingestion run leaves behind.
//!
//! Applied changes, rejected attempts and conflict resolutions are appended by the
//! engine only; everything else here is a read-only view for auditors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
    Unchanged,
    New,
}

impl ChangeDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::Unchanged => "unchanged",
            Self::New => "new",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverChange {
    pub evidence_id: String,
    pub target_path: String,
    pub before_value: Option<f64>,
    pub after_value: f64,
    pub change_reason: String,
    pub applied_rule: String,
    pub cap_applied: bool,
    pub confidence_threshold: f64,
    pub claim_confidence: f64,
    /// Driver default the delta was computed from when `before_value` is null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumed_baseline: Option<f64>,
    /// Validator warnings raised for an applied change, such as a triggered safety cap.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl DriverChange {
    /// `|after - before|`, with a null `before` counted as zero.
    #[must_use]
    pub fn change_magnitude(&self) -> f64 {
        (self.after_value - self.before_value.unwrap_or(0.0)).abs()
    }

    /// Size of the move actually made, measured from the assumed baseline when the
    /// field was new.
    #[must_use]
    pub fn applied_delta(&self) -> f64 {
        let baseline = self.before_value.or(self.assumed_baseline).unwrap_or(0.0);
        (self.after_value - baseline).abs()
    }

    #[must_use]
    pub fn change_direction(&self) -> ChangeDirection {
        match self.before_value {
            None => ChangeDirection::New,
            Some(before) if self.after_value > before => ChangeDirection::Increase,
            Some(before) if self.after_value < before => ChangeDirection::Decrease,
            Some(_) => ChangeDirection::Unchanged,
        }
    }
}

/// Pipeline stage at which an attempted change was turned away.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    Schema,
    Confidence,
    Superseded,
    Validation,
    Application,
}

impl RejectionStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Confidence => "confidence",
            Self::Superseded => "superseded",
            Self::Validation => "validation",
            Self::Application => "application",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedChange {
    pub evidence_id: String,
    pub target_path: String,
    pub before_value: Option<f64>,
    pub proposed_value: Option<f64>,
    pub stage: RejectionStage,
    pub reasons: Vec<String>,
    /// Absent when the claim's own confidence was not a finite number.
    pub claim_confidence: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub target_path: String,
    pub conflicting_evidence_ids: Vec<String>,
    pub resolution_method: String,
    pub winning_evidence_id: String,
    pub resolution_reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_attempted: usize,
    pub total_applied: usize,
    pub total_rejected: usize,
}

impl ValidationSummary {
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.total_attempted == self.total_applied + self.total_rejected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeStep {
    pub evidence_id: String,
    pub from: Option<f64>,
    pub to: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverImpact {
    pub total_changes: usize,
    pub initial_value: Option<f64>,
    pub final_value: Option<f64>,
    pub net_impact: f64,
    pub change_sequence: Vec<ChangeStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceUtilization {
    pub changes_applied: usize,
    pub avg_confidence: f64,
    pub paths_affected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_changes: usize,
    pub unique_evidence_items: usize,
    pub unique_drivers_affected: usize,
    pub conflicts_resolved: usize,
    pub avg_claim_confidence: f64,
    pub caps_applied: usize,
    #[serde(default)]
    pub warnings_recorded: usize,
    pub rejected_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub ticker: String,
    pub statistics: AuditStatistics,
    pub driver_impacts: BTreeMap<String, DriverImpact>,
    pub evidence_utilization: BTreeMap<String, EvidenceUtilization>,
    pub validation_summary: ValidationSummary,
    pub conflicts_resolved: Vec<ConflictResolution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPRLog {
    ticker: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    evidence_bundle_id: String,
    #[serde(default)]
    changes: Vec<DriverChange>,
    #[serde(default)]
    rejections: Vec<RejectedChange>,
    #[serde(default)]
    conflicts_resolved: Vec<ConflictResolution>,
    #[serde(default)]
    validation_summary: ValidationSummary,
}

impl ModelPRLog {
    #[must_use]
    pub fn new(ticker: &str, evidence_bundle_id: &str, timestamp: OffsetDateTime) -> Self {
        Self {
            ticker: ticker.to_string(),
            timestamp,
            evidence_bundle_id: evidence_bundle_id.to_string(),
            changes: Vec::new(),
            rejections: Vec::new(),
            conflicts_resolved: Vec::new(),
            validation_summary: ValidationSummary::default(),
        }
    }

    pub(crate) fn add_change(&mut self, change: DriverChange) {
        self.changes.push(change);
        self.validation_summary.total_attempted += 1;
        self.validation_summary.total_applied += 1;
    }

    pub(crate) fn add_rejection(&mut self, rejection: RejectedChange) {
        self.rejections.push(rejection);
        self.validation_summary.total_attempted += 1;
        self.validation_summary.total_rejected += 1;
    }

    pub(crate) fn add_conflict_resolution(&mut self, resolution: ConflictResolution) {
        self.conflicts_resolved.push(resolution);
    }

    #[must_use]
    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    #[must_use]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    #[must_use]
    pub fn evidence_bundle_id(&self) -> &str {
        &self.evidence_bundle_id
    }

    #[must_use]
    pub fn changes(&self) -> &[DriverChange] {
        &self.changes
    }

    #[must_use]
    pub fn rejections(&self) -> &[RejectedChange] {
        &self.rejections
    }

    #[must_use]
    pub fn conflicts_resolved(&self) -> &[ConflictResolution] {
        &self.conflicts_resolved
    }

    #[must_use]
    pub fn validation_summary(&self) -> ValidationSummary {
        self.validation_summary
    }

    /// Applied changes whose path is `driver_path` or lies beneath it
    /// (`drivers.sales_growth` matches `drivers.sales_growth[0]`).
    #[must_use]
    pub fn changes_by_driver(&self, driver_path: &str) -> Vec<&DriverChange> {
        self.changes.iter().filter(|change| path_matches(&change.target_path, driver_path)).collect()
    }

    #[must_use]
    pub fn changes_by_evidence(&self, evidence_id: &str) -> Vec<&DriverChange> {
        self.changes.iter().filter(|change| change.evidence_id == evidence_id).collect()
    }

    /// Cumulative effect of every applied change under `driver_path`, oldest first.
    #[must_use]
    pub fn calculate_total_impact(&self, driver_path: &str) -> DriverImpact {
        let mut changes = self.changes_by_driver(driver_path);
        changes.sort_by_key(|change| change.timestamp);

        let (Some(first), Some(last)) = (changes.first(), changes.last()) else {
            return DriverImpact {
                total_changes: 0,
                initial_value: None,
                final_value: None,
                net_impact: 0.0,
                change_sequence: Vec::new(),
            };
        };

        let initial_value = first.before_value;
        let final_value = last.after_value;
        let net_impact = match initial_value {
            Some(initial) => final_value - initial,
            None => final_value,
        };

        DriverImpact {
            total_changes: changes.len(),
            initial_value,
            final_value: Some(final_value),
            net_impact,
            change_sequence: changes
                .iter()
                .map(|change| ChangeStep {
                    evidence_id: change.evidence_id.clone(),
                    from: change.before_value,
                    to: change.after_value,
                    confidence: change.claim_confidence,
                })
                .collect(),
        }
    }

    /// Aggregate view for report consumers. Stamped with the log's own timestamp so
    /// the report is a pure function of the log.
    #[must_use]
    pub fn generate_audit_report(&self) -> AuditReport {
        let paths = self.changes.iter().map(|change| change.target_path.clone()).collect::<BTreeSet<_>>();
        let driver_impacts = paths
            .iter()
            .map(|path| (path.clone(), self.calculate_total_impact(path)))
            .collect::<BTreeMap<_, _>>();

        let mut grouped: BTreeMap<String, Vec<&DriverChange>> = BTreeMap::new();
        for change in &self.changes {
            grouped.entry(change.evidence_id.clone()).or_default().push(change);
        }
        let evidence_utilization = grouped
            .into_iter()
            .map(|(evidence_id, changes)| {
                let paths_affected = changes
                    .iter()
                    .map(|change| change.target_path.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let usage = EvidenceUtilization {
                    changes_applied: changes.len(),
                    avg_confidence: mean(changes.iter().map(|change| change.claim_confidence)),
                    paths_affected,
                };
                (evidence_id, usage)
            })
            .collect::<BTreeMap<_, _>>();

        let statistics = AuditStatistics {
            total_changes: self.changes.len(),
            unique_evidence_items: evidence_utilization.len(),
            unique_drivers_affected: paths.len(),
            conflicts_resolved: self.conflicts_resolved.len(),
            avg_claim_confidence: mean(self.changes.iter().map(|change| change.claim_confidence)),
            caps_applied: self.changes.iter().filter(|change| change.cap_applied).count(),
            warnings_recorded: self.changes.iter().map(|change| change.warnings.len()).sum(),
            rejected_attempts: self.validation_summary.total_rejected,
        };

        AuditReport {
            timestamp: self.timestamp,
            ticker: self.ticker.clone(),
            statistics,
            driver_impacts,
            evidence_utilization,
            validation_summary: self.validation_summary,
            conflicts_resolved: self.conflicts_resolved.clone(),
        }
    }
}

fn path_matches(target_path: &str, driver_path: &str) -> bool {
    match target_path.strip_prefix(driver_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('[') || rest.starts_with('.'),
        None => false,
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
