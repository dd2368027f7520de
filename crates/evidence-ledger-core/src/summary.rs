use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::evidence::EvidenceBundle;
use crate::path::TargetPath;
use crate::pr_log::{mean, ModelPRLog};
use crate::quality::{assess_bundle, BundleAssessment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStats {
    pub total_items: usize,
    pub total_claims: usize,
    pub frozen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub changes_attempted: usize,
    pub changes_applied: usize,
    pub changes_rejected: usize,
    pub conflicts_resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSummary {
    pub changes_applied: usize,
    pub total_magnitude: f64,
    pub avg_confidence: f64,
    pub evidence_items: Vec<String>,
}

/// Per-run digest written next to the Model-PR log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub evidence_bundle_stats: BundleStats,
    pub processing_stats: ProcessingStats,
    /// Keyed by field path without index, e.g. `drivers.sales_growth`.
    pub driver_impacts: BTreeMap<String, DriverSummary>,
    pub bundle_assessment: BundleAssessment,
    pub quality_score: f64,
}

impl ProcessingSummary {
    #[must_use]
    pub fn build(
        bundle: &EvidenceBundle,
        log: &ModelPRLog,
        confidence_threshold: f64,
        generated_at: OffsetDateTime,
    ) -> Self {
        let mut driver_impacts: BTreeMap<String, DriverSummary> = BTreeMap::new();
        for change in log.changes() {
            let base = base_path(&change.target_path).to_string();
            let entry = driver_impacts.entry(base).or_insert_with(|| DriverSummary {
                changes_applied: 0,
                total_magnitude: 0.0,
                avg_confidence: 0.0,
                evidence_items: Vec::new(),
            });
            entry.changes_applied += 1;
            entry.total_magnitude += change.change_magnitude();
            entry.evidence_items.push(change.evidence_id.clone());
        }
        for (base, impact) in &mut driver_impacts {
            impact.avg_confidence = mean(
                log.changes()
                    .iter()
                    .filter(|change| base_path(&change.target_path) == base)
                    .map(|change| change.claim_confidence),
            );
        }

        let summary = log.validation_summary();
        Self {
            generated_at,
            evidence_bundle_stats: BundleStats {
                total_items: bundle.items().len(),
                total_claims: bundle.total_claims(),
                frozen: bundle.is_frozen(),
            },
            processing_stats: ProcessingStats {
                changes_attempted: summary.total_attempted,
                changes_applied: summary.total_applied,
                changes_rejected: summary.total_rejected,
                conflicts_resolved: log.conflicts_resolved().len(),
            },
            driver_impacts,
            bundle_assessment: assess_bundle(bundle, confidence_threshold),
            quality_score: quality_score(bundle, log, confidence_threshold),
        }
    }
}

fn base_path(target_path: &str) -> &str {
    target_path.split('[').next().unwrap_or(target_path)
}

/// Weighted blend in `[0, 1]`: claim coverage 0.3, driver diversity 0.2, application
/// success 0.3, mean applied confidence 0.2.
#[allow(clippy::cast_precision_loss)]
fn quality_score(bundle: &EvidenceBundle, log: &ModelPRLog, confidence_threshold: f64) -> f64 {
    let total_claims = bundle.total_claims().max(1) as f64;
    let high = bundle.get_high_confidence_claims(confidence_threshold).len() as f64;
    let coverage = (high / total_claims * 2.0).min(1.0);

    let drivers = log
        .changes()
        .iter()
        .filter_map(|change| TargetPath::parse(&change.target_path))
        .map(TargetPath::driver)
        .collect::<BTreeSet<_>>();
    let diversity = drivers.len() as f64 / 4.0;

    let summary = log.validation_summary();
    let success = summary.total_applied as f64 / summary.total_attempted.max(1) as f64;

    let confidence = mean(log.changes().iter().map(|change| change.claim_confidence));

    coverage * 0.3 + diversity * 0.2 + success * 0.3 + confidence * 0.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{Direction, Driver, EvidenceClaim, EvidenceItem, Horizon, MagnitudeUnits, SourceType};
    use crate::pr_log::DriverChange;
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn mk_claim(driver: Driver, confidence: f64) -> EvidenceClaim {
        EvidenceClaim {
            driver,
            statement: "fixture".to_string(),
            direction: Direction::Increase,
            magnitude_units: MagnitudeUnits::Percent,
            magnitude_value: Some(1.0),
            horizon: Horizon::Y1,
            confidence,
            quote: "fixture quote".to_string(),
            page_ref: None,
            line_range: None,
        }
    }

    fn mk_change(evidence_id: &str, path: &str, before: f64, after: f64, confidence: f64) -> DriverChange {
        DriverChange {
            evidence_id: evidence_id.to_string(),
            target_path: path.to_string(),
            before_value: Some(before),
            after_value: after,
            change_reason: "fixture".to_string(),
            applied_rule: "fixture_rule".to_string(),
            cap_applied: false,
            confidence_threshold: 0.8,
            claim_confidence: confidence,
            assumed_baseline: None,
            warnings: Vec::new(),
            timestamp: fixture_time(),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-12, "expected {expected}, got {actual}");
    }

    #[test]
    fn summary_groups_changes_by_base_path_and_scores_run() {
        let mut bundle = match EvidenceBundle::new("ACME", fixture_time()) {
            Ok(bundle) => bundle,
            Err(err) => panic!("failed to create bundle: {err}"),
        };
        let item = EvidenceItem {
            id: "ev_aaaaaa".to_string(),
            source_url: "https://www.sec.gov/a".to_string(),
            snapshot_id: "snap_00112233".to_string(),
            date: None,
            source_type: SourceType::TenQ,
            title: "10-Q".to_string(),
            claims: vec![mk_claim(Driver::Growth, 0.9), mk_claim(Driver::Growth, 0.9), mk_claim(Driver::Margin, 0.5)],
        };
        if let Err(err) = bundle.add_item(item) {
            panic!("failed to add item: {err}");
        }

        let mut log = ModelPRLog::new("ACME", "bundle", fixture_time());
        log.add_change(mk_change("ev_aaaaaa", "drivers.sales_growth[0]", 0.10, 0.11, 0.9));
        log.add_change(mk_change("ev_aaaaaa", "drivers.sales_growth[1]", 0.08, 0.09, 0.9));

        let summary = ProcessingSummary::build(&bundle, &log, 0.8, fixture_time());
        assert_eq!(summary.evidence_bundle_stats.total_claims, 3);
        assert_eq!(summary.processing_stats.changes_applied, 2);

        let growth = match summary.driver_impacts.get("drivers.sales_growth") {
            Some(growth) => growth,
            None => panic!("missing sales_growth impact"),
        };
        assert_eq!(growth.changes_applied, 2);
        assert_close(growth.total_magnitude, 0.02);
        assert_close(growth.avg_confidence, 0.9);

        // coverage min(1, 2/3*2)=1, diversity 1/4, success 1, confidence 0.9
        assert_close(summary.quality_score, 0.3 + 0.05 + 0.3 + 0.18);
    }

    #[test]
    fn empty_run_scores_only_coverage() {
        let bundle = match EvidenceBundle::new("ACME", fixture_time()) {
            Ok(bundle) => bundle,
            Err(err) => panic!("failed to create bundle: {err}"),
        };
        let log = ModelPRLog::new("ACME", "bundle", fixture_time());
        let summary = ProcessingSummary::build(&bundle, &log, 0.8, fixture_time());
        assert!(summary.driver_impacts.is_empty());
        assert_close(summary.quality_score, 0.0);
    }
}
