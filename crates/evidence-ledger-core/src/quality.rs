//! Informational quality assessment of an evidence bundle. Never gates ingestion.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::evidence::{Driver, EvidenceBundle, SourceType};
use crate::pr_log::mean;

const STALE_AFTER_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    pub drivers_covered: Vec<Driver>,
    pub source_types: Vec<SourceType>,
    pub confidence_ratio: f64,
    pub claims_per_item: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TemporalStatus {
    Valid,
    Stale,
    NoDates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCoverage {
    pub status: TemporalStatus,
    pub coverage_days: i64,
    pub earliest_date: Option<String>,
    pub latest_date: Option<String>,
    pub total_dated_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDiversity {
    pub source_types: BTreeMap<String, usize>,
    pub unique_domains: usize,
    pub diversity_score: f64,
    pub is_diverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBalance {
    pub driver_counts: BTreeMap<String, usize>,
    pub average_confidence: BTreeMap<String, f64>,
    pub total_high_confidence_claims: usize,
    pub coverage_ratio: f64,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub total_claims: usize,
    pub average_confidence: f64,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    /// `>= 0.8`
    pub high_confidence_count: usize,
    /// `[0.6, 0.8)`
    pub medium_confidence_count: usize,
    /// `< 0.6`
    pub low_confidence_count: usize,
    pub quality_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleAssessment {
    pub is_valid: bool,
    pub total_claims: usize,
    pub high_confidence_claims: usize,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub coverage: CoverageMetrics,
    pub temporal: TemporalCoverage,
    pub source_diversity: SourceDiversity,
    pub driver_balance: DriverBalance,
    pub confidence_distribution: ConfidenceDistribution,
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn assess_bundle(bundle: &EvidenceBundle, confidence_threshold: f64) -> BundleAssessment {
    let total_claims = bundle.total_claims();
    let high_confidence_claims = bundle.get_high_confidence_claims(confidence_threshold).len();
    let confidence_ratio = high_confidence_claims as f64 / total_claims.max(1) as f64;

    let drivers_covered = bundle
        .get_high_confidence_claims(confidence_threshold)
        .into_iter()
        .map(|claim| claim.driver)
        .collect::<BTreeSet<_>>();

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if total_claims == 0 {
        issues.push("No claims extracted from evidence".to_string());
    }

    if confidence_ratio < 0.5 {
        issues.push(format!("Low confidence ratio: {high_confidence_claims}/{total_claims}"));
        recommendations.push("Review evidence quality and extraction methods".to_string());
    }

    if drivers_covered.len() < 2 {
        let names = drivers_covered.iter().map(|driver| driver.as_str()).collect::<Vec<_>>();
        issues.push(format!("Limited driver coverage: [{}]", names.join(", ")));
        recommendations.push("Seek evidence for additional valuation drivers".to_string());
    }

    if bundle.is_frozen() && !bundle.validate_integrity() {
        issues.push("Frozen evidence bundle failed integrity verification".to_string());
    }

    let coverage = CoverageMetrics {
        drivers_covered: drivers_covered.into_iter().collect(),
        source_types: bundle
            .items()
            .iter()
            .map(|item| item.source_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        confidence_ratio,
        claims_per_item: total_claims as f64 / bundle.items().len().max(1) as f64,
    };

    BundleAssessment {
        is_valid: issues.is_empty(),
        total_claims,
        high_confidence_claims,
        issues,
        recommendations,
        coverage,
        temporal: temporal_coverage(bundle),
        source_diversity: source_diversity(bundle),
        driver_balance: driver_balance(bundle, confidence_threshold),
        confidence_distribution: confidence_distribution(bundle),
    }
}

fn temporal_coverage(bundle: &EvidenceBundle) -> TemporalCoverage {
    let mut dates = bundle.items().iter().filter_map(|item| item.parsed_date()).collect::<Vec<_>>();
    dates.sort_unstable();

    let (Some(earliest), Some(latest)) = (dates.first().copied(), dates.last().copied()) else {
        return TemporalCoverage {
            status: TemporalStatus::NoDates,
            coverage_days: 0,
            earliest_date: None,
            latest_date: None,
            total_dated_items: 0,
        };
    };

    let coverage_days = (latest - earliest).whole_days();
    TemporalCoverage {
        status: if coverage_days <= STALE_AFTER_DAYS {
            TemporalStatus::Valid
        } else {
            TemporalStatus::Stale
        },
        coverage_days,
        earliest_date: Some(earliest.to_string()),
        latest_date: Some(latest.to_string()),
        total_dated_items: dates.len(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn source_diversity(bundle: &EvidenceBundle) -> SourceDiversity {
    let mut source_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut domains = BTreeSet::new();

    for item in bundle.items() {
        *source_types.entry(item.source_type.as_str().to_string()).or_default() += 1;
        if let Some(host) = Url::parse(&item.source_url).ok().and_then(|url| url.host_str().map(str::to_string)) {
            domains.insert(host);
        }
    }

    SourceDiversity {
        unique_domains: domains.len(),
        diversity_score: source_types.len() as f64 + domains.len() as f64 * 0.5,
        is_diverse: source_types.len() >= 2 && domains.len() >= 3,
        source_types,
    }
}

#[allow(clippy::cast_precision_loss)]
fn driver_balance(bundle: &EvidenceBundle, confidence_threshold: f64) -> DriverBalance {
    let mut confidences: BTreeMap<&'static str, Vec<f64>> =
        Driver::ALL.iter().map(|driver| (driver.as_str(), Vec::new())).collect();

    for claim in bundle.get_high_confidence_claims(confidence_threshold) {
        confidences.entry(claim.driver.as_str()).or_default().push(claim.confidence);
    }

    let driver_counts = confidences
        .iter()
        .map(|(driver, values)| ((*driver).to_string(), values.len()))
        .collect::<BTreeMap<_, _>>();
    let average_confidence = confidences
        .iter()
        .map(|(driver, values)| ((*driver).to_string(), mean(values.iter().copied())))
        .collect::<BTreeMap<_, _>>();

    let total = driver_counts.values().sum::<usize>();
    let covered = driver_counts.values().filter(|count| **count > 0).count();
    let coverage_ratio = covered as f64 / Driver::ALL.len() as f64;

    DriverBalance {
        driver_counts,
        average_confidence,
        total_high_confidence_claims: total,
        coverage_ratio,
        is_balanced: coverage_ratio >= 0.5 && total >= 4,
    }
}

#[allow(clippy::cast_precision_loss)]
fn confidence_distribution(bundle: &EvidenceBundle) -> ConfidenceDistribution {
    let values = bundle
        .items()
        .iter()
        .flat_map(|item| item.claims.iter().map(|claim| claim.confidence))
        .collect::<Vec<_>>();

    let high = values.iter().filter(|value| **value >= 0.8).count();
    let medium = values.iter().filter(|value| (0.6..0.8).contains(*value)).count();
    let low = values.iter().filter(|value| **value < 0.6).count();

    ConfidenceDistribution {
        total_claims: values.len(),
        average_confidence: mean(values.iter().copied()),
        min_confidence: values.iter().copied().reduce(f64::min),
        max_confidence: values.iter().copied().reduce(f64::max),
        high_confidence_count: high,
        medium_confidence_count: medium,
        low_confidence_count: low,
        quality_ratio: high as f64 / values.len().max(1) as f64,
    }
}
