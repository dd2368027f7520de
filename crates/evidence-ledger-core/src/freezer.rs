//! Freezing, integrity verification and read-only access for evidence bundles.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::evidence::{Driver, EvidenceBundle, MagnitudeUnits};
use crate::{rfc3339, sha256_hex, LedgerError};

pub const FREEZER_VERSION: &str = "1.0";

/// Metadata keys [`ReadOnlyAccess::attribute`] will serve.
pub const READ_ONLY_ATTRIBUTES: [&str; 6] = [
    "ticker",
    "research_timestamp",
    "freeze_timestamp",
    "content_hash",
    "total_items",
    "total_claims",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeRecord {
    pub action: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub ticker: String,
    #[serde(with = "time::serde::rfc3339")]
    pub research_timestamp: OffsetDateTime,
    pub content_hash: String,
    pub reason: String,
    pub evidence_items_count: usize,
    pub total_claims: usize,
}

/// Freeze `bundle` now.
///
/// # Errors
/// See [`freeze_bundle_at`].
pub fn freeze_bundle(bundle: &mut EvidenceBundle, reason: &str) -> Result<FreezeRecord, LedgerError> {
    freeze_bundle_at(bundle, reason, OffsetDateTime::now_utc())
}

/// Validate and freeze `bundle`, returning the entry a run manifest should keep.
///
/// # Errors
/// Returns [`LedgerError::FreezeState`] if the bundle is already frozen, or the first
/// validation error if the bundle is malformed. Nothing is changed on failure.
pub fn freeze_bundle_at(
    bundle: &mut EvidenceBundle,
    reason: &str,
    at: OffsetDateTime,
) -> Result<FreezeRecord, LedgerError> {
    if bundle.is_frozen() {
        return Err(LedgerError::FreezeState(format!(
            "evidence bundle for {} is already frozen",
            bundle.ticker()
        )));
    }
    bundle.validate()?;
    bundle.freeze_at(at)?;

    let content_hash = bundle.content_hash().unwrap_or_default().to_string();
    info!(
        ticker = bundle.ticker(),
        content_hash = content_hash.as_str(),
        items = bundle.items().len(),
        claims = bundle.total_claims(),
        reason,
        "evidence bundle frozen"
    );

    Ok(FreezeRecord {
        action: "evidence_freeze".to_string(),
        timestamp: at,
        ticker: bundle.ticker().to_string(),
        research_timestamp: bundle.research_timestamp(),
        content_hash,
        reason: reason.to_string(),
        evidence_items_count: bundle.items().len(),
        total_claims: bundle.total_claims(),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Valid,
    Corrupted,
    NotFrozen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct IntegrityChecks {
    pub has_freeze_timestamp: bool,
    pub has_content_hash: bool,
    pub content_hash_valid: bool,
    pub has_evidence_items: bool,
}

impl IntegrityChecks {
    #[must_use]
    pub fn all_pass(&self) -> bool {
        self.has_freeze_timestamp
            && self.has_content_hash
            && self.content_hash_valid
            && self.has_evidence_items
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<IntegrityChecks>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub freeze_timestamp: Option<OffsetDateTime>,
    pub content_hash: Option<String>,
    pub message: String,
}

/// Re-derive the content hash of a frozen bundle and report every check.
///
/// An unfrozen bundle has nothing to verify and reports `not_frozen` as valid.
#[must_use]
pub fn verify_freeze_integrity(bundle: &EvidenceBundle) -> IntegrityReport {
    if !bundle.is_frozen() {
        return IntegrityReport {
            status: IntegrityStatus::NotFrozen,
            is_valid: true,
            checks: None,
            freeze_timestamp: None,
            content_hash: None,
            message: "Evidence bundle is not frozen".to_string(),
        };
    }

    let checks = IntegrityChecks {
        has_freeze_timestamp: bundle.freeze_timestamp().is_some(),
        has_content_hash: bundle.content_hash().is_some(),
        content_hash_valid: bundle.validate_integrity(),
        has_evidence_items: !bundle.items().is_empty(),
    };
    let is_valid = checks.all_pass();

    if !checks.content_hash_valid {
        error!(
            ticker = bundle.ticker(),
            stored_hash = bundle.content_hash().unwrap_or("<missing>"),
            "CRITICAL: frozen evidence content hash mismatch"
        );
    }

    IntegrityReport {
        status: if is_valid { IntegrityStatus::Valid } else { IntegrityStatus::Corrupted },
        is_valid,
        checks: Some(checks),
        freeze_timestamp: bundle.freeze_timestamp(),
        content_hash: bundle.content_hash().map(ToString::to_string),
        message: if is_valid {
            "Frozen evidence bundle integrity verified".to_string()
        } else {
            "Evidence bundle integrity compromised".to_string()
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token_id: String,
    pub evidence_bundle_id: String,
    pub requesting_agent: String,
    #[serde(with = "time::serde::rfc3339")]
    pub granted_at: OffsetDateTime,
    pub permissions: Vec<String>,
    pub restrictions: Vec<String>,
    pub content_hash: String,
    /// Frozen evidence never changes, so tokens do not expire.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// Grant a narrative agent read access to a frozen, intact bundle.
///
/// # Errors
/// Returns [`LedgerError::FreezeState`] for an unfrozen bundle and
/// [`LedgerError::Integrity`] when [`verify_freeze_integrity`] fails.
pub fn create_narrative_access_token(
    bundle: &EvidenceBundle,
    requesting_agent: &str,
    granted_at: OffsetDateTime,
) -> Result<AccessToken, LedgerError> {
    if !bundle.is_frozen() {
        return Err(LedgerError::FreezeState(
            "access tokens are only issued for frozen evidence".to_string(),
        ));
    }

    let integrity = verify_freeze_integrity(bundle);
    let (true, Some(freeze_timestamp), Some(content_hash)) =
        (integrity.is_valid, bundle.freeze_timestamp(), bundle.content_hash())
    else {
        return Err(LedgerError::Integrity(format!(
            "cannot grant access to corrupted evidence bundle for {}",
            bundle.ticker()
        )));
    };

    let seed = format!("{}_{}_{requesting_agent}", bundle.ticker(), rfc3339(freeze_timestamp)?);
    let mut token_id = sha256_hex(seed.as_bytes());
    token_id.truncate(32);

    Ok(AccessToken {
        token_id,
        evidence_bundle_id: bundle.bundle_id()?,
        requesting_agent: requesting_agent.to_string(),
        granted_at,
        permissions: ["read_claims", "read_metadata", "generate_citations"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        restrictions: ["no_modifications", "no_new_research"].into_iter().map(str::to_string).collect(),
        content_hash: content_hash.to_string(),
        expires_at: None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationClaim {
    pub evidence_id: String,
    pub claim_id: String,
    pub statement: String,
    pub driver: Driver,
    pub confidence: f64,
    pub quote: String,
    pub source_url: String,
    pub source_title: String,
    pub citation_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverClaim {
    pub evidence_id: String,
    pub statement: String,
    pub confidence: f64,
    pub magnitude_value: Option<f64>,
    pub magnitude_units: MagnitudeUnits,
    pub quote: String,
    pub citation_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub ticker: String,
    #[serde(with = "time::serde::rfc3339")]
    pub research_timestamp: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub freeze_timestamp: Option<OffsetDateTime>,
    pub total_items: usize,
    pub total_claims: usize,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub operation: String,
    pub details: Value,
}

/// Narrow view of a frozen bundle for narrative consumers.
///
/// Every read is appended to an access log; nothing here can reach the bundle's
/// items directly or mutate it.
#[derive(Debug)]
pub struct ReadOnlyAccess<'a> {
    bundle: &'a EvidenceBundle,
    access_log: Mutex<Vec<AccessLogEntry>>,
}

/// # Errors
/// Returns [`LedgerError::FreezeState`] unless `bundle` is frozen.
pub fn create_read_only_access(bundle: &EvidenceBundle) -> Result<ReadOnlyAccess<'_>, LedgerError> {
    if !bundle.is_frozen() {
        return Err(LedgerError::FreezeState(
            "evidence bundle must be frozen for read-only access".to_string(),
        ));
    }
    Ok(ReadOnlyAccess { bundle, access_log: Mutex::new(Vec::new()) })
}

impl ReadOnlyAccess<'_> {
    /// Claims at or above `threshold`, shaped for citation as `[ev:<id>]`.
    #[must_use]
    pub fn get_claims_for_citation(&self, threshold: f64) -> Vec<CitationClaim> {
        let mut claims = Vec::new();
        for item in self.bundle.items() {
            for claim in item.claims.iter().filter(|claim| claim.confidence >= threshold) {
                claims.push(CitationClaim {
                    evidence_id: item.id.clone(),
                    claim_id: format!("{}_{}", item.id, claims.len()),
                    statement: claim.statement.clone(),
                    driver: claim.driver,
                    confidence: claim.confidence,
                    quote: claim.quote.clone(),
                    source_url: item.source_url.clone(),
                    source_title: item.title.clone(),
                    citation_format: format!("[ev:{}]", item.id),
                });
            }
        }

        self.log_access(
            "get_claims_for_citation",
            json!({"threshold": threshold, "claims_returned": claims.len()}),
        );
        claims
    }

    #[must_use]
    pub fn get_bundle_metadata(&self) -> BundleMetadata {
        let metadata = BundleMetadata {
            ticker: self.bundle.ticker().to_string(),
            research_timestamp: self.bundle.research_timestamp(),
            freeze_timestamp: self.bundle.freeze_timestamp(),
            total_items: self.bundle.items().len(),
            total_claims: self.bundle.total_claims(),
            content_hash: self.bundle.content_hash().map(ToString::to_string),
        };
        self.log_access(
            "get_bundle_metadata",
            json!({"ticker": metadata.ticker, "total_claims": metadata.total_claims}),
        );
        metadata
    }

    #[must_use]
    pub fn search_claims_by_driver(&self, driver: Driver) -> Vec<DriverClaim> {
        let matches = self
            .bundle
            .claims_by_driver(driver)
            .into_iter()
            .map(|entry| DriverClaim {
                evidence_id: entry.evidence_id.to_string(),
                statement: entry.claim.statement.clone(),
                confidence: entry.claim.confidence,
                magnitude_value: entry.claim.magnitude_value,
                magnitude_units: entry.claim.magnitude_units,
                quote: entry.claim.quote.clone(),
                citation_format: format!("[ev:{}]", entry.evidence_id),
            })
            .collect::<Vec<_>>();

        self.log_access(
            "search_claims_by_driver",
            json!({"driver": driver.as_str(), "matches": matches.len()}),
        );
        matches
    }

    /// Look up one allow-listed metadata attribute by name.
    ///
    /// # Errors
    /// Returns [`LedgerError::Access`] for any name outside [`READ_ONLY_ATTRIBUTES`].
    pub fn attribute(&self, name: &str) -> Result<Value, LedgerError> {
        let value = match name {
            "ticker" => Value::String(self.bundle.ticker().to_string()),
            "research_timestamp" => Value::String(rfc3339(self.bundle.research_timestamp())?),
            "freeze_timestamp" => match self.bundle.freeze_timestamp() {
                Some(ts) => Value::String(rfc3339(ts)?),
                None => Value::Null,
            },
            "content_hash" => self.bundle.content_hash().map_or(Value::Null, |hash| json!(hash)),
            "total_items" => json!(self.bundle.items().len()),
            "total_claims" => json!(self.bundle.total_claims()),
            _ => {
                warn!(ticker = self.bundle.ticker(), attribute = name, "read-only access denied");
                self.log_access("attribute_denied", json!({"name": name}));
                return Err(LedgerError::Access(format!(
                    "read-only access: cannot access `{name}` on frozen evidence"
                )));
            }
        };
        self.log_access("attribute", json!({"name": name}));
        Ok(value)
    }

    /// Snapshot of every access made through this view, oldest first.
    #[must_use]
    pub fn access_log(&self) -> Vec<AccessLogEntry> {
        match self.access_log.lock() {
            Ok(log) => log.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn log_access(&self, operation: &str, details: Value) {
        if let Ok(mut log) = self.access_log.lock() {
            log.push(AccessLogEntry {
                timestamp: OffsetDateTime::now_utc(),
                operation: operation.to_string(),
                details,
            });
        }
    }
}
