//! Deterministic ingestion of extracted evidence claims into valuation driver
//! assumptions, with an immutable, hash-verified audit trail.
//!
//! The crate is pure: it never touches the filesystem or the network. Durable
//! artifacts live in `evidence-ledger-store`.

mod apply;
mod engine;
mod evidence;
mod freezer;
mod ingress;
mod inputs;
mod path;
mod policy;
mod pr_log;
mod quality;
mod resolve;
mod summary;
mod validate;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub use apply::{default_value, AppliedValue, ChangeApplier};
pub use engine::{ingest, EngineState, IngestionEngine, IngestionOutcome};
pub use evidence::{
    ensure_mutable, ClaimRef, Direction, Driver, EvidenceBundle, EvidenceClaim, EvidenceItem,
    Horizon, MagnitudeUnits, SourceType, GROWTH_CLAIM_LIMIT_BPS, GROWTH_CLAIM_LIMIT_PCT,
    MARGIN_CLAIM_LIMIT_BPS, MARGIN_CLAIM_LIMIT_PCT,
};
pub use freezer::{
    create_narrative_access_token, create_read_only_access, freeze_bundle, freeze_bundle_at,
    verify_freeze_integrity, AccessLogEntry, AccessToken, BundleMetadata, CitationClaim,
    DriverClaim, FreezeRecord, IntegrityChecks, IntegrityReport, IntegrityStatus, ReadOnlyAccess,
    FREEZER_VERSION, READ_ONLY_ATTRIBUTES,
};
pub use ingress::{
    evidence_item_from_source, parse_claims_response, ClaimParseOutcome, DroppedClaim,
    SourceRecord,
};
pub use inputs::{Drivers, ValuationInputs};
pub use path::TargetPath;
pub use policy::{IngestionPolicy, HARD_GROWTH_CAP_BPS, HARD_MARGIN_CAP_BPS};
pub use pr_log::{
    AuditReport, AuditStatistics, ChangeDirection, ChangeStep, ConflictResolution, DriverChange,
    DriverImpact, EvidenceUtilization, ModelPRLog, RejectedChange, RejectionStage,
    ValidationSummary,
};
pub use quality::{
    assess_bundle, BundleAssessment, ConfidenceDistribution, CoverageMetrics, DriverBalance,
    SourceDiversity, TemporalCoverage, TemporalStatus,
};
pub use resolve::{group_by_path, resolve_group, ClaimGroup, Resolution, HIGHEST_CONFIDENCE};
pub use summary::{BundleStats, DriverSummary, ProcessingStats, ProcessingSummary};
pub use validate::{ValidationResult, Validator};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LedgerError {
    #[error("schema error at `{field}`: {message}")]
    Schema { field: String, message: String },
    #[error("freeze state error: {0}")]
    FreezeState(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("access error: {0}")]
    Access(String),
    #[error("policy error: {0}")]
    Policy(String),
    #[error("path error at `{target_path}`: {message}")]
    Path { target_path: String, message: String },
    #[error("non-finite value {value} computed for `{target_path}`")]
    NonFinite { target_path: String, value: f64 },
    #[error("invalid engine transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl LedgerError {
    pub(crate) fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema { field: field.into(), message: message.into() }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn rfc3339(value: OffsetDateTime) -> Result<String, LedgerError> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| LedgerError::schema("timestamp", format!("invalid RFC3339 timestamp: {err}")))
}
