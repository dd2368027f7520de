//! Ingestion engine: folds a bundle's claims into a copy of the valuation inputs.
//!
//! A run moves through `Idle -> Partitioning -> Resolving -> Applying -> Finalized`.
//! The caller's snapshot is cloned once on entry and only the clone is mutated, so a
//! failed run leaves nothing partially applied.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::apply::ChangeApplier;
use crate::evidence::{ClaimRef, EvidenceBundle};
use crate::inputs::ValuationInputs;
use crate::path::TargetPath;
use crate::policy::IngestionPolicy;
use crate::pr_log::{DriverChange, ModelPRLog, RejectedChange, RejectionStage};
use crate::resolve::{group_by_path, resolve_group};
use crate::summary::ProcessingSummary;
use crate::validate::Validator;
use crate::LedgerError;

const SUPERSEDED_REASON: &str = "superseded by higher-confidence evidence";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Partitioning,
    Resolving,
    Applying,
    Finalized,
}

impl EngineState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Partitioning => "partitioning",
            Self::Resolving => "resolving",
            Self::Applying => "applying",
            Self::Finalized => "finalized",
        }
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::Resolving),
            Self::Resolving => Some(Self::Applying),
            Self::Applying => Some(Self::Finalized),
            Self::Finalized => None,
        }
    }
}

impl Display for EngineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOutcome {
    pub inputs: ValuationInputs,
    pub log: ModelPRLog,
    pub summary: ProcessingSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionEngine {
    policy: IngestionPolicy,
    applier: ChangeApplier,
    validator: Validator,
}

impl IngestionEngine {
    /// # Errors
    /// Returns [`LedgerError::Policy`] when `policy` does not validate.
    pub fn new(policy: IngestionPolicy) -> Result<Self, LedgerError> {
        policy.validate()?;
        Ok(Self {
            applier: ChangeApplier::new(&policy),
            validator: Validator::new(policy.confidence_threshold),
            policy,
        })
    }

    #[must_use]
    pub fn policy(&self) -> &IngestionPolicy {
        &self.policy
    }

    /// Apply every eligible claim in `bundle` to a copy of `snapshot`.
    ///
    /// Every timestamp the run writes equals `as_of`, so identical inputs produce
    /// byte-identical outcomes. Claim- and path-level problems become rejections in
    /// the log; only bundle-level problems abort the run. Under a `dry_run` policy the
    /// log and summary are produced as usual but `inputs` is the unmodified snapshot.
    ///
    /// # Errors
    /// Returns [`LedgerError::FreezeState`] for an inconsistent freeze state or an
    /// unfrozen bundle under `require_frozen`, [`LedgerError::Integrity`] when a frozen
    /// bundle's hash no longer matches, and [`LedgerError::Schema`] for a malformed
    /// snapshot or a ticker mismatch.
    pub fn run(
        &self,
        snapshot: &ValuationInputs,
        bundle: &EvidenceBundle,
        as_of: OffsetDateTime,
    ) -> Result<IngestionOutcome, LedgerError> {
        bundle.validate_freeze_state()?;

        if self.policy.require_frozen && !bundle.is_frozen() {
            return Err(LedgerError::FreezeState(format!(
                "policy requires frozen evidence but the bundle for {} is not frozen",
                bundle.ticker()
            )));
        }

        if bundle.is_frozen() && !bundle.validate_integrity() {
            error!(
                ticker = bundle.ticker(),
                stored_hash = bundle.content_hash().unwrap_or("<missing>"),
                "CRITICAL: refusing to ingest evidence bundle with mismatched content hash"
            );
            return Err(LedgerError::Integrity(format!(
                "content hash mismatch for frozen evidence bundle {}",
                bundle.ticker()
            )));
        }

        snapshot.validate()?;
        if !snapshot.ticker.eq_ignore_ascii_case(bundle.ticker()) {
            return Err(LedgerError::schema(
                "inputs.ticker",
                format!("snapshot ticker {} does not match bundle ticker {}", snapshot.ticker, bundle.ticker()),
            ));
        }

        let bundle_id = bundle.bundle_id()?;
        info!(
            ticker = bundle.ticker(),
            bundle_id = bundle_id.as_str(),
            frozen = bundle.is_frozen(),
            claims = bundle.total_claims(),
            threshold = self.policy.confidence_threshold,
            dry_run = self.policy.dry_run,
            "ingestion run started"
        );

        let mut run = IngestionRun::new(snapshot, ModelPRLog::new(bundle.ticker(), &bundle_id, as_of), as_of);

        run.advance(EngineState::Partitioning)?;
        let eligible = self.partition(&mut run, bundle);

        run.advance(EngineState::Resolving)?;
        let winners = resolve_conflicts(&mut run, eligible);

        run.advance(EngineState::Applying)?;
        for (path, winner) in winners {
            self.apply(&mut run, path, winner);
        }

        run.advance(EngineState::Finalized)?;
        let IngestionRun { working, log, .. } = run;
        let totals = log.validation_summary();
        debug_assert!(totals.is_balanced());

        info!(
            ticker = bundle.ticker(),
            attempted = totals.total_attempted,
            applied = totals.total_applied,
            rejected = totals.total_rejected,
            conflicts = log.conflicts_resolved().len(),
            "ingestion run finalized"
        );

        let summary = ProcessingSummary::build(bundle, &log, self.policy.confidence_threshold, as_of);
        let inputs = if self.policy.dry_run {
            info!(ticker = bundle.ticker(), would_apply = totals.total_applied, "dry run: snapshot left unchanged");
            snapshot.clone()
        } else {
            working
        };
        Ok(IngestionOutcome { inputs, log, summary })
    }

    fn partition<'b>(&self, run: &mut IngestionRun, bundle: &'b EvidenceBundle) -> Vec<ClaimRef<'b>> {
        let threshold = self.policy.confidence_threshold;
        let mut eligible = Vec::new();

        for (item_index, item) in bundle.items().iter().enumerate() {
            let prefix = format!("items[{item_index}]");
            let header = item.validate_header_at(&prefix).err();

            for (claim_index, claim) in item.claims.iter().enumerate() {
                let entry = ClaimRef { evidence_id: &item.id, item_index, claim_index, claim };
                let path = TargetPath::for_claim(claim);

                if let Some(err) = &header {
                    run.reject(entry, path, None, RejectionStage::Schema, vec![err.to_string()]);
                    continue;
                }

                if let Err(err) = claim.validate_at(&format!("{prefix}.claims[{claim_index}]")) {
                    run.reject(entry, path, None, RejectionStage::Schema, vec![err.to_string()]);
                    continue;
                }

                if claim.confidence < threshold {
                    let reason = format!("Claim confidence {} below threshold {threshold}", claim.confidence);
                    run.reject(entry, path, None, RejectionStage::Confidence, vec![reason]);
                    continue;
                }

                eligible.push(entry);
            }
        }

        eligible
    }

    fn apply(&self, run: &mut IngestionRun, path: TargetPath, entry: ClaimRef<'_>) {
        let claim = entry.claim;
        let before = run.working.read(path);
        let applied = self.applier.apply(before, claim);
        let mut validation = self.validator.validate(before, applied.after, claim, applied.cap_applied);

        if !validation.is_valid {
            let proposed = applied.after.is_finite().then_some(applied.after);
            run.reject(entry, path, proposed, RejectionStage::Validation, validation.errors);
            return;
        }

        if let Err(err) = run.working.write(path, applied.after) {
            run.reject(entry, path, Some(applied.after), RejectionStage::Application, vec![err.to_string()]);
            return;
        }
        validation.applied = true;

        if applied.cap_applied {
            warn!(
                target_path = %path,
                evidence_id = entry.evidence_id,
                caps = ?validation.caps_triggered,
                "safety cap applied"
            );
        }
        debug!(target_path = %path, evidence_id = entry.evidence_id, after = applied.after, "change applied");

        run.log.add_change(DriverChange {
            evidence_id: entry.evidence_id.to_string(),
            target_path: path.to_string(),
            before_value: before,
            after_value: applied.after,
            change_reason: claim.statement.clone(),
            applied_rule: self.policy.rule_label(claim.driver, claim.horizon),
            cap_applied: applied.cap_applied,
            confidence_threshold: self.policy.confidence_threshold,
            claim_confidence: claim.confidence,
            assumed_baseline: applied.assumed_baseline(),
            warnings: validation.warnings,
            timestamp: run.as_of,
        });
    }
}

fn resolve_conflicts<'b>(run: &mut IngestionRun, eligible: Vec<ClaimRef<'b>>) -> Vec<(TargetPath, ClaimRef<'b>)> {
    let mut winners = Vec::new();

    for group in group_by_path(eligible) {
        let Some(resolution) = resolve_group(&group, run.as_of) else {
            continue;
        };

        if let Some(record) = resolution.record {
            info!(
                target_path = record.target_path.as_str(),
                winner = record.winning_evidence_id.as_str(),
                contenders = record.conflicting_evidence_ids.len(),
                "conflict resolved by {}",
                record.resolution_method
            );
            run.log.add_conflict_resolution(record);
        }

        for loser in resolution.losers {
            run.reject(loser, group.target_path, None, RejectionStage::Superseded, vec![SUPERSEDED_REASON.to_string()]);
        }

        winners.push((group.target_path, resolution.winner));
    }

    winners
}

/// Ingest with the default policy at an explicit confidence threshold.
///
/// # Errors
/// Returns [`LedgerError::Policy`] for a threshold outside `[0, 1]`, otherwise the
/// errors of [`IngestionEngine::run`].
pub fn ingest(
    snapshot: &ValuationInputs,
    bundle: &EvidenceBundle,
    confidence_threshold: f64,
    as_of: OffsetDateTime,
) -> Result<IngestionOutcome, LedgerError> {
    let policy = IngestionPolicy { confidence_threshold, ..IngestionPolicy::default() };
    IngestionEngine::new(policy)?.run(snapshot, bundle, as_of)
}

struct IngestionRun {
    state: EngineState,
    as_of: OffsetDateTime,
    working: ValuationInputs,
    log: ModelPRLog,
}

impl IngestionRun {
    fn new(snapshot: &ValuationInputs, log: ModelPRLog, as_of: OffsetDateTime) -> Self {
        Self { state: EngineState::Idle, as_of, working: snapshot.clone(), log }
    }

    fn advance(&mut self, to: EngineState) -> Result<(), LedgerError> {
        if self.state.next() != Some(to) {
            return Err(LedgerError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        debug!(from = %self.state, to = %to, "engine state transition");
        self.state = to;
        Ok(())
    }

    fn reject(
        &mut self,
        entry: ClaimRef<'_>,
        path: TargetPath,
        proposed: Option<f64>,
        stage: RejectionStage,
        reasons: Vec<String>,
    ) {
        match stage {
            RejectionStage::Confidence | RejectionStage::Superseded => debug!(
                target_path = %path,
                evidence_id = entry.evidence_id,
                stage = stage.as_str(),
                reasons = ?reasons,
                "change rejected"
            ),
            RejectionStage::Schema | RejectionStage::Validation | RejectionStage::Application => {
                warn!(
                    target_path = %path,
                    evidence_id = entry.evidence_id,
                    stage = stage.as_str(),
                    reasons = ?reasons,
                    "change rejected"
                );
            }
        }

        self.log.add_rejection(RejectedChange {
            evidence_id: entry.evidence_id.to_string(),
            target_path: path.to_string(),
            before_value: self.working.read(path),
            proposed_value: proposed,
            stage,
            reasons,
            claim_confidence: entry.claim.confidence.is_finite().then_some(entry.claim.confidence),
            timestamp: self.as_of,
        });
    }
}
