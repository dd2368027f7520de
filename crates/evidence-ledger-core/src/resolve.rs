use time::OffsetDateTime;

use crate::evidence::ClaimRef;
use crate::path::TargetPath;
use crate::pr_log::ConflictResolution;

pub const HIGHEST_CONFIDENCE: &str = "highest_confidence";

/// Claims that address the same field, in bundle order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimGroup<'a> {
    pub target_path: TargetPath,
    pub claims: Vec<ClaimRef<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'a> {
    pub winner: ClaimRef<'a>,
    pub losers: Vec<ClaimRef<'a>>,
    /// Present only when the group was contested.
    pub record: Option<ConflictResolution>,
}

/// Group claims by target path. Groups are ordered by the first appearance of their
/// path and keep input order inside each group.
#[must_use]
pub fn group_by_path<'a>(claims: impl IntoIterator<Item = ClaimRef<'a>>) -> Vec<ClaimGroup<'a>> {
    let mut groups: Vec<ClaimGroup<'a>> = Vec::new();
    for entry in claims {
        let target_path = TargetPath::for_claim(entry.claim);
        match groups.iter_mut().find(|group| group.target_path == target_path) {
            Some(group) => group.claims.push(entry),
            None => groups.push(ClaimGroup { target_path, claims: vec![entry] }),
        }
    }
    groups
}

/// Pick the claim that proceeds to application.
///
/// The strictly highest confidence wins; on an exact tie the earliest claim wins.
/// Returns `None` for an empty group.
#[must_use]
pub fn resolve_group<'a>(group: &ClaimGroup<'a>, at: OffsetDateTime) -> Option<Resolution<'a>> {
    let mut winner_index = 0;
    for (index, entry) in group.claims.iter().enumerate().skip(1) {
        let best = group.claims.get(winner_index)?;
        if entry.claim.confidence > best.claim.confidence {
            winner_index = index;
        }
    }

    let winner = *group.claims.get(winner_index)?;
    let losers = group
        .claims
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != winner_index)
        .map(|(_, entry)| *entry)
        .collect::<Vec<_>>();

    let record = (!losers.is_empty()).then(|| ConflictResolution {
        target_path: group.target_path.to_string(),
        conflicting_evidence_ids: group
            .claims
            .iter()
            .map(|entry| entry.evidence_id.to_string())
            .collect(),
        resolution_method: HIGHEST_CONFIDENCE.to_string(),
        winning_evidence_id: winner.evidence_id.to_string(),
        resolution_reason: format!(
            "Selected claim with confidence {:.2} over {} alternatives",
            winner.claim.confidence,
            losers.len()
        ),
        timestamp: at,
    });

    Some(Resolution { winner, losers, record })
}
