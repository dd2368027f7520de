//! Boundary between raw research output and typed evidence.
//!
//! Extraction responses arrive as free text with an embedded JSON array of claims.
//! Each element is decoded and validated on its own so one bad claim never sinks
//! its siblings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::evidence::{EvidenceClaim, EvidenceItem, SourceType};
use crate::{sha256_hex, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedClaim {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimParseOutcome {
    pub claims: Vec<EvidenceClaim>,
    pub dropped: Vec<DroppedClaim>,
}

/// A fetched research source before claim extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub source_type: Option<SourceType>,
    /// Full document text when it was retrieved; otherwise the snippet stands in.
    #[serde(default)]
    pub content: Option<String>,
}

/// Extract claims from a model response that contains a JSON array somewhere in it.
///
/// Elements that fail to decode or validate are reported in `dropped` with their
/// array index. A missing `magnitude_units` defaults to `%`.
///
/// # Errors
/// Returns [`LedgerError::Schema`] when the text holds no JSON array at all or the
/// array itself is not valid JSON.
pub fn parse_claims_response(text: &str) -> Result<ClaimParseOutcome, LedgerError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(LedgerError::schema("response", "no JSON array of claims found in response"));
    };
    if end < start {
        return Err(LedgerError::schema("response", "no JSON array of claims found in response"));
    }

    let elements: Vec<Value> = serde_json::from_str(&text[start..=end])
        .map_err(|err| LedgerError::schema("response", format!("claims array is not valid JSON: {err}")))?;

    let mut claims = Vec::new();
    let mut dropped = Vec::new();
    for (index, mut element) in elements.into_iter().enumerate() {
        if let Some(object) = element.as_object_mut() {
            object.entry("magnitude_units").or_insert_with(|| Value::String("%".to_string()));
        }

        let decoded = serde_json::from_value::<EvidenceClaim>(element)
            .map_err(|err| LedgerError::schema(format!("claims[{index}]"), err.to_string()))
            .and_then(|claim| {
                claim.validate_at(&format!("claims[{index}]"))?;
                Ok(claim)
            });

        match decoded {
            Ok(claim) => claims.push(claim),
            Err(err) => {
                warn!(index, error = %err, "dropping malformed claim from extraction response");
                dropped.push(DroppedClaim { index, reason: err.to_string() });
            }
        }
    }

    debug!(kept = claims.len(), dropped = dropped.len(), "parsed extraction response");
    Ok(ClaimParseOutcome { claims, dropped })
}

/// Wrap extracted claims in an evidence item with content-derived identifiers.
///
/// The id is `ev_` plus the first 8 hex chars of the URL digest; the snapshot id is
/// `snap_` plus the first 12 hex chars of the content digest.
///
/// # Errors
/// Returns [`LedgerError::Schema`] when the resulting item does not validate.
pub fn evidence_item_from_source(
    source: &SourceRecord,
    claims: Vec<EvidenceClaim>,
) -> Result<EvidenceItem, LedgerError> {
    let url_digest = sha256_hex(source.url.as_bytes());
    let content = match &source.content {
        Some(content) => content.clone(),
        None => format!("{}. {}", source.title, source.snippet),
    };
    let content_digest = sha256_hex(content.as_bytes());

    let item = EvidenceItem {
        id: format!("ev_{}", &url_digest[..8]),
        source_url: source.url.clone(),
        snapshot_id: format!("snap_{}", &content_digest[..12]),
        date: source.date.clone(),
        source_type: source.source_type.unwrap_or(SourceType::News),
        title: source.title.clone(),
        claims,
    };
    item.validate()?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{Direction, Driver, MagnitudeUnits};

    fn mk_source() -> SourceRecord {
        SourceRecord {
            url: "https://investor.acme.com/q3".to_string(),
            title: "ACME Q3 results".to_string(),
            snippet: "Revenue grew 12%".to_string(),
            date: Some("2023-10-30".to_string()),
            source_type: None,
            content: None,
        }
    }

    #[test]
    fn extracts_array_from_surrounding_prose() {
        let text = r#"Here are the claims:
[
  {"driver": "growth", "statement": "Guidance raised", "direction": "+",
   "magnitude_value": 2.0, "horizon": "y1", "confidence": 0.9, "quote": "we raise guidance"},
  {"driver": "margin", "statement": "Costs up", "direction": "-", "magnitude_units": "bps",
   "magnitude_value": 50, "horizon": "y2-3", "confidence": 0.7, "quote": "input costs"}
]
Let me know if you need more."#;
        let outcome = match parse_claims_response(text) {
            Ok(outcome) => outcome,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.claims.len(), 2);
        assert_eq!(outcome.claims[0].magnitude_units, MagnitudeUnits::Percent);
        assert_eq!(outcome.claims[0].direction, Direction::Increase);
        assert_eq!(outcome.claims[1].driver, Driver::Margin);
        assert_eq!(outcome.claims[1].magnitude_units, MagnitudeUnits::Bps);
    }

    #[test]
    fn malformed_elements_are_dropped_individually() {
        let text = r#"[
  {"driver": "growth", "statement": "ok", "direction": "+", "magnitude_value": 1.0,
   "horizon": "y1", "confidence": 0.9, "quote": "q"},
  {"driver": "ebitda", "statement": "bad driver", "direction": "+", "horizon": "y1",
   "confidence": 0.9, "quote": "q"},
  {"driver": "growth", "statement": "no quote", "direction": "+", "horizon": "y1",
   "confidence": 0.9, "quote": " "}
]"#;
        let outcome = match parse_claims_response(text) {
            Ok(outcome) => outcome,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(outcome.claims.len(), 1);
        let indices = outcome.dropped.iter().map(|dropped| dropped.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 2]);
        assert!(outcome.dropped[1].reason.contains("claims[2].quote"));
    }

    #[test]
    fn response_without_array_is_an_error() {
        assert!(matches!(
            parse_claims_response("no claims here"),
            Err(LedgerError::Schema { .. })
        ));
        assert!(parse_claims_response("] backwards [").is_err());
    }

    #[test]
    fn item_ids_are_derived_from_content() {
        let item = match evidence_item_from_source(&mk_source(), Vec::new()) {
            Ok(item) => item,
            Err(err) => panic!("item failed: {err}"),
        };
        let expected_id = format!("ev_{}", &sha256_hex(b"https://investor.acme.com/q3")[..8]);
        let expected_snapshot = format!("snap_{}", &sha256_hex(b"ACME Q3 results. Revenue grew 12%")[..12]);
        assert_eq!(item.id, expected_id);
        assert_eq!(item.snapshot_id, expected_snapshot);
        assert_eq!(item.source_type, SourceType::News);

        let mut with_content = mk_source();
        with_content.content = Some("full filing text".to_string());
        let again = match evidence_item_from_source(&with_content, Vec::new()) {
            Ok(item) => item,
            Err(err) => panic!("item failed: {err}"),
        };
        assert_eq!(again.id, item.id);
        assert_ne!(again.snapshot_id, item.snapshot_id);
    }

    #[test]
    fn blank_url_fails_item_validation() {
        let mut source = mk_source();
        source.url = String::new();
        assert!(evidence_item_from_source(&source, Vec::new()).is_err());
    }
}
