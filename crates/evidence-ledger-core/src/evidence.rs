use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::{rfc3339, sha256_hex, LedgerError};

pub const GROWTH_CLAIM_LIMIT_PCT: f64 = 5.0;
pub const GROWTH_CLAIM_LIMIT_BPS: f64 = 500.0;
pub const MARGIN_CLAIM_LIMIT_PCT: f64 = 2.0;
pub const MARGIN_CLAIM_LIMIT_BPS: f64 = 200.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    Growth,
    Margin,
    Wacc,
    S2c,
}

impl Driver {
    pub const ALL: [Self; 4] = [Self::Growth, Self::Margin, Self::Wacc, Self::S2c];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Growth => "growth",
            Self::Margin => "margin",
            Self::Wacc => "wacc",
            Self::S2c => "s2c",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "growth" => Some(Self::Growth),
            "margin" => Some(Self::Margin),
            "wacc" => Some(Self::Wacc),
            "s2c" => Some(Self::S2c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Direction {
    #[serde(rename = "+")]
    Increase,
    #[serde(rename = "-")]
    Decrease,
    #[serde(rename = "unclear")]
    Unclear,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increase => "+",
            Self::Decrease => "-",
            Self::Unclear => "unclear",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "+" => Some(Self::Increase),
            "-" => Some(Self::Decrease),
            "unclear" => Some(Self::Unclear),
            _ => None,
        }
    }

    /// Multiplier applied to a normalized magnitude. `Unclear` never moves a driver.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Increase => 1.0,
            Self::Decrease => -1.0,
            Self::Unclear => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum MagnitudeUnits {
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "bps")]
    Bps,
    #[serde(rename = "abs")]
    Abs,
}

impl MagnitudeUnits {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percent => "%",
            Self::Bps => "bps",
            Self::Abs => "abs",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "%" => Some(Self::Percent),
            "bps" => Some(Self::Bps),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    /// Convert a stated magnitude into model units (a fraction for `%` and `bps`).
    #[must_use]
    pub fn normalize(self, value: f64) -> f64 {
        match self {
            Self::Percent => value / 100.0,
            Self::Bps => value / 10_000.0,
            Self::Abs => value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Horizon {
    #[serde(rename = "y1")]
    Y1,
    #[serde(rename = "y2-3")]
    Y2To3,
    #[serde(rename = "LT")]
    LongTerm,
}

impl Horizon {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Y1 => "y1",
            Self::Y2To3 => "y2-3",
            Self::LongTerm => "LT",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "y1" => Some(Self::Y1),
            "y2-3" => Some(Self::Y2To3),
            "LT" => Some(Self::LongTerm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SourceType {
    #[serde(rename = "10K")]
    TenK,
    #[serde(rename = "10Q")]
    TenQ,
    #[serde(rename = "8K")]
    EightK,
    #[serde(rename = "PR")]
    PressRelease,
    #[serde(rename = "transcript")]
    Transcript,
    #[serde(rename = "news")]
    News,
}

impl SourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TenK => "10K",
            Self::TenQ => "10Q",
            Self::EightK => "8K",
            Self::PressRelease => "PR",
            Self::Transcript => "transcript",
            Self::News => "news",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "10K" => Some(Self::TenK),
            "10Q" => Some(Self::TenQ),
            "8K" => Some(Self::EightK),
            "PR" => Some(Self::PressRelease),
            "transcript" => Some(Self::Transcript),
            "news" => Some(Self::News),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceClaim {
    pub driver: Driver,
    pub statement: String,
    pub direction: Direction,
    pub magnitude_units: MagnitudeUnits,
    #[serde(default)]
    pub magnitude_value: Option<f64>,
    pub horizon: Horizon,
    pub confidence: f64,
    pub quote: String,
    #[serde(default)]
    pub page_ref: Option<u32>,
    #[serde(default)]
    pub line_range: Option<(u32, u32)>,
}

impl EvidenceClaim {
    /// Validate one claim against its construction-time invariants.
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] naming the offending field when confidence is
    /// outside `[0, 1]`, the quote is empty, the magnitude is negative or non-finite or
    /// exceeds the per-claim driver limit, or `line_range` is not ordered.
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.validate_at("claim")
    }

    pub(crate) fn validate_at(&self, prefix: &str) -> Result<(), LedgerError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(LedgerError::schema(
                format!("{prefix}.confidence"),
                format!("confidence MUST be in [0.0, 1.0], got {}", self.confidence),
            ));
        }

        if self.quote.trim().is_empty() {
            return Err(LedgerError::schema(
                format!("{prefix}.quote"),
                "quote MUST be provided to support the claim",
            ));
        }

        if let Some(value) = self.magnitude_value {
            if !value.is_finite() || value < 0.0 {
                return Err(LedgerError::schema(
                    format!("{prefix}.magnitude_value"),
                    format!("magnitude_value MUST be a finite non-negative number, got {value}"),
                ));
            }

            if let Some(limit) = self.magnitude_limit() {
                if value > limit {
                    return Err(LedgerError::schema(
                        format!("{prefix}.magnitude_value"),
                        format!(
                            "{} magnitude {value}{} exceeds {limit}{} per-claim cap",
                            self.driver.as_str(),
                            self.magnitude_units.as_str(),
                            self.magnitude_units.as_str()
                        ),
                    ));
                }
            }
        }

        if let Some((start, end)) = self.line_range {
            if start > end {
                return Err(LedgerError::schema(
                    format!("{prefix}.line_range"),
                    format!("line_range MUST be [start, end] with start <= end, got [{start}, {end}]"),
                ));
            }
        }

        Ok(())
    }

    /// Consume the claim, returning it only when it validates.
    ///
    /// # Errors
    /// Same as [`EvidenceClaim::validate`].
    pub fn validated(self) -> Result<Self, LedgerError> {
        self.validate()?;
        Ok(self)
    }

    fn magnitude_limit(&self) -> Option<f64> {
        match (self.driver, self.magnitude_units) {
            (Driver::Growth, MagnitudeUnits::Percent) => Some(GROWTH_CLAIM_LIMIT_PCT),
            (Driver::Growth, MagnitudeUnits::Bps) => Some(GROWTH_CLAIM_LIMIT_BPS),
            (Driver::Margin, MagnitudeUnits::Percent) => Some(MARGIN_CLAIM_LIMIT_PCT),
            (Driver::Margin, MagnitudeUnits::Bps) => Some(MARGIN_CLAIM_LIMIT_BPS),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub id: String,
    pub source_url: String,
    pub snapshot_id: String,
    #[serde(default)]
    pub date: Option<String>,
    pub source_type: SourceType,
    pub title: String,
    #[serde(default)]
    pub claims: Vec<EvidenceClaim>,
}

impl EvidenceItem {
    /// Validate the item header and every claim it carries.
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] for a malformed `id`, `snapshot_id`, `date` or
    /// `source_url`, or for the first invalid claim (`claims[i].<field>`).
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.validate_at("item")
    }

    pub(crate) fn validate_at(&self, prefix: &str) -> Result<(), LedgerError> {
        self.validate_header_at(prefix)?;
        for (index, claim) in self.claims.iter().enumerate() {
            claim.validate_at(&format!("{prefix}.claims[{index}]"))?;
        }
        Ok(())
    }

    pub(crate) fn validate_header_at(&self, prefix: &str) -> Result<(), LedgerError> {
        if !self.id.starts_with("ev_") || self.id.len() < 6 {
            return Err(LedgerError::schema(
                format!("{prefix}.id"),
                format!("evidence id MUST start with `ev_` and be at least 6 characters, got `{}`", self.id),
            ));
        }

        if !self.snapshot_id.starts_with("snap_") || self.snapshot_id.len() < 8 {
            return Err(LedgerError::schema(
                format!("{prefix}.snapshot_id"),
                format!(
                    "snapshot_id MUST start with `snap_` and be at least 8 characters, got `{}`",
                    self.snapshot_id
                ),
            ));
        }

        if self.source_url.trim().is_empty() {
            return Err(LedgerError::schema(
                format!("{prefix}.source_url"),
                "source_url MUST be provided",
            ));
        }

        if let Some(date) = &self.date {
            if Date::parse(date, format_description!("[year]-[month]-[day]")).is_err() {
                return Err(LedgerError::schema(
                    format!("{prefix}.date"),
                    format!("date MUST be formatted as YYYY-MM-DD, got `{date}`"),
                ));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn parsed_date(&self) -> Option<Date> {
        self.date
            .as_deref()
            .and_then(|date| Date::parse(date, format_description!("[year]-[month]-[day]")).ok())
    }
}

/// A claim together with its position inside a bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaimRef<'a> {
    pub evidence_id: &'a str,
    pub item_index: usize,
    pub claim_index: usize,
    pub claim: &'a EvidenceClaim,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceBundle {
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) research_timestamp: OffsetDateTime,
    pub(crate) ticker: String,
    #[serde(default)]
    pub(crate) frozen: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub(crate) freeze_timestamp: Option<OffsetDateTime>,
    #[serde(default)]
    pub(crate) content_hash: Option<String>,
    #[serde(default)]
    pub(crate) items: Vec<EvidenceItem>,
}

impl EvidenceBundle {
    /// Start an empty, mutable bundle for one research pass.
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] when `ticker` is blank.
    pub fn new(ticker: &str, research_timestamp: OffsetDateTime) -> Result<Self, LedgerError> {
        if ticker.trim().is_empty() {
            return Err(LedgerError::schema("ticker", "ticker MUST be provided"));
        }

        Ok(Self {
            research_timestamp,
            ticker: ticker.trim().to_string(),
            frozen: false,
            freeze_timestamp: None,
            content_hash: None,
            items: Vec::new(),
        })
    }

    /// Append one validated item.
    ///
    /// # Errors
    /// Returns [`LedgerError::FreezeState`] if the bundle is frozen and
    /// [`LedgerError::Schema`] if the item is malformed. A rejected item is not added.
    pub fn add_item(&mut self, item: EvidenceItem) -> Result<(), LedgerError> {
        ensure_mutable(self, "add_item")?;
        item.validate_at(&format!("items[{}]", self.items.len()))?;
        self.items.push(item);
        Ok(())
    }

    /// Freeze the bundle at the current wall-clock time.
    ///
    /// # Errors
    /// See [`EvidenceBundle::freeze_at`].
    pub fn freeze(&mut self) -> Result<(), LedgerError> {
        self.freeze_at(OffsetDateTime::now_utc())
    }

    /// Mark the bundle immutable and stamp its content hash.
    ///
    /// The hash is computed before any field changes, so a failure leaves the bundle
    /// untouched.
    ///
    /// # Errors
    /// Returns [`LedgerError::FreezeState`] when the bundle is already frozen.
    pub fn freeze_at(&mut self, at: OffsetDateTime) -> Result<(), LedgerError> {
        if self.frozen {
            let since = match self.freeze_timestamp {
                Some(ts) => rfc3339(ts)?,
                None => "an unknown time".to_string(),
            };
            return Err(LedgerError::FreezeState(format!(
                "evidence bundle for {} is already frozen (since {since})",
                self.ticker
            )));
        }

        let hash = self.compute_content_hash()?;
        self.frozen = true;
        self.freeze_timestamp = Some(at);
        self.content_hash = Some(hash);
        Ok(())
    }

    /// SHA-256 over the canonical JSON of `{ticker, research_timestamp, items}`.
    ///
    /// Object keys are sorted at every depth and the document is encoded compactly
    /// (`,` and `:` with no padding, raw UTF-8, timestamps as RFC3339 with `Z`). That
    /// differs from a `json.dumps(..., sort_keys=True)` encoding, so a hash is only
    /// reproducible by this encoder and must not be compared with hashes produced
    /// elsewhere.
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] if the bundle cannot be serialized.
    pub fn compute_content_hash(&self) -> Result<String, LedgerError> {
        let items = serde_json::to_value(&self.items)
            .map_err(|err| LedgerError::schema("items", format!("failed to serialize items: {err}")))?;

        let mut content = Map::new();
        content.insert("ticker".to_string(), Value::String(self.ticker.clone()));
        content.insert(
            "research_timestamp".to_string(),
            Value::String(rfc3339(self.research_timestamp)?),
        );
        content.insert("items".to_string(), items);

        let canonical = canonicalize(Value::Object(content));
        let encoded = serde_json::to_string(&canonical)
            .map_err(|err| LedgerError::schema("items", format!("failed to encode bundle: {err}")))?;
        Ok(sha256_hex(encoded.as_bytes()))
    }

    /// True only for a frozen bundle whose stored hash matches its current content.
    #[must_use]
    pub fn validate_integrity(&self) -> bool {
        let Some(stored) = &self.content_hash else {
            return false;
        };
        match self.compute_content_hash() {
            Ok(expected) => &expected == stored,
            Err(_) => false,
        }
    }

    /// Check `frozen <=> freeze_timestamp and content_hash are present`.
    ///
    /// # Errors
    /// Returns [`LedgerError::FreezeState`] describing the inconsistent field.
    pub fn validate_freeze_state(&self) -> Result<(), LedgerError> {
        if self.frozen {
            if self.freeze_timestamp.is_none() {
                return Err(LedgerError::FreezeState(
                    "freeze_timestamp required when frozen=true".to_string(),
                ));
            }
            if self.content_hash.is_none() {
                return Err(LedgerError::FreezeState(
                    "content_hash required when frozen=true".to_string(),
                ));
            }
        } else {
            if self.freeze_timestamp.is_some() {
                return Err(LedgerError::FreezeState(
                    "freeze_timestamp not allowed when frozen=false".to_string(),
                ));
            }
            if self.content_hash.is_some() {
                return Err(LedgerError::FreezeState(
                    "content_hash not allowed when frozen=false".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Validate the whole bundle: ticker, freeze state and every item.
    ///
    /// # Errors
    /// Returns the first [`LedgerError::Schema`] or [`LedgerError::FreezeState`] found.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.ticker.trim().is_empty() {
            return Err(LedgerError::schema("ticker", "ticker MUST be provided"));
        }
        self.validate_freeze_state()?;
        for (index, item) in self.items.iter().enumerate() {
            item.validate_at(&format!("items[{index}]"))?;
        }
        Ok(())
    }

    /// Every claim with `confidence >= threshold`, in bundle order.
    #[must_use]
    pub fn get_high_confidence_claims(&self, threshold: f64) -> Vec<&EvidenceClaim> {
        self.items
            .iter()
            .flat_map(|item| item.claims.iter())
            .filter(|claim| claim.confidence >= threshold)
            .collect()
    }

    #[must_use]
    pub fn claim_refs(&self) -> Vec<ClaimRef<'_>> {
        self.items
            .iter()
            .enumerate()
            .flat_map(|(item_index, item)| {
                item.claims.iter().enumerate().map(move |(claim_index, claim)| ClaimRef {
                    evidence_id: item.id.as_str(),
                    item_index,
                    claim_index,
                    claim,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn claims_by_driver(&self, driver: Driver) -> Vec<ClaimRef<'_>> {
        self.claim_refs().into_iter().filter(|entry| entry.claim.driver == driver).collect()
    }

    #[must_use]
    pub fn total_claims(&self) -> usize {
        self.items.iter().map(|item| item.claims.len()).sum()
    }

    /// Identifier used to tie audit logs back to this research pass.
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] if the research timestamp cannot be formatted.
    pub fn bundle_id(&self) -> Result<String, LedgerError> {
        Ok(format!("{}_{}", self.ticker, rfc3339(self.research_timestamp)?))
    }

    #[must_use]
    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    #[must_use]
    pub fn research_timestamp(&self) -> OffsetDateTime {
        self.research_timestamp
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn freeze_timestamp(&self) -> Option<OffsetDateTime> {
        self.freeze_timestamp
    }

    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    #[must_use]
    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }
}

/// Refuse `operation` on a frozen bundle.
///
/// # Errors
/// Returns [`LedgerError::FreezeState`] naming the operation and the freeze timestamp.
pub fn ensure_mutable(bundle: &EvidenceBundle, operation: &str) -> Result<(), LedgerError> {
    if !bundle.frozen {
        return Ok(());
    }
    let since = match bundle.freeze_timestamp {
        Some(ts) => rfc3339(ts)?,
        None => "an unknown time".to_string(),
    };
    Err(LedgerError::FreezeState(format!(
        "cannot {operation}: evidence bundle for {} is frozen since {since}",
        bundle.ticker
    )))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|lhs, rhs| lhs.0.cmp(&rhs.0));
            let mut sorted = Map::new();
            for (key, nested) in entries {
                sorted.insert(key, canonicalize(nested));
            }
            Value::Object(sorted)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
