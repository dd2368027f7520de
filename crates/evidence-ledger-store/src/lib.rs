//! Durable JSON artifacts for the evidence ledger.
//!
//! Frozen bundles are written with an `integrity_proof` block and re-verified on every
//! load. Model-PR logs and processing summaries sit next to them, and a sha256
//! manifest pins every artifact the store wrote.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use evidence_ledger_core::{
    sha256_hex, EvidenceBundle, IngestionPolicy, LedgerError, ModelPRLog, ProcessingSummary,
    FREEZER_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{error, info};

const MANIFEST_FILE: &str = "manifest.json";
const INTEGRITY_PROOF_KEY: &str = "integrity_proof";
const FROZEN_PREFIX: &str = "frozen_evidence_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityProof {
    pub verified_at: String,
    pub recomputed_hash: String,
    pub verification: String,
    pub freezer_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDigest {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactManifest {
    pub generated_at: String,
    pub files: Vec<ArtifactDigest>,
}

/// A directory of ledger artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) an artifact directory.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create artifact directory {}", root.display()))?;
        Ok(Self { root: root.to_path_buf() })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a frozen bundle together with a freshly computed integrity proof.
    ///
    /// # Errors
    /// Returns an error when the bundle is not frozen, its hash no longer matches,
    /// or the file cannot be written.
    pub fn save_frozen_bundle(&self, bundle: &EvidenceBundle) -> Result<PathBuf> {
        let Some(freeze_timestamp) = bundle.freeze_timestamp().filter(|_| bundle.is_frozen()) else {
            return Err(anyhow::Error::new(LedgerError::FreezeState(format!(
                "only frozen evidence can be persisted; bundle for {} is open",
                bundle.ticker()
            ))));
        };

        let recomputed_hash = bundle.compute_content_hash().context("failed to hash evidence bundle")?;
        if !bundle.validate_integrity() {
            return Err(anyhow::Error::new(LedgerError::Integrity(format!(
                "refusing to persist corrupted evidence bundle for {}",
                bundle.ticker()
            ))));
        }

        let mut document = serde_json::to_value(bundle).context("failed to serialize evidence bundle")?;
        let proof = IntegrityProof {
            verified_at: now_rfc3339()?,
            recomputed_hash,
            verification: "PASSED".to_string(),
            freezer_version: FREEZER_VERSION.to_string(),
        };
        let Some(object) = document.as_object_mut() else {
            return Err(anyhow!("evidence bundle did not serialize to a JSON object"));
        };
        object.insert(
            INTEGRITY_PROOF_KEY.to_string(),
            serde_json::to_value(&proof).context("failed to serialize integrity proof")?,
        );

        let file_name = format!(
            "{FROZEN_PREFIX}{}_{}.json",
            artifact_ticker(bundle.ticker())?,
            freeze_stamp(freeze_timestamp)?
        );
        let path = self.write_json(&file_name, &document)?;
        info!(ticker = bundle.ticker(), path = %path.display(), "frozen evidence bundle saved");
        Ok(path)
    }

    /// Load a frozen bundle, dropping the stored proof and re-verifying the hash.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, when the bundle is not
    /// frozen, or when its content hash does not match. The latter two carry a
    /// [`LedgerError`] as root cause.
    pub fn load_frozen_bundle(&self, path: &Path) -> Result<EvidenceBundle> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read frozen bundle {}", path.display()))?;
        let mut document: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse frozen bundle JSON {}", path.display()))?;
        if let Some(object) = document.as_object_mut() {
            object.remove(INTEGRITY_PROOF_KEY);
        }

        let bundle: EvidenceBundle = serde_json::from_value(document)
            .with_context(|| format!("failed to decode evidence bundle {}", path.display()))?;

        bundle
            .validate_freeze_state()
            .with_context(|| format!("inconsistent freeze state in {}", path.display()))?;
        if !bundle.is_frozen() {
            return Err(anyhow::Error::new(LedgerError::FreezeState(format!(
                "bundle in {} is not frozen",
                path.display()
            ))));
        }

        if !bundle.validate_integrity() {
            error!(
                ticker = bundle.ticker(),
                path = %path.display(),
                "CRITICAL: frozen evidence file failed integrity verification"
            );
            return Err(anyhow::Error::new(LedgerError::Integrity(format!(
                "content hash mismatch for frozen evidence {}",
                bundle.ticker()
            )))
            .context(format!("failed to load frozen bundle {}", path.display())));
        }

        Ok(bundle)
    }

    /// Path of the most recently frozen bundle for `ticker`, if any.
    ///
    /// Only names of the exact form `frozen_evidence_{ticker}_{stamp}.json` count, so
    /// `BRK` never picks up a `BRK_B` bundle. The latest is chosen by parsed stamp.
    ///
    /// # Errors
    /// Returns an error when `ticker` cannot name an artifact or the artifact
    /// directory cannot be listed.
    pub fn find_frozen_bundle(&self, ticker: &str) -> Result<Option<PathBuf>> {
        let prefix = format!("{FROZEN_PREFIX}{}_", artifact_ticker(ticker)?);
        let latest = self
            .json_files()?
            .into_iter()
            .filter_map(|name| {
                let stamp = name.strip_prefix(&prefix)?.strip_suffix(".json")?;
                let frozen_at = parse_freeze_stamp(stamp)?;
                Some((frozen_at, name))
            })
            .max_by(|left, right| left.0.cmp(&right.0));
        Ok(latest.map(|(_, name)| self.root.join(name)))
    }

    /// # Errors
    /// Returns an error when the log cannot be serialized or written.
    pub fn save_model_pr_log(&self, log: &ModelPRLog) -> Result<PathBuf> {
        let file_name = format!(
            "model_pr_log_{}_{}.json",
            artifact_ticker(log.ticker())?,
            run_stamp(log.timestamp())?
        );
        let document = serde_json::to_value(log).context("failed to serialize model PR log")?;
        let path = self.write_json(&file_name, &document)?;
        info!(
            ticker = log.ticker(),
            changes = log.changes().len(),
            path = %path.display(),
            "model PR log saved"
        );
        Ok(path)
    }

    /// Load a Model-PR log and check its totals against its entries.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or is not a Model-PR log. A log
    /// whose validation summary is unbalanced or disagrees with its change and
    /// rejection lists carries [`LedgerError::Integrity`] as root cause.
    pub fn load_model_pr_log(&self, path: &Path) -> Result<ModelPRLog> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read model PR log {}", path.display()))?;
        let log: ModelPRLog = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse model PR log {}", path.display()))?;

        let totals = log.validation_summary();
        if !totals.is_balanced()
            || totals.total_applied != log.changes().len()
            || totals.total_rejected != log.rejections().len()
        {
            error!(
                ticker = log.ticker(),
                path = %path.display(),
                attempted = totals.total_attempted,
                applied = totals.total_applied,
                rejected = totals.total_rejected,
                changes = log.changes().len(),
                rejections = log.rejections().len(),
                "model PR log totals do not match its entries"
            );
            return Err(anyhow::Error::new(LedgerError::Integrity(format!(
                "unbalanced model PR log for {}",
                log.ticker()
            )))
            .context(format!("failed to load model PR log {}", path.display())));
        }

        Ok(log)
    }

    /// # Errors
    /// Returns an error when the summary cannot be serialized or written.
    pub fn save_processing_summary(&self, ticker: &str, summary: &ProcessingSummary) -> Result<PathBuf> {
        let file_name = format!(
            "processing_summary_{}_{}.json",
            artifact_ticker(ticker)?,
            run_stamp(summary.generated_at)?
        );
        let document = serde_json::to_value(summary).context("failed to serialize processing summary")?;
        self.write_json(&file_name, &document)
    }

    /// Digest every JSON artifact in the directory into `manifest.json`.
    ///
    /// # Errors
    /// Returns an error when an artifact cannot be read or the manifest written.
    pub fn write_manifest(&self) -> Result<ArtifactManifest> {
        let mut files = Vec::new();
        for name in self.json_files()? {
            let bytes = fs::read(self.root.join(&name))
                .with_context(|| format!("failed to read artifact {name}"))?;
            files.push(ArtifactDigest {
                sha256: sha256_hex(&bytes),
                bytes: u64::try_from(bytes.len()).context("artifact size overflow")?,
                path: name,
            });
        }

        let manifest = ArtifactManifest { generated_at: now_rfc3339()?, files };
        let manifest_path = self.root.join(MANIFEST_FILE);
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize artifact manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write artifact manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Check every manifest entry against the file on disk.
    ///
    /// # Errors
    /// Returns an error for a missing or unreadable manifest, duplicate entries, missing
    /// files, or any digest mismatch.
    pub fn verify_manifest(&self) -> Result<ArtifactManifest> {
        let manifest_path = self.root.join(MANIFEST_FILE);
        let bytes = fs::read(&manifest_path)
            .with_context(|| format!("failed to read manifest file {}", manifest_path.display()))?;
        let manifest: ArtifactManifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse manifest JSON {}", manifest_path.display()))?;

        let mut by_path: BTreeMap<&str, &ArtifactDigest> = BTreeMap::new();
        for file in &manifest.files {
            if by_path.insert(file.path.as_str(), file).is_some() {
                return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
            }
        }

        for (name, expected) in by_path {
            let file_path = self.root.join(name);
            if !file_path.exists() {
                return Err(anyhow!("manifest references missing file {}", file_path.display()));
            }
            let actual = fs::read(&file_path)
                .with_context(|| format!("failed to read artifact {}", file_path.display()))?;
            let actual_sha256 = sha256_hex(&actual);
            if actual_sha256 != expected.sha256 {
                return Err(anyhow!(
                    "manifest digest mismatch for {name}: expected {}, got {actual_sha256}",
                    expected.sha256
                ));
            }
        }

        Ok(manifest)
    }

    fn write_json(&self, file_name: &str, document: &Value) -> Result<PathBuf> {
        let path = self.root.join(file_name);
        let json = serde_json::to_vec_pretty(document)
            .with_context(|| format!("failed to serialize artifact {file_name}"))?;
        fs::write(&path, json).with_context(|| format!("failed to write artifact {}", path.display()))?;
        Ok(path)
    }

    /// Sorted JSON artifact names, excluding the manifest itself.
    fn json_files(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list artifact directory {}", self.root.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read entry in {}", self.root.display()))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(".json") && name != MANIFEST_FILE {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Read and validate an ingestion policy from a YAML file.
///
/// # Errors
/// Returns an error when the file cannot be read or the policy is invalid.
pub fn load_policy(path: &Path) -> Result<IngestionPolicy> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file {}", path.display()))?;
    IngestionPolicy::from_yaml_str(&text)
        .with_context(|| format!("invalid ingestion policy in {}", path.display()))
}

/// A ticker that can be embedded in an artifact file name.
fn artifact_ticker(ticker: &str) -> Result<&str> {
    let ticker = ticker.trim();
    if ticker.is_empty()
        || ticker.contains("..")
        || ticker.chars().any(|c| std::path::is_separator(c) || c == '/' || c == '\\' || c.is_control())
    {
        return Err(anyhow::Error::new(LedgerError::Schema {
            field: "ticker".to_string(),
            message: format!("ticker {ticker:?} cannot be used in an artifact file name"),
        }));
    }
    Ok(ticker)
}

/// `2023-11-14T22-13-20Z`: RFC3339 in UTC with colons made filename-safe.
fn freeze_stamp(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]Z"))
        .context("failed to format freeze timestamp")
}

fn parse_freeze_stamp(stamp: &str) -> Option<PrimitiveDateTime> {
    PrimitiveDateTime::parse(stamp, format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]Z")).ok()
}

fn run_stamp(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .context("failed to format run timestamp")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
