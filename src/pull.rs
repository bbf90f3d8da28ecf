//! Pull orchestrator: vault → store.
//!
//! Each document goes through parse → validate → lookup → hash → compare →
//! apply. Per-document problems become a [`DocumentOutcome`] and the run
//! moves on; only a transient store failure that outlives its retries aborts
//! the run. Records are never created here, only updated.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::document::Document;
use crate::ebm;
use crate::error::{StoreError, SyncError, SyncResult};
use crate::mapper;
use crate::models::{
    Cursor, Direction, DocumentOutcome, EbmContent, RecordPatch, RunStats, SideTableMerge, StoreRecord,
    SyncMeta, SyncSource,
};
use crate::store::{open_store, ComplaintStore};
use crate::validate::validate_document;
use crate::vault::{modified_at, ConflictArtifact, Vault};

/// Result of one pull run.
#[derive(Debug, Default)]
pub struct PullReport {
    pub stats: RunStats,
    /// Conflict artifacts written by this run.
    pub conflicts: Vec<PathBuf>,
    /// Newest modification time among the documents processed.
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Pull `paths` (or the whole vault when `None`) into the store.
pub async fn pull(
    vault: &Vault,
    store: &dyn ComplaintStore,
    paths: Option<&[PathBuf]>,
) -> SyncResult<PullReport> {
    let files = match paths {
        Some(paths) => vault.select(paths)?,
        None => vault.scan()?,
    };
    info!(documents = files.len(), "pull started");

    let mut report = PullReport::default();
    for path in &files {
        let outcome = pull_one(vault, store, path, &mut report).await?;
        if matches!(outcome, DocumentOutcome::Updated | DocumentOutcome::Unchanged) {
            if let Ok(modified) = modified_at(path) {
                report.checkpoint = report.checkpoint.max(Some(modified));
            }
        }
        report.stats.record(&outcome);
    }

    if let Some(at) = report.checkpoint {
        store.set_checkpoint(Direction::Pull, &Cursor::at(at)).await?;
    }

    info!(
        documents = report.stats.documents,
        updated = report.stats.updated,
        skipped = report.stats.skipped,
        conflicts = report.stats.conflicts,
        errors = report.stats.errors,
        ignored = report.stats.ignored,
        "pull finished"
    );
    Ok(report)
}

async fn pull_one(
    vault: &Vault,
    store: &dyn ComplaintStore,
    path: &Path,
    report: &mut PullReport,
) -> SyncResult<DocumentOutcome> {
    let rel = vault.relative(path).display().to_string();

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %rel, error = %e, "unreadable document");
            return Ok(DocumentOutcome::Unparsable);
        }
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let doc = match Document::parse_str(&text, &stem) {
        Ok(doc) => doc,
        Err(e) if e.is_not_a_complaint() => {
            debug!(path = %rel, "not a complaint, ignored");
            return Ok(DocumentOutcome::Ignored);
        }
        Err(e) => {
            warn!(path = %rel, error = %e, "unparsable document");
            return Ok(DocumentOutcome::Unparsable);
        }
    };
    let id = doc.header.id.clone();

    let validation = validate_document(&doc);
    for issue in &validation.warnings {
        debug!(id = %id, field = %issue.field, "{}", issue.message);
    }
    if !validation.is_valid() {
        warn!(id = %id, path = %rel, errors = %validation.error_summary(), "invalid document");
        return Ok(DocumentOutcome::Invalid);
    }

    let record = match store.find_by_identifier(&id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(id = %id, path = %rel, "no store record for identifier, skipped");
            return Ok(DocumentOutcome::NotFound);
        }
        Err(e) => return per_document(&id, e),
    };

    let hash = doc.content_hash();
    if record.synced_hash() == Some(&hash) {
        debug!(id = %id, "unchanged");
        return Ok(DocumentOutcome::Unchanged);
    }

    let modified = match modified_at(path) {
        Ok(t) => t,
        Err(e) => {
            warn!(id = %id, error = %e, "cannot read modification time");
            return Ok(DocumentOutcome::Failed);
        }
    };

    if record.updated_at > modified {
        let artifact = ConflictArtifact {
            id: id.clone(),
            direction: Direction::Pull,
            reason: format!(
                "The store record was updated at {} but the vault file was last modified at {}. \
                 Both changed since the last sync.",
                record.updated_at.to_rfc3339(),
                modified.to_rfc3339()
            ),
            store_text: render_record(&record, &doc),
            vault_text: text,
            detected_at: Utc::now(),
        };
        return match vault.write_conflict(path, &artifact) {
            Ok(written) => {
                warn!(id = %id, artifact = %vault.relative(&written).display(), "conflict detected");
                report.conflicts.push(written);
                Ok(DocumentOutcome::Conflict)
            }
            Err(e) => {
                warn!(id = %id, error = %e, "conflict detected but artifact could not be written");
                Ok(DocumentOutcome::Failed)
            }
        };
    }

    let patch = match build_patch(&doc, &record) {
        Ok(patch) => patch,
        Err(e) => return per_document(&id, e),
    };
    match store.update(&id, &patch).await {
        Ok(_) => {
            info!(id = %id, hash = %hash, "updated from vault");
            Ok(DocumentOutcome::Updated)
        }
        Err(e) => per_document(&id, e),
    }
}

/// Store patch for a vault document: mapped header fields, body sections,
/// structured evidence data and fresh sync bookkeeping.
///
/// Pull owns every mapped header key and every body section, so the content
/// sub-blocks are rebuilt from the document and a key the document no longer
/// has is cleared. The structured evidence lists belong to pull only for
/// structured documents; otherwise they are carried over from `existing`.
pub fn build_patch(doc: &Document, existing: &StoreRecord) -> Result<RecordPatch, StoreError> {
    let mut patch = mapper::to_store(&doc.header.to_map())?;
    patch.side_table = SideTableMerge::ReplaceContent;
    patch.additional_data.extended_content = Some(doc.extended_content());

    let mut ebm_block = patch.additional_data.extended_content_ebm.take().unwrap_or_default();
    if doc.header.ebm.is_structured() {
        let parsed = ebm::parse(&doc.body);
        ebm_block.red_flags = parsed.red_flags;
        ebm_block.differential_diagnoses = parsed.differential_diagnoses;
        ebm_block.medications = parsed.medications;
        ebm_block.citations = parsed.citations;
    } else if let Some(stored) = &existing.additional_data.extended_content_ebm {
        ebm_block.red_flags = stored.red_flags.clone();
        ebm_block.differential_diagnoses = stored.differential_diagnoses.clone();
        ebm_block.medications = stored.medications.clone();
        ebm_block.citations = stored.citations.clone();
    }
    if ebm_block != EbmContent::default() {
        patch.additional_data.extended_content_ebm = Some(ebm_block);
    }

    patch.additional_data.sync = Some(SyncMeta::stamped(
        doc.content_hash(),
        SyncSource::Obsidian,
        Utc::now(),
    ));
    Ok(patch)
}

fn render_record(record: &StoreRecord, doc: &Document) -> String {
    let rendered = Document::from_record(record, &doc.header.extra)
        .map_err(|e| e.to_string())
        .and_then(|d| d.render().map_err(|e| e.to_string()));
    match rendered {
        Ok(text) => text,
        Err(e) => {
            debug!(id = %record.id, error = %e, "store record does not render, writing JSON");
            serde_json::to_string_pretty(record).unwrap_or_default()
        }
    }
}

/// Transient store failures abort the run; anything else fails one document.
fn per_document(id: &str, err: StoreError) -> SyncResult<DocumentOutcome> {
    if err.is_transient() {
        return Err(SyncError::Store(err));
    }
    warn!(id = %id, error = %err, "store rejected document");
    Ok(DocumentOutcome::Failed)
}

/// `sync pull`: one-shot run over the vault or the given paths. Returns the
/// run statistics; the caller turns errors into an exit code.
pub async fn run_pull(config: &Config, paths: &[PathBuf]) -> Result<RunStats> {
    let vault = Vault::new(&config.vault)?;
    let store = open_store(config).await?;
    let selection = if paths.is_empty() { None } else { Some(paths) };

    let report = pull(&vault, &store, selection).await?;
    store.inner().close().await;

    let stats = &report.stats;
    println!("sync pull");
    println!("  documents: {}", stats.documents);
    println!("  updated: {}", stats.updated);
    println!("  skipped: {}", stats.skipped);
    println!("  conflicts: {}", stats.conflicts);
    println!("  errors: {}", stats.errors);
    println!("  ignored: {}", stats.ignored);
    for path in &report.conflicts {
        println!("  conflict: {}", vault.relative(path).display());
    }
    if let Some(at) = report.checkpoint {
        println!("  checkpoint: {}", crate::hash::format_date(at));
    }
    if stats.errors == 0 {
        println!("ok");
    }
    Ok(report.stats)
}
