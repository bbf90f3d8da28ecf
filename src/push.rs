//! Push orchestrator: store → vault.
//!
//! Records changed since the push checkpoint are rendered through the same
//! codec and mapper that pull uses, then written into the vault with the new
//! hash embedded in the header. The conflict test mirrors pull: an existing
//! file that was edited since the last sync and is newer than the record is
//! never overwritten.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::document::{Document, SyncHeader};
use crate::error::{StoreError, SyncError, SyncResult};
use crate::hash::{parse_date, ContentHash};
use crate::models::{
    Cursor, Direction, DocumentOutcome, RecordPatch, RunStats, StoreRecord, SyncMeta, SyncSource,
};
use crate::store::{open_store, ComplaintStore};
use crate::vault::{modified_at, ConflictArtifact, Vault};

#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Exclusive lower bound on `updated_at`; the stored checkpoint when
    /// `None`.
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    /// Ignore both `since` and the checkpoint.
    pub full: bool,
}

#[derive(Debug, Default)]
pub struct PushReport {
    pub stats: RunStats,
    pub written: Vec<PathBuf>,
    pub conflicts: Vec<PathBuf>,
    /// Position just past the last record safely processed, persisted
    /// after the run.
    pub checkpoint: Option<Cursor>,
}

/// A vault file that already holds the record.
struct Existing {
    text: String,
    doc: Option<Document>,
    modified: DateTime<Utc>,
}

pub async fn push(vault: &Vault, store: &dyn ComplaintStore, options: &PushOptions) -> SyncResult<PushReport> {
    let since = if options.full {
        None
    } else if let Some(at) = options.since {
        Some(Cursor::at(at))
    } else {
        store.checkpoint(Direction::Push).await?
    };

    let records = store.list_changed_since(since.as_ref(), options.limit).await?;
    info!(
        records = records.len(),
        since = %since.as_ref().map(Cursor::encode).unwrap_or_else(|| "beginning".to_string()),
        "push started"
    );
    let index: HashMap<String, PathBuf> = if records.is_empty() {
        HashMap::new()
    } else {
        vault.index_by_id()?
    };

    let mut report = PushReport::default();
    // the checkpoint stops before the first failed record so it is retried
    let mut advancing = true;
    for record in &records {
        let outcome = push_one(vault, store, record, index.get(&record.id), &mut report).await?;
        if matches!(outcome, DocumentOutcome::Failed) {
            advancing = false;
        } else if advancing {
            report.checkpoint = Some(Cursor::after(record));
        }
        report.stats.record(&outcome);
    }

    if let Some(cursor) = &report.checkpoint {
        store.set_checkpoint(Direction::Push, cursor).await?;
    }

    info!(
        records = report.stats.documents,
        updated = report.stats.updated,
        skipped = report.stats.skipped,
        conflicts = report.stats.conflicts,
        errors = report.stats.errors,
        "push finished"
    );
    Ok(report)
}

async fn push_one(
    vault: &Vault,
    store: &dyn ComplaintStore,
    record: &StoreRecord,
    indexed: Option<&PathBuf>,
    report: &mut PushReport,
) -> SyncResult<DocumentOutcome> {
    let id = &record.id;
    let target = indexed
        .cloned()
        .unwrap_or_else(|| vault.target_path(id, &record.group_code));

    let existing = match read_existing(&target) {
        Ok(existing) => existing,
        Err(e) => {
            warn!(id = %id, error = %e, "cannot read existing vault file");
            return Ok(DocumentOutcome::Failed);
        }
    };

    let carry = existing
        .as_ref()
        .and_then(|e| e.doc.as_ref())
        .map(|d| d.header.extra.clone())
        .unwrap_or_else(BTreeMap::new);
    let mut doc = match Document::from_record(record, &carry) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(id = %id, error = %e, "record cannot be rendered");
            return Ok(DocumentOutcome::Failed);
        }
    };
    let hash = doc.content_hash();
    let stored = record.synced_hash();

    if let Some(existing) = &existing {
        let file_hash = existing.doc.as_ref().map(Document::content_hash);

        if file_hash.as_ref() == Some(&hash) {
            debug!(id = %id, "vault already holds this version");
            if stored != Some(&hash) {
                refresh_bookkeeping(store, id, &hash).await?;
            }
            return Ok(DocumentOutcome::Unchanged);
        }
        if stored == Some(&hash) {
            debug!(id = %id, "store unchanged since last sync");
            return Ok(DocumentOutcome::Unchanged);
        }

        let file_changed = file_hash.is_none() || file_hash.as_ref() != stored;
        if file_changed && existing.modified > record.updated_at {
            let rendered = match doc.render() {
                Ok(text) => text,
                Err(e) => {
                    warn!(id = %id, error = %e, "record cannot be rendered");
                    return Ok(DocumentOutcome::Failed);
                }
            };
            let artifact = ConflictArtifact {
                id: id.clone(),
                direction: Direction::Push,
                reason: format!(
                    "The vault file was modified at {} after the store record was updated at {}. \
                     Both changed since the last sync.",
                    existing.modified.to_rfc3339(),
                    record.updated_at.to_rfc3339()
                ),
                store_text: rendered,
                vault_text: existing.text.clone(),
                detected_at: Utc::now(),
            };
            return match vault.write_conflict(&target, &artifact) {
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
    }

    let now = Utc::now();
    doc.header.sync = SyncHeader {
        last_sync: Some(now),
        content_hash: Some(hash.clone()),
        sync_source: Some(SyncSource::System),
    };
    let text = match doc.render() {
        Ok(text) => text,
        Err(e) => {
            warn!(id = %id, error = %e, "record cannot be rendered");
            return Ok(DocumentOutcome::Failed);
        }
    };
    if let Err(e) = vault.write_atomic(&target, &text) {
        warn!(id = %id, error = %e, "vault write failed");
        return Ok(DocumentOutcome::Failed);
    }
    info!(id = %id, path = %vault.relative(&target).display(), hash = %hash, "written to vault");
    report.written.push(target);

    let patch = RecordPatch::sync_only(SyncMeta::stamped(hash, SyncSource::System, now));
    match store.update(id, &patch).await {
        Ok(_) => Ok(DocumentOutcome::Updated),
        Err(e) => per_document(id, e),
    }
}

fn read_existing(path: &Path) -> SyncResult<Option<Existing>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|e| SyncError::vault(path, e))?;
    let modified = modified_at(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let doc = Document::parse_str(&text, &stem).ok();
    Ok(Some(Existing {
        text,
        doc,
        modified,
    }))
}

async fn refresh_bookkeeping(store: &dyn ComplaintStore, id: &str, hash: &ContentHash) -> SyncResult<()> {
    let patch = RecordPatch::sync_only(SyncMeta::stamped(hash.clone(), SyncSource::System, Utc::now()));
    match store.update(id, &patch).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_transient() => Err(SyncError::Store(e)),
        Err(e) => {
            warn!(id = %id, error = %e, "could not refresh sync bookkeeping");
            Ok(())
        }
    }
}

fn per_document(id: &str, err: StoreError) -> SyncResult<DocumentOutcome> {
    if err.is_transient() {
        return Err(SyncError::Store(err));
    }
    warn!(id = %id, error = %err, "store rejected bookkeeping update");
    Ok(DocumentOutcome::Failed)
}

/// `--since` accepts RFC 3339 or a bare `YYYY-MM-DD`.
pub fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    match parse_date(value) {
        Some(at) => Ok(at),
        None => bail!("invalid --since '{}': expected RFC 3339 or YYYY-MM-DD", value),
    }
}

/// `sync push`: one-shot run, printing a summary.
pub async fn run_push(config: &Config, since: Option<&str>, limit: Option<usize>, full: bool) -> Result<RunStats> {
    let options = PushOptions {
        since: since.map(parse_since).transpose()?,
        limit: limit.unwrap_or(config.push.default_limit),
        full,
    };
    let vault = Vault::new(&config.vault)?;
    let store = open_store(config).await?;

    let report = push(&vault, &store, &options).await?;
    store.inner().close().await;

    let stats = &report.stats;
    println!("sync push");
    println!("  records: {}", stats.documents);
    println!("  updated: {}", stats.updated);
    println!("  skipped: {}", stats.skipped);
    println!("  conflicts: {}", stats.conflicts);
    println!("  errors: {}", stats.errors);
    for path in &report.conflicts {
        println!("  conflict: {}", vault.relative(path).display());
    }
    if let Some(cursor) = &report.checkpoint {
        println!("  checkpoint: {}", cursor);
    }
    if stats.errors == 0 {
        println!("ok");
    }
    Ok(report.stats)
}
