//! The vault: a directory tree of complaint documents.
//!
//! Scanning follows the same walkdir + globset approach as any file
//! connector: include patterns select candidates, built-in and configured
//! exclude patterns drop index pages, templates, hidden files, editor temp
//! files and conflict artifacts. Writes go through a temp file in the target
//! directory and are renamed into place, so a crash never leaves a partial
//! document behind.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::document::Document;
use crate::error::{SyncError, SyncResult};
use crate::hash;
use crate::models::Direction;

/// Suffix of conflict artifact file stems.
pub const CONFLICT_SUFFIX: &str = "-CONFLICT";

const BUILTIN_EXCLUDES: &[&str] = &[
    "**/.*",
    "**/.*/**",
    "**/_*",
    "**/_*/**",
    "**/00 -*",
    "**/*-CONFLICT.md",
    "**/*~",
    "**/*.tmp",
    "**/*.swp",
    "**/.#*",
];

const DEFAULT_GROUP_FOLDERS: &[(&str, &str)] = &[
    ("CV", "CV - Cardiovascular"),
    ("RC", "RC - Respiratório"),
    ("NC", "NC - Neurológico"),
    ("GI", "GI - Digestivo"),
    ("GU", "GU - Urinário"),
    ("MSK", "MSK - Osteomuscular"),
    ("INF", "INF - Infecção"),
    ("OBG", "OBG - Ginecologia"),
    ("PED", "PED - Pediatria"),
    ("PSI", "PSI - Saúde Mental"),
    ("TR", "TR - Trauma"),
    ("TOX", "TOX - Intoxicação"),
    ("DERM", "DERM - Pele"),
    ("ORL", "ORL - Otorrino"),
    ("OFT", "OFT - Oftalmologia"),
    ("ENV", "ENV - Exposição"),
    ("GEN", "GEN - Geral"),
];

pub struct Vault {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    group_folders: BTreeMap<String, String>,
}

impl Vault {
    pub fn new(config: &VaultConfig) -> SyncResult<Vault> {
        let mut excludes: Vec<String> = BUILTIN_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());

        let mut group_folders: BTreeMap<String, String> = DEFAULT_GROUP_FOLDERS
            .iter()
            .map(|(code, folder)| (code.to_string(), folder.to_string()))
            .collect();
        group_folders.extend(config.group_folders.clone());

        // watcher events carry absolute paths
        let root = config
            .root
            .canonicalize()
            .unwrap_or_else(|_| config.root.clone());

        Ok(Vault {
            root,
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            group_folders,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the vault root, or the path itself when outside it.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Whether a path is a document the sync engine should look at.
    pub fn is_candidate(&self, path: &Path) -> bool {
        let rel = self.relative(path).to_string_lossy().replace('\\', "/");
        !self.exclude.is_match(&rel) && self.include.is_match(&rel)
    }

    /// All candidate documents, sorted.
    pub fn scan(&self) -> SyncResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(SyncError::vault(
                &self.root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "vault root does not exist"),
            ));
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if entry.file_type().is_file() && self.is_candidate(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Candidate documents among `paths`. Directories are expanded; paths
    /// that no longer exist are dropped.
    pub fn select(&self, paths: &[PathBuf]) -> SyncResult<Vec<PathBuf>> {
        let mut selected = Vec::new();
        for path in paths {
            let Ok(path) = path.canonicalize() else {
                tracing::debug!(path = %path.display(), "path no longer exists");
                continue;
            };
            if path.is_dir() {
                for entry in WalkDir::new(&path) {
                    let entry = entry?;
                    if entry.file_type().is_file() && self.is_candidate(entry.path()) {
                        selected.push(entry.into_path());
                    }
                }
            } else if self.is_candidate(&path) {
                selected.push(path);
            }
        }
        selected.sort();
        selected.dedup();
        Ok(selected)
    }

    /// Map complaint identifiers to the files that hold them. Files that do
    /// not parse are left out; on duplicates the first path wins.
    pub fn index_by_id(&self) -> SyncResult<HashMap<String, PathBuf>> {
        let mut index = HashMap::new();
        for path in self.scan()? {
            match Document::parse_file(&path) {
                Ok(doc) => {
                    index.entry(doc.header.id).or_insert(path);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "not indexed");
                }
            }
        }
        Ok(index)
    }

    pub fn group_folder(&self, group_code: &str) -> String {
        self.group_folders
            .get(group_code)
            .cloned()
            .unwrap_or_else(|| group_code.to_string())
    }

    /// Where a new document for `id` in `group_code` belongs.
    pub fn target_path(&self, id: &str, group_code: &str) -> PathBuf {
        self.root
            .join(self.group_folder(group_code))
            .join(format!("{}.md", id))
    }

    /// Write a file atomically, creating parent directories on demand.
    pub fn write_atomic(&self, path: &Path, contents: &str) -> SyncResult<()> {
        let dir = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir).map_err(|e| SyncError::vault(dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".sync-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| SyncError::vault(dir, e))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| SyncError::vault(path, e))?;
        tmp.persist(path).map_err(|e| SyncError::vault(path, e.error))?;
        Ok(())
    }

    /// Write a conflict artifact next to `source` and return its path.
    pub fn write_conflict(&self, source: &Path, artifact: &ConflictArtifact) -> SyncResult<PathBuf> {
        let path = conflict_path(source);
        self.write_atomic(&path, &artifact.render())?;
        Ok(path)
    }

    /// Unresolved conflict artifacts currently in the vault.
    pub fn conflict_artifacts(&self) -> SyncResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if entry.file_type().is_file() && is_conflict_artifact(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        Ok(found)
    }
}

pub fn is_conflict_artifact(path: &Path) -> bool {
    path.file_stem()
        .is_some_and(|s| s.to_string_lossy().ends_with(CONFLICT_SUFFIX))
}

/// `<dir>/<stem>-CONFLICT.md`
pub fn conflict_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    source.with_file_name(format!("{}{}.md", stem, CONFLICT_SUFFIX))
}

/// Last modification time of a file.
pub fn modified_at(path: &Path) -> SyncResult<DateTime<Utc>> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::vault(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}

fn build_globset(patterns: &[String]) -> SyncResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Both sides of a document that changed on both sides since the last sync.
/// Never applied; an operator resolves it and deletes the file.
#[derive(Debug, Clone)]
pub struct ConflictArtifact {
    pub id: String,
    pub direction: Direction,
    pub reason: String,
    pub store_text: String,
    pub vault_text: String,
    pub detected_at: DateTime<Utc>,
}

impl ConflictArtifact {
    pub fn render(&self) -> String {
        format!(
            "# Sync conflict: {id}\n\
             \n\
             - detected: {at}\n\
             - direction: {direction}\n\
             \n\
             ## Reason\n\
             \n\
             {reason}\n\
             \n\
             ## Store version\n\
             \n\
             ````markdown\n\
             {store}\n\
             ````\n\
             \n\
             ## Vault version\n\
             \n\
             ````markdown\n\
             {vault}\n\
             ````\n",
            id = self.id,
            at = hash::format_date(self.detected_at),
            direction = self.direction.as_str(),
            reason = self.reason,
            store = self.store_text.trim_end(),
            vault = self.vault_text.trim_end(),
        )
    }
}
