//! Core data types shared by the codec, the mapper, the stores and both
//! orchestrators.
//!
//! [`StoreRecord`] is the store-side view of one complaint. Everything the
//! relational columns do not model lives in [`AdditionalData`], a closed
//! schema of optional sub-records that is validated when it crosses the
//! store boundary. Partial updates are expressed as a [`RecordPatch`]. By
//! default they merge per key, so a patch never wipes sibling keys it does
//! not mention; a pull instead rebuilds the content sub-blocks it owns (see
//! [`SideTableMerge`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash::{format_date, parse_date, ContentHash};

/// Current version of the [`AdditionalData`] schema.
pub const SCHEMA_VERSION: u32 = 1;

/// The store-side representation of a complaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRecord {
    pub id: String,
    pub group_code: String,
    pub title: String,
    pub synonyms: Vec<String>,
    pub icd10_codes: Vec<String>,
    pub additional_data: AdditionalData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoreRecord {
    /// A fresh record with an empty side table, as the application would
    /// provision it.
    pub fn new(id: impl Into<String>, group_code: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            group_code: group_code.into(),
            title: title.into(),
            synonyms: Vec::new(),
            icd10_codes: Vec::new(),
            additional_data: AdditionalData::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The last hash written by the sync engine, if any.
    pub fn synced_hash(&self) -> Option<&ContentHash> {
        self.additional_data
            .sync
            .as_ref()
            .and_then(|s| s.content_hash.as_ref())
    }

    /// Apply `patch` in place. Content changes bump `updated_at` to `now`;
    /// bookkeeping-only patches leave it untouched.
    pub fn apply(&mut self, patch: &RecordPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(group_code) = &patch.group_code {
            self.group_code = group_code.clone();
        }
        if let Some(synonyms) = &patch.synonyms {
            self.synonyms = synonyms.clone();
        }
        if let Some(codes) = &patch.icd10_codes {
            self.icd10_codes = codes.clone();
        }
        self.additional_data = match patch.side_table {
            SideTableMerge::PerKey => self.additional_data.merge(&patch.additional_data),
            SideTableMerge::ReplaceContent => self.additional_data.replace_content(&patch.additional_data),
        };
        if !patch.is_sync_only() {
            self.updated_at = now;
        }
    }
}

/// The JSON side table carried next to the relational columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdditionalData {
    #[serde(default = "current_schema_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ComplaintMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_content: Option<ExtendedContent>,
    #[serde(
        default,
        rename = "extendedContentEBM",
        skip_serializing_if = "Option::is_none"
    )]
    pub extended_content_ebm: Option<EbmContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMeta>,
}

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for AdditionalData {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            metadata: None,
            extended_content: None,
            extended_content_ebm: None,
            sync: None,
        }
    }
}

impl AdditionalData {
    /// Decode and validate a side table read from the store.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let data: AdditionalData = serde_json::from_str(raw)?;
        if data.version > SCHEMA_VERSION {
            return Err(StoreError::Schema(format!(
                "side-table version {} is newer than supported version {}",
                data.version, SCHEMA_VERSION
            )));
        }
        Ok(data)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Shallow per-key merge: every sub-block supplied by `patch` overwrites
    /// only the keys it sets, siblings already present survive.
    pub fn merge(&self, patch: &AdditionalData) -> AdditionalData {
        AdditionalData {
            version: SCHEMA_VERSION,
            metadata: merge_block(&self.metadata, &patch.metadata, ComplaintMetadata::merge),
            extended_content: merge_block(
                &self.extended_content,
                &patch.extended_content,
                ExtendedContent::merge,
            ),
            extended_content_ebm: merge_block(
                &self.extended_content_ebm,
                &patch.extended_content_ebm,
                EbmContent::merge,
            ),
            sync: merge_block(&self.sync, &patch.sync, SyncMeta::merge),
        }
    }

    /// Take `metadata`, `extendedContent` and `extendedContentEBM` from
    /// `patch` as they are; an unset key or block is cleared. `sync` still
    /// merges per key.
    pub fn replace_content(&self, patch: &AdditionalData) -> AdditionalData {
        AdditionalData {
            version: SCHEMA_VERSION,
            metadata: patch.metadata.clone(),
            extended_content: patch.extended_content.clone(),
            extended_content_ebm: patch.extended_content_ebm.clone(),
            sync: merge_block(&self.sync, &patch.sync, SyncMeta::merge),
        }
    }

    /// Whether the only thing set is the `sync` sub-block.
    pub fn is_sync_only(&self) -> bool {
        self.metadata.is_none() && self.extended_content.is_none() && self.extended_content_ebm.is_none()
    }
}

fn merge_block<T: Clone>(base: &Option<T>, patch: &Option<T>, merge: fn(&T, &T) -> T) -> Option<T> {
    match (base, patch) {
        (Some(b), Some(p)) => Some(merge(b, p)),
        (None, Some(p)) => Some(p.clone()),
        (b, None) => b.clone(),
    }
}

/// Take the patch value when it is set, otherwise keep the base value.
macro_rules! merge_fields {
    ($base:expr, $patch:expr, $ty:ident { $($field:ident),* $(,)? }) => {
        $ty {
            $($field: $patch.$field.clone().or_else(|| $base.$field.clone()),)*
        }
    };
}

/// Presentation metadata of a complaint (`metadata` sub-block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComplaintMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_top_for_adult: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_top_for_child: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fast_track: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chips: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_terms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_system: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_symptoms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_misconceptions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_weight: Option<f64>,
}

impl ComplaintMetadata {
    pub fn merge(base: &Self, patch: &Self) -> Self {
        merge_fields!(base, patch, ComplaintMetadata {
            subtitle,
            risk_level,
            severity,
            age_targets,
            is_top_for_adult,
            is_top_for_child,
            is_fast_track,
            chips,
            search_terms,
            body_system,
            related_symptoms,
            common_misconceptions,
            search_weight,
        })
    }
}

/// Plain body sections (`extendedContent` sub-block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtendedContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differential_diagnosis: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_conduct: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medications: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<String>>,
    /// The document body exactly as the vault holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_markdown: Option<String>,
}

impl ExtendedContent {
    pub fn merge(base: &Self, patch: &Self) -> Self {
        merge_fields!(base, patch, ExtendedContent {
            red_flags,
            differential_diagnosis,
            initial_conduct,
            calculators,
            medications,
            references,
            raw_markdown,
        })
    }
}

/// Evidence-medicine vocabulary and structured body data
/// (`extendedContentEBM` sub-block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EbmContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebm_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ebm_review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptodate_reviewed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamed_reviewed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sus_protocol_compatible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_medications_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brazilian_guidelines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brazilian_adaptations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_flags: Option<Vec<RedFlag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differential_diagnoses: Option<Vec<Differential>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medications: Option<Vec<Medication>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl EbmContent {
    pub fn merge(base: &Self, patch: &Self) -> Self {
        merge_fields!(base, patch, EbmContent {
            ebm_version,
            last_ebm_review,
            evidence_quality,
            uptodate_reviewed,
            dynamed_reviewed,
            sus_protocol_compatible,
            rename_medications_only,
            brazilian_guidelines,
            brazilian_adaptations,
            red_flags,
            differential_diagnoses,
            medications,
            citations,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedFlagSeverity {
    Critical,
    Warning,
    Caution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedFlag {
    pub description: String,
    pub severity: RedFlagSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_action: Option<String>,
    /// Minutes, from a `<Nmin` marker in the action text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_action: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Differential {
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icd10: Option<String>,
    pub probability: String,
    #[serde(default)]
    pub key_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub generic_name: String,
    pub dose: String,
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default)]
    pub sus_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub source: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
}

/// Bookkeeping owned by the sync engine (`sync` sub-block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_source: Option<SyncSource>,
}

impl SyncMeta {
    pub fn merge(base: &Self, patch: &Self) -> Self {
        merge_fields!(base, patch, SyncMeta {
            content_hash,
            last_synced_at,
            sync_source,
        })
    }

    pub fn stamped(hash: ContentHash, source: SyncSource, at: DateTime<Utc>) -> Self {
        Self {
            content_hash: Some(hash),
            last_synced_at: Some(at),
            sync_source: Some(source),
        }
    }
}

/// Which side last wrote a synchronized version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    /// A vault edit applied by pull.
    #[serde(alias = "vault")]
    Obsidian,
    /// The application's own write path.
    App,
    /// A store version written to the vault by push.
    System,
}

impl SyncSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::Obsidian => "obsidian",
            SyncSource::App => "app",
            SyncSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "obsidian" | "vault" => Some(SyncSource::Obsidian),
            "app" => Some(SyncSource::App),
            "system" => Some(SyncSource::System),
            _ => None,
        }
    }
}

/// How a patch's side-table sub-blocks combine with the stored ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SideTableMerge {
    /// Keys the patch sets overwrite, everything else survives.
    #[default]
    PerKey,
    /// The content sub-blocks are rebuilt from the patch
    /// ([`AdditionalData::replace_content`]).
    ReplaceContent,
}

/// A partial update of a [`StoreRecord`]. `None` columns are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub group_code: Option<String>,
    pub synonyms: Option<Vec<String>>,
    pub icd10_codes: Option<Vec<String>>,
    pub additional_data: AdditionalData,
    pub side_table: SideTableMerge,
}

impl RecordPatch {
    /// A patch that only refreshes sync bookkeeping.
    pub fn sync_only(sync: SyncMeta) -> Self {
        Self {
            additional_data: AdditionalData {
                sync: Some(sync),
                ..AdditionalData::default()
            },
            ..Self::default()
        }
    }

    pub fn is_sync_only(&self) -> bool {
        self.title.is_none()
            && self.group_code.is_none()
            && self.synonyms.is_none()
            && self.icd10_codes.is_none()
            && self.side_table == SideTableMerge::PerKey
            && self.additional_data.is_sync_only()
    }
}

/// Direction of a sync run; also the checkpoint key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Pull,
    Push,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}

/// A position in the `(updated_at, id)` order stores list records in.
///
/// A cursor without an id sits after every record stamped at `updated_at`,
/// which is what a plain `--since` timestamp means. Checkpoints carry the id
/// of the last record processed so a batch cut inside a run of equal
/// timestamps resumes with the next id instead of skipping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub updated_at: DateTime<Utc>,
    pub id: Option<String>,
}

impl Cursor {
    pub fn at(updated_at: DateTime<Utc>) -> Self {
        Self { updated_at, id: None }
    }

    /// The cursor just past `record`.
    pub fn after(record: &StoreRecord) -> Self {
        Self {
            updated_at: record.updated_at,
            id: Some(record.id.clone()),
        }
    }

    /// Whether `record` lies strictly past this cursor.
    pub fn admits(&self, record: &StoreRecord) -> bool {
        match record.updated_at.cmp(&self.updated_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => match &self.id {
                Some(id) => record.id.as_str() > id.as_str(),
                None => false,
            },
        }
    }

    /// Text form persisted in the checkpoint table: the timestamp, then the
    /// id after a single space when there is one.
    pub fn encode(&self) -> String {
        match &self.id {
            Some(id) => format!("{} {}", format_date(self.updated_at), id),
            None => format_date(self.updated_at),
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        let (date, id) = match s.split_once(' ') {
            Some((date, id)) => (date, Some(id.to_string())),
            None => (s, None),
        };
        Some(Self {
            updated_at: parse_date(date)?,
            id,
        })
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// What happened to one document during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Updated,
    Unchanged,
    Conflict,
    /// No counterpart on the other side; counted as skipped.
    NotFound,
    /// Not a complaint document (no classification group).
    Ignored,
    Invalid,
    Unparsable,
    Failed,
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub documents: u64,
    pub updated: u64,
    pub skipped: u64,
    pub conflicts: u64,
    pub errors: u64,
    pub ignored: u64,
}

impl RunStats {
    pub fn record(&mut self, outcome: &DocumentOutcome) {
        self.documents += 1;
        match outcome {
            DocumentOutcome::Updated => self.updated += 1,
            DocumentOutcome::Unchanged | DocumentOutcome::NotFound => self.skipped += 1,
            DocumentOutcome::Conflict => self.conflicts += 1,
            DocumentOutcome::Ignored => self.ignored += 1,
            DocumentOutcome::Invalid | DocumentOutcome::Unparsable | DocumentOutcome::Failed => {
                self.errors += 1
            }
        }
    }

    /// Add another run's counters to these.
    pub fn absorb(&mut self, other: &RunStats) {
        self.documents += other.documents;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.ignored += other.ignored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ebm(version: &str, review: Option<&str>) -> EbmContent {
        EbmContent {
            ebm_version: Some(version.to_string()),
            last_ebm_review: review.map(str::to_string),
            ..EbmContent::default()
        }
    }

    #[test]
    fn test_cursor_breaks_timestamp_ties_by_id() {
        let mut a = StoreRecord::new("A1", "CV", "A");
        let mut b = StoreRecord::new("B1", "CV", "B");
        b.updated_at = a.updated_at;

        let after_a = Cursor::after(&a);
        assert!(!after_a.admits(&a));
        assert!(after_a.admits(&b));
        assert!(!Cursor::at(a.updated_at).admits(&b));

        a.updated_at = a.updated_at + Duration::milliseconds(1);
        assert!(Cursor::after(&b).admits(&a));
    }

    #[test]
    fn test_cursor_text_form() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let keyed = Cursor {
            updated_at: at,
            id: Some("CV 12".into()),
        };
        assert_eq!(keyed.encode(), "2023-11-14T22:13:20.123Z CV 12");
        assert_eq!(Cursor::decode(&keyed.encode()), Some(keyed));
        assert_eq!(Cursor::decode("2023-11-14T22:13:20.123Z"), Some(Cursor::at(at)));
        assert_eq!(Cursor::decode("garbage"), None);
    }

    #[test]
    fn test_merge_keeps_sibling_keys() {
        let base = AdditionalData {
            extended_content_ebm: Some(ebm("1.0", Some("2024-01-01T00:00:00.000Z"))),
            metadata: Some(ComplaintMetadata {
                severity: Some(4),
                chips: Some(vec!["dor".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let patch = AdditionalData {
            extended_content_ebm: Some(ebm("2.0", None)),
            ..Default::default()
        };

        let merged = base.merge(&patch);
        let merged_ebm = merged.extended_content_ebm.unwrap();
        assert_eq!(merged_ebm.ebm_version.as_deref(), Some("2.0"));
        assert_eq!(
            merged_ebm.last_ebm_review.as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
        assert_eq!(merged.metadata.unwrap().severity, Some(4));
    }

    #[test]
    fn test_replace_content_clears_unset_keys() {
        let base = AdditionalData {
            metadata: Some(ComplaintMetadata {
                subtitle: Some("Sub antiga".into()),
                severity: Some(4),
                ..Default::default()
            }),
            extended_content: Some(ExtendedContent {
                red_flags: Some(vec!["Síncope".into()]),
                ..Default::default()
            }),
            extended_content_ebm: Some(ebm("2.0", None)),
            sync: Some(SyncMeta::stamped(
                ContentHash::of_bytes(b"old"),
                SyncSource::Obsidian,
                Utc::now(),
            )),
            ..Default::default()
        };
        let patch = AdditionalData {
            metadata: Some(ComplaintMetadata {
                severity: Some(2),
                ..Default::default()
            }),
            extended_content: Some(ExtendedContent::default()),
            ..Default::default()
        };

        let replaced = base.replace_content(&patch);
        let metadata = replaced.metadata.unwrap();
        assert_eq!(metadata.severity, Some(2));
        assert!(metadata.subtitle.is_none());
        assert!(replaced.extended_content.unwrap().red_flags.is_none());
        assert!(replaced.extended_content_ebm.is_none());
        assert!(replaced.sync.is_some());

        let record_patch = RecordPatch {
            additional_data: AdditionalData::default(),
            side_table: SideTableMerge::ReplaceContent,
            ..Default::default()
        };
        assert!(!record_patch.is_sync_only());
    }

    #[test]
    fn test_sync_only_patch_does_not_bump_updated_at() {
        let mut record = StoreRecord::new("X1", "CV", "Dor torácica");
        let before = record.updated_at;
        let later = before + Duration::hours(1);

        let patch = RecordPatch::sync_only(SyncMeta::stamped(
            ContentHash::of_bytes(b"x"),
            SyncSource::System,
            later,
        ));
        record.apply(&patch, later);
        assert_eq!(record.updated_at, before);
        assert!(record.synced_hash().is_some());

        let content = RecordPatch {
            title: Some("Dor no peito".into()),
            ..Default::default()
        };
        record.apply(&content, later);
        assert_eq!(record.updated_at, later);
        assert_eq!(record.title, "Dor no peito");
    }

    #[test]
    fn test_side_table_rejects_unknown_keys() {
        let err = AdditionalData::from_json(r#"{"metadata": {"riskLevel": "high"}, "extra": 1}"#);
        assert!(matches!(err, Err(StoreError::Schema(_))));

        let ok = AdditionalData::from_json(r#"{"metadata": {"riskLevel": "high"}}"#).unwrap();
        assert_eq!(ok.version, SCHEMA_VERSION);
        assert_eq!(ok.metadata.unwrap().risk_level.as_deref(), Some("high"));
    }

    #[test]
    fn test_side_table_rejects_future_version() {
        let err = AdditionalData::from_json(r#"{"version": 99}"#);
        assert!(matches!(err, Err(StoreError::Schema(_))));
    }

    #[test]
    fn test_run_stats_counting() {
        let mut stats = RunStats::default();
        for outcome in [
            DocumentOutcome::Updated,
            DocumentOutcome::Unchanged,
            DocumentOutcome::NotFound,
            DocumentOutcome::Conflict,
            DocumentOutcome::Ignored,
            DocumentOutcome::Invalid,
        ] {
            stats.record(&outcome);
        }
        assert_eq!(stats.documents, 6);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_sync_source_accepts_vault_alias() {
        assert_eq!(SyncSource::parse("Vault"), Some(SyncSource::Obsidian));
        let parsed: SyncSource = serde_json::from_str("\"vault\"").unwrap();
        assert_eq!(parsed, SyncSource::Obsidian);
        assert_eq!(SyncSource::parse("elsewhere"), None);
    }
}
