//! Document codec: complaint markdown files ⇄ typed documents.
//!
//! A document is a YAML metadata header between two `---` lines followed by
//! a markdown body. Parsing is done in two phases. The header is split off
//! at the delimiter lines and decoded into a typed [`Header`]; the body is
//! kept verbatim and scanned on demand into `##` sections by [`Body`].
//! Unknown header keys are preserved, and since the body is never rebuilt
//! from its sections nothing unrecognized is lost on a round trip.
//!
//! Rendering is deterministic: header keys are always emitted in the same
//! order, so `render(parse(render(d)))` is byte-identical to `render(d)`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::ebm;
use crate::error::ParseError;
use crate::hash::{self, ContentHash};
use crate::mapper::{self, as_bool, as_integer, as_number, as_text, as_text_list, FieldKind};
use crate::models::{ExtendedContent, StoreRecord, SyncSource};

pub const HEADER_DELIMITER: &str = "---";

/// Header keys with a typed home in [`Header`]. Everything else lands in
/// [`Header::extra`].
const KNOWN_KEYS: &[&str] = &[
    "id",
    "group",
    "title",
    "subtitle",
    "risk",
    "severity",
    "icd10",
    "aliases",
    "search_terms",
    "chips",
    "age_targets",
    "body_system",
    "related_symptoms",
    "common_misconceptions",
    "top_for_adult",
    "top_for_child",
    "fast_track",
    "search_weight",
    "ebm_version",
    "last_ebm_review",
    "evidence_quality",
    "uptodate_reviewed",
    "dynamed_reviewed",
    "sus_protocol_compatible",
    "rename_medications_only",
    "brazilian_guidelines",
    "brazilian_adaptations",
    "last_sync",
    "content_hash",
    "sync_source",
];

/// A parsed complaint document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub header: Header,
    pub body: Body,
}

/// Typed metadata header. Optional fields that are missing get defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub id: String,
    pub group: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub risk: String,
    pub severity: i64,
    pub icd10: Vec<String>,
    pub aliases: Vec<String>,
    pub search_terms: Vec<String>,
    pub chips: Vec<String>,
    pub age_targets: Vec<String>,
    pub body_system: Vec<String>,
    pub related_symptoms: Vec<String>,
    pub common_misconceptions: Vec<String>,
    pub top_for_adult: bool,
    pub top_for_child: bool,
    pub fast_track: bool,
    pub search_weight: f64,
    pub ebm: EbmHeader,
    pub sync: SyncHeader,
    /// Unknown keys, and known keys whose value could not be read as the
    /// declared type. Rendered back verbatim.
    pub extra: BTreeMap<String, Value>,
}

/// Evidence-medicine vocabulary of the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EbmHeader {
    pub version: Option<String>,
    pub last_review: Option<String>,
    pub evidence_quality: Option<String>,
    pub uptodate_reviewed: Option<bool>,
    pub dynamed_reviewed: Option<bool>,
    pub sus_protocol_compatible: Option<bool>,
    pub rename_medications_only: Option<bool>,
    pub brazilian_guidelines: Option<Vec<String>>,
    pub brazilian_adaptations: Option<Vec<String>>,
}

impl EbmHeader {
    /// Structured body parsing applies from version 2 on.
    pub fn is_structured(&self) -> bool {
        self.version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.trim().parse::<u32>().ok())
            .is_some_and(|major| major >= 2)
    }
}

/// Sync bookkeeping carried in the header. Never part of the hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncHeader {
    pub last_sync: Option<DateTime<Utc>>,
    pub content_hash: Option<ContentHash>,
    pub sync_source: Option<SyncSource>,
}

impl Document {
    /// Read and parse a vault file. The file stem stands in for a missing `id`.
    pub fn parse_file(path: &Path) -> Result<Document, ParseError> {
        let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Document::parse_str(&text, &stem)
    }

    pub fn parse_str(text: &str, fallback_id: &str) -> Result<Document, ParseError> {
        let (yaml, body) = split_header(text)?;
        let map = decode_header(yaml)?;
        let body = Body::new(body);
        let header = Header::from_map(map, fallback_id, &body)?;
        Ok(Document { header, body })
    }

    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let yaml = serde_yaml::to_string(&self.header.to_yaml())?;
        let mut out = String::with_capacity(yaml.len() + self.body.as_str().len() + 16);
        out.push_str(HEADER_DELIMITER);
        out.push('\n');
        out.push_str(&yaml);
        out.push_str(HEADER_DELIMITER);
        out.push('\n');
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(self.body.as_str());
            out.push('\n');
        }
        Ok(out)
    }

    pub fn content_hash(&self) -> ContentHash {
        hash::content_hash(&self.header.to_map(), self.body.as_str())
    }

    /// Build the document a store record renders to. `carry` holds header
    /// keys of an existing vault file that the store does not model.
    pub fn from_record(
        record: &StoreRecord,
        carry: &BTreeMap<String, Value>,
    ) -> Result<Document, ParseError> {
        let body = match record
            .additional_data
            .extended_content
            .as_ref()
            .and_then(|c| c.raw_markdown.as_deref())
        {
            Some(raw) => Body::new(raw),
            None => Body::new(&generate_body(record)),
        };

        let mut map = mapper::to_document(record);
        for (key, value) in carry {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        let mut header = Header::from_map(map, &record.id, &body)?;
        if let Some(sync) = &record.additional_data.sync {
            header.sync = SyncHeader {
                last_sync: sync.last_synced_at,
                content_hash: sync.content_hash.clone(),
                sync_source: sync.sync_source,
            };
        }
        Ok(Document { header, body })
    }

    /// The plain body sections in store shape.
    pub fn extended_content(&self) -> ExtendedContent {
        let body = &self.body;
        let items = |kind| body.section(kind).map(|s| s.items());

        let differential = body.section(SectionKind::DifferentialDiagnosis).map(|s| {
            let listed = s.items();
            if listed.is_empty() {
                ebm::parse_differentials(s.content)
                    .into_iter()
                    .map(|d| d.condition)
                    .collect()
            } else {
                listed
            }
        });
        let medications = body.section(SectionKind::Medications).map(|s| {
            let named = s.subheadings(4);
            if named.is_empty() {
                s.items()
            } else {
                named
            }
        });

        ExtendedContent {
            red_flags: items(SectionKind::RedFlags),
            differential_diagnosis: differential,
            initial_conduct: body.section(SectionKind::InitialConduct).map(|s| s.text()),
            calculators: items(SectionKind::RecommendedCalculators),
            medications,
            references: items(SectionKind::EvidenceReferences),
            raw_markdown: Some(body.as_str().to_string()),
        }
    }
}

/// Split raw text into header YAML and body at the `---` delimiter lines.
pub fn split_header(text: &str) -> Result<(&str, &str), ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');
    let first = lines.next().ok_or(ParseError::MissingHeader)?;
    if first.trim_end() != HEADER_DELIMITER {
        return Err(ParseError::MissingHeader);
    }

    let start = first.len();
    let mut offset = start;
    for line in lines {
        if line.trim_end() == HEADER_DELIMITER {
            return Ok((&text[start..offset], &text[offset + line.len()..]));
        }
        offset += line.len();
    }
    Err(ParseError::UnterminatedHeader)
}

fn decode_header(yaml: &str) -> Result<Map<String, Value>, ParseError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| ParseError::InvalidHeader(e.to_string()))?;
    if value.is_null() {
        return Ok(Map::new());
    }
    if !value.is_mapping() {
        return Err(ParseError::HeaderNotMapping);
    }
    match serde_json::to_value(&value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ParseError::HeaderNotMapping),
        Err(e) => Err(ParseError::InvalidHeader(e.to_string())),
    }
}

impl Header {
    /// Decode a flat metadata map. `body` supplies the title and subtitle
    /// when the header does not.
    pub fn from_map(
        mut map: Map<String, Value>,
        fallback_id: &str,
        body: &Body,
    ) -> Result<Header, ParseError> {
        let group = map
            .get("group")
            .and_then(as_text)
            .filter(|g| !g.is_empty())
            .ok_or(ParseError::MissingGroup)?;

        // typed read; a present but unreadable value stays in `extra`
        let mut take = |key: &str, kind: FieldKind| -> Option<Value> {
            let raw = map.get(key)?;
            let coerced = mapper::coerce(kind, raw);
            if coerced.is_some() {
                map.remove(key);
            }
            coerced
        };
        let text = |v: Option<Value>| v.as_ref().and_then(as_text);
        let list = |v: Option<Value>| v.as_ref().and_then(as_text_list);
        let flag = |v: Option<Value>| v.as_ref().and_then(as_bool);

        let id = text(take("id", FieldKind::Text))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| fallback_id.to_string());
        take("group", FieldKind::Text);
        let title = text(take("title", FieldKind::Text))
            .filter(|t| !t.is_empty())
            .or_else(|| body.title())
            .unwrap_or_default();
        let subtitle = text(take("subtitle", FieldKind::Text))
            .filter(|s| !s.is_empty())
            .or_else(|| body.subtitle());

        let header = Header {
            id,
            group,
            title,
            subtitle,
            risk: text(take("risk", FieldKind::Text)).unwrap_or_else(|| "medium".to_string()),
            severity: take("severity", FieldKind::Integer)
                .as_ref()
                .and_then(as_integer)
                .unwrap_or(1),
            icd10: list(take("icd10", FieldKind::TextList)).unwrap_or_default(),
            aliases: list(take("aliases", FieldKind::TextList)).unwrap_or_default(),
            search_terms: list(take("search_terms", FieldKind::TextList)).unwrap_or_default(),
            chips: list(take("chips", FieldKind::TextList)).unwrap_or_default(),
            age_targets: list(take("age_targets", FieldKind::TextList))
                .unwrap_or_else(|| vec!["adult".to_string()]),
            body_system: list(take("body_system", FieldKind::TextList)).unwrap_or_default(),
            related_symptoms: list(take("related_symptoms", FieldKind::TextList))
                .unwrap_or_default(),
            common_misconceptions: list(take("common_misconceptions", FieldKind::TextList))
                .unwrap_or_default(),
            top_for_adult: flag(take("top_for_adult", FieldKind::Bool)).unwrap_or(true),
            top_for_child: flag(take("top_for_child", FieldKind::Bool)).unwrap_or(false),
            fast_track: flag(take("fast_track", FieldKind::Bool)).unwrap_or(false),
            search_weight: take("search_weight", FieldKind::Number)
                .as_ref()
                .and_then(as_number)
                .unwrap_or(1.0),
            ebm: EbmHeader {
                version: text(take("ebm_version", FieldKind::Version)),
                last_review: text(take("last_ebm_review", FieldKind::Date)),
                evidence_quality: text(take("evidence_quality", FieldKind::Text)),
                uptodate_reviewed: flag(take("uptodate_reviewed", FieldKind::Bool)),
                dynamed_reviewed: flag(take("dynamed_reviewed", FieldKind::Bool)),
                sus_protocol_compatible: flag(take("sus_protocol_compatible", FieldKind::Bool)),
                rename_medications_only: flag(take("rename_medications_only", FieldKind::Bool)),
                brazilian_guidelines: list(take("brazilian_guidelines", FieldKind::TextList)),
                brazilian_adaptations: list(take("brazilian_adaptations", FieldKind::TextList)),
            },
            sync: SyncHeader {
                last_sync: map
                    .remove("last_sync")
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(hash::parse_date),
                content_hash: map
                    .remove("content_hash")
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(ContentHash::parse),
                sync_source: map
                    .remove("sync_source")
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(SyncSource::parse),
            },
            extra: map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        };
        Ok(header)
    }

    /// Header entries in render order, sync bookkeeping last.
    fn entries(&self) -> Vec<(String, Value)> {
        let mut out: Vec<(String, Value)> = Vec::with_capacity(32);
        let mut put = |key: &str, value: Value| out.push((key.to_string(), value));

        put("id", Value::from(self.id.as_str()));
        put("group", Value::from(self.group.as_str()));
        put("title", Value::from(self.title.as_str()));
        if let Some(subtitle) = &self.subtitle {
            put("subtitle", Value::from(subtitle.as_str()));
        }
        put("risk", Value::from(self.risk.as_str()));
        put("severity", Value::from(self.severity));
        put("icd10", string_list(&self.icd10));
        put("aliases", string_list(&self.aliases));
        put("search_terms", string_list(&self.search_terms));
        put("chips", string_list(&self.chips));
        put("age_targets", string_list(&self.age_targets));
        for (key, items) in [
            ("body_system", &self.body_system),
            ("related_symptoms", &self.related_symptoms),
            ("common_misconceptions", &self.common_misconceptions),
        ] {
            if !items.is_empty() {
                put(key, string_list(items));
            }
        }
        put("top_for_adult", Value::from(self.top_for_adult));
        put("top_for_child", Value::from(self.top_for_child));
        put("fast_track", Value::from(self.fast_track));
        put("search_weight", Value::from(self.search_weight));

        let ebm = &self.ebm;
        let optional_text = [
            ("ebm_version", &ebm.version),
            ("last_ebm_review", &ebm.last_review),
            ("evidence_quality", &ebm.evidence_quality),
        ];
        for (key, value) in optional_text {
            if let Some(v) = value {
                put(key, Value::from(v.as_str()));
            }
        }
        let optional_flags = [
            ("uptodate_reviewed", ebm.uptodate_reviewed),
            ("dynamed_reviewed", ebm.dynamed_reviewed),
            ("sus_protocol_compatible", ebm.sus_protocol_compatible),
            ("rename_medications_only", ebm.rename_medications_only),
        ];
        for (key, value) in optional_flags {
            if let Some(v) = value {
                put(key, Value::from(v));
            }
        }
        for (key, value) in [
            ("brazilian_guidelines", &ebm.brazilian_guidelines),
            ("brazilian_adaptations", &ebm.brazilian_adaptations),
        ] {
            if let Some(items) = value {
                put(key, string_list(items));
            }
        }

        // unreadable known keys replace their typed default in place
        for (key, value) in &self.extra {
            match out.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => out.push((key.clone(), value.clone())),
            }
        }

        if let Some(at) = self.sync.last_sync {
            out.push(("last_sync".to_string(), Value::from(hash::format_date(at))));
        }
        if let Some(h) = &self.sync.content_hash {
            out.push(("content_hash".to_string(), Value::from(h.as_str())));
        }
        if let Some(source) = self.sync.sync_source {
            out.push(("sync_source".to_string(), Value::from(source.as_str())));
        }
        out
    }

    /// The flat metadata map, as hashed and handed to the field mapper.
    pub fn to_map(&self) -> Map<String, Value> {
        self.entries().into_iter().collect()
    }

    fn to_yaml(&self) -> serde_yaml::Mapping {
        let mut mapping = serde_yaml::Mapping::new();
        for (key, value) in self.entries() {
            // json -> yaml conversion of plain data cannot fail
            if let Ok(v) = serde_yaml::to_value(&value) {
                mapping.insert(serde_yaml::Value::String(key), v);
            }
        }
        mapping
    }

    /// Whether `key` has a typed home in the header.
    pub fn is_known_key(key: &str) -> bool {
        KNOWN_KEYS.contains(&key)
    }
}

/// Recognized body sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Everything before the first `##` heading.
    Preamble,
    RedFlags,
    DifferentialDiagnosis,
    InitialConduct,
    RecommendedCalculators,
    Medications,
    EvidenceReferences,
    Other,
}

const SECTION_NAMES: &[(SectionKind, &[&str])] = &[
    (SectionKind::RedFlags, &["red flags", "sinais de alarme"]),
    (
        SectionKind::DifferentialDiagnosis,
        &["differential diagnosis", "diagnóstico diferencial"],
    ),
    (SectionKind::InitialConduct, &["initial conduct", "conduta inicial"]),
    (
        SectionKind::RecommendedCalculators,
        &["recommended calculators", "calculadoras recomendadas"],
    ),
    (SectionKind::Medications, &["medications", "medicações", "medicamentos"]),
    (
        SectionKind::EvidenceReferences,
        &["evidence references", "referências ebm", "referências"],
    ),
];

impl SectionKind {
    /// Classify a heading, ignoring case, emoji and decoration.
    pub fn classify(heading: &str) -> SectionKind {
        let normalized = normalize_heading(heading);
        SECTION_NAMES
            .iter()
            .find(|(_, names)| names.iter().any(|n| normalized.starts_with(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(SectionKind::Other)
    }
}

fn normalize_heading(heading: &str) -> String {
    let cleaned: String = heading
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One `##` section of a body, borrowed from the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    pub heading: Option<&'a str>,
    pub kind: SectionKind,
    /// Full text of the section including its heading line.
    pub content: &'a str,
}

impl<'a> Section<'a> {
    /// Section text without the heading line.
    pub fn text(&self) -> String {
        let without_heading = match self.heading {
            Some(_) => self.content.split_once('\n').map(|(_, rest)| rest).unwrap_or(""),
            None => self.content,
        };
        without_heading.trim().to_string()
    }

    /// Top-level list items, checkbox markers removed.
    pub fn items(&self) -> Vec<String> {
        self.lines_outside_fences()
            .filter(|line| !line.starts_with(char::is_whitespace))
            .filter_map(list_item)
            .collect()
    }

    /// Titles of `level`-deep subheadings (`####` for 4).
    pub fn subheadings(&self, level: usize) -> Vec<String> {
        let marker = format!("{} ", "#".repeat(level));
        self.lines_outside_fences()
            .filter_map(|line| line.strip_prefix(marker.as_str()))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .collect()
    }

    fn lines_outside_fences(&self) -> impl Iterator<Item = &'a str> {
        let mut in_fence = false;
        self.content.lines().filter(move |line| {
            if is_fence(line) {
                in_fence = !in_fence;
                return false;
            }
            !in_fence
        })
    }
}

fn list_item(line: &str) -> Option<String> {
    let rest = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| {
            let digits = line.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            line[digits..].strip_prefix(". ")
        })?;
    let rest = rest.trim();
    let rest = ["[ ] ", "[x] ", "[X] "]
        .iter()
        .find_map(|marker| rest.strip_prefix(marker))
        .unwrap_or(rest)
        .trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Document body, kept verbatim apart from surrounding blank lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    raw: String,
}

impl Body {
    pub fn new(text: &str) -> Body {
        let mut start = 0;
        for line in text.split_inclusive('\n') {
            if !line.trim().is_empty() {
                break;
            }
            start += line.len();
        }
        Body {
            raw: text[start..].trim_end().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Split into the preamble and `##` sections. Headings inside fenced
    /// code do not start a section. Concatenating every section's content
    /// gives back the whole body.
    pub fn sections(&self) -> Vec<Section<'_>> {
        let mut sections = Vec::new();
        let mut current_start = 0;
        let mut current_heading: Option<&str> = None;
        let mut offset = 0;
        let mut in_fence = false;

        for line in self.raw.split_inclusive('\n') {
            if is_fence(line) {
                in_fence = !in_fence;
            } else if !in_fence {
                if let Some(title) = line.strip_prefix("## ") {
                    if offset > current_start || current_heading.is_some() {
                        sections.push(make_section(&self.raw[current_start..offset], current_heading));
                    }
                    current_start = offset;
                    current_heading = Some(title.trim());
                }
            }
            offset += line.len();
        }
        if offset > current_start || current_heading.is_some() {
            sections.push(make_section(&self.raw[current_start..offset], current_heading));
        }
        sections
    }

    /// First section of the given kind.
    pub fn section(&self, kind: SectionKind) -> Option<Section<'_>> {
        self.sections().into_iter().find(|s| s.kind == kind)
    }

    /// The `# ` heading, if any.
    pub fn title(&self) -> Option<String> {
        self.preamble_lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// The first `> ` quote line before any section.
    pub fn subtitle(&self) -> Option<String> {
        self.preamble_lines()
            .find_map(|line| line.strip_prefix("> "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn preamble_lines(&self) -> impl Iterator<Item = &str> {
        self.sections()
            .into_iter()
            .find(|s| s.kind == SectionKind::Preamble)
            .map(|s| s.content)
            .unwrap_or("")
            .lines()
    }
}

fn make_section<'a>(content: &'a str, heading: Option<&'a str>) -> Section<'a> {
    Section {
        heading,
        kind: heading.map(SectionKind::classify).unwrap_or(SectionKind::Preamble),
        content,
    }
}

/// Markdown body generated from a record that carries no raw markdown.
pub fn generate_body(record: &StoreRecord) -> String {
    let mut out = format!("# {}\n", record.title);
    let subtitle = record
        .additional_data
        .metadata
        .as_ref()
        .and_then(|m| m.subtitle.as_deref());
    if let Some(subtitle) = subtitle {
        out.push_str(&format!("\n> {}\n", subtitle));
    }

    let Some(content) = record.additional_data.extended_content.as_ref() else {
        return out;
    };
    push_list(&mut out, "Red Flags", &content.red_flags);
    push_list(&mut out, "Differential Diagnosis", &content.differential_diagnosis);
    if let Some(text) = content.initial_conduct.as_deref().filter(|t| !t.trim().is_empty()) {
        out.push_str(&format!("\n## Initial Conduct\n\n{}\n", text.trim()));
    }
    push_list(&mut out, "Recommended Calculators", &content.calculators);
    push_list(&mut out, "Medications", &content.medications);
    push_list(&mut out, "Evidence References", &content.references);
    out
}

fn push_list(out: &mut String, heading: &str, items: &Option<Vec<String>>) {
    let Some(items) = items.as_ref().filter(|i| !i.is_empty()) else {
        return;
    };
    out.push_str(&format!("\n## {}\n\n", heading));
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
}

fn string_list(items: &[String]) -> Value {
    Value::from(items.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "---
id: X1
group: CV
title: Dor torácica
risk: high
severity: 4
icd10:
  - I20.0
  - R07.4
aliases: [angina, dor no peito]
search_terms: dor peito
top_for_adult: 'TRUE'
ebm_version: 2.0
last_ebm_review: 2024-03-01
owner: dra. silva
---

# Dor torácica

> Avaliação inicial

## 🚩 Red Flags

- [ ] Dor com irradiação para mandíbula
- [ ] Sudorese fria

## Notas do plantão

Texto livre que o codec não reconhece.

```
## não é seção
```

## Conduta Inicial

ECG em 10 minutos.
";

    fn sample() -> Document {
        Document::parse_str(SAMPLE, "fallback").unwrap()
    }

    #[test]
    fn test_parse_typed_header() {
        let doc = sample();
        let h = &doc.header;
        assert_eq!(h.id, "X1");
        assert_eq!(h.group, "CV");
        assert_eq!(h.risk, "high");
        assert_eq!(h.severity, 4);
        assert_eq!(h.icd10, vec!["I20.0", "R07.4"]);
        assert_eq!(h.aliases, vec!["angina", "dor no peito"]);
        assert_eq!(h.search_terms, vec!["dor peito"]);
        assert!(h.top_for_adult);
        assert_eq!(h.ebm.version.as_deref(), Some("2.0"));
        assert!(h.ebm.is_structured());
        assert_eq!(h.ebm.last_review.as_deref(), Some("2024-03-01T00:00:00.000Z"));
        assert_eq!(h.extra.get("owner"), Some(&Value::from("dra. silva")));
        assert_eq!(h.subtitle.as_deref(), Some("Avaliação inicial"));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let doc = Document::parse_str("---\ngroup: GI\n---\n# Dor abdominal\n", "dor-abdominal").unwrap();
        let h = &doc.header;
        assert_eq!(h.id, "dor-abdominal");
        assert_eq!(h.title, "Dor abdominal");
        assert_eq!(h.risk, "medium");
        assert_eq!(h.severity, 1);
        assert_eq!(h.age_targets, vec!["adult"]);
        assert!(h.top_for_adult);
        assert!(!h.top_for_child);
        assert!(!h.fast_track);
        assert_eq!(h.search_weight, 1.0);
    }

    #[test]
    fn test_missing_group_is_not_a_complaint() {
        let err = Document::parse_str("---\ntitle: Índice\n---\nbody", "index").unwrap_err();
        assert!(err.is_not_a_complaint());
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            Document::parse_str("# no header", "x"),
            Err(ParseError::MissingHeader)
        ));
        assert!(matches!(
            Document::parse_str("---\ngroup: CV\n", "x"),
            Err(ParseError::UnterminatedHeader)
        ));
        assert!(matches!(
            Document::parse_str("---\n- a\n- b\n---\n", "x"),
            Err(ParseError::HeaderNotMapping)
        ));
        assert!(matches!(
            Document::parse_str("---\ngroup: [CV\n---\n", "x"),
            Err(ParseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_render_is_stable() {
        let doc = sample();
        let first = doc.render().unwrap();
        let reparsed = Document::parse_str(&first, "fallback").unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(reparsed.render().unwrap(), first);
        assert_eq!(reparsed.content_hash(), doc.content_hash());
    }

    #[test]
    fn test_unrecognized_sections_survive_round_trip() {
        let rendered = sample().render().unwrap();
        assert!(rendered.contains("## Notas do plantão\n\nTexto livre que o codec não reconhece."));
        assert!(rendered.contains("```\n## não é seção\n```"));
    }

    #[test]
    fn test_unreadable_known_value_is_preserved() {
        let doc = Document::parse_str("---\ngroup: CV\nseverity: grave\n---\n", "x").unwrap();
        assert_eq!(doc.header.severity, 1);
        assert_eq!(doc.header.extra.get("severity"), Some(&Value::from("grave")));
        let rendered = doc.render().unwrap();
        assert!(rendered.contains("severity: grave"));
        assert_eq!(rendered.matches("severity:").count(), 1);
    }

    #[test]
    fn test_sync_fields_do_not_change_hash() {
        let mut doc = sample();
        let before = doc.content_hash();
        doc.header.sync = SyncHeader {
            last_sync: Some(Utc::now()),
            content_hash: Some(before.clone()),
            sync_source: Some(SyncSource::System),
        };
        assert_eq!(doc.content_hash(), before);

        let reparsed = Document::parse_str(&doc.render().unwrap(), "x").unwrap();
        assert_eq!(reparsed.header.sync.content_hash, Some(before.clone()));
        assert_eq!(reparsed.content_hash(), before);
    }

    #[test]
    fn test_section_scanner() {
        let doc = sample();
        let sections = doc.body.sections();
        let kinds: Vec<SectionKind> = sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Preamble,
                SectionKind::RedFlags,
                SectionKind::Other,
                SectionKind::InitialConduct
            ]
        );
        let joined: String = sections.iter().map(|s| s.content).collect();
        assert_eq!(joined, doc.body.as_str());

        let red_flags = doc.body.section(SectionKind::RedFlags).unwrap();
        assert_eq!(
            red_flags.items(),
            vec!["Dor com irradiação para mandíbula", "Sudorese fria"]
        );
        let conduct = doc.body.section(SectionKind::InitialConduct).unwrap();
        assert_eq!(conduct.text(), "ECG em 10 minutos.");
    }

    #[test]
    fn test_extended_content_from_body() {
        let content = sample().extended_content();
        assert_eq!(content.red_flags.as_ref().map(Vec::len), Some(2));
        assert_eq!(content.initial_conduct.as_deref(), Some("ECG em 10 minutos."));
        assert_eq!(content.calculators, None);
        assert!(content.raw_markdown.unwrap().starts_with("# Dor torácica"));
    }

    #[test]
    fn test_heading_classification() {
        assert_eq!(SectionKind::classify("🚩 Red Flags"), SectionKind::RedFlags);
        assert_eq!(SectionKind::classify("Red Flags 🚩"), SectionKind::RedFlags);
        assert_eq!(
            SectionKind::classify("DIAGNÓSTICO DIFERENCIAL"),
            SectionKind::DifferentialDiagnosis
        );
        assert_eq!(SectionKind::classify("Referências EBM"), SectionKind::EvidenceReferences);
        assert_eq!(SectionKind::classify("Anotações"), SectionKind::Other);
    }

    #[test]
    fn test_document_from_record_without_markdown() {
        let mut record = StoreRecord::new("X2", "RC", "Dispneia");
        record.additional_data.extended_content = Some(ExtendedContent {
            red_flags: Some(vec!["SpO2 < 90%".into()]),
            ..Default::default()
        });
        let mut carry = BTreeMap::new();
        carry.insert("owner".to_string(), Value::from("equipe"));

        let doc = Document::from_record(&record, &carry).unwrap();
        assert_eq!(doc.header.title, "Dispneia");
        assert_eq!(doc.header.extra.get("owner"), Some(&Value::from("equipe")));
        assert!(doc.body.as_str().contains("## Red Flags\n\n- SpO2 < 90%"));
    }
}
