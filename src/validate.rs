//! Schema validation of decoded documents, and the `sync validate` dry run.
//!
//! Hard errors block a write; warnings are reported and never block.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::document::{Document, Header, SectionKind};
use crate::mapper::mapping_for;
use crate::vault::Vault;

pub const GROUPS: &[&str] = &[
    "PROTO_SEPSE",
    "PROTO_AVC",
    "PROTO_IC",
    "PROTO_TEP",
    "CV",
    "RC",
    "NC",
    "GI",
    "GU",
    "MSK",
    "INF",
    "OBG",
    "PED",
    "PSI",
    "TR",
    "TOX",
    "DERM",
    "ORL",
    "OFT",
    "ENV",
    "GEN",
];

pub const RISK_LEVELS: &[&str] = &["low", "medium", "high"];

pub const AGE_TARGETS: &[&str] = &["adult", "child", "elderly", "teen", "infant", "adultPregnant"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    /// One-line summary of the hard errors, for logs.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// `^[A-Z]\d{2}(\.\d{1,2})?$`
pub fn is_icd10(code: &str) -> bool {
    let b = code.as_bytes();
    let head_ok = b.len() >= 3
        && b[0].is_ascii_uppercase()
        && b[1].is_ascii_digit()
        && b[2].is_ascii_digit();
    if !head_ok {
        return false;
    }
    match &b[3..] {
        [] => true,
        [b'.', rest @ ..] => (1..=2).contains(&rest.len()) && rest.iter().all(u8::is_ascii_digit),
        _ => false,
    }
}

pub fn validate_document(doc: &Document) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_header(&doc.header, &mut report);

    let has_red_flags = doc
        .body
        .section(SectionKind::RedFlags)
        .is_some_and(|s| !s.items().is_empty() || s.content.contains("- [ ]"));
    if !has_red_flags {
        report.warning("body", "no Red Flags items");
    }
    report
}

fn validate_header(h: &Header, report: &mut ValidationReport) {
    if h.id.trim().is_empty() {
        report.error("id", "identifier is empty");
    }
    if !GROUPS.contains(&h.group.as_str()) {
        report.error("group", format!("unknown group '{}'", h.group));
    }
    if h.title.trim().is_empty() {
        report.error("title", "title is empty");
    }
    if !RISK_LEVELS.contains(&h.risk.as_str()) {
        report.error("risk", format!("risk must be one of {:?}, got '{}'", RISK_LEVELS, h.risk));
    }
    if !(1..=5).contains(&h.severity) {
        report.error("severity", format!("severity must be 1..=5, got {}", h.severity));
    }
    for code in h.icd10.iter().filter(|c| !is_icd10(c)) {
        report.error("icd10", format!("invalid ICD-10 code '{}'", code));
    }
    for target in h.age_targets.iter().filter(|t| !AGE_TARGETS.contains(&t.as_str())) {
        report.error("age_targets", format!("unknown age target '{}'", target));
    }
    if !(0.0..=2.0).contains(&h.search_weight) {
        report.error(
            "search_weight",
            format!("search_weight must be within 0..=2, got {}", h.search_weight),
        );
    }

    if h.icd10.is_empty() {
        report.warning("icd10", "no ICD-10 codes");
    }
    if h.aliases.is_empty() {
        report.warning("aliases", "no aliases");
    }
    if h.search_terms.is_empty() {
        report.warning("search_terms", "no search terms");
    }

    // known keys whose value could not be read were kept verbatim
    for (key, value) in &h.extra {
        if let Some(mapping) = mapping_for(key) {
            report.warning(
                key,
                format!("value {} is not a valid {:?} and is ignored", value, mapping.kind),
            );
        }
    }
}

/// Result of validating every vault file.
#[derive(Debug, Default)]
pub struct VaultReport {
    pub files: Vec<FileReport>,
    pub not_complaints: usize,
    pub unparsable: usize,
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub id: String,
    pub report: ValidationReport,
}

impl VaultReport {
    pub fn error_count(&self) -> usize {
        self.unparsable + self.files.iter().map(|f| f.report.errors.len()).sum::<usize>()
    }

    pub fn warning_count(&self) -> usize {
        self.files.iter().map(|f| f.report.warnings.len()).sum()
    }
}

/// Parse and validate every vault document without writing anything.
pub fn validate_vault(vault: &Vault) -> Result<VaultReport> {
    let mut out = VaultReport::default();
    let mut by_id: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for path in vault.scan()? {
        match Document::parse_file(&path) {
            Ok(doc) => {
                let report = validate_document(&doc);
                by_id.entry(doc.header.id.clone()).or_default().push(out.files.len());
                out.files.push(FileReport {
                    path,
                    id: doc.header.id,
                    report,
                });
            }
            Err(e) if e.is_not_a_complaint() => out.not_complaints += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unparsable document");
                out.unparsable += 1;
            }
        }
    }

    for (id, indexes) in by_id.into_iter().filter(|(_, idx)| idx.len() > 1) {
        let paths: Vec<String> = indexes
            .iter()
            .map(|&i| out.files[i].path.display().to_string())
            .collect();
        for &i in &indexes {
            out.files[i].report.error(
                "id",
                format!("duplicate identifier '{}' in {}", id, paths.join(", ")),
            );
        }
    }
    Ok(out)
}

/// `sync validate`: print per-file results and a summary. Returns whether
/// the vault is free of hard errors.
pub fn run_validate(config: &Config) -> Result<bool> {
    let vault = Vault::new(&config.vault)?;
    let result = validate_vault(&vault)?;

    for file in &result.files {
        let rel = vault.relative(&file.path);
        let status = if file.report.is_valid() { "ok" } else { "FAIL" };
        println!("{} {} ({})", status, rel.display(), file.id);
        for issue in &file.report.errors {
            println!("    error {}: {}", issue.field, issue.message);
        }
        for issue in &file.report.warnings {
            println!("    warning {}: {}", issue.field, issue.message);
        }
    }

    println!("sync validate");
    println!("  documents: {}", result.files.len());
    println!("  valid: {}", result.files.iter().filter(|f| f.report.is_valid()).count());
    println!("  not complaints: {}", result.not_complaints);
    println!("  unparsable: {}", result.unparsable);
    println!("  errors: {}", result.error_count());
    println!("  warnings: {}", result.warning_count());

    let clean = result.error_count() == 0;
    if clean {
        println!("ok");
    }
    Ok(clean)
}
