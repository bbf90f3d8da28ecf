//! Structured evidence-medicine body parsing.
//!
//! Documents that declare `ebm_version: 2.0` or later follow a stricter body
//! layout: red flags grouped by severity, one `####` block per medication,
//! numbered citations grouped by source, and a differential-diagnosis table.
//! The parsers here read those layouts line by line and skip anything that
//! does not fit, so a half-converted document yields partial data instead of
//! an error.

use crate::document::{Body, SectionKind};
use crate::models::{Citation, Differential, EbmContent, Medication, RedFlag, RedFlagSeverity};

const ROUTES: &[&str] = &[
    "VO", "IV", "IM", "SC", "SL", "Inalatório", "Tópico", "Retal", "Nasal", "Ocular",
];

/// Structured content of a body. Only the sections present are set.
pub fn parse(body: &Body) -> EbmContent {
    let section = |kind| body.section(kind).map(|s| s.content).unwrap_or("");

    EbmContent {
        red_flags: non_empty(parse_red_flags(section(SectionKind::RedFlags))),
        differential_diagnoses: non_empty(parse_differentials(section(
            SectionKind::DifferentialDiagnosis,
        ))),
        medications: non_empty(parse_medications(section(SectionKind::Medications))),
        citations: non_empty(parse_citations(section(SectionKind::EvidenceReferences))),
        ..EbmContent::default()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn severity_of(heading: &str) -> Option<RedFlagSeverity> {
    let h = heading.trim().to_lowercase();
    if h.starts_with("critical") || h.starts_with("crític") || h.starts_with("critic") {
        Some(RedFlagSeverity::Critical)
    } else if h.starts_with("warning") || h.starts_with("alerta") {
        Some(RedFlagSeverity::Warning)
    } else if h.starts_with("caution") || h.starts_with("atenção") || h.starts_with("atencao") {
        Some(RedFlagSeverity::Caution)
    } else {
        None
    }
}

/// Checkbox items under `### Critical` / `### Warning` / `### Caution`.
pub fn parse_red_flags(section: &str) -> Vec<RedFlag> {
    let mut flags: Vec<RedFlag> = Vec::new();
    let mut severity: Option<RedFlagSeverity> = None;

    for line in section.lines() {
        if let Some(heading) = line.strip_prefix("### ") {
            severity = severity_of(heading);
            continue;
        }
        let Some(severity) = severity else {
            continue;
        };

        let indented = line.starts_with(char::is_whitespace);
        let trimmed = line.trim();
        if !indented {
            if let Some(description) = checkbox(trimmed) {
                flags.push(RedFlag {
                    description: description.to_string(),
                    severity,
                    immediate_action: None,
                    time_to_action: None,
                });
            }
            continue;
        }
        if let (Some(flag), Some(action)) = (flags.last_mut(), labelled(trimmed, &["Action", "Ação"])) {
            flag.time_to_action = minutes(action);
            flag.immediate_action = Some(action.to_string());
        }
    }
    flags
}

fn checkbox(line: &str) -> Option<&str> {
    ["- [ ]", "- [x]", "- [X]"]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(str::trim)
        .filter(|d| !d.is_empty())
}

/// `<10min` → 10.
fn minutes(text: &str) -> Option<u32> {
    let start = text.find('<')? + 1;
    let digits: String = text[start..].chars().take_while(char::is_ascii_digit).collect();
    let rest = &text[start + digits.len()..];
    if digits.is_empty() || !rest.trim_start().starts_with("min") {
        return None;
    }
    digits.parse().ok()
}

/// Value of a `- **Label**: value` line for any of `labels`.
fn labelled<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    let line = line.trim().trim_start_matches(['-', '*', ' ']);
    labels.iter().find_map(|label| {
        let rest = line.strip_prefix(label)?;
        let rest = rest.strip_prefix("**").unwrap_or(rest);
        rest.strip_prefix(':').map(str::trim)
    })
}

/// One medication per `#### Generic name` block.
pub fn parse_medications(section: &str) -> Vec<Medication> {
    let mut meds: Vec<Medication> = Vec::new();

    for line in section.lines() {
        if let Some(name) = line.strip_prefix("#### ") {
            meds.push(Medication {
                generic_name: name.trim().to_string(),
                dose: String::new(),
                route: "VO".to_string(),
                frequency: None,
                sus_available: false,
                rename_list: None,
                evidence_level: None,
            });
            continue;
        }
        let Some(med) = meds.last_mut() else {
            continue;
        };
        if line.starts_with('#') {
            // a shallower heading ends the medication blocks
            if line.starts_with("## ") || line.starts_with("### ") {
                break;
            }
            continue;
        }

        if let Some(dose) = labelled(line, &["Dose"]) {
            let route = ROUTES.iter().find(|r| dose.split_whitespace().any(|w| w == **r));
            if let Some(route) = route {
                med.route = route.to_string();
                med.dose = dose
                    .split_whitespace()
                    .filter(|w| w != route)
                    .collect::<Vec<_>>()
                    .join(" ");
            } else {
                med.dose = dose.to_string();
            }
        } else if let Some(route) = labelled(line, &["Route", "Via"]) {
            med.route = route.to_string();
        } else if let Some(freq) = labelled(line, &["Frequency", "Frequência"]) {
            med.frequency = Some(freq.to_string());
        } else if let Some(sus) = labelled(line, &["SUS"]) {
            med.sus_available = sus.starts_with('✅') || sus.to_lowercase().starts_with("sim");
            med.rename_list = rename_list(sus);
        } else if let Some(evidence) = labelled(line, &["Evidence", "Evidência"]) {
            med.evidence_level = evidence_level(evidence);
        }
    }
    meds
}

fn rename_list(text: &str) -> Option<String> {
    let idx = text.find("RENAME")?;
    text[idx..]
        .split_whitespace()
        .skip(1)
        .find(|w| matches!(*w, "A" | "B" | "C" | "A)" | "B)" | "C)"))
        .map(|w| w.trim_end_matches(')').to_string())
}

/// `Level A`, `Nível B` or a bare letter.
fn evidence_level(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|w| matches!(*w, "A" | "B" | "C" | "D"))
        .map(str::to_string)
}

fn source_of(heading: &str) -> String {
    let h = heading.trim();
    match h.to_lowercase().as_str() {
        "uptodate" => "uptodate".to_string(),
        "dynamed" => "dynamed".to_string(),
        "diretrizes brasileiras" | "brazilian guidelines" => "brazilian-guideline".to_string(),
        other => other.replace(' ', "-"),
    }
}

/// Numbered `[[title]]` items grouped by `### Source`.
pub fn parse_citations(section: &str) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    let mut source: Option<String> = None;

    for line in section.lines() {
        if let Some(heading) = line.strip_prefix("### ") {
            source = Some(source_of(heading));
            continue;
        }
        let Some(source) = source.as_ref() else {
            continue;
        };
        let trimmed = line.trim();
        if let Some(title) = numbered_link(trimmed) {
            citations.push(Citation {
                source: source.clone(),
                title: title.to_string(),
                pmid: None,
                doi: None,
                url: None,
                evidence_level: None,
            });
            continue;
        }
        let Some(citation) = citations.last_mut() else {
            continue;
        };
        let detail = trimmed.trim_start_matches(['-', '*', ' ']);
        if let Some(pmid) = detail.strip_prefix("PMID:") {
            citation.pmid = Some(pmid.trim().to_string()).filter(|p| p.chars().all(|c| c.is_ascii_digit()));
        } else if let Some(doi) = detail.strip_prefix("DOI:") {
            citation.doi = Some(doi.trim().to_string()).filter(|d| d.starts_with("10."));
        } else if let Some(url) = detail.strip_prefix("URL:") {
            citation.url = Some(url.trim().to_string());
        } else if let Some(level) = detail.strip_prefix("Evidence:") {
            citation.evidence_level = evidence_level(level);
        }
    }
    citations
}

fn numbered_link(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?.trim_start();
    let rest = rest.strip_prefix("[[")?;
    let end = rest.find("]]")?;
    Some(rest[..end].trim())
}

/// Rows of a `| Condition | ICD-10 | Probability | Features |` table.
pub fn parse_differentials(section: &str) -> Vec<Differential> {
    let mut out = Vec::new();
    let mut seen_header = false;

    for line in section.lines().map(str::trim).filter(|l| l.starts_with('|')) {
        let cells: Vec<&str> = line.trim_matches('|').split('|').map(str::trim).collect();
        let is_separator = cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')));
        if is_separator {
            continue;
        }
        if !seen_header {
            seen_header = true;
            continue;
        }
        let Some(condition) = cells.first().filter(|c| !c.is_empty()) else {
            continue;
        };
        let icd10 = cells
            .get(1)
            .filter(|c| !c.is_empty() && **c != "-")
            .map(|c| c.to_string());
        let probability_text = cells.get(2).map(|c| c.to_lowercase()).unwrap_or_default();
        let probability = if probability_text.contains("alta") || probability_text.contains("high") {
            "high"
        } else if probability_text.contains("baixa") || probability_text.contains("low") {
            "low"
        } else {
            "medium"
        };
        let key_features = cells
            .get(3)
            .map(|c| {
                c.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        out.push(Differential {
            condition: condition.to_string(),
            icd10,
            probability: probability.to_string(),
            key_features,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "# Dor torácica

## Red Flags 🚩

### Críticos (Risco de Morte Imediato)
- [ ] Dor em aperto com sudorese
  - **Ação**: ECG <10min
- [ ] Hipotensão

### Alertas
- [ ] Dor pleurítica

## Diagnóstico Diferencial

| Condição | ICD-10 | Probabilidade | Características |
|----------|--------|---------------|-----------------|
| IAM | I21.9 | Alta | Dor típica, troponina+ |
| Costocondrite | - | Baixa | Dor à palpação |

## Medicações

#### AAS
- **Dose**: 300mg VO
- **Frequência**: dose única
- **SUS**: ✅ Sim (RENAME Lista A)
- **Evidência**: Nível A

#### Nitroglicerina
- **Dose**: 0,4mg SL

## Referências EBM

### UpToDate
1. [[Evaluation of chest pain]]
   - PMID: 12345678
   - Evidence: A

### SBC
2. [[Diretriz de dor torácica]]
   - DOI: 10.1000/xyz
";

    #[test]
    fn test_red_flags_by_severity() {
        let body = Body::new(BODY);
        let flags = parse(&body).red_flags.unwrap();
        assert_eq!(flags.len(), 3);
        assert_eq!(flags[0].severity, RedFlagSeverity::Critical);
        assert_eq!(flags[0].immediate_action.as_deref(), Some("ECG <10min"));
        assert_eq!(flags[0].time_to_action, Some(10));
        assert_eq!(flags[1].description, "Hipotensão");
        assert_eq!(flags[1].immediate_action, None);
        assert_eq!(flags[2].severity, RedFlagSeverity::Warning);
    }

    #[test]
    fn test_medications() {
        let meds = parse(&Body::new(BODY)).medications.unwrap();
        assert_eq!(meds.len(), 2);
        assert_eq!(meds[0].generic_name, "AAS");
        assert_eq!(meds[0].dose, "300mg");
        assert_eq!(meds[0].route, "VO");
        assert_eq!(meds[0].frequency.as_deref(), Some("dose única"));
        assert!(meds[0].sus_available);
        assert_eq!(meds[0].rename_list.as_deref(), Some("A"));
        assert_eq!(meds[0].evidence_level.as_deref(), Some("A"));
        assert_eq!(meds[1].route, "SL");
        assert!(!meds[1].sus_available);
    }

    #[test]
    fn test_citations() {
        let citations = parse(&Body::new(BODY)).citations.unwrap();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source, "uptodate");
        assert_eq!(citations[0].pmid.as_deref(), Some("12345678"));
        assert_eq!(citations[0].evidence_level.as_deref(), Some("A"));
        assert_eq!(citations[1].source, "sbc");
        assert_eq!(citations[1].doi.as_deref(), Some("10.1000/xyz"));
    }

    #[test]
    fn test_differential_table() {
        let rows = parse(&Body::new(BODY)).differential_diagnoses.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].condition, "IAM");
        assert_eq!(rows[0].icd10.as_deref(), Some("I21.9"));
        assert_eq!(rows[0].probability, "high");
        assert_eq!(rows[0].key_features, vec!["Dor típica", "troponina+"]);
        assert_eq!(rows[1].icd10, None);
        assert_eq!(rows[1].probability, "low");
    }

    #[test]
    fn test_plain_body_has_no_structure() {
        let content = parse(&Body::new("# Título\n\n## Red Flags\n\n- febre\n"));
        assert_eq!(content, EbmContent::default());
    }

    #[test]
    fn test_minutes_marker() {
        assert_eq!(minutes("Trombólise <60min"), Some(60));
        assert_eq!(minutes("< 5 horas"), None);
        assert_eq!(minutes("sem prazo"), None);
    }
}
