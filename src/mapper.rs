//! Declarative mapping between document metadata and store records.
//!
//! One table, [`FIELD_TABLE`], drives both directions. Each entry names the
//! flat document key, where the value lives on the store side and how it is
//! coerced. Coercions are total: a value that cannot be read as the declared
//! kind is treated as absent, never as an error.

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::hash::normalize_date;
use crate::models::{
    AdditionalData, ComplaintMetadata, EbmContent, RecordPatch, StoreRecord, SCHEMA_VERSION,
};

/// Where a document key lives in a [`StoreRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreField {
    /// First-class relational column.
    Column(&'static str),
    /// Key inside the `metadata` sub-block.
    Metadata(&'static str),
    /// Key inside the `extendedContentEBM` sub-block.
    Ebm(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextList,
    Bool,
    Integer,
    Number,
    Date,
    /// Number or string, always stored as a string.
    Version,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub doc_key: &'static str,
    pub store: StoreField,
    pub kind: FieldKind,
}

const fn field(doc_key: &'static str, store: StoreField, kind: FieldKind) -> FieldMapping {
    FieldMapping {
        doc_key,
        store,
        kind,
    }
}

use FieldKind::*;
use StoreField::*;

pub const FIELD_TABLE: &[FieldMapping] = &[
    field("title", Column("title"), Text),
    field("group", Column("groupCode"), Text),
    field("aliases", Column("synonyms"), TextList),
    field("icd10", Column("icd10Codes"), TextList),
    field("subtitle", Metadata("subtitle"), Text),
    field("risk", Metadata("riskLevel"), Text),
    field("severity", Metadata("severity"), Integer),
    field("age_targets", Metadata("ageTargets"), TextList),
    field("top_for_adult", Metadata("isTopForAdult"), Bool),
    field("top_for_child", Metadata("isTopForChild"), Bool),
    field("fast_track", Metadata("isFastTrack"), Bool),
    field("chips", Metadata("chips"), TextList),
    field("search_terms", Metadata("searchTerms"), TextList),
    field("body_system", Metadata("bodySystem"), TextList),
    field("related_symptoms", Metadata("relatedSymptoms"), TextList),
    field("common_misconceptions", Metadata("commonMisconceptions"), TextList),
    field("search_weight", Metadata("searchWeight"), Number),
    field("ebm_version", Ebm("ebmVersion"), Version),
    field("last_ebm_review", Ebm("lastEbmReview"), Date),
    field("evidence_quality", Ebm("evidenceQuality"), Text),
    field("uptodate_reviewed", Ebm("uptodateReviewed"), Bool),
    field("dynamed_reviewed", Ebm("dynamedReviewed"), Bool),
    field("sus_protocol_compatible", Ebm("susProtocolCompatible"), Bool),
    field("rename_medications_only", Ebm("renameMedicationsOnly"), Bool),
    field("brazilian_guidelines", Ebm("brazilianGuidelines"), TextList),
    field("brazilian_adaptations", Ebm("brazilianAdaptations"), TextList),
];

/// Look up the mapping for a document key.
pub fn mapping_for(doc_key: &str) -> Option<&'static FieldMapping> {
    FIELD_TABLE.iter().find(|m| m.doc_key == doc_key)
}

/// Coerce `value` to `kind`, or `None` when it cannot be read as one.
pub fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        Text => as_text(value).map(Value::String),
        TextList => as_text_list(value).map(|items| {
            Value::Array(items.into_iter().map(Value::String).collect())
        }),
        Bool => as_bool(value).map(Value::Bool),
        Integer => as_integer(value).map(Value::from),
        Number => as_number(value).map(Value::from),
        Date => value.as_str().and_then(normalize_date).map(Value::String),
        Version => match value {
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::String(s) if !s.trim().is_empty() => Some(Value::String(s.trim().to_string())),
            _ => None,
        },
    }
}

pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Arrays keep their scalar items, a bare scalar becomes a one-element list.
pub fn as_text_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(as_text)
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Value::Null | Value::Object(_) => None,
        scalar => as_text(scalar).map(|s| if s.is_empty() { Vec::new() } else { vec![s] }),
    }
}

pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Translate document metadata into a store patch. Keys outside the table
/// are not store fields and are left out.
pub fn to_store(metadata: &Map<String, Value>) -> Result<RecordPatch, StoreError> {
    let mut patch = RecordPatch::default();
    let mut meta = Map::new();
    let mut ebm = Map::new();

    for mapping in FIELD_TABLE {
        let Some(value) = metadata.get(mapping.doc_key).and_then(|v| coerce(mapping.kind, v)) else {
            continue;
        };
        match mapping.store {
            Column("title") => patch.title = as_text(&value),
            Column("groupCode") => patch.group_code = as_text(&value),
            Column("synonyms") => patch.synonyms = as_text_list(&value),
            Column("icd10Codes") => patch.icd10_codes = as_text_list(&value),
            Column(other) => {
                return Err(StoreError::Schema(format!("unmapped column: {}", other)));
            }
            Metadata(key) => {
                meta.insert(key.to_string(), value);
            }
            Ebm(key) => {
                ebm.insert(key.to_string(), value);
            }
        }
    }

    patch.additional_data = AdditionalData {
        version: SCHEMA_VERSION,
        metadata: block::<ComplaintMetadata>(meta)?,
        extended_content_ebm: block::<EbmContent>(ebm)?,
        ..AdditionalData::default()
    };
    Ok(patch)
}

fn block<T: serde::de::DeserializeOwned>(map: Map<String, Value>) -> Result<Option<T>, StoreError> {
    if map.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(Value::Object(map))?))
}

/// Translate a store record back into flat document metadata.
pub fn to_document(record: &StoreRecord) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("id".to_string(), Value::String(record.id.clone()));

    let meta = sub_block(&record.additional_data.metadata);
    let ebm = sub_block(&record.additional_data.extended_content_ebm);

    for mapping in FIELD_TABLE {
        let raw = match mapping.store {
            Column("title") => Some(Value::String(record.title.clone())),
            Column("groupCode") => Some(Value::String(record.group_code.clone())),
            Column("synonyms") => Some(string_array(&record.synonyms)),
            Column("icd10Codes") => Some(string_array(&record.icd10_codes)),
            Column(_) => None,
            Metadata(key) => meta.get(key).cloned(),
            Ebm(key) => ebm.get(key).cloned(),
        };
        if let Some(value) = raw.and_then(|v| coerce(mapping.kind, &v)) {
            out.insert(mapping.doc_key.to_string(), value);
        }
    }
    out
}

fn sub_block<T: serde::Serialize>(block: &Option<T>) -> Map<String, Value> {
    match block.as_ref().map(serde_json::to_value) {
        Some(Ok(Value::Object(map))) => map,
        _ => Map::new(),
    }
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn representative(kind: FieldKind) -> Value {
        match kind {
            Text => json!("valor"),
            TextList => json!(["a", "b"]),
            Bool => json!(true),
            Integer => json!(3),
            Number => json!(1.5),
            Date => json!("2024-03-01T00:00:00.000Z"),
            Version => json!("2.0"),
        }
    }

    #[test]
    fn test_every_table_field_round_trips() {
        for mapping in FIELD_TABLE {
            let value = representative(mapping.kind);
            let mut metadata = Map::new();
            metadata.insert(mapping.doc_key.to_string(), value.clone());

            let patch = to_store(&metadata).unwrap();
            let mut record = StoreRecord::new("X1", "", "");
            record.apply(&patch, chrono::Utc::now());

            let back = to_document(&record);
            assert_eq!(back.get(mapping.doc_key), Some(&value), "field {}", mapping.doc_key);
        }
    }

    #[test]
    fn test_bool_coercion_is_total() {
        assert_eq!(as_bool(&json!("TRUE")), Some(true));
        assert_eq!(as_bool(&json!(" false ")), Some(false));
        assert_eq!(as_bool(&json!("yes")), None);
        assert_eq!(as_bool(&json!(1)), None);
    }

    #[test]
    fn test_scalar_becomes_single_item_list() {
        assert_eq!(as_text_list(&json!("I20.0")), Some(vec!["I20.0".to_string()]));
        assert_eq!(as_text_list(&json!([1, "x", null])), Some(vec!["1".into(), "x".into()]));
        assert_eq!(as_text_list(&json!({"a": 1})), None);
    }

    #[test]
    fn test_dates_normalize_to_iso() {
        assert_eq!(
            coerce(Date, &json!("2024-03-01")),
            Some(json!("2024-03-01T00:00:00.000Z"))
        );
        assert_eq!(coerce(Date, &json!("someday")), None);
    }

    #[test]
    fn test_numeric_version_becomes_string() {
        assert_eq!(coerce(Version, &json!(2.0)), Some(json!("2.0")));
        assert_eq!(coerce(Version, &json!(2)), Some(json!("2")));
    }

    #[test]
    fn test_unrecognized_values_are_absent() {
        let metadata = json!({
            "top_for_adult": "maybe",
            "severity": "high",
            "risk": "high",
            "custom_note": "kept out of the store"
        });
        let patch = to_store(metadata.as_object().unwrap()).unwrap();
        let meta = patch.additional_data.metadata.unwrap();
        assert_eq!(meta.is_top_for_adult, None);
        assert_eq!(meta.severity, None);
        assert_eq!(meta.risk_level.as_deref(), Some("high"));
        assert!(patch.additional_data.extended_content_ebm.is_none());
    }

    #[test]
    fn test_columns_map_to_record_fields() {
        let metadata = json!({"title": "Dor torácica", "group": "CV", "aliases": "angina", "icd10": ["I20"]});
        let patch = to_store(metadata.as_object().unwrap()).unwrap();
        assert_eq!(patch.title.as_deref(), Some("Dor torácica"));
        assert_eq!(patch.group_code.as_deref(), Some("CV"));
        assert_eq!(patch.synonyms, Some(vec!["angina".to_string()]));
        assert_eq!(patch.icd10_codes, Some(vec!["I20".to_string()]));
    }
}
