//! Canonical content hashing.
//!
//! The fingerprint covers a document's metadata (minus sync bookkeeping) and
//! its body. Metadata is canonicalized first: object keys sorted, `null`s
//! dropped, whole-number floats written as integers and date-like strings
//! normalized to one ISO-8601 form. Two documents that differ only in key
//! order, YAML formatting or bookkeeping fields therefore hash identically.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Tag prefixed to every digest.
pub const HASH_ALGORITHM: &str = "sha256";

/// Metadata keys that never take part in the hash.
pub const BOOKKEEPING_KEYS: &[&str] = &[
    "last_sync",
    "content_hash",
    "sync_source",
    "lastSync",
    "contentHash",
    "syncSource",
    "lastSyncedAt",
    "last_synced_at",
];

/// An algorithm-tagged digest, e.g. `sha256:9f86d0…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        ContentHash(format!("{}:{}", HASH_ALGORITHM, hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (algorithm, digest) = s.trim().split_once(':')?;
        let well_formed = algorithm == HASH_ALGORITHM
            && digest.len() == 64
            && digest.chars().all(|c| c.is_ascii_hexdigit());
        well_formed.then(|| ContentHash(format!("{}:{}", algorithm, digest.to_ascii_lowercase())))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentHash::parse(&value).ok_or_else(|| format!("malformed content hash: {}", value))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Hash a metadata map and body.
pub fn content_hash(metadata: &Map<String, Value>, body: &str) -> ContentHash {
    let mut input = String::new();
    write_canonical_object(metadata, true, &mut input);
    input.push('\n');
    input.push_str(body);
    ContentHash::of_bytes(input.as_bytes())
}

/// The canonical serialization of a metadata map, bookkeeping keys removed.
pub fn canonical_metadata(metadata: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_canonical_object(metadata, true, &mut out);
    out
}

fn write_canonical_object(map: &Map<String, Value>, top_level: bool, out: &mut String) {
    let mut keys: Vec<&String> = map
        .iter()
        .filter(|(k, v)| !v.is_null() && !(top_level && BOOKKEEPING_KEYS.contains(&k.as_str())))
        .map(|(k, _)| k)
        .collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_canonical(&map[key.as_str()], out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                out.push_str(&(f as i64).to_string())
            }
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => match normalize_date(s) {
            Some(date) => write_string(&date, out),
            None => write_string(s, out),
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_object(map, false, out),
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json escaping of a plain string cannot fail
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// Normalize a date or timestamp string to RFC 3339 UTC with millisecond
/// precision. Bare dates are read as midnight UTC. Anything else is `None`.
pub fn normalize_date(s: &str) -> Option<String> {
    parse_date(s).map(format_date)
}

pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    // cheap pre-check so ordinary text never reaches the parsers
    let bytes = s.as_bytes();
    if bytes.len() < 10
        || !bytes[..4].iter().all(u8::is_ascii_digit)
        || bytes[4] != b'-'
        || bytes[7] != b'-'
    {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if s.len() == 10 {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

pub fn format_date(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
