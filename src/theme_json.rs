//! Theme configuration JSON: validation and canonical formatting.
//!
//! A theme configuration document describes the settings a CMS exposes for
//! a theme. It is either an empty object, or an object with a `groups` or
//! `sections` array. Every item of those arrays (and of nested `fields`,
//! `groups` and `sections` arrays) is an object with a `name`.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::Path;

use crate::error::PipelineError;

/// Keys holding nested item arrays
const NESTED_KEYS: &[&str] = &["groups", "sections", "fields"];

/// Keys that must exist at the top level of a non-empty document (one of)
const TOP_LEVEL_KEYS: &[&str] = &["groups", "sections"];

/// Arrays sorted by item name when formatting
const SORTED_KEYS: &[&str] = &["groups", "sections"];

/// Keys moved to the front of every object, in this order
const LEADING_KEYS: &[&str] = &["name", "label", "type", "description"];

/// Validate a parsed document, returning every problem found
pub fn validate(doc: &Value) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    match doc {
        Value::Object(map) if map.is_empty() => {}
        Value::Object(map) => {
            if !TOP_LEVEL_KEYS.iter().any(|k| map.contains_key(*k)) {
                problems.push("/: expected \"groups\" or \"sections\"".to_string());
            }
            validate_nested(map, "", &mut problems);
        }
        _ => problems.push("/: document must be an object".to_string()),
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn validate_nested(map: &Map<String, Value>, pointer: &str, problems: &mut Vec<String>) {
    for key in NESTED_KEYS {
        let Some(value) = map.get(*key) else {
            continue;
        };
        let location = format!("{pointer}/{key}");
        let Value::Array(items) = value else {
            problems.push(format!("{location}: must be an array"));
            continue;
        };
        for (idx, item) in items.iter().enumerate() {
            validate_item(item, &format!("{location}/{idx}"), problems);
        }
    }
}

fn validate_item(item: &Value, pointer: &str, problems: &mut Vec<String>) {
    let Value::Object(map) = item else {
        problems.push(format!("{pointer}: must be an object"));
        return;
    };
    match map.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(_) => problems.push(format!("{pointer}/name: must be a non-empty string")),
        None => problems.push(format!("{pointer}: missing \"name\"")),
    }
    validate_nested(map, pointer, problems);
}

/// Canonicalize a document: leading keys first, groups and sections sorted
/// by name. Applying it twice gives the same result as once.
pub fn format(doc: &Value) -> Value {
    match doc {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for key in LEADING_KEYS {
                if let Some(v) = map.get(*key) {
                    out.insert((*key).to_string(), format(v));
                }
            }
            for (key, value) in map {
                if LEADING_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let mut value = format(value);
                if SORTED_KEYS.contains(&key.as_str()) {
                    if let Value::Array(items) = &mut value {
                        items.sort_by(|a, b| compare_names(item_name(a), item_name(b)));
                    }
                }
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(format).collect()),
        other => other.clone(),
    }
}

fn item_name(item: &Value) -> &str {
    item.get("name").and_then(Value::as_str).unwrap_or("")
}

/// Alphabetical ignoring case; names differing only in case keep a fixed
/// order (uppercase first)
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Pretty-print with two-space indentation and a trailing newline
pub fn to_pretty(doc: &Value) -> String {
    let mut text = serde_json::to_string_pretty(doc).unwrap_or_else(|_| doc.to_string());
    text.push('\n');
    text
}

/// Parse, validate and format one theme configuration file
pub fn process(path: &Path, content: &[u8]) -> Result<String, PipelineError> {
    let doc: Value = serde_json::from_slice(content).map_err(|e| {
        PipelineError::InvalidThemeJson {
            path: path.to_path_buf(),
            problems: vec![format!("parse error at line {}: {}", e.line(), e)],
        }
    })?;

    validate(&doc).map_err(|problems| PipelineError::InvalidThemeJson {
        path: path.to_path_buf(),
        problems,
    })?;

    Ok(to_pretty(&format(&doc)))
}
