//! Merge rules for category sections.

use crate::scheduler::ResultMerger;
use serde_json::{json, Map, Value};

const SUMMARY_KEY: &str = "summary";

/// Deep-merges chunk payloads of the same category.
///
/// Objects merge key by key, arrays become de-duplicated unions, and the
/// first non-empty scalar wins. Summaries are the exception: distinct
/// summaries are appended as separate paragraphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryMerger;

impl ResultMerger for CategoryMerger {
    fn merge(&self, section: &mut Value, payload: Value) {
        merge_value(section, payload);
    }

    fn fallback(&self, category: &str) -> Value {
        json!({
            "summary": format!(
                "Part of the {} files could not be analyzed; this section is incomplete.",
                category
            ),
            "incomplete": true,
        })
    }
}

pub fn merge_value(target: &mut Value, incoming: Value) {
    if target.is_null() {
        match incoming {
            Value::Object(_) => *target = Value::Object(Map::new()),
            Value::Array(_) => *target = Value::Array(Vec::new()),
            other => {
                *target = other;
                return;
            }
        }
    }

    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let slot = existing.entry(key.clone()).or_insert(Value::Null);
                if key == SUMMARY_KEY {
                    merge_summary(slot, value);
                } else {
                    merge_value(slot, value);
                }
            }
        }
        (Value::Array(existing), Value::Array(incoming)) => push_unique(existing, incoming),
        (Value::Array(existing), value) if !value.is_null() => push_unique(existing, vec![value]),
        (Value::String(existing), Value::String(value)) if existing.trim().is_empty() => {
            *existing = value;
        }
        _ => {}
    }
}

fn push_unique(existing: &mut Vec<Value>, incoming: Vec<Value>) {
    for value in incoming {
        if !existing.contains(&value) {
            existing.push(value);
        }
    }
}

fn merge_summary(existing: &mut Value, incoming: Value) {
    let Some(text) = incoming.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
        return;
    };

    match existing {
        Value::String(current) if !current.trim().is_empty() => {
            if !current.contains(text) {
                current.push_str("\n\n");
                current.push_str(text);
            }
        }
        _ => *existing = Value::String(text.to_string()),
    }
}
