//! Post-processing for the competitor discovery stage.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Competitors kept in the `items` list.
pub const MAX_COMPETITOR_ITEMS: usize = 8;

/// Names kept in the `candidates` list.
pub const MAX_COMPETITOR_CANDIDATES: usize = 15;

const MAX_NOTE_CHARS: usize = 50;

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("json fence regex is valid")
});

fn extract_json(raw: &str) -> Option<&str> {
    if let Some(caps) = JSON_FENCE_RE.captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }
    let first = raw.find('{')?;
    let last = raw.rfind('}')?;
    (first < last).then(|| &raw[first..=last])
}

fn cap_list(data: &mut Value, key: &str, max: usize) -> bool {
    match data.get_mut(key).and_then(Value::as_array_mut) {
        Some(list) if list.len() > max => {
            list.truncate(max);
            true
        }
        _ => false,
    }
}

/// Cap the competitor lists in a discovery result.
///
/// Looks for a fenced ```json block, falling back to the outermost `{...}`.
/// `items` is cut to [`MAX_COMPETITOR_ITEMS`], `candidates` to
/// [`MAX_COMPETITOR_CANDIDATES`], and long `notes` are shortened. Returns
/// the rewritten text and whether any list was cut. Unparsable output is
/// returned unchanged.
pub fn compact_competitors_output(raw: &str) -> (String, bool) {
    let Some(json) = extract_json(raw) else {
        return (raw.to_string(), false);
    };
    let Ok(mut data) = serde_json::from_str::<Value>(json) else {
        return (raw.to_string(), false);
    };
    if !data.is_object() {
        return (raw.to_string(), false);
    }

    let items_cut = cap_list(&mut data, "items", MAX_COMPETITOR_ITEMS);
    let candidates_cut = cap_list(&mut data, "candidates", MAX_COMPETITOR_CANDIDATES);

    if let Some(items) = data.get_mut("items").and_then(Value::as_array_mut) {
        for item in items.iter_mut() {
            let Some(notes) = item.get_mut("notes") else {
                continue;
            };
            let shortened = match notes.as_str() {
                Some(text) if text.chars().count() > MAX_NOTE_CHARS => {
                    let short: String = text.chars().take(MAX_NOTE_CHARS).collect();
                    format!("{}...", short)
                }
                _ => continue,
            };
            *notes = Value::String(shortened);
        }
    }

    let pretty = match serde_json::to_string_pretty(&data) {
        Ok(s) => s,
        Err(_) => return (raw.to_string(), false),
    };
    (format!("```json\n{}\n```", pretty), items_cut || candidates_cut)
}
