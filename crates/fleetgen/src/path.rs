//! Deep path accessor.
//!
//! Resolves a dot-separated path like `State.Running` or
//! `Labels.com.example.role` against a [`serde_json::Value`]. Container
//! records are serialized into `Value` before lookup, so one accessor serves
//! records, mappings and sequences alike.
//!
//! Any unresolvable step yields `None` ("no value"), never an error; the
//! template filters treat it as exclude/empty.

use serde_json::Value;

/// Resolves `path` against `value`.
///
/// Leading dots are stripped, so `...ID` equals `ID`. An empty path returns
/// the input unchanged. Object components fall back to rejoining consecutive
/// path parts, which tolerates keys containing literal dots (label names).
/// Sequence components must parse as non-negative in-bounds indices.
pub fn deep_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim_start_matches('.');
    if path.is_empty() {
        return Some(value);
    }
    let parts: Vec<&str> = path.split('.').collect();
    deep_get_parts(value, &parts)
}

fn deep_get_parts<'a>(value: &'a Value, parts: &[&str]) -> Option<&'a Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value);
    };

    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                return deep_get_parts(next, rest);
            }
            // The component alone is not a key; try progressively longer
            // joined prefixes so dotted keys remain addressable.
            for split in 2..=parts.len() {
                let joined = parts[..split].join(".");
                if let Some(next) = map.get(&joined) {
                    return deep_get_parts(next, &parts[split..]);
                }
            }
            None
        }
        Value::Array(items) => {
            let index: usize = head.parse().ok()?;
            let item = items.get(index)?;
            deep_get_parts(item, rest)
        }
        _ => None,
    }
}
