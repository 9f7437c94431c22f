//! Canonical JSON snapshots.
//!
//! Values are serialized as pretty JSON with object keys sorted, so two
//! snapshots of equal state compare equal as strings regardless of map
//! iteration order. A mismatch is reported with the first differing line.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

/// Serialize `value` as canonical (key-sorted, pretty) JSON.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("Failed to serialize snapshot value")?;
    let value = canonicalize_value(value);
    let mut s = serde_json::to_string_pretty(&value).context("Failed to format snapshot JSON")?;
    s.push('\n');
    Ok(s)
}

/// Fail if `expected` and `actual` differ once canonicalized.
pub fn assert_json_eq<A: Serialize, B: Serialize>(expected: &A, actual: &B) -> Result<()> {
    let expected = canonical_json(expected)?;
    let actual = canonical_json(actual)?;
    if let Some(line) = first_difference(&expected, &actual) {
        anyhow::bail!("Snapshot mismatch at line {}:\n  expected: {}\n  actual:   {}", line.0, line.1, line.2);
    }
    Ok(())
}

fn first_difference<'a>(expected: &'a str, actual: &'a str) -> Option<(usize, &'a str, &'a str)> {
    let mut left = expected.lines();
    let mut right = actual.lines();
    let mut index = 1;
    loop {
        match (left.next(), right.next()) {
            (None, None) => return None,
            (l, r) if l == r => index += 1,
            (l, r) => return Some((index, l.unwrap_or("<end>"), r.unwrap_or("<end>"))),
        }
    }
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k, canonicalize_value(v));
            }
            Value::Object(out)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize_value).collect()),
        other => other,
    }
}
