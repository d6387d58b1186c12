//! URL template resolution.
//!
//! A template carries at most one `${c}` placeholder where `c` is a single
//! separator character:
//!
//! - `,` deduplicates the parameters (first occurrence wins) and joins them
//! - `.` renders the parameters as one scalar
//! - anything else resolves to an empty string
//!
//! The resolved value is percent-encoded like a URI component.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use serde_json::Value;

lazy_static::lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\{([^}])\}").expect("placeholder pattern is valid");
}

/// Everything except the characters a URI component leaves unescaped
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Resolve the first placeholder in `template` against `params`.
///
/// Returns the resolved URL and whether it differs from the template.
pub fn resolve(template: &str, params: &[Value]) -> (String, bool) {
    let resolved = PLACEHOLDER.replace(template, |caps: &Captures| {
        let separator = caps[1].chars().next().unwrap_or_default();
        encode_component(&placeholder_value(separator, params))
    });
    let changed = resolved != template;
    (resolved.into_owned(), changed)
}

/// Whether the template contains a placeholder at all
pub fn has_placeholder(template: &str) -> bool {
    PLACEHOLDER.is_match(template)
}

fn placeholder_value(separator: char, params: &[Value]) -> String {
    match separator {
        ',' => {
            let mut unique: Vec<&Value> = Vec::with_capacity(params.len());
            for param in params {
                if !unique.iter().any(|seen| same_value(seen, param)) {
                    unique.push(param);
                }
            }
            unique
                .into_iter()
                .map(scalar_text)
                .collect::<Vec<_>>()
                .join(",")
        }
        '.' => params.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        _ => String::new(),
    }
}

// Numbers compare by value, so `1` and `1.0` are one parameter
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Text form of an extracted value as it appears in a URL
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}
