//! Path expressions binding action inputs to run state.
//!
//! An input whose value is a string starting with `$` is resolved against
//! run state at dispatch time: the root names a state entry (`$current`,
//! `$trigger`, or an action id), followed by dotted or bracketed segments
//! into the value. This is a safe path resolver, not a script evaluator;
//! expressions resolve data, never code.
//!
//! Segment syntax tolerates non-ASCII and punctuation-bearing keys:
//! bare segments run to the next `.` or `[`, and anything else can be
//! bracket-quoted (`$fetch["user.name"]`, `$fetch["城市"]`). Paths built
//! programmatically from arbitrary keys go through [`quote_segment`],
//! which bracket-quotes automatically when needed.
//!
//! A literal leading `$` in a static string input is written `\$`.

use crate::{NodeError, RunState, CURRENT_KEY, TRIGGER_KEY};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("empty path expression")]
    Empty,

    #[error("unexpected character '{ch}' at offset {at}")]
    UnexpectedChar { at: usize, ch: char },

    #[error("unterminated quoted segment")]
    UnterminatedString,

    #[error("invalid array index '{0}'")]
    BadIndex(String),

    #[error("no value at '{0}'")]
    Missing(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Whether a value is a path expression rather than a static input.
pub fn is_path_expr(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if s.starts_with('$') && s.len() > 1 => Some(s),
        _ => None,
    }
}

/// Parse an expression, returning the state root key and path segments.
fn parse(expr: &str) -> Result<(String, Vec<Segment>), PathError> {
    let rest = expr.strip_prefix('$').ok_or(PathError::Empty)?;
    if rest.is_empty() {
        return Err(PathError::Empty);
    }

    let chars: Vec<char> = rest.chars().collect();
    let mut pos = 0;

    let root = read_bare(&chars, &mut pos);
    if root.is_empty() {
        return Err(PathError::UnexpectedChar {
            at: 1,
            ch: chars[0],
        });
    }

    let mut segments = Vec::new();
    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                let key = read_bare(&chars, &mut pos);
                if key.is_empty() {
                    return Err(PathError::UnexpectedChar {
                        at: pos,
                        ch: *chars.get(pos).unwrap_or(&'.'),
                    });
                }
                segments.push(Segment::Key(key));
            }
            '[' => {
                pos += 1;
                segments.push(read_bracket(&chars, &mut pos)?);
            }
            ch => return Err(PathError::UnexpectedChar { at: pos, ch }),
        }
    }

    // Symbolic roots map onto their reserved state keys.
    let root = match root.as_str() {
        "current" => CURRENT_KEY.to_string(),
        "trigger" => TRIGGER_KEY.to_string(),
        other => other.to_string(),
    };

    Ok((root, segments))
}

/// A bare segment runs to the next `.` or `[`; any other character,
/// including non-ASCII and punctuation, is part of the key.
fn read_bare(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && chars[*pos] != '.' && chars[*pos] != '[' && chars[*pos] != ']' {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn read_bracket(chars: &[char], pos: &mut usize) -> Result<Segment, PathError> {
    if *pos >= chars.len() {
        return Err(PathError::UnterminatedString);
    }

    if chars[*pos] == '"' {
        // Quoted key: `["..."]` with `\"` and `\\` escapes.
        *pos += 1;
        let mut key = String::new();
        loop {
            match chars.get(*pos) {
                None => return Err(PathError::UnterminatedString),
                Some('\\') => {
                    *pos += 1;
                    match chars.get(*pos) {
                        Some(&ch) => {
                            key.push(ch);
                            *pos += 1;
                        }
                        None => return Err(PathError::UnterminatedString),
                    }
                }
                Some('"') => {
                    *pos += 1;
                    break;
                }
                Some(&ch) => {
                    key.push(ch);
                    *pos += 1;
                }
            }
        }
        match chars.get(*pos) {
            Some(']') => {
                *pos += 1;
                Ok(Segment::Key(key))
            }
            Some(&ch) => Err(PathError::UnexpectedChar { at: *pos, ch }),
            None => Err(PathError::UnterminatedString),
        }
    } else {
        // Numeric index: `[3]`.
        let start = *pos;
        while *pos < chars.len() && chars[*pos] != ']' {
            *pos += 1;
        }
        if *pos >= chars.len() {
            return Err(PathError::UnterminatedString);
        }
        let raw: String = chars[start..*pos].iter().collect();
        *pos += 1;
        raw.trim()
            .parse::<usize>()
            .map(Segment::Index)
            .map_err(|_| PathError::BadIndex(raw))
    }
}

/// Check that an expression parses, without resolving it. Used by the
/// engine to reject malformed bindings at load time.
pub fn validate_path(expr: &str) -> Result<(), PathError> {
    parse(expr).map(|_| ())
}

/// Quote a key for embedding in a path: bare when it is a simple
/// identifier, bracket-quoted otherwise (non-ASCII, punctuation, spaces).
pub fn quote_segment(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
        format!("[\"{escaped}\"]")
    }
}

/// Build an expression from a root and arbitrary key segments, quoting
/// each segment as needed.
pub fn join_path(root: &str, keys: &[&str]) -> String {
    let mut out = format!("${root}");
    for key in keys {
        let quoted = quote_segment(key);
        if quoted.starts_with('[') {
            out.push_str(&quoted);
        } else {
            out.push('.');
            out.push_str(&quoted);
        }
    }
    out
}

/// Resolve a path expression against run state.
pub fn resolve_path(state: &RunState, expr: &str) -> Result<Value, PathError> {
    let (root, segments) = parse(expr)?;
    let mut value = state
        .get(&root)
        .ok_or_else(|| PathError::Missing(root.clone()))?;

    let mut walked = root;
    for segment in &segments {
        match segment {
            Segment::Key(key) => {
                walked.push('.');
                walked.push_str(key);
                value = value
                    .get(key.as_str())
                    .ok_or_else(|| PathError::Missing(walked.clone()))?;
            }
            Segment::Index(i) => {
                walked.push_str(&format!("[{i}]"));
                value = value
                    .get(*i)
                    .ok_or_else(|| PathError::Missing(walked.clone()))?;
            }
        }
    }
    Ok(value.clone())
}

/// Resolve an action's input map: path expressions are looked up in run
/// state, static values pass through, containers resolve recursively.
pub fn resolve_inputs(
    inputs: &HashMap<String, Value>,
    state: &RunState,
) -> Result<HashMap<String, Value>, NodeError> {
    inputs
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, state)?)))
        .collect()
}

fn resolve_value(value: &Value, state: &RunState) -> Result<Value, NodeError> {
    match value {
        Value::String(s) if s.starts_with("\\$") => Ok(Value::String(s[1..].to_string())),
        _ => {
            if let Some(expr) = is_path_expr(value) {
                resolve_path(state, expr)
                    .map_err(|e| NodeError::ExecutionFailed(format!("input binding: {e}")))
            } else {
                match value {
                    Value::Array(items) => items
                        .iter()
                        .map(|v| resolve_value(v, state))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    Value::Object(map) => map
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), resolve_value(v, state)?)))
                        .collect::<Result<serde_json::Map<_, _>, NodeError>>()
                        .map(Value::Object),
                    other => Ok(other.clone()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> RunState {
        let mut s = RunState::new();
        s.set_trigger(json!({"body": {"user": {"name": "ada"}}}));
        s.set_output(
            "fetch",
            json!({
                "items": [1, 2, 3],
                "user.name": "dotted",
                "城市": "上海",
                "nested": {"a b": {"c": 42}}
            }),
        );
        s
    }

    #[test]
    fn resolves_dotted_path() {
        let v = resolve_path(&state(), "$trigger.body.user.name").unwrap();
        assert_eq!(v, json!("ada"));
    }

    #[test]
    fn resolves_current_alias() {
        // set_output advanced $current to the fetch output
        let v = resolve_path(&state(), "$current.items[1]").unwrap();
        assert_eq!(v, json!(2));
    }

    #[test]
    fn resolves_array_index() {
        let v = resolve_path(&state(), "$fetch.items[2]").unwrap();
        assert_eq!(v, json!(3));
    }

    #[test]
    fn bare_segments_tolerate_non_ascii() {
        let v = resolve_path(&state(), "$fetch.城市").unwrap();
        assert_eq!(v, json!("上海"));
    }

    #[test]
    fn quoted_segments_tolerate_punctuation() {
        let v = resolve_path(&state(), "$fetch[\"user.name\"]").unwrap();
        assert_eq!(v, json!("dotted"));
        let v = resolve_path(&state(), "$fetch.nested[\"a b\"].c").unwrap();
        assert_eq!(v, json!(42));
    }

    #[test]
    fn join_path_quotes_awkward_keys() {
        let expr = join_path("fetch", &["user.name"]);
        assert_eq!(expr, "$fetch[\"user.name\"]");
        assert_eq!(resolve_path(&state(), &expr).unwrap(), json!("dotted"));

        let expr = join_path("fetch", &["nested", "a b", "c"]);
        assert_eq!(resolve_path(&state(), &expr).unwrap(), json!(42));
    }

    #[test]
    fn quote_segment_passes_simple_keys() {
        assert_eq!(quote_segment("items"), "items");
        assert_eq!(quote_segment("user-id_2"), "user-id_2");
        assert_eq!(quote_segment("城市"), "[\"城市\"]");
        assert_eq!(quote_segment("a\"b"), "[\"a\\\"b\"]");
    }

    #[test]
    fn missing_path_reports_walked_prefix() {
        let err = resolve_path(&state(), "$fetch.items[9]").unwrap_err();
        assert_eq!(err, PathError::Missing("fetch.items[9]".to_string()));
    }

    #[test]
    fn malformed_expressions_rejected() {
        assert!(validate_path("$").is_err());
        assert!(validate_path("$fetch.items[").is_err());
        assert!(validate_path("$fetch[\"open").is_err());
        assert!(validate_path("$fetch.items[x]").is_err());
        assert!(validate_path("$fetch..a").is_err());
    }

    #[test]
    fn resolve_inputs_mixes_static_and_bound() {
        let mut inputs = HashMap::new();
        inputs.insert("who".to_string(), json!("$trigger.body.user.name"));
        inputs.insert("n".to_string(), json!(7));
        inputs.insert("list".to_string(), json!(["$fetch.items[0]", "x"]));
        inputs.insert("literal".to_string(), json!("\\$not.a.path"));

        let resolved = resolve_inputs(&inputs, &state()).unwrap();
        assert_eq!(resolved["who"], json!("ada"));
        assert_eq!(resolved["n"], json!(7));
        assert_eq!(resolved["list"], json!([1, "x"]));
        assert_eq!(resolved["literal"], json!("$not.a.path"));
    }

    #[test]
    fn unresolved_binding_is_a_node_error() {
        let mut inputs = HashMap::new();
        inputs.insert("v".to_string(), json!("$nope.x"));
        assert!(resolve_inputs(&inputs, &state()).is_err());
    }
}
