//! Response schemas for structured answers.
//!
//! A caller describes the JSON it wants back either with (a subset of) JSON
//! Schema or with a shorthand where an object maps field names to type
//! names:
//!
//! ```json
//! {"answer": "string", "confidence": "number", "sources": ["string"]}
//! ```
//!
//! Both forms parse into a [`SchemaNode`] tree. Model output is then coerced
//! into JSON (code fences and surrounding prose are stripped) and validated
//! against the tree.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use docqa_core::error::{DocqaError, Result};

// =============================================================================
// Schema tree
// =============================================================================

/// One node of a parsed response schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Object {
        properties: BTreeMap<String, SchemaNode>,
        required: BTreeSet<String>,
    },
    Array {
        items: Box<SchemaNode>,
    },
    String {
        /// Permitted values when the schema declares an `enum`.
        allowed: Option<Vec<String>>,
    },
    Number,
    Integer,
    Boolean,
    Null,
    Any,
    Union(Vec<SchemaNode>),
}

/// A single way in which a value failed to match its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Location of the offending value, e.g. `$.sources[1]`.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

const SCHEMA_KEYWORDS: &[&str] = &[
    "$schema",
    "type",
    "properties",
    "items",
    "anyOf",
    "oneOf",
    "enum",
];

impl SchemaNode {
    /// Parse a schema in JSON Schema or shorthand form.
    pub fn parse(schema: &Value) -> Result<Self> {
        match schema {
            Value::String(name) => Self::from_type_name(name),
            Value::Array(items) => match items.as_slice() {
                [item] => Ok(SchemaNode::Array {
                    items: Box::new(Self::parse(item)?),
                }),
                _ => Err(DocqaError::InvalidInput(
                    "array shorthand must hold exactly one item schema".to_string(),
                )),
            },
            Value::Object(map) if map.is_empty() => Ok(SchemaNode::Any),
            Value::Object(map) if is_json_schema(map) => Self::from_json_schema(map),
            Value::Object(map) => {
                let mut properties = BTreeMap::new();
                for (field, field_schema) in map {
                    properties.insert(field.clone(), Self::parse(field_schema)?);
                }
                let required = properties.keys().cloned().collect();
                Ok(SchemaNode::Object {
                    properties,
                    required,
                })
            }
            other => Err(DocqaError::InvalidInput(format!(
                "unsupported schema value: {}",
                other
            ))),
        }
    }

    fn from_type_name(name: &str) -> Result<Self> {
        let node = match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => SchemaNode::String { allowed: None },
            "number" | "float" => SchemaNode::Number,
            "integer" | "int" => SchemaNode::Integer,
            "boolean" | "bool" => SchemaNode::Boolean,
            "null" => SchemaNode::Null,
            "array" | "list" => SchemaNode::Array {
                items: Box::new(SchemaNode::Any),
            },
            "object" => SchemaNode::Object {
                properties: BTreeMap::new(),
                required: BTreeSet::new(),
            },
            "any" => SchemaNode::Any,
            other => {
                return Err(DocqaError::InvalidInput(format!(
                    "unknown schema type '{}'",
                    other
                )))
            }
        };
        Ok(node)
    }

    fn from_json_schema(map: &Map<String, Value>) -> Result<Self> {
        if let Some(variants) = map.get("anyOf").or_else(|| map.get("oneOf")) {
            let variants = variants.as_array().ok_or_else(|| {
                DocqaError::InvalidInput("anyOf/oneOf must be an array".to_string())
            })?;
            return variants
                .iter()
                .map(Self::parse)
                .collect::<Result<Vec<_>>>()
                .map(SchemaNode::Union);
        }

        if let Some(values) = map.get("enum") {
            let allowed = values
                .as_array()
                .and_then(|values| {
                    values
                        .iter()
                        .map(|v| v.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                })
                .ok_or_else(|| {
                    DocqaError::InvalidInput("enum must be an array of strings".to_string())
                })?;
            return Ok(SchemaNode::String {
                allowed: Some(allowed),
            });
        }

        match map.get("type") {
            Some(Value::String(name)) => match name.as_str() {
                "object" => Self::object_from_json_schema(map),
                "array" => Self::array_from_json_schema(map),
                other => Self::from_type_name(other),
            },
            Some(Value::Array(names)) => {
                let variants = names
                    .iter()
                    .map(|name| {
                        let mut single = map.clone();
                        single.insert("type".to_string(), name.clone());
                        Self::from_json_schema(&single)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(SchemaNode::Union(variants))
            }
            Some(other) => Err(DocqaError::InvalidInput(format!(
                "schema 'type' must be a string or array, got {}",
                other
            ))),
            None if map.contains_key("properties") => Self::object_from_json_schema(map),
            None if map.contains_key("items") => Self::array_from_json_schema(map),
            None => Ok(SchemaNode::Any),
        }
    }

    fn object_from_json_schema(map: &Map<String, Value>) -> Result<Self> {
        let mut properties = BTreeMap::new();
        if let Some(props) = map.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                DocqaError::InvalidInput("'properties' must be an object".to_string())
            })?;
            for (field, field_schema) in props {
                properties.insert(field.clone(), Self::parse(field_schema)?);
            }
        }

        let mut required = BTreeSet::new();
        if let Some(names) = map.get("required") {
            let names = names.as_array().ok_or_else(|| {
                DocqaError::InvalidInput("'required' must be an array".to_string())
            })?;
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    DocqaError::InvalidInput("'required' entries must be strings".to_string())
                })?;
                required.insert(name.to_string());
            }
        }

        Ok(SchemaNode::Object {
            properties,
            required,
        })
    }

    fn array_from_json_schema(map: &Map<String, Value>) -> Result<Self> {
        let items = match map.get("items") {
            Some(items) => Self::parse(items)?,
            None => SchemaNode::Any,
        };
        Ok(SchemaNode::Array {
            items: Box::new(items),
        })
    }

    /// Check `value` against this schema. An empty list means it conforms.
    pub fn validate(&self, value: &Value) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();
        self.check(value, "$", &mut issues);
        issues
    }

    fn check(&self, value: &Value, path: &str, issues: &mut Vec<SchemaIssue>) {
        let issue = |message: String| SchemaIssue {
            path: path.to_string(),
            message,
        };

        match (self, value) {
            (SchemaNode::Any, _) => {}
            (SchemaNode::Null, Value::Null) => {}
            (SchemaNode::Boolean, Value::Bool(_)) => {}
            (SchemaNode::Number, Value::Number(_)) => {}
            (SchemaNode::Integer, Value::Number(n)) => {
                let whole =
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0);
                if !whole {
                    issues.push(issue(format!("expected integer, got {}", n)));
                }
            }
            (SchemaNode::String { allowed }, Value::String(s)) => {
                if let Some(allowed) = allowed {
                    if !allowed.iter().any(|a| a == s) {
                        issues.push(issue(format!("'{}' is not one of {:?}", s, allowed)));
                    }
                }
            }
            (SchemaNode::Array { items }, Value::Array(values)) => {
                for (i, item) in values.iter().enumerate() {
                    items.check(item, &format!("{}[{}]", path, i), issues);
                }
            }
            (
                SchemaNode::Object {
                    properties,
                    required,
                },
                Value::Object(fields),
            ) => {
                for name in required {
                    if !fields.contains_key(name) {
                        issues.push(issue(format!("missing required field '{}'", name)));
                    }
                }
                for (name, field_schema) in properties {
                    if let Some(field) = fields.get(name) {
                        field_schema.check(field, &format!("{}.{}", path, name), issues);
                    }
                }
            }
            (SchemaNode::Union(variants), _) => {
                if !variants.iter().any(|v| v.validate(value).is_empty()) {
                    let expected: Vec<&str> = variants.iter().map(SchemaNode::type_name).collect();
                    issues.push(issue(format!(
                        "expected one of [{}], got {}",
                        expected.join(", "),
                        value_kind(value)
                    )));
                }
            }
            (expected, actual) => issues.push(issue(format!(
                "expected {}, got {}",
                expected.type_name(),
                value_kind(actual)
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaNode::Object { .. } => "object",
            SchemaNode::Array { .. } => "array",
            SchemaNode::String { .. } => "string",
            SchemaNode::Number => "number",
            SchemaNode::Integer => "integer",
            SchemaNode::Boolean => "boolean",
            SchemaNode::Null => "null",
            SchemaNode::Any => "any",
            SchemaNode::Union(_) => "union",
        }
    }
}

fn is_json_schema(map: &Map<String, Value>) -> bool {
    SCHEMA_KEYWORDS.iter().any(|kw| match map.get(*kw) {
        // `{"type": "string"}` in shorthand would be a field called "type";
        // only treat `type` as a keyword when it names a JSON type.
        Some(Value::String(name)) if *kw == "type" => matches!(
            name.as_str(),
            "object" | "array" | "string" | "number" | "integer" | "boolean" | "null"
        ),
        Some(_) => true,
        None => false,
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Coercion
// =============================================================================

/// JSON objects and arrays found in `raw`, most likely first.
///
/// Tries the whole text, then the contents of Markdown code fences, then
/// every balanced `{...}` or `[...]` span in order of appearance.
fn json_candidates(raw: &str) -> Vec<Value> {
    let mut candidates = Vec::new();
    let mut push = |text: &str| {
        if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
            if (value.is_object() || value.is_array()) && !candidates.contains(&value) {
                candidates.push(value);
            }
        }
    };

    push(raw);
    for block in fenced_blocks(raw) {
        push(block);
    }
    for span in balanced_spans(raw) {
        push(span);
    }
    candidates
}

/// Coerce model output into a value conforming to `schema`.
///
/// Returns `SchemaViolation` with the raw output when no JSON can be found
/// or when no candidate validates.
pub fn parse_structured(schema: &SchemaNode, raw: &str) -> Result<Value> {
    let candidates = json_candidates(raw);
    let violation = |reason: String| DocqaError::SchemaViolation {
        reason,
        raw_output: raw.to_string(),
    };

    let mut first_issues = None;
    for candidate in candidates {
        let issues = schema.validate(&candidate);
        if issues.is_empty() {
            return Ok(candidate);
        }
        first_issues.get_or_insert(issues);
    }

    match first_issues {
        Some(issues) => Err(violation(
            issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )),
        None => Err(violation(
            "model output contains no JSON object or array".to_string(),
        )),
    }
}

fn fenced_blocks(raw: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Every balanced `{...}` or `[...]` span, ordered by start position.
///
/// One pass over the text with a stack of open brackets. Quotes only start a
/// JSON string inside an open bracket, and a mismatched closer drops every
/// bracket still open.
fn balanced_spans(raw: &str) -> Vec<&str> {
    let mut open: Vec<(usize, u8)> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in raw.as_bytes().iter().enumerate() {
        if in_string {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push((i, b'}')),
            b'[' => open.push((i, b']')),
            b'}' | b']' => match open.pop() {
                Some((start, close)) if close == b => spans.push((start, i)),
                Some(_) => open.clear(),
                None => {}
            },
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
        .into_iter()
        .map(|(start, end)| &raw[start..=end])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shorthand() -> SchemaNode {
        SchemaNode::parse(&json!({"answer": "string", "confidence": "number"})).unwrap()
    }

    #[test]
    fn test_parse_shorthand() {
        match shorthand() {
            SchemaNode::Object {
                properties,
                required,
            } => {
                assert_eq!(properties["answer"], SchemaNode::String { allowed: None });
                assert_eq!(properties["confidence"], SchemaNode::Number);
                assert_eq!(required.len(), 2);
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_schema() {
        let schema = SchemaNode::parse(&json!({
            "type": "object",
            "properties": {
                "answer": {"type": "string"},
                "days": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "level": {"enum": ["low", "high"]},
                "note": {"type": ["string", "null"]}
            },
            "required": ["answer"]
        }))
        .unwrap();

        assert!(schema.validate(&json!({"answer": "three"})).is_empty());
        assert!(schema
            .validate(&json!({
                "answer": "three",
                "days": 3,
                "tags": ["remote"],
                "level": "low",
                "note": null
            }))
            .is_empty());

        let issues = schema.validate(&json!({"days": 2.5, "level": "medium", "tags": [1]}));
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"$"));
        assert!(paths.contains(&"$.days"));
        assert!(paths.contains(&"$.level"));
        assert!(paths.contains(&"$.tags[0]"));
    }

    #[test]
    fn test_shorthand_field_named_type() {
        let schema = SchemaNode::parse(&json!({"type": "text", "score": "number"})).unwrap();
        assert!(schema.validate(&json!({"type": "x", "score": 1})).is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_types() {
        assert!(matches!(
            SchemaNode::parse(&json!({"answer": "uuid"})),
            Err(DocqaError::InvalidInput(_))
        ));
        assert!(SchemaNode::parse(&json!(42)).is_err());
        assert!(SchemaNode::parse(&json!(["string", "number"])).is_err());
    }

    #[test]
    fn test_empty_schema_accepts_anything() {
        let schema = SchemaNode::parse(&json!({})).unwrap();
        assert_eq!(schema, SchemaNode::Any);
        assert!(schema.validate(&json!([1, "two"])).is_empty());
    }

    #[test]
    fn test_validate_missing_and_mistyped() {
        let schema = shorthand();
        let issues = schema.validate(&json!({"answer": 3}));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.message.contains("missing required field 'confidence'")));
        assert!(issues
            .iter()
            .any(|i| i.path == "$.answer" && i.message == "expected string, got number"));
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        let schema = SchemaNode::Integer;
        assert!(schema.validate(&json!(3)).is_empty());
        assert!(schema.validate(&json!(3.0)).is_empty());
        assert_eq!(schema.validate(&json!(3.5)).len(), 1);
    }

    fn first_candidate(raw: &str) -> Option<Value> {
        json_candidates(raw).into_iter().next()
    }

    #[test]
    fn test_extract_plain_and_fenced() {
        assert_eq!(first_candidate(r#"{"a": 1}"#), Some(json!({"a": 1})));
        let fenced = "```json\n{\"answer\": \"three\"}\n```";
        assert_eq!(first_candidate(fenced), Some(json!({"answer": "three"})));
    }

    #[test]
    fn test_extract_from_prose() {
        let raw = "Sure! Here is the answer: {\"answer\": \"3 days {per week}\", \"confidence\": 0.9} Hope that helps.";
        assert_eq!(
            first_candidate(raw),
            Some(json!({"answer": "3 days {per week}", "confidence": 0.9}))
        );
    }

    #[test]
    fn test_extract_ignores_scalars() {
        assert_eq!(first_candidate("42"), None);
        assert_eq!(first_candidate("\"just a string\""), None);
        assert_eq!(first_candidate("Remote work is allowed three days a week."), None);
    }

    #[test]
    fn test_balanced_spans_nested_in_order() {
        let raw = r#"x {"outer": {"answer": "three"}} y [1, 2]"#;
        assert_eq!(
            balanced_spans(raw),
            vec![
                r#"{"outer": {"answer": "three"}}"#,
                r#"{"answer": "three"}"#,
                "[1, 2]",
            ]
        );
        assert!(balanced_spans("{ [ } ]").is_empty());
    }

    #[test]
    fn test_unmatched_openers_do_not_hide_later_json() {
        let raw = format!("{}{}", "{".repeat(50_000), r#"{"answer": "three"}"#);
        let schema = SchemaNode::parse(&json!({"answer": "string"})).unwrap();
        let value = parse_structured(&schema, &raw).unwrap();
        assert_eq!(value, json!({"answer": "three"}));
    }

    #[test]
    fn test_parse_structured_picks_conforming_candidate() {
        let raw = "Example: {\"x\": 1}\nActual: {\"answer\": \"three\", \"confidence\": 0.8}";
        let value = parse_structured(&shorthand(), raw).unwrap();
        assert_eq!(value["answer"], "three");
    }

    #[test]
    fn test_parse_structured_prose_is_violation() {
        let raw = "Employees may work remotely three days per week.";
        match parse_structured(&shorthand(), raw) {
            Err(DocqaError::SchemaViolation { reason, raw_output }) => {
                assert!(reason.contains("no JSON"));
                assert_eq!(raw_output, raw);
            }
            other => panic!("expected SchemaViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_structured_reports_issues() {
        match parse_structured(&shorthand(), r#"{"answer": "three"}"#) {
            Err(DocqaError::SchemaViolation { reason, .. }) => {
                assert!(reason.contains("confidence"));
            }
            other => panic!("expected SchemaViolation, got {:?}", other),
        }
    }
}
