use rmcp::model::{CallToolResult, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

/// Result shape a gateway tool statically expects from its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Number,
    Object,
    List,
}

/// Canonical gateway-facing result value. The normalizer is the only
/// producer of this type; no other reply shape reaches upstream callers.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResult {
    Scalar(f64),
    Structured(JsonObject),
    List(Vec<JsonObject>),
}

impl NormalizedResult {
    /// Structured-content value for republication upstream. Scalars and
    /// lists are wrapped in `{"result": ...}` so gateway output parses
    /// back through [`normalize`] unchanged.
    pub fn to_structured_content(&self) -> Value {
        match self {
            NormalizedResult::Scalar(x) => json!({ "result": x }),
            NormalizedResult::Structured(map) => Value::Object(map.clone()),
            NormalizedResult::List(items) => {
                let array: Vec<Value> = items.iter().cloned().map(Value::Object).collect();
                json!({ "result": array })
            }
        }
    }

    /// Text rendering of the unwrapped value for the content part
    pub fn to_text(&self) -> String {
        match self {
            NormalizedResult::Scalar(x) => Value::from(*x).to_string(),
            NormalizedResult::Structured(map) => Value::Object(map.clone()).to_string(),
            NormalizedResult::List(items) => {
                Value::Array(items.iter().cloned().map(Value::Object).collect()).to_string()
            }
        }
    }
}

static FALLBACKS: AtomicU64 = AtomicU64::new(0);

/// Number of replies converted to a default value by the permissive
/// fallback steps of [`normalize`]. A rising count means some backend is
/// producing unusable envelopes.
pub fn fallback_conversions() -> u64 {
    FALLBACKS.load(Ordering::Relaxed)
}

/// Convert a raw reply envelope into a [`NormalizedResult`].
///
/// Ordered, first match wins:
/// 1. non-empty structured content, unwrapping a `{"result": ...}`
///    wrapper when present, if it matches the expected shape;
/// 2. the first text content part, parsed per the expected shape
///    (numeric text, or JSON for objects and lists);
/// 3. expected list: empty list;
/// 4. expected number: `0.0`; expected object: empty mapping.
///
/// Steps 3 and 4 deliberately trade correctness for availability when a
/// backend misbehaves; [`fallback_conversions`] counts how often that
/// happens. Pure: no I/O, no state beyond the counter.
pub fn normalize(reply: &CallToolResult, expected: ResultKind) -> NormalizedResult {
    if let Some(candidate) = structured_candidate(reply) {
        if let Some(normalized) = match_shape(candidate, expected) {
            return normalized;
        }
    }

    if let Some(text) = first_text_part(reply) {
        if let Some(normalized) = parse_text(text, expected) {
            return normalized;
        }
    }

    FALLBACKS.fetch_add(1, Ordering::Relaxed);
    match expected {
        ResultKind::Number => NormalizedResult::Scalar(0.0),
        ResultKind::Object => NormalizedResult::Structured(JsonObject::new()),
        ResultKind::List => NormalizedResult::List(Vec::new()),
    }
}

/// Non-empty structured content with the conventional result wrapper
/// removed. `{"result": X}` yields X; anything else is taken verbatim.
fn structured_candidate(reply: &CallToolResult) -> Option<&Value> {
    let content = reply.structured_content.as_ref()?;
    match content {
        Value::Object(map) => {
            if map.is_empty() {
                None
            } else if let Some(inner) = map.get("result") {
                Some(inner)
            } else {
                Some(content)
            }
        }
        Value::Array(items) if items.is_empty() => None,
        other => Some(other),
    }
}

fn first_text_part(reply: &CallToolResult) -> Option<&str> {
    reply
        .content
        .iter()
        .find_map(|part| part.as_text())
        .map(|text| text.text.as_str())
}

fn match_shape(candidate: &Value, expected: ResultKind) -> Option<NormalizedResult> {
    match expected {
        ResultKind::Number => as_number(candidate).map(NormalizedResult::Scalar),
        ResultKind::Object => candidate
            .as_object()
            .map(|map| NormalizedResult::Structured(map.clone())),
        ResultKind::List => as_object_list(candidate).map(NormalizedResult::List),
    }
}

fn parse_text(text: &str, expected: ResultKind) -> Option<NormalizedResult> {
    match expected {
        ResultKind::Number => text
            .trim()
            .parse::<f64>()
            .ok()
            .map(NormalizedResult::Scalar),
        ResultKind::Object => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(NormalizedResult::Structured(map)),
            _ => None,
        },
        ResultKind::List => serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|value| as_object_list(&value))
            .map(NormalizedResult::List),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// A sequence counts as a list only when every element is a mapping
fn as_object_list(value: &Value) -> Option<Vec<JsonObject>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| item.as_object().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;

    fn structured_reply(value: Value) -> CallToolResult {
        let mut reply = CallToolResult::success(vec![]);
        reply.structured_content = Some(value);
        reply
    }

    fn text_reply(text: &str) -> CallToolResult {
        CallToolResult::success(vec![Content::text(text)])
    }

    fn empty_reply() -> CallToolResult {
        CallToolResult::success(vec![])
    }

    #[test]
    fn test_structured_scalar() {
        let reply = structured_reply(json!({ "result": 1234.5 }));
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(1234.5)
        );
    }

    #[test]
    fn test_structured_scalar_from_numeric_string() {
        let reply = structured_reply(json!({ "result": "99.5" }));
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(99.5)
        );
    }

    #[test]
    fn test_structured_list_preserves_order_and_count() {
        let reply = structured_reply(json!({
            "result": [
                { "date": "2026-07-01", "total": 120.0 },
                { "date": "2026-07-02", "total": 80.5 },
                { "date": "2026-07-03", "total": 0.0 },
            ]
        }));
        let normalized = normalize(&reply, ResultKind::List);
        match normalized {
            NormalizedResult::List(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].get("date").unwrap(), "2026-07-01");
                assert_eq!(items[2].get("total").unwrap(), 0.0);
            }
            other => panic!("expected List, got {other:?}"),
        }
    }

    #[test]
    fn test_structured_empty_list_is_list() {
        let reply = structured_reply(json!({ "result": [] }));
        assert_eq!(
            normalize(&reply, ResultKind::List),
            NormalizedResult::List(Vec::new())
        );
    }

    #[test]
    fn test_structured_object_without_wrapper() {
        let reply = structured_reply(json!({ "id": 7, "status": "pending" }));
        let normalized = normalize(&reply, ResultKind::Object);
        match normalized {
            NormalizedResult::Structured(map) => {
                assert_eq!(map.get("id").unwrap(), 7);
                assert_eq!(map.get("status").unwrap(), "pending");
            }
            other => panic!("expected Structured, got {other:?}"),
        }
    }

    #[test]
    fn test_structured_object_unwraps_result_key() {
        let reply = structured_reply(json!({ "result": { "id": 7 } }));
        let normalized = normalize(&reply, ResultKind::Object);
        match normalized {
            NormalizedResult::Structured(map) => {
                assert_eq!(map.get("id").unwrap(), 7);
                assert!(!map.contains_key("result"));
            }
            other => panic!("expected Structured, got {other:?}"),
        }
    }

    #[test]
    fn test_text_scalar_shape() {
        let reply = text_reply(" 1234.5\n");
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(1234.5)
        );
    }

    #[test]
    fn test_text_json_object_shape() {
        let reply = text_reply(r#"{ "id": 3, "status": "shipped" }"#);
        let normalized = normalize(&reply, ResultKind::Object);
        match normalized {
            NormalizedResult::Structured(map) => {
                assert_eq!(map.get("status").unwrap(), "shipped");
            }
            other => panic!("expected Structured, got {other:?}"),
        }
    }

    #[test]
    fn test_text_json_list_shape() {
        let reply = text_reply(r#"[{ "day": 1 }, { "day": 2 }]"#);
        let normalized = normalize(&reply, ResultKind::List);
        match normalized {
            NormalizedResult::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected List, got {other:?}"),
        }
    }

    #[test]
    fn test_structured_wins_over_text() {
        let mut reply = text_reply("2.0");
        reply.structured_content = Some(json!({ "result": 1.0 }));
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(1.0)
        );
    }

    #[test]
    fn test_empty_structured_content_is_skipped() {
        let mut reply = text_reply("7.5");
        reply.structured_content = Some(json!({}));
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(7.5)
        );
    }

    #[test]
    fn test_shape_mismatch_falls_through_to_text() {
        let mut reply = text_reply("3.5");
        reply.structured_content = Some(json!({ "result": { "a": 1 } }));
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(3.5)
        );
    }

    #[test]
    fn test_unparseable_numeric_falls_back_to_zero() {
        let before = fallback_conversions();
        let reply = text_reply("no sales data");
        assert_eq!(
            normalize(&reply, ResultKind::Number),
            NormalizedResult::Scalar(0.0)
        );
        assert!(fallback_conversions() > before);
    }

    #[test]
    fn test_empty_reply_fallbacks() {
        assert_eq!(
            normalize(&empty_reply(), ResultKind::Number),
            NormalizedResult::Scalar(0.0)
        );
        assert_eq!(
            normalize(&empty_reply(), ResultKind::List),
            NormalizedResult::List(Vec::new())
        );
        assert_eq!(
            normalize(&empty_reply(), ResultKind::Object),
            NormalizedResult::Structured(JsonObject::new())
        );
    }

    #[test]
    fn test_list_of_non_mappings_is_rejected() {
        let reply = structured_reply(json!({ "result": [1, 2, 3] }));
        assert_eq!(
            normalize(&reply, ResultKind::List),
            NormalizedResult::List(Vec::new())
        );
    }

    #[test]
    fn test_structured_content_round_trip() {
        let scalar = NormalizedResult::Scalar(1234.5);
        let mut reply = CallToolResult::success(vec![]);
        reply.structured_content = Some(scalar.to_structured_content());
        assert_eq!(normalize(&reply, ResultKind::Number), scalar);

        let list = NormalizedResult::List(vec![JsonObject::from_iter([(
            "day".to_string(),
            json!(1),
        )])]);
        reply.structured_content = Some(list.to_structured_content());
        assert_eq!(normalize(&reply, ResultKind::List), list);
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(NormalizedResult::Scalar(1234.5).to_text(), "1234.5");

        let map = JsonObject::from_iter([("id".to_string(), json!(1))]);
        assert_eq!(
            NormalizedResult::Structured(map.clone()).to_text(),
            r#"{"id":1}"#
        );
        assert_eq!(NormalizedResult::List(vec![map]).to_text(), r#"[{"id":1}]"#);
    }

    #[test]
    fn test_result_kind_serde_names() {
        assert_eq!(serde_json::to_string(&ResultKind::Number).unwrap(), "\"number\"");
        assert_eq!(
            serde_json::from_str::<ResultKind>("\"list\"").unwrap(),
            ResultKind::List
        );
    }
}
