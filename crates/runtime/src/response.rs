use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use continuum_llm::extract_json_output;

/// One requested side effect, as the model wrote it.  An entry without a
/// string `type` keeps an empty kind and fails on its own at execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawAction {
    fn from_entry(entry: Value) -> Self {
        match entry {
            Value::Object(mut map) => {
                let kind = match map.remove("type") {
                    Some(Value::String(kind)) => kind,
                    _ => String::new(),
                };
                let payload = map.remove("payload").unwrap_or(Value::Null);
                Self { kind, payload }
            }
            other => Self {
                kind: String::new(),
                payload: other,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelResponse {
    pub message: String,
    #[serde(alias = "emotionalState", skip_serializing_if = "Option::is_none")]
    pub emotional_state: Option<String>,
    #[serde(alias = "surpriseScore", skip_serializing_if = "Option::is_none")]
    pub surprise_score: Option<f64>,
    pub reflections: Vec<String>,
    pub actions: Vec<RawAction>,
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

impl ModelResponse {
    fn fallback(raw: &str) -> Self {
        Self {
            message: raw.to_string(),
            ..Self::default()
        }
    }

    /// Field by field: a badly typed field falls back to its default
    /// instead of discarding the rest of the reply.
    fn from_object(map: Map<String, Value>) -> Self {
        let message = match field(&map, &["message"]) {
            Some(Value::String(text)) => text.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };
        let emotional_state = field(&map, &["emotional_state", "emotionalState"])
            .and_then(Value::as_str)
            .map(str::to_string);
        let surprise_score = field(&map, &["surprise_score", "surpriseScore"]).and_then(Value::as_f64);
        let reflections = match field(&map, &["reflections"]) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            Some(Value::String(text)) if !text.trim().is_empty() => vec![text.clone()],
            _ => Vec::new(),
        };
        let actions = match field(&map, &["actions"]) {
            Some(Value::Array(items)) => items.iter().cloned().map(RawAction::from_entry).collect(),
            Some(_) => {
                warn!("`actions` is not a list; ignoring it");
                Vec::new()
            }
            None => Vec::new(),
        };
        Self {
            message,
            emotional_state,
            surprise_score,
            reflections,
            actions,
        }
    }
}

/// Never fails.  Replies that are not a JSON object become
/// `{message: raw, actions: []}`.
pub fn parse_model_response(raw: &str) -> ModelResponse {
    match extract_json_output::<Value>(raw) {
        Some(Value::Object(map)) => ModelResponse::from_object(map),
        _ => {
            warn!(chars = raw.len(), "model reply is not structured; using raw text");
            ModelResponse::fallback(raw)
        }
    }
}
