//! Stage output validation
//!
//! Raw model text is reduced to a single JSON object (markdown fences
//! stripped, surrounding prose dropped) and then checked against the
//! stage schema. Every failure here is a `StageParse` error.

use drugvista_common::errors::{AppError, Result};
use drugvista_common::llm::ModelResponse;
use drugvista_common::models::{EvidenceItem, FieldKind, FieldValue, Stage, StageResult};
use drugvista_common::NEUTRAL_CONFIDENCE;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

pub struct OutputParser {
    fence: Regex,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(stage: Stage, message: impl Into<String>) -> AppError {
    AppError::StageParse {
        stage,
        message: message.into(),
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            fence: Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").expect("valid regex"),
        }
    }

    /// Validate a model response against `stage`'s schema and the evidence it was shown
    pub fn parse(&self, stage: Stage, response: ModelResponse, evidence: &[EvidenceItem]) -> Result<StageResult> {
        let object = match response {
            ModelResponse::Structured(Value::Object(map)) => map,
            ModelResponse::Structured(other) => {
                return Err(rejected(stage, format!("expected a JSON object, got {}", json_type(&other))));
            }
            ModelResponse::Text(text) => self.extract_object(stage, &text)?,
        };

        let structured_fields = Self::fields(stage, &object)?;
        let cited_evidence = Self::citations(stage, &object, evidence)?;
        let raw_confidence = Self::confidence(stage, &object)?;

        Ok(StageResult {
            stage,
            structured_fields,
            cited_evidence,
            raw_confidence,
        })
    }

    fn extract_object(&self, stage: Stage, text: &str) -> Result<Map<String, Value>> {
        let body = self
            .fence
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(text);

        let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
            return Err(rejected(stage, "no JSON object found in model output"));
        };
        if end < start {
            return Err(rejected(stage, "no JSON object found in model output"));
        }

        match serde_json::from_str::<Value>(&body[start..=end]) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(rejected(stage, format!("expected a JSON object, got {}", json_type(&other)))),
            Err(e) => Err(rejected(stage, format!("malformed JSON: {}", e))),
        }
    }

    fn fields(stage: Stage, object: &Map<String, Value>) -> Result<BTreeMap<String, FieldValue>> {
        let mut fields = BTreeMap::new();

        for spec in stage.schema() {
            let value = object
                .get(spec.name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| rejected(stage, format!("missing required field `{}`", spec.name)))?;

            let parsed = match (spec.kind, value) {
                (FieldKind::Text, Value::String(text)) if !text.trim().is_empty() => {
                    FieldValue::Text(text.trim().to_string())
                }
                (FieldKind::Text, Value::String(_)) => {
                    return Err(rejected(stage, format!("field `{}` is empty", spec.name)));
                }
                (FieldKind::List, Value::Array(items)) => FieldValue::List(string_list(stage, spec.name, items)?),
                (kind, other) => {
                    let expected = match kind {
                        FieldKind::Text => "a string",
                        FieldKind::List => "an array of strings",
                    };
                    return Err(rejected(
                        stage,
                        format!("field `{}` must be {}, got {}", spec.name, expected, json_type(other)),
                    ));
                }
            };
            fields.insert(spec.name.to_string(), parsed);
        }

        Ok(fields)
    }

    /// Cited ids in first-citation order; each must be in `evidence`
    fn citations(stage: Stage, object: &Map<String, Value>, evidence: &[EvidenceItem]) -> Result<Vec<String>> {
        let items = match object.get("citations") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => string_list(stage, "citations", items)?,
            Some(other) => {
                return Err(rejected(
                    stage,
                    format!("field `citations` must be an array of strings, got {}", json_type(other)),
                ));
            }
        };

        let known: HashSet<&str> = evidence.iter().map(|e| e.document_id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut cited = Vec::new();
        for id in items {
            let id = id.strip_prefix("doc:").map(str::to_string).unwrap_or(id);
            if !known.contains(id.as_str()) {
                return Err(rejected(stage, format!("cites document `{}` that was not in its evidence", id)));
            }
            if seen.insert(id.clone()) {
                cited.push(id);
            }
        }
        Ok(cited)
    }

    /// Absent means neutral; numbers are clamped to [0, 1]
    fn confidence(stage: Stage, object: &Map<String, Value>) -> Result<f64> {
        match object.get("confidence") {
            None | Some(Value::Null) => Ok(NEUTRAL_CONFIDENCE),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => Ok(v.clamp(0.0, 1.0)),
                _ => Err(rejected(stage, "field `confidence` is not a finite number")),
            },
            Some(other) => Err(rejected(
                stage,
                format!("field `confidence` must be a number, got {}", json_type(other)),
            )),
        }
    }
}

fn string_list(stage: Stage, field: &str, items: &[Value]) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if s.trim().is_empty() => {}
            Value::String(s) => values.push(s.trim().to_string()),
            other => {
                return Err(rejected(
                    stage,
                    format!("field `{}` must contain only strings, found {}", field, json_type(other)),
                ));
            }
        }
    }
    Ok(values)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drugvista_common::models::DocumentCategory;
    use serde_json::json;

    fn evidence(ids: &[&str]) -> Vec<EvidenceItem> {
        ids.iter()
            .map(|id| EvidenceItem {
                document_id: id.to_string(),
                source_label: format!("{id}.txt"),
                relevance_score: 0.5,
                excerpt: String::new(),
                category: DocumentCategory::Paper,
            })
            .collect()
    }

    fn text(s: &str) -> ModelResponse {
        ModelResponse::Text(s.to_string())
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let raw = "Here is my analysis:\n```json\n{\"signal\": \"Strong\", \"risks\": [\"generic erosion\"], \
                   \"outlook\": \"Growing\", \"citations\": [\"m1\", \"m1\", \"m2\"], \"confidence\": 0.8}\n```\nThanks!";
        let result = OutputParser::new()
            .parse(Stage::Market, text(raw), &evidence(&["m1", "m2"]))
            .unwrap();

        assert_eq!(result.text("signal"), Some("Strong"));
        assert_eq!(result.list("risks").unwrap(), ["generic erosion"]);
        assert_eq!(result.cited_evidence, vec!["m1", "m2"]);
        assert_eq!(result.raw_confidence, 0.8);
    }

    #[test]
    fn test_bare_object_inside_prose() {
        let raw = "Result: {\"recommendation\": \"Proceed\", \"rationale\": \"Strong data\"} end";
        let result = OutputParser::new().parse(Stage::Decision, text(raw), &[]).unwrap();
        assert_eq!(result.text("recommendation"), Some("Proceed"));
        assert_eq!(result.raw_confidence, NEUTRAL_CONFIDENCE);
        assert!(result.cited_evidence.is_empty());
    }

    #[test]
    fn test_missing_field_is_parse_error() {
        let raw = json!({"viability": "High", "risks": []});
        let err = OutputParser::new()
            .parse(Stage::Clinical, ModelResponse::Structured(raw), &[])
            .unwrap_err();
        assert!(matches!(err, AppError::StageParse { stage: Stage::Clinical, .. }));
        assert!(err.to_string().contains("findings"));
    }

    #[test]
    fn test_wrong_type_and_garbage() {
        let parser = OutputParser::new();
        let wrong = json!({"summary": "s", "intent": "i", "entities": "Aspirin"});
        assert!(parser.parse(Stage::Context, ModelResponse::Structured(wrong), &[]).is_err());
        assert!(parser.parse(Stage::Context, text("I cannot answer that."), &[]).is_err());
        assert!(parser.parse(Stage::Context, text("{\"summary\": "), &[]).is_err());
        assert!(parser.parse(Stage::Context, ModelResponse::Structured(json!([1, 2])), &[]).is_err());
    }

    #[test]
    fn test_unknown_citation_rejected() {
        let raw = json!({"recommendation": "Drop", "rationale": "r", "citations": ["ghost"]});
        let err = OutputParser::new()
            .parse(Stage::Decision, ModelResponse::Structured(raw), &evidence(&["real"]))
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_doc_prefixed_citations_accepted() {
        let raw = json!({"recommendation": "Drop", "rationale": "r", "citations": ["doc:real"]});
        let result = OutputParser::new()
            .parse(Stage::Decision, ModelResponse::Structured(raw), &evidence(&["real"]))
            .unwrap();
        assert_eq!(result.cited_evidence, vec!["real"]);
    }

    #[test]
    fn test_confidence_edge_cases() {
        let parser = OutputParser::new();
        let base = |confidence: Value| {
            json!({"recommendation": "Proceed", "rationale": "r", "confidence": confidence})
        };

        let high = parser.parse(Stage::Decision, ModelResponse::Structured(base(json!(1.7))), &[]).unwrap();
        assert_eq!(high.raw_confidence, 1.0);

        let low = parser.parse(Stage::Decision, ModelResponse::Structured(base(json!(-0.2))), &[]).unwrap();
        assert_eq!(low.raw_confidence, 0.0);

        let null = parser.parse(Stage::Decision, ModelResponse::Structured(base(Value::Null)), &[]).unwrap();
        assert_eq!(null.raw_confidence, NEUTRAL_CONFIDENCE);

        assert!(parser
            .parse(Stage::Decision, ModelResponse::Structured(base(json!("high"))), &[])
            .is_err());
    }
}
