//! Per-stage prompt templates

use super::StageRequest;
use drugvista_common::models::{EvidenceItem, FieldKind, FieldValue, Stage, StageResult};
use serde_json::{json, Map, Value};
use std::fmt::Write;

struct Template {
    role: &'static str,
    tasks: &'static [&'static str],
}

const CONTEXT: Template = Template {
    role: "You are a biomedical analyst interpreting a query about drugs, diseases, or molecules.",
    tasks: &[
        "Identify what kind of analysis is needed (disease, molecule, clinical trial, market).",
        "List the key entities mentioned: drug names, diseases, molecular targets.",
        "State the user's likely intent.",
    ],
};

const CLINICAL: Template = Template {
    role: "You are a clinical research expert assessing biomedical evidence.",
    tasks: &[
        "Assess clinical viability from the available data.",
        "Identify risks or safety concerns mentioned in the evidence.",
        "Summarise clinical trial results, outcomes, and mechanism of action if described.",
    ],
};

const MARKET: Template = Template {
    role: "You are a pharmaceutical market analyst reviewing market intelligence.",
    tasks: &[
        "Describe the market demand signal found in the documents.",
        "Identify competitive, regulatory, and commercial risks.",
        "Give a short commercial outlook.",
    ],
};

const DECISION: Template = Template {
    role: "You are a pharmaceutical decision analyst synthesising prior analyses.",
    tasks: &[
        "Weigh the clinical findings against the market factors.",
        "Recommend one of: Proceed, Investigate Further, Drop.",
        "Explain the rationale, acknowledging evidence gaps.",
    ],
};

fn template(stage: Stage) -> &'static Template {
    match stage {
        Stage::Context => &CONTEXT,
        Stage::Clinical => &CLINICAL,
        Stage::Market => &MARKET,
        Stage::Decision => &DECISION,
    }
}

const STRICT_INSTRUCTION: &str = "IMPORTANT: your previous reply could not be parsed. \
Reply with exactly one JSON object and nothing else: no prose, no markdown fences.";

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `[doc:<id>] <label> | <category> | relevance <score> | <excerpt>`
pub(crate) fn evidence_line(item: &EvidenceItem) -> String {
    format!(
        "[doc:{}] {} | {} | relevance {:.2} | {}",
        item.document_id,
        single_line(&item.source_label),
        item.category.as_str(),
        item.relevance_score,
        single_line(&item.excerpt)
    )
}

fn prior_line(result: &StageResult) -> String {
    let fields = result
        .structured_fields
        .iter()
        .map(|(name, value)| match value {
            FieldValue::Text(text) => format!("{}: {}", name, single_line(text)),
            FieldValue::List(items) => {
                format!("{}: {}", name, single_line(&items.join(", ")))
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    format!("[{}] {} (confidence {:.2})", result.stage, fields, result.raw_confidence)
}

/// JSON description of the object a stage must return
pub fn schema_hint(stage: Stage) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in stage.schema() {
        let kind = match field.kind {
            FieldKind::Text => json!({ "type": "string" }),
            FieldKind::List => json!({ "type": "array", "items": { "type": "string" } }),
        };
        properties.insert(field.name.to_string(), kind);
        required.push(field.name);
    }
    properties.insert(
        "citations".to_string(),
        json!({ "type": "array", "items": { "type": "string" }, "description": "ids of cited [doc:<id>] entries" }),
    );
    properties.insert(
        "confidence".to_string(),
        json!({ "type": "number", "minimum": 0.0, "maximum": 1.0 }),
    );

    json!({
        "type": "object",
        "required": required,
        "properties": properties,
    })
}

/// Render the full prompt for one stage invocation
pub fn render(request: &StageRequest) -> String {
    let template = template(request.stage);
    let mut prompt = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(prompt, "{}", template.role);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "QUERY: {}", single_line(&request.query));

    if !request.prior_context.is_empty() {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "PRIOR ANALYSIS:");
        for result in &request.prior_context {
            let _ = writeln!(prompt, "{}", prior_line(result));
        }
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "EVIDENCE:");
    if request.evidence.is_empty() {
        let _ = writeln!(
            prompt,
            "(no documents retrieved; say that evidence is insufficient and cite nothing)"
        );
    } else {
        for item in &request.evidence {
            let _ = writeln!(prompt, "{}", evidence_line(item));
        }
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "TASK:");
    for (i, task) in template.tasks.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", i + 1, task);
    }
    let _ = writeln!(
        prompt,
        "Base every statement only on the evidence above. Do not speculate beyond it."
    );

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "RESPONSE FORMAT:");
    let _ = writeln!(prompt, "Return one JSON object with these fields:");
    for field in request.stage.schema() {
        let kind = match field.kind {
            FieldKind::Text => "string",
            FieldKind::List => "array of strings",
        };
        let _ = writeln!(prompt, "- {} ({})", field.name, kind);
    }
    let _ = writeln!(
        prompt,
        "- citations (array of document ids copied from the [doc:<id>] entries you relied on)"
    );
    let _ = writeln!(prompt, "- confidence (number between 0 and 1)");

    if request.strict_format {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "{}", STRICT_INSTRUCTION);
    }

    prompt
}
