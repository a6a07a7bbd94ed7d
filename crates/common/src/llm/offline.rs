//! Offline rule-based reasoning model
//!
//! Works without an LLM API key. Reads the evidence block of the prompt
//! (`[doc:<id>] ...` lines) and applies keyword heuristics per stage,
//! citing every document it read.

use super::{ModelInvocation, ModelResponse, ReasoningModel};
use crate::errors::Result;
use crate::models::Stage;
use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::json;

const MAX_CITATIONS: usize = 5;

struct EvidenceLine {
    document_id: String,
    relevance: Option<f64>,
    text: String,
}

/// Keyword-driven stand-in for a language model
pub struct RuleBasedModel {
    evidence_line: Regex,
    relevance: Regex,
    query_line: Regex,
}

impl Default for RuleBasedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedModel {
    pub fn new() -> Self {
        Self {
            evidence_line: Regex::new(r"(?m)^\[doc:(.+?)\] (.*)$").expect("valid regex"),
            relevance: Regex::new(r"relevance (-?[0-9]+(?:\.[0-9]+)?)").expect("valid regex"),
            query_line: Regex::new(r"(?m)^QUERY:\s*(.*)$").expect("valid regex"),
        }
    }

    fn evidence(&self, prompt: &str) -> Vec<EvidenceLine> {
        self.evidence_line
            .captures_iter(prompt)
            .filter_map(|cap| {
                let document_id = cap.get(1)?.as_str().trim().to_string();
                let text = cap.get(2).map(|m| m.as_str()).unwrap_or_default().to_string();
                let relevance = self
                    .relevance
                    .captures(&text)
                    .and_then(|r| r.get(1))
                    .and_then(|m| m.as_str().parse::<f64>().ok());
                Some(EvidenceLine {
                    document_id,
                    relevance,
                    text: text.to_lowercase(),
                })
            })
            .collect()
    }

    fn query<'a>(&self, prompt: &'a str) -> &'a str {
        self.query_line
            .captures(prompt)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or_default()
    }

    fn analyze(&self, stage: Stage, prompt: &str) -> serde_json::Value {
        let evidence = self.evidence(prompt);
        let corpus = evidence.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join(" ");
        let query = self.query(prompt);

        let mut citations: Vec<&str> = Vec::new();
        for line in &evidence {
            if !citations.contains(&line.document_id.as_str()) {
                citations.push(&line.document_id);
            }
        }
        citations.truncate(MAX_CITATIONS);

        let mut output = match stage {
            Stage::Context => json!({
                "summary": format!(
                    "{} document(s) retrieved for '{}'",
                    evidence.len(),
                    query
                ),
                "intent": query_intent(query),
                "entities": query_entities(query),
            }),
            Stage::Clinical => json!({
                "viability": viability(&corpus),
                "risks": clinical_risks(&corpus),
                "findings": format!("{} source(s) reviewed for clinical signals", evidence.len()),
            }),
            Stage::Market => json!({
                "signal": market_signal(&corpus),
                "risks": market_risks(&corpus),
                "outlook": format!("{} source(s) reviewed for market signals", evidence.len()),
            }),
            Stage::Decision => {
                let viability = viability(&corpus);
                let signal = market_signal(&corpus);
                json!({
                    "recommendation": recommendation(viability, signal),
                    "rationale": format!(
                        "Clinical viability {} with a {} market signal",
                        viability.to_lowercase(),
                        signal.to_lowercase()
                    ),
                })
            }
        };

        output["citations"] = json!(citations);
        output["confidence"] = json!(confidence(&evidence));
        output
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn query_intent(query: &str) -> &'static str {
    let lower = query.to_lowercase();
    if contains_any(&lower, &["structure", "molecule", "molecular", "compound"]) {
        "molecule analysis"
    } else if contains_any(&lower, &["trial", "phase"]) {
        "clinical trial review"
    } else if contains_any(&lower, &["market", "sales", "revenue"]) {
        "market analysis"
    } else {
        "disease research"
    }
}

fn query_entities(query: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    for word in query.split_whitespace() {
        let clean: String = word.chars().filter(|c| c.is_alphanumeric() || *c == '-').collect();
        if clean.len() > 3
            && clean.chars().next().is_some_and(|c| c.is_uppercase())
            && !entities.contains(&clean)
        {
            entities.push(clean);
        }
    }
    entities
}

fn viability(corpus: &str) -> &'static str {
    if contains_any(corpus, &["effective", "successful", "promising", "approved"]) {
        "High"
    } else if contains_any(corpus, &["failed", "ineffective", "toxic", "discontinued"]) {
        "Low"
    } else {
        "Medium"
    }
}

fn clinical_risks(corpus: &str) -> Vec<&'static str> {
    let mut risks = Vec::new();
    if contains_any(corpus, &["toxicity", "toxic"]) {
        risks.push("toxicity concerns");
    }
    if contains_any(corpus, &["side effect", "adverse"]) {
        risks.push("adverse effects");
    }
    if corpus.contains("trial") && corpus.contains("fail") {
        risks.push("clinical trial failures");
    }
    if corpus.contains("bleeding") {
        risks.push("bleeding risk");
    }
    if risks.is_empty() {
        risks.push("standard development risks");
    }
    risks
}

fn market_signal(corpus: &str) -> &'static str {
    if contains_any(corpus, &["billion", "growing", "strong", "demand"]) {
        "Strong"
    } else if contains_any(corpus, &["declining", "weak", "saturated"]) {
        "Weak"
    } else {
        "Moderate"
    }
}

fn market_risks(corpus: &str) -> Vec<&'static str> {
    let mut risks = Vec::new();
    if contains_any(corpus, &["saturated", "crowded"]) {
        risks.push("market saturation");
    }
    if corpus.contains("competit") {
        risks.push("competitive pressure");
    }
    if contains_any(corpus, &["generic", "patent expir"]) {
        risks.push("generic erosion");
    }
    risks
}

fn recommendation(viability: &str, signal: &str) -> &'static str {
    if viability == "High" && signal == "Strong" {
        "Proceed"
    } else if viability == "Low" || signal == "Weak" {
        "Drop"
    } else {
        "Investigate Further"
    }
}

fn confidence(evidence: &[EvidenceLine]) -> f64 {
    if evidence.is_empty() {
        return 0.3;
    }

    let mut confidence: f64 = 0.5;
    if evidence.len() >= 3 {
        confidence += 0.2;
    }
    let scores: Vec<f64> = evidence.iter().filter_map(|e| e.relevance).collect();
    if !scores.is_empty() && scores.iter().sum::<f64>() / scores.len() as f64 > 0.5 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

#[async_trait]
impl ReasoningModel for RuleBasedModel {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<ModelResponse> {
        Ok(ModelResponse::Structured(
            self.analyze(invocation.stage, &invocation.prompt),
        ))
    }

    fn model_name(&self) -> &str {
        "rule-based"
    }
}
