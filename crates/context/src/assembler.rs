//! Result assembly
//!
//! Maps the four stage results of a run onto the [`AnalysisArtifact`] and
//! computes its confidence score. Every mapped field must be present and
//! every citation must resolve to evidence the run actually retrieved.

use crate::pipeline::PipelineRun;
use drugvista_common::errors::{AppError, Result};
use drugvista_common::models::{AnalysisArtifact, ConfidenceLevel, Stage, StageResult};
use std::fmt::Write;

/// Mean of the stage confidences, clamped to [0, 1], rounded half-up to two
/// decimals. No confidences gives 0.
pub fn aggregate_confidence(raw: &[f64]) -> f64 {
    if raw.is_empty() {
        return 0.0;
    }
    let mean = raw.iter().sum::<f64>() / raw.len() as f64;
    let clamped = if mean.is_finite() { mean.clamp(0.0, 1.0) } else { 0.0 };

    // Settle float noise at four decimals before rounding to two
    let basis_points = (clamped * 10_000.0).round();
    (basis_points / 100.0).round() / 100.0
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResultAssembler;

fn missing(what: String) -> AppError {
    AppError::Assembly { message: what }
}

fn stage_result(run: &PipelineRun, stage: Stage) -> Result<&StageResult> {
    run.result(stage)
        .ok_or_else(|| missing(format!("no {} stage result", stage)))
}

fn text_field<'a>(result: &'a StageResult, field: &str) -> Result<&'a str> {
    result
        .text(field)
        .ok_or_else(|| missing(format!("{} stage has no `{}` text", result.stage, field)))
}

fn list_field<'a>(result: &'a StageResult, field: &str) -> Result<&'a [String]> {
    result
        .list(field)
        .ok_or_else(|| missing(format!("{} stage has no `{}` list", result.stage, field)))
}

impl ResultAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, run: &PipelineRun) -> Result<AnalysisArtifact> {
        let context = stage_result(run, Stage::Context)?;
        let clinical = stage_result(run, Stage::Clinical)?;
        let market = stage_result(run, Stage::Market)?;
        let decision = stage_result(run, Stage::Decision)?;

        let mut major_risks: Vec<String> = Vec::new();
        for risk in list_field(clinical, "risks")?.iter().chain(list_field(market, "risks")?) {
            if !major_risks.contains(risk) {
                major_risks.push(risk.clone());
            }
        }

        let mut key_evidence: Vec<String> = Vec::new();
        for result in [context, clinical, market, decision] {
            for document_id in &result.cited_evidence {
                let item = run.evidence.get(document_id).ok_or_else(|| {
                    missing(format!(
                        "{} stage cites {} which is not in the run's evidence",
                        result.stage, document_id
                    ))
                })?;
                if !key_evidence.contains(&item.source_label) {
                    key_evidence.push(item.source_label.clone());
                }
            }
        }

        let confidences = [context, clinical, market, decision].map(|r| r.raw_confidence);

        Ok(AnalysisArtifact {
            clinical_viability: text_field(clinical, "viability")?.to_string(),
            key_evidence,
            major_risks,
            market_signal: text_field(market, "signal")?.to_string(),
            recommendation: text_field(decision, "recommendation")?.to_string(),
            confidence_score: aggregate_confidence(&confidences),
        })
    }

    /// Markdown explanation of a completed run
    pub fn explain(&self, run: &PipelineRun, artifact: &AnalysisArtifact) -> String {
        let level = ConfidenceLevel::from_score(artifact.confidence_score);
        let mut out = String::new();

        let _ = writeln!(out, "## Analysis: {}", run.query);
        let _ = writeln!(out);
        let _ = writeln!(out, "**Recommendation:** {}", artifact.recommendation);
        let _ = writeln!(
            out,
            "**Confidence:** {:.2} ({})",
            artifact.confidence_score,
            level.as_str()
        );
        if let Some(rationale) = run.result(Stage::Decision).and_then(|r| r.text("rationale")) {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", rationale);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "### Clinical viability: {}", artifact.clinical_viability);
        if let Some(findings) = run.result(Stage::Clinical).and_then(|r| r.text("findings")) {
            let _ = writeln!(out, "{}", findings);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "### Market signal: {}", artifact.market_signal);
        if let Some(outlook) = run.result(Stage::Market).and_then(|r| r.text("outlook")) {
            let _ = writeln!(out, "{}", outlook);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "### Major risks");
        if artifact.major_risks.is_empty() {
            let _ = writeln!(out, "- none identified");
        }
        for risk in &artifact.major_risks {
            let _ = writeln!(out, "- {}", risk);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "### Key evidence");
        if artifact.key_evidence.is_empty() {
            let _ = writeln!(out, "- no documents cited");
        }
        for label in &artifact.key_evidence {
            let _ = writeln!(out, "- {}", label);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "### Stage trace");
        let _ = writeln!(out, "| Stage | Confidence | Citations |");
        let _ = writeln!(out, "|---|---|---|");
        for result in &run.results {
            let _ = writeln!(
                out,
                "| {} | {:.2} | {} |",
                result.stage,
                result.raw_confidence,
                result.cited_evidence.len()
            );
        }

        out
    }
}
