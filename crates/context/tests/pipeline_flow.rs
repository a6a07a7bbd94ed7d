//! End-to-end pipeline runs against an in-memory corpus and scripted models

use async_trait::async_trait;
use drugvista_common::embeddings::{Embedder, HashingEmbedder};
use drugvista_common::errors::{AppError, PipelineErrorKind, Result};
use drugvista_common::llm::{ModelInvocation, ModelResponse, ReasoningModel, RuleBasedModel};
use drugvista_common::models::{DocumentCategory, Stage};
use drugvista_context::{NoRefinement, PipelineOptions, PipelineState, ReasoningPipeline};
use drugvista_search::{
    build_index, IndexHandle, RetrievalOptions, SourceDocument, StaticSource, VectorIndex, VectorRetriever,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIMENSION: usize = 256;

fn source(id: &str, text: &str, category: DocumentCategory) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        text: text.to_string(),
        source_label: format!("{id}.txt"),
        category,
    }
}

fn corpus() -> Vec<SourceDocument> {
    vec![
        source(
            "aspirin",
            "Aspirin molecular structure: acetylsalicylic acid, an acetylated salicylate that irreversibly inhibits COX-1.",
            DocumentCategory::Paper,
        ),
        source(
            "warfarin",
            "Warfarin anticoagulation trial: effective stroke prevention but bleeding events were frequent.",
            DocumentCategory::ClinicalTrial,
        ),
        source(
            "anticoag-market",
            "The anticoagulant market is a growing multi-billion dollar segment with strong demand and generic competition.",
            DocumentCategory::Market,
        ),
    ]
}

async fn handle_for(docs: Vec<SourceDocument>) -> IndexHandle {
    let embedder = HashingEmbedder::new(DIMENSION);
    let index = build_index(&StaticSource(docs), &embedder, 8).await.unwrap();
    IndexHandle::new(index)
}

fn retriever(handle: &IndexHandle) -> VectorRetriever {
    VectorRetriever::new(
        handle.clone(),
        Arc::new(HashingEmbedder::new(DIMENSION)),
        RetrievalOptions::default(),
    )
}

fn options() -> PipelineOptions {
    PipelineOptions {
        top_k: 5,
        refine_k: 3,
        max_evidence: 24,
        timeout: Duration::from_secs(10),
    }
}

enum Reply {
    Text(String),
    Fail(&'static str),
}

/// Replays canned replies per stage and records every prompt it was given
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<HashMap<Stage, VecDeque<Reply>>>,
    prompts: Mutex<Vec<(Stage, String)>>,
}

impl ScriptedModel {
    fn reply(self, stage: Stage, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(reply);
        self
    }

    fn prompts_for(&self, stage: Stage) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<ModelResponse> {
        self.prompts
            .lock()
            .unwrap()
            .push((invocation.stage, invocation.prompt.clone()));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&invocation.stage)
            .and_then(|queue| queue.pop_front());

        match reply {
            Some(Reply::Text(text)) => Ok(ModelResponse::Text(text)),
            Some(Reply::Fail(message)) => Err(AppError::Upstream {
                message: message.to_string(),
            }),
            None => Err(AppError::Upstream {
                message: format!("no scripted reply for {}", invocation.stage),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn context_reply(confidence: f64) -> Reply {
    Reply::Text(
        json!({
            "summary": "Anticoagulant and antiplatelet evidence",
            "intent": "molecule analysis",
            "entities": ["Aspirin", "Warfarin"],
            "citations": ["aspirin"],
            "confidence": confidence
        })
        .to_string(),
    )
}

fn clinical_reply(confidence: f64) -> Reply {
    Reply::Text(format!(
        "```json\n{}\n```",
        json!({
            "viability": "High",
            "risks": ["bleeding risk"],
            "findings": "Effective stroke prevention",
            "citations": ["warfarin", "aspirin"],
            "confidence": confidence
        })
    ))
}

fn market_reply(confidence: f64) -> Reply {
    Reply::Text(
        json!({
            "signal": "Strong",
            "risks": ["generic erosion", "bleeding risk"],
            "outlook": "Growing demand",
            "citations": ["anticoag-market"],
            "confidence": confidence
        })
        .to_string(),
    )
}

fn decision_reply(confidence: f64) -> Reply {
    Reply::Text(
        json!({
            "recommendation": "Proceed",
            "rationale": "Strong clinical and market support",
            "confidence": confidence
        })
        .to_string(),
    )
}

fn full_script() -> ScriptedModel {
    ScriptedModel::default()
        .reply(Stage::Context, context_reply(0.9))
        .reply(Stage::Clinical, clinical_reply(0.8))
        .reply(Stage::Market, market_reply(0.9))
        .reply(Stage::Decision, decision_reply(0.7))
}

#[tokio::test]
async fn completes_with_averaged_confidence() {
    let handle = handle_for(corpus()).await;
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(full_script()), options());

    let artifact = pipeline.analyze("Aspirin molecular structure").await.unwrap();

    assert_eq!(artifact.confidence_score, 0.83);
    assert_eq!(artifact.clinical_viability, "High");
    assert_eq!(artifact.market_signal, "Strong");
    assert_eq!(artifact.recommendation, "Proceed");
    assert_eq!(artifact.major_risks, vec!["bleeding risk", "generic erosion"]);
    assert_eq!(
        artifact.key_evidence,
        vec!["aspirin.txt", "warfarin.txt", "anticoag-market.txt"]
    );
}

#[tokio::test]
async fn clinical_model_error_fails_after_context() {
    let handle = handle_for(corpus()).await;
    let model = ScriptedModel::default()
        .reply(Stage::Context, context_reply(0.9))
        .reply(Stage::Clinical, Reply::Fail("connection reset by peer"));
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(model), options());

    let run = pipeline.execute("Warfarin bleeding risk").await;

    assert_eq!(run.state, PipelineState::Failed);
    assert!(run.artifact.is_none());
    assert_eq!(run.results.len(), 1);

    let failure = run.into_outcome().unwrap_err();
    assert_eq!(failure.kind, PipelineErrorKind::StageModel);
    assert_eq!(failure.failed_stage, Some(Stage::Clinical));
    assert_eq!(failure.last_completed_stage, Some(Stage::Context));
}

#[tokio::test]
async fn malformed_output_is_retried_once_with_strict_formatting() {
    let handle = handle_for(corpus()).await;
    let model = Arc::new(
        ScriptedModel::default()
            .reply(Stage::Context, context_reply(0.9))
            .reply(Stage::Clinical, clinical_reply(0.8))
            .reply(Stage::Market, Reply::Text("The market looks strong overall.".to_string()))
            .reply(Stage::Market, market_reply(0.9))
            .reply(Stage::Decision, decision_reply(0.7)),
    );
    let pipeline = ReasoningPipeline::new(retriever(&handle), model.clone(), options());

    let run = pipeline.execute("Aspirin molecular structure").await;
    assert!(run.is_complete());
    assert!(run.transitions.iter().any(|t| t.to
        == PipelineState::Running {
            stage: Stage::Market,
            attempt: 1
        }));

    let prompts = model.prompts_for(Stage::Market);
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("could not be parsed"));
    assert!(prompts[1].contains("could not be parsed"));
}

#[tokio::test]
async fn second_malformed_output_fails_the_stage() {
    let handle = handle_for(corpus()).await;
    let model = Arc::new(
        ScriptedModel::default()
            .reply(Stage::Context, context_reply(0.9))
            .reply(Stage::Clinical, clinical_reply(0.8))
            .reply(Stage::Market, Reply::Text("not json".to_string()))
            .reply(Stage::Market, Reply::Text("{\"signal\": \"Strong\"}".to_string())),
    );
    let pipeline = ReasoningPipeline::new(retriever(&handle), model.clone(), options());

    let failure = pipeline.analyze("Aspirin molecular structure").await.unwrap_err();

    assert_eq!(failure.kind, PipelineErrorKind::StageParse);
    assert_eq!(failure.failed_stage, Some(Stage::Market));
    assert_eq!(failure.last_completed_stage, Some(Stage::Clinical));
    assert_eq!(model.prompts_for(Stage::Market).len(), 2);
    assert!(model.prompts_for(Stage::Decision).is_empty());
}

#[tokio::test]
async fn citation_outside_evidence_is_rejected() {
    let handle = handle_for(corpus()).await;
    let bogus = || {
        Reply::Text(
            json!({
                "summary": "s", "intent": "i", "entities": [],
                "citations": ["not-in-corpus"]
            })
            .to_string(),
        )
    };
    let model = ScriptedModel::default()
        .reply(Stage::Context, bogus())
        .reply(Stage::Context, bogus());
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(model), options());

    let failure = pipeline.analyze("Aspirin").await.unwrap_err();
    assert_eq!(failure.kind, PipelineErrorKind::StageParse);
    assert_eq!(failure.last_completed_stage, None);
}

#[tokio::test]
async fn empty_corpus_still_completes() {
    let handle = IndexHandle::new(VectorIndex::new());
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(RuleBasedModel::new()), options());

    let run = pipeline.execute("Imatinib resistance in CML").await;
    assert!(run.is_complete());
    assert!(run.evidence.is_empty());

    let artifact = run.into_outcome().unwrap();
    assert!(artifact.key_evidence.is_empty());
    assert!((0.0..=1.0).contains(&artifact.confidence_score));
}

#[tokio::test]
async fn every_citation_traces_to_run_evidence() {
    let handle = handle_for(corpus()).await;
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(RuleBasedModel::new()), options());

    let run = pipeline.execute("Warfarin anticoagulation market").await;
    assert!(run.is_complete());

    for result in &run.results {
        for id in &result.cited_evidence {
            assert!(run.evidence.contains(id), "{id} cited but never retrieved");
        }
    }
    let labels: Vec<_> = run.evidence.iter().map(|e| e.source_label.clone()).collect();
    for label in &run.artifact.as_ref().unwrap().key_evidence {
        assert!(labels.contains(label));
    }
}

#[tokio::test]
async fn aspirin_query_puts_aspirin_evidence_first() {
    let handle = handle_for(vec![
        source(
            "warfarin",
            "Warfarin anticoagulation dosing and INR monitoring in atrial fibrillation.",
            DocumentCategory::ClinicalTrial,
        ),
        source(
            "aspirin",
            "Aspirin molecular structure: acetylsalicylic acid with an acetyl ester group.",
            DocumentCategory::Paper,
        ),
    ])
    .await;
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(RuleBasedModel::new()), options())
        .with_strategy(Arc::new(NoRefinement));

    let run = pipeline.execute("Aspirin molecular structure").await;

    let evidence = run.evidence.as_slice();
    assert_eq!(evidence.len(), 2);
    assert_eq!(evidence[0].document_id, "aspirin");
    assert!(evidence[0].relevance_score > evidence[1].relevance_score);
}

/// Waits forever at the Market stage
struct StallingModel {
    inner: ScriptedModel,
}

#[async_trait]
impl ReasoningModel for StallingModel {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<ModelResponse> {
        if invocation.stage == Stage::Market {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.invoke(invocation).await
    }

    fn model_name(&self) -> &str {
        "stalling"
    }
}

#[tokio::test]
async fn timeout_fails_the_run_and_keeps_progress() {
    let handle = handle_for(corpus()).await;
    let model = StallingModel { inner: full_script() };
    let pipeline = ReasoningPipeline::new(
        retriever(&handle),
        Arc::new(model),
        PipelineOptions {
            timeout: Duration::from_millis(500),
            ..options()
        },
    );

    let run = pipeline.execute("Aspirin molecular structure").await;
    assert_eq!(run.state, PipelineState::Failed);

    let failure = run.into_outcome().unwrap_err();
    assert_eq!(failure.kind, PipelineErrorKind::Timeout);
    assert_eq!(failure.failed_stage, Some(Stage::Market));
    assert_eq!(failure.last_completed_stage, Some(Stage::Clinical));
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::EmbeddingError {
            message: "embedding service unavailable".to_string(),
        })
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(AppError::EmbeddingError {
            message: "embedding service unavailable".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "down"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

#[tokio::test]
async fn retrieval_failure_fails_before_any_stage() {
    let handle = handle_for(corpus()).await;
    let model = Arc::new(full_script());
    let retriever = VectorRetriever::new(handle, Arc::new(DownEmbedder), RetrievalOptions::default());
    let pipeline = ReasoningPipeline::new(retriever, model.clone(), options());

    let failure = pipeline.analyze("Aspirin").await.unwrap_err();
    assert_eq!(failure.kind, PipelineErrorKind::Retrieval);
    assert_eq!(failure.failed_stage, Some(Stage::Context));
    assert_eq!(failure.last_completed_stage, None);
    assert!(model.prompts_for(Stage::Context).is_empty());
}

/// Swaps the live index for an unrelated corpus during the Context stage
struct RebuildingModel {
    handle: IndexHandle,
    replacement: Mutex<Option<VectorIndex>>,
}

#[async_trait]
impl ReasoningModel for RebuildingModel {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<ModelResponse> {
        if let Some(index) = self.replacement.lock().unwrap().take() {
            self.handle.replace(index);
        }
        RuleBasedModel::new().invoke(invocation).await
    }

    fn model_name(&self) -> &str {
        "rebuilding"
    }
}

#[tokio::test]
async fn run_keeps_its_snapshot_while_index_is_rebuilt() {
    let handle = handle_for(corpus()).await;
    let embedder = HashingEmbedder::new(DIMENSION);
    let replacement = build_index(
        &StaticSource(vec![source(
            "oncology-new",
            "Aspirin warfarin anticoagulant market structure oncology kinase",
            DocumentCategory::Paper,
        )]),
        &embedder,
        8,
    )
    .await
    .unwrap();

    let model = RebuildingModel {
        handle: handle.clone(),
        replacement: Mutex::new(Some(replacement)),
    };
    let pipeline = ReasoningPipeline::new(retriever(&handle), Arc::new(model), options());

    let run = pipeline.execute("Aspirin warfarin anticoagulant market").await;

    assert!(run.is_complete());
    assert!(handle.snapshot().contains("oncology-new"));
    assert!(!run.evidence.contains("oncology-new"));
    assert!(!run.evidence.is_empty());
}
