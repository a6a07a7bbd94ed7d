//! DrugVista API Gateway
//!
//! The HTTP boundary of the analysis service.
//! Handles:
//! - Drug/disease analysis requests (artifact and explained trace)
//! - Corpus ingestion into the live vector index
//! - Health, readiness and index statistics
//! - Observability (logging, metrics)

mod handlers;
mod state;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    routing::{get, post},
    Router,
};
use drugvista_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics::{self, LATENCY_BUCKETS, REASONING_BUCKETS},
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::future::IntoFuture;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Span};
use tracing_subscriber::EnvFilter;

pub use state::AppState;

/// Headroom for the JSON envelope around an inline upload
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Logging comes up first so a bad configuration is still reported
    let loaded = AppConfig::load();
    let observability = loaded
        .as_ref()
        .map(|c| c.observability.clone())
        .unwrap_or_default();
    init_tracing(&observability);

    info!("Starting DrugVista API Gateway v{}", drugvista_common::VERSION);

    let config = loaded.map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Initialize metrics; descriptions only stick once a recorder is installed
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    // Load or build the corpus index
    info!(data_dir = %config.corpus.data_dir.display(), "Loading corpus index...");
    let state = AppState::initialize(config.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize application state");
        e
    })?;

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(service = %config.observability.service_name, "Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(true);
        })
        .into_future();

    let drain_timeout = config.shutdown_timeout();
    let drain_deadline = async move {
        if stop_rx.wait_for(|stopping| *stopping).await.is_ok() {
            tokio::time::sleep(drain_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => warn!(
            timeout_secs = drain_timeout.as_secs(),
            "Shutdown timeout elapsed with requests still in flight"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Suffix("request_duration_seconds".to_string()), LATENCY_BUCKETS)?
        .set_buckets_for_metric(Matcher::Suffix("retrieval_duration_seconds".to_string()), LATENCY_BUCKETS)?
        .set_buckets_for_metric(Matcher::Suffix("embedding_duration_seconds".to_string()), LATENCY_BUCKETS)?
        .set_buckets_for_metric(Matcher::Suffix("stage_duration_seconds".to_string()), REASONING_BUCKETS)?
        .set_buckets_for_metric(Matcher::Suffix("pipeline_duration_seconds".to_string()), REASONING_BUCKETS)?
        .install()?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Root span of every request, tagged with the configured service name
fn request_span(service: &str, request: &Request<Body>) -> Span {
    info_span!(
        "request",
        service = %service,
        method = %request.method(),
        uri = %request.uri()
    )
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let body_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes + BODY_OVERHEAD_BYTES);

    let service = state.config.observability.service_name.clone();
    let trace =
        TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| request_span(&service, request));

    // Analysis is bounded by the pipeline's own timeout
    let analysis_routes = Router::new()
        .route("/analyze", post(handlers::analyze::analyze))
        .route("/analyze/explain", post(handlers::analyze::explain));

    let corpus_routes = Router::new()
        .route("/ingest", post(handlers::ingest::ingest))
        .route("/ingest-text", post(handlers::ingest::ingest_text))
        .route("/stats", get(handlers::stats::stats))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", analysis_routes.merge(corpus_routes))
        .layer(body_limit)
        .layer(trace)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use drugvista_common::{
        embeddings::{Embedder, HashingEmbedder},
        errors::{AppError, Result},
        llm::{ModelInvocation, ModelResponse, ReasoningModel, RuleBasedModel},
        models::DocumentCategory,
    };
    use base64::{engine::general_purpose::STANDARD, Engine};
    use drugvista_search::{embed_documents, text_record, VectorIndex};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    struct DownModel;

    #[async_trait]
    impl ReasoningModel for DownModel {
        async fn invoke(&self, _invocation: &ModelInvocation) -> Result<ModelResponse> {
            Err(AppError::Upstream {
                message: "connection refused".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    async fn test_state(dir: &std::path::Path, model: Arc<dyn ReasoningModel>) -> AppState {
        let mut config = AppConfig::default();
        config.corpus.index_path = dir.join("index.json");

        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128));
        let records = vec![
            text_record(
                "aspirin_structure.txt",
                "Aspirin (acetylsalicylic acid) molecular structure: an acetyl ester of salicylic acid.",
                DocumentCategory::Paper,
            )
            .unwrap(),
            text_record(
                "warfarin_market.txt",
                "Warfarin sales declined as direct oral anticoagulants gained market share.",
                DocumentCategory::Market,
            )
            .unwrap(),
        ];
        let documents = embed_documents(records, embedder.as_ref(), 8).await.unwrap();
        let index = VectorIndex::from_documents(documents).unwrap();

        AppState::new(config, index, embedder, model)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);

        let (status, body) = send(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reports_index_size() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);

        let (status, body) = send(app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["index"]["documents"], 2);
    }

    #[tokio::test]
    async fn test_analyze_returns_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);

        let (status, body) = send(
            app,
            "POST",
            "/v1/analyze",
            Some(json!({ "query": "Aspirin molecular structure" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        for field in ["clinical_viability", "market_signal", "recommendation"] {
            assert!(body[field].is_string(), "missing {}", field);
        }
        assert!(body["key_evidence"].is_array());
        assert!(body["major_risks"].is_array());
        let confidence = body["confidence_score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[tokio::test]
    async fn test_short_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);

        let (status, body) = send(app, "POST", "/v1/analyze", Some(json!({ "query": "  ab  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_model_outage_reports_failed_stage() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(DownModel)).await);

        let (status, body) = send(
            app,
            "POST",
            "/v1/analyze",
            Some(json!({ "query": "Warfarin market outlook" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "STAGE_MODEL_ERROR");
        assert_eq!(body["error"]["details"]["kind"], "stage_model");
        assert_eq!(body["error"]["details"]["failed_stage"], "Context");
        assert!(body["error"]["details"]["last_completed_stage"].is_null());
    }

    #[tokio::test]
    async fn test_explain_includes_trace() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);

        let (status, body) = send(
            app,
            "POST",
            "/v1/analyze/explain",
            Some(json!({ "query": "Aspirin molecular structure" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stages"].as_array().unwrap().len(), 4);
        assert!(body["explanation"].as_str().unwrap().contains("**Confidence:**"));
        assert_eq!(body["transitions"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_ingest_text_grows_index_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(RuleBasedModel::new())).await;
        let app = create_router(state.clone());
        let upload = json!({
            "title": "metformin_trial.txt",
            "content": "Metformin phase III trial met its primary HbA1c endpoint.",
            "doc_type": "clinical_trial"
        });

        let (status, body) = send(app.clone(), "POST", "/v1/ingest-text", Some(upload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["records_added"], 1);
        assert_eq!(body["total_documents"], 3);
        assert_eq!(body["persisted"], true);
        assert!(state.config.corpus.index_path.exists());

        let (status, _) = send(app.clone(), "POST", "/v1/ingest-text", Some(upload)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, stats) = send(app, "GET", "/v1/stats", None).await;
        assert_eq!(stats["documents"], 3);
        assert_eq!(stats["categories"]["clinical_trial"], 1);
        assert_eq!(stats["dimension"], 128);
    }

    #[tokio::test]
    async fn test_ingest_csv_splits_rows() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);
        let upload = json!({
            "filename": "trials.csv",
            "content": "drug,phase,outcome\nAspirin,III,reduced stroke risk\nWarfarin,IV,bleeding events observed\n",
            "doc_type": "clinical_trial"
        });

        let (status, body) = send(app, "POST", "/v1/ingest", Some(upload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["records_added"], 2);
        assert_eq!(body["total_documents"], 4);
    }

    #[tokio::test]
    async fn test_ingest_rejects_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);
        let upload = json!({ "filename": "setup.exe", "content": "MZ binary content here" });

        let (status, body) = send(app, "POST", "/v1/ingest", Some(upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    /// A one-page PDF with a single line of text
    fn pdf_bytes(line: &str) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_ingest_base64_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);
        let upload = json!({
            "filename": "imatinib_review.pdf",
            "content_base64": STANDARD.encode(pdf_bytes("Imatinib inhibits the BCR-ABL tyrosine kinase.")),
            "doc_type": "paper"
        });

        let (status, body) = send(app.clone(), "POST", "/v1/ingest", Some(upload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["records_added"], 1);
        assert_eq!(body["total_documents"], 3);
        assert_eq!(body["category"], "paper");

        let (_, stats) = send(app, "GET", "/v1/stats", None).await;
        assert_eq!(stats["categories"]["paper"], 2);
    }

    #[tokio::test]
    async fn test_ingest_pdf_requires_base64() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);

        let upload = json!({ "filename": "scan.pdf", "content": "%PDF-1.7 binary content here" });
        let (status, body) = send(app.clone(), "POST", "/v1/ingest", Some(upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("content_base64"));

        let upload = json!({ "filename": "scan.pdf", "content_base64": "not base64 at all!" });
        let (status, _) = send(app.clone(), "POST", "/v1/ingest", Some(upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let upload = json!({ "filename": "scan.pdf", "content_base64": STANDARD.encode(b"no PDF header in here") });
        let (status, body) = send(app, "POST", "/v1/ingest", Some(upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn test_ingest_base64_text_matches_inline() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), Arc::new(RuleBasedModel::new())).await);
        let text = "Statins lower LDL cholesterol and cardiovascular risk.";

        let encoded = json!({ "filename": "statins.txt", "content_base64": STANDARD.encode(text) });
        let (status, _) = send(app.clone(), "POST", "/v1/ingest", Some(encoded)).await;
        assert_eq!(status, StatusCode::CREATED);

        let inline = json!({ "filename": "statins.txt", "content": text });
        let (status, _) = send(app, "POST", "/v1/ingest", Some(inline)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    /// Records the fields of every span opened while installed
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<String>>>);

    struct FieldWriter<'a>(&'a mut Vec<String>);

    impl tracing::field::Visit for FieldWriter<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push(format!("{}={:?}", field.name(), value));
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, _id: &tracing::span::Id, _ctx: Context<'_, S>) {
            let mut fields = self.0.lock().unwrap();
            attrs.record(&mut FieldWriter(&mut *fields));
        }
    }

    #[tokio::test]
    async fn test_request_span_carries_service_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = test_state(dir.path(), Arc::new(RuleBasedModel::new())).await;
        let mut config = (*state.config).clone();
        config.observability.service_name = "drugvista-staging".to_string();
        state.config = Arc::new(config);

        let spans = SpanFields::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

        let (status, _) = send(create_router(state), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);

        let fields = spans.0.lock().unwrap();
        assert!(fields.contains(&"service=drugvista-staging".to_string()), "{:?}", fields);
        assert!(fields.contains(&"uri=/health".to_string()));
    }
}
