//! riskcase - ISO 31000 case study generation and response comparison server.

mod comparison;
mod config;
mod error;
mod gateway;
mod openai;
mod orchestrator;
mod output_store;
mod render;
#[cfg(test)]
mod testing;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::{get, post},
    Router,
};
use comparison::ComparisonResult;
use config::Settings;
use error::{ApiError, AppError};
use gateway::ModelGateway;
use openai::OpenAiClient;
use orchestrator::CaseOrchestrator;
use output_store::OutputStore;
use render::{pdf::PdfRenderer, RenderRequest, RendererAdapter};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: CaseOrchestrator,
    renderer: RendererAdapter,
    output: OutputStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "riskcase=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    // One client for the whole process, injected downwards.
    let client = OpenAiClient::new(&settings)?;
    info!("Model client initialized: {}", settings.base_url);

    let output = OutputStore::new(&settings.output_dir, &settings.public_prefix, settings.max_files)?;
    info!(
        "Documents stored in {:?}, served at {} (retention: {:?})",
        output.dir(),
        settings.public_prefix,
        settings.max_files
    );
    if !settings.escape_html {
        warn!("HTML escaping disabled for rendered documents");
    }

    let state = AppState {
        orchestrator: CaseOrchestrator::new(ModelGateway::new(
            Arc::new(client),
            settings.models.clone(),
        )),
        renderer: RendererAdapter::new(Arc::new(PdfRenderer::new()), settings.escape_html),
        output,
    };

    let app = router(state, &settings.public_prefix);

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, public_prefix: &str) -> Router {
    let documents = ServeDir::new(state.output.dir());

    Router::new()
        .route("/health", get(health))
        .route("/generate-case", post(generate_case))
        .route("/generate-ai-response", post(generate_ai_response))
        .route("/compare-responses", post(compare_responses))
        .route("/generate-case-pdf", post(generate_case_pdf))
        .route("/generate-comparison-pdf", post(generate_comparison_pdf))
        .nest_service(public_prefix, documents)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Absent, null and non-string values all read as an empty string.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        _ => String::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct CaseRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    topic: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaseStudyRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    case_study: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    user_response: String,
    #[serde(default, deserialize_with = "lenient_string")]
    ai_response: String,
    #[serde(default, deserialize_with = "lenient_string")]
    case_study: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComparisonPdfRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    user_response: String,
    #[serde(default, deserialize_with = "lenient_string")]
    ai_response: String,
    #[serde(default)]
    comparison: Option<Value>,
}

/// Success envelope: `status: "success"` plus the operation's fields.
#[derive(Debug, Serialize)]
struct Success<T> {
    status: &'static str,
    #[serde(flatten)]
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        status: "success",
        data,
    })
}

/// An unreadable body is treated like an empty one, so every field reports as missing.
fn body_or_default<T: Default>(body: Result<Json<T>, JsonRejection>) -> T {
    match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("Unreadable request body: {}", rejection);
            T::default()
        }
    }
}

fn fail(message: &'static str) -> impl FnOnce(AppError) -> ApiError {
    move |err| {
        match &err {
            AppError::Validation { .. } => warn!("{}: {}", message, err),
            _ => error!("{}: {}", message, err),
        }
        ApiError::new(message, err)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Generate a case study for a topic.
async fn generate_case(
    State(state): State<AppState>,
    body: Result<Json<CaseRequest>, JsonRejection>,
) -> Result<Json<Success<Value>>, ApiError> {
    let request = body_or_default(body);
    let case_study = state
        .orchestrator
        .create_case(&request.topic)
        .await
        .map_err(fail("Error al generar el caso de estudio"))?;

    Ok(success(json!({ "caseStudy": case_study })))
}

/// Generate the model's own response to a case study.
async fn generate_ai_response(
    State(state): State<AppState>,
    body: Result<Json<CaseStudyRequest>, JsonRejection>,
) -> Result<Json<Success<Value>>, ApiError> {
    let request = body_or_default(body);
    let ai_response = state
        .orchestrator
        .create_ai_response(&request.case_study)
        .await
        .map_err(fail("Error al generar la respuesta de IA"))?;

    Ok(success(json!({ "aiResponse": ai_response })))
}

/// Compare the user's response with the model's response.
async fn compare_responses(
    State(state): State<AppState>,
    body: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<Success<ComparisonResult>>, ApiError> {
    let request = body_or_default(body);
    let result = state
        .orchestrator
        .compare(&request.user_response, &request.ai_response, &request.case_study)
        .await
        .map_err(fail("Error al comparar las respuestas"))?;

    Ok(success(result))
}

/// Render a case study to PDF.
async fn generate_case_pdf(
    State(state): State<AppState>,
    body: Result<Json<CaseStudyRequest>, JsonRejection>,
) -> Result<Json<Success<Value>>, ApiError> {
    const MESSAGE: &str = "Error al generar el PDF del caso de estudio";
    let request = body_or_default(body);

    if request.case_study.trim().is_empty() {
        return Err(fail(MESSAGE)(AppError::missing(vec!["caseStudy"])));
    }

    let pdf_url = render_and_store(
        &state,
        RenderRequest::Case {
            case_study: request.case_study,
        },
    )
    .await
    .map_err(fail(MESSAGE))?;

    Ok(success(json!({ "pdfUrl": pdf_url })))
}

/// Render a comparison (both responses plus the comparison record) to PDF.
async fn generate_comparison_pdf(
    State(state): State<AppState>,
    body: Result<Json<ComparisonPdfRequest>, JsonRejection>,
) -> Result<Json<Success<Value>>, ApiError> {
    const MESSAGE: &str = "Error al generar el PDF de la comparación";
    let request = body_or_default(body);

    let mut missing = Vec::new();
    if request.user_response.trim().is_empty() {
        missing.push("userResponse");
    }
    if request.ai_response.trim().is_empty() {
        missing.push("aiResponse");
    }
    let comparison = match &request.comparison {
        Some(Value::Object(object)) => Some(ComparisonResult::from_object(object)),
        _ => {
            missing.push("comparison");
            None
        }
    };

    let comparison = match comparison {
        Some(comparison) if missing.is_empty() => comparison,
        _ => return Err(fail(MESSAGE)(AppError::missing(missing))),
    };

    let pdf_url = render_and_store(
        &state,
        RenderRequest::Comparison {
            user_response: request.user_response,
            ai_response: request.ai_response,
            comparison,
        },
    )
    .await
    .map_err(fail(MESSAGE))?;

    Ok(success(json!({ "pdfUrl": pdf_url })))
}

async fn render_and_store(state: &AppState, request: RenderRequest) -> Result<String, AppError> {
    let bytes = state.renderer.render(&request).await?;
    let document = state.output.store(request.file_prefix(), &bytes).await?;
    info!("Document {} written to {:?}", document.file_name, document.path);
    Ok(document.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOverrides;
    use crate::testing::ScriptedProvider;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        provider: Arc<ScriptedProvider>,
        tmp: tempfile::TempDir,
    }

    struct BrokenRenderer;

    impl render::DocumentRenderer for BrokenRenderer {
        fn render(&self, _html: &str) -> Result<Vec<u8>, AppError> {
            Err(AppError::Render("font table unavailable".to_string()))
        }
    }

    fn harness(answers: Vec<Result<String, AppError>>) -> Harness {
        harness_with_renderer(answers, Arc::new(PdfRenderer::new()))
    }

    fn harness_with_renderer(
        answers: Vec<Result<String, AppError>>,
        renderer: Arc<dyn render::DocumentRenderer>,
    ) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(answers));
        let state = AppState {
            orchestrator: CaseOrchestrator::new(ModelGateway::new(
                provider.clone(),
                ModelOverrides::default(),
            )),
            renderer: RendererAdapter::new(renderer, true),
            output: OutputStore::new(tmp.path().join("pdfs"), "/pdfs", Some(10)).unwrap(),
        };
        Harness {
            app: router(state, "/pdfs"),
            provider,
            tmp,
        }
    }

    async fn post(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_bytes(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(vec![]);
        let (status, body) = get_bytes(&h.app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_generate_case() {
        let h = harness(vec![Ok("Caso Nubeluz".to_string())]);
        let (status, body) = post(&h.app, "/generate-case", r#"{"topic": "ISO 31000"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success", "caseStudy": "Caso Nubeluz"}));
    }

    #[tokio::test]
    async fn test_generate_case_missing_topic() {
        let h = harness(vec![]);
        for payload in [r#"{}"#, r#"{"topic": ""}"#, r#"{"topic": null}"#, r#"{"topic": 7}"#, "no json"] {
            let (status, body) = post(&h.app, "/generate-case", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
            assert_eq!(body["status"], "error");
            assert_eq!(body["missingFields"], json!(["topic"]));
        }
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_generate_ai_response_upstream_error() {
        let h = harness(vec![Err(AppError::Upstream("API error (500)".to_string()))]);
        let (status, body) =
            post(&h.app, "/generate-ai-response", r#"{"caseStudy": "Caso"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Error al generar la respuesta de IA");
        assert!(body["details"].as_str().unwrap().contains("API error (500)"));
    }

    #[tokio::test]
    async fn test_compare_missing_fields() {
        let h = harness(vec![]);
        let (status, body) =
            post(&h.app, "/compare-responses", r#"{"aiResponse": "IA"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["missingFields"], json!(["userResponse", "caseStudy"]));
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_compare_success_fills_fallbacks() {
        let h = harness(vec![Ok(
            "Claro: {\"similarityPercentage\": \"70%\", \"patterns\": \"p\", \"differences\": \"\"}".to_string(),
        )]);
        let (status, body) = post(
            &h.app,
            "/compare-responses",
            r#"{"userResponse": "Mi respuesta", "aiResponse": "IA", "caseStudy": "Caso"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "status": "success",
                "similarityPercentage": "70%",
                "patterns": "p",
                "similarities": comparison::FALLBACK_SIMILARITIES,
                "differences": comparison::FALLBACK_DIFFERENCES,
                "reliability": comparison::FALLBACK_RELIABILITY,
            })
        );
    }

    #[tokio::test]
    async fn test_compare_malformed_output() {
        let h = harness(vec![Ok("No puedo responder en JSON".to_string())]);
        let (status, body) = post(
            &h.app,
            "/compare-responses",
            r#"{"userResponse": "u", "aiResponse": "a", "caseStudy": "c"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error al comparar las respuestas");
        assert!(body["details"].as_str().unwrap().starts_with("malformed upstream output"));
    }

    #[tokio::test]
    async fn test_case_pdf_is_stored_and_served() {
        let h = harness(vec![]);
        let (status, body) =
            post(&h.app, "/generate-case-pdf", r#"{"caseStudy": "Texto de prueba"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let url = body["pdfUrl"].as_str().unwrap();
        assert!(url.starts_with("/pdfs/caso_") && url.ends_with(".pdf"));

        let (status, bytes) = get_bytes(&h.app, url).await;
        assert_eq!(status, StatusCode::OK);
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.windows(15).any(|w| w == b"Texto de prueba"));
    }

    #[tokio::test]
    async fn test_case_pdf_missing_case() {
        let h = harness(vec![]);
        let (status, body) = post(&h.app, "/generate-case-pdf", r#"{"caseStudy": "  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["missingFields"], json!(["caseStudy"]));
    }

    #[tokio::test]
    async fn test_comparison_pdf() {
        let h = harness(vec![]);
        let (status, body) = post(
            &h.app,
            "/generate-comparison-pdf",
            r#"{"userResponse": "u", "aiResponse": "a", "comparison": {"similarityPercentage": "10%"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["pdfUrl"].as_str().unwrap().starts_with("/pdfs/comparacion_"));

        let (status, body) = post(
            &h.app,
            "/generate-comparison-pdf",
            r#"{"aiResponse": "a", "comparison": "texto"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["missingFields"], json!(["userResponse", "comparison"]));
    }

    #[tokio::test]
    async fn test_pdf_routes_report_render_failure() {
        let h = harness_with_renderer(vec![], Arc::new(BrokenRenderer));

        let (status, body) =
            post(&h.app, "/generate-case-pdf", r#"{"caseStudy": "Caso"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Error al generar el PDF del caso de estudio");
        assert!(body["details"].as_str().unwrap().contains("font table unavailable"));

        let (status, body) = post(
            &h.app,
            "/generate-comparison-pdf",
            r#"{"userResponse": "u", "aiResponse": "a", "comparison": {}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error al generar el PDF de la comparación");
        assert!(body["details"].as_str().unwrap().starts_with("render error"));
    }

    #[tokio::test]
    async fn test_case_pdf_reports_storage_failure() {
        let h = harness(vec![]);
        std::fs::remove_dir_all(h.tmp.path().join("pdfs")).unwrap();

        let (status, body) =
            post(&h.app, "/generate-case-pdf", r#"{"caseStudy": "Caso"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error al generar el PDF del caso de estudio");
        assert!(body["details"].as_str().unwrap().starts_with("storage error"));
    }

    #[tokio::test]
    async fn test_unknown_document_is_404() {
        let h = harness(vec![]);
        let (status, _) = get_bytes(&h.app, "/pdfs/caso_1.pdf").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
