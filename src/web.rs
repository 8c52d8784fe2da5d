use crate::{
    assistant::{Assistant, Reply},
    retrieval::{SearchError, SearchResult},
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

struct SharedState {
    assistant: Arc<Assistant>,
    default_threshold: f32,
}

fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/search", post(search))
        .route("/api/ask", post(ask))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn start_app(assistant: Assistant, bind: &str, default_threshold: f32) -> anyhow::Result<()> {
    let state = Arc::new(SharedState {
        assistant: Arc::new(assistant),
        default_threshold,
    });

    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {e}");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => log::error!("failed to install signal handler: {e}"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        log::warn!("shutting down");
    }

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Serve the HTTP API until Ctrl+C or SIGTERM.
pub fn start_daemon(assistant: Assistant, bind: &str, default_threshold: f32) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(assistant, bind, default_threshold))
}

#[derive(Debug)]
enum HttpError {
    BadRequest(String),
    Search(SearchError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            HttpError::BadRequest(msg) => (axum::http::StatusCode::BAD_REQUEST, msg.clone()),
            HttpError::Search(err) => {
                log::error!("{err:?}");
                let status = match err {
                    SearchError::IndexNotFound(_)
                    | SearchError::IndexCorrupt(_)
                    | SearchError::ModelMismatch { .. }
                    | SearchError::DimensionMismatch { .. } => {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        Self::Search(err)
    }
}

#[derive(Serialize)]
struct StatusResponse {
    model: String,
    entries: usize,
    dimensions: usize,
    built_at: String,
    generator: bool,
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<StatusResponse> {
    let assistant = &state.assistant;
    let searcher = assistant.searcher();
    Json(StatusResponse {
        model: searcher.model_identifier().to_string(),
        entries: searcher.len(),
        dimensions: searcher.dimensions(),
        built_at: searcher.built_at().to_rfc3339(),
        generator: assistant.has_generator(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let top_k = validate_top_k(payload.top_k.unwrap_or(state.assistant.top_k()))?;
    let assistant = state.assistant.clone();

    tokio::task::block_in_place(move || {
        assistant
            .searcher()
            .search(&payload.query, top_k)
            .map(Json)
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
    pub threshold: Option<f32>,
    pub top_k: Option<usize>,
}

async fn ask(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<Reply>, HttpError> {
    log::debug!("payload: {payload:?}");

    let threshold = payload.threshold.unwrap_or(state.default_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(HttpError::BadRequest(format!(
            "threshold must be between 0.0 and 1.0, got {threshold}"
        )));
    }
    let top_k = validate_top_k(payload.top_k.unwrap_or(state.assistant.top_k()))?;
    let assistant = state.assistant.clone();

    tokio::task::block_in_place(move || {
        assistant
            .respond_with(&payload.query, threshold, top_k, |_| {})
            .map(Json)
            .map_err(Into::into)
    })
}

fn validate_top_k(top_k: usize) -> Result<usize, HttpError> {
    if top_k == 0 {
        return Err(HttpError::BadRequest(
            "top_k must be greater than 0".to_string(),
        ));
    }
    Ok(top_k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Searcher;
    use crate::tests::{build_store, HashedWordsEmbedder, FAQ, TEST_MODEL};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let (store, tmp) = build_store(FAQ);
        let searcher = Searcher::open(&store, Box::new(HashedWordsEmbedder::new())).unwrap();
        let state = Arc::new(SharedState {
            assistant: Arc::new(Assistant::new(Arc::new(searcher), None, 3)),
            default_threshold: 0.6,
        });
        (router(state), tmp)
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status() {
        let (app, _tmp) = test_router();
        let request = Request::builder().uri("/api/status").body(Body::empty()).unwrap();
        let resp = app.oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["model"], TEST_MODEL);
        assert_eq!(body["entries"], FAQ.len());
        assert_eq!(body["dimensions"], 1024);
        assert_eq!(body["generator"], false);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search() {
        let (app, _tmp) = test_router();
        let (status, body) = call(app, "POST", "/api/search", json!({"query": "refund", "top_k": 2})).await;

        assert_eq!(status, StatusCode::OK);
        let results = body.as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["entry"]["question"], "How do I get a refund?");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ask_from_knowledge_base() {
        let (app, _tmp) = test_router();
        let (status, body) = call(
            app,
            "POST",
            "/api/ask",
            json!({"query": "refund policy", "threshold": 0.3}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "Contact support within 30 days.");
        assert_eq!(body["source"]["kind"], "knowledge_base");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ask_fallback_uses_default_threshold() {
        let (app, _tmp) = test_router();
        let (status, body) = call(app, "POST", "/api/ask", json!({"query": "refund policy"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"]["kind"], "no_generator");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejects_bad_parameters() {
        let (app, _tmp) = test_router();
        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/ask",
            json!({"query": "refund", "threshold": 1.5}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("threshold"));

        let (status, _) = call(app, "POST", "/api/search", json!({"query": "refund", "top_k": 0})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
