//! # HTTP Server
//!
//! Serves recommendations from a [`ModelStore`] over axum.
//!
//! | Method | Path             | Response |
//! |--------|------------------|----------|
//! | GET    | `/healthz`       | `{"status": "ok"}` |
//! | GET    | `/api/model`     | metadata of the active model, or 503 |
//! | POST   | `/api/recommend` | `{"songs": [...], "limit": n}` → recommendations, or 503 |
//!
//! Every model-backed request refreshes the store first, on the blocking
//! pool, so a retrained artifact is picked up without restarting. Once a
//! model has loaded the server keeps answering from it even if later
//! artifacts are broken; 503 only happens before the first successful load.
//!
//! Every failure, including a request body that is not valid JSON for the
//! route, is answered as `{"error": "..."}`.

use crate::artifact::{ArtifactFormat, ArtifactMetadata};
use crate::config::ServeConfig;
use crate::matcher::Recommendation;
use crate::store::{LoadedModel, ModelStore, RefreshOutcome};
use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<ModelStore>,
    pub default_limit: Option<usize>,
}

impl ServerState {
    #[must_use]
    pub fn new(store: Arc<ModelStore>, default_limit: Option<usize>) -> Self {
        Self {
            store,
            default_limit,
        }
    }
}

impl FromRef<ServerState> for Arc<ModelStore> {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

#[derive(Debug, Deserialize)]
struct RecommendRequest {
    #[serde(default)]
    songs: Vec<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RecommendResponse {
    songs: Vec<String>,
    no_recommendation: bool,
    version: &'static str,
    model_date: Option<String>,
    matched_rules: usize,
}

#[derive(Debug, Serialize)]
struct ModelInfo<'a> {
    path: String,
    format: &'static str,
    rules: usize,
    skipped_rules: usize,
    loaded_at: String,
    metadata: &'a ArtifactMetadata,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn current_model(store: Arc<ModelStore>) -> Result<Arc<LoadedModel>, Response> {
    match tokio::task::spawn_blocking(move || store.current()).await {
        Ok(Ok(model)) => Ok(model),
        Ok(Err(e)) => Err(error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
        Err(e) => {
            error!("Model refresh task failed: {e}");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "model refresh failed",
            ))
        }
    }
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn model_info(State(store): State<Arc<ModelStore>>) -> Response {
    let model = match current_model(store.clone()).await {
        Ok(model) => model,
        Err(response) => return response,
    };
    let info = ModelInfo {
        path: store.path().display().to_string(),
        format: match model.format() {
            ArtifactFormat::Versioned => "versioned",
            ArtifactFormat::Legacy => "legacy",
        },
        rules: model.artifact().rules().len(),
        skipped_rules: model.skipped_rules(),
        loaded_at: model.loaded_at().to_rfc3339(),
        metadata: model.artifact().metadata(),
    };
    Json(info).into_response()
}

async fn recommend(
    State(state): State<ServerState>,
    payload: Result<Json<RecommendRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected recommend request: {}", rejection.body_text());
            return error_response(rejection.status(), rejection.body_text());
        }
    };

    let model = match current_model(state.store.clone()).await {
        Ok(model) => model,
        Err(response) => return response,
    };

    let limit = request.limit.or(state.default_limit);
    let recommendation = model.recommend(&request.songs, limit);
    info!(
        "Recommend: {} query songs -> {} tracks from {} rules",
        request.songs.len(),
        recommendation.tracks().len(),
        recommendation.matched_rules()
    );

    let response = RecommendResponse {
        no_recommendation: matches!(recommendation, Recommendation::NoRecommendation),
        matched_rules: recommendation.matched_rules(),
        songs: recommendation
            .track_ids()
            .into_iter()
            .map(str::to_string)
            .collect(),
        version: env!("CARGO_PKG_VERSION"),
        model_date: model
            .artifact()
            .metadata()
            .created_at
            .map(|ts| ts.to_rfc3339()),
    };
    Json(response).into_response()
}

/// Build the application router.
pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/model", get(model_info))
        .route("/api/recommend", post(recommend))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, finishing in-flight requests");
}

/// Load the model once, bind and serve until Ctrl+C.
///
/// A missing or broken artifact at startup is not fatal: the server answers
/// 503 until a valid one appears.
///
/// # Errors
///
/// Fails when the address cannot be bound or the server stops with an IO
/// error.
pub async fn run_server(config: ServeConfig) -> Result<(), ServerError> {
    let store = Arc::new(ModelStore::new(&config.model_path));

    let warmup = store.clone();
    match tokio::task::spawn_blocking(move || warmup.refresh()).await {
        Ok(RefreshOutcome::Loaded) => {}
        Ok(_) => warn!(
            "Starting without a model; waiting for {}",
            config.model_path.display()
        ),
        Err(e) => error!("Initial model load panicked: {e}"),
    }

    let app = make_app(ServerState::new(store, config.default_limit));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;
    info!("Server stopped");
    Ok(())
}
