use crate::{
    engine::{errors::StorageError, queue::QueueSnapshot, Engine},
    links::LinkRecord,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    let shared_state = Arc::new(SharedState { engine });

    Router::new()
        .route("/api/message", post(message))
        .route("/api/links", get(links))
        .route("/api/queue", get(queue))
        // captures carry the full page text
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal(engine: Arc<Engine>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down, persisting outbound queue");
    engine.shutdown().await;
}

pub async fn serve(engine: Arc<Engine>, listen: &str) -> anyhow::Result<()> {
    let app = router(engine.clone());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {listen}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await?;

    Ok(())
}

#[derive(Debug)]
struct HttpError(StorageError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        log::error!("{:?}", self.0);
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": self.0.to_string()})),
        )
            .into_response()
    }
}

impl From<StorageError> for HttpError {
    fn from(err: StorageError) -> Self {
        Self(err)
    }
}

async fn message(State(state): State<Arc<SharedState>>, Json(payload): Json<Value>) -> Json<Value> {
    log::debug!("message: {}", payload.get("type").unwrap_or(&Value::Null));

    Json(state.engine.handle(payload).await.unwrap_or(Value::Null))
}

async fn links(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<LinkRecord>>, HttpError> {
    Ok(Json(state.engine.links().all().await?))
}

async fn queue(State(state): State<Arc<SharedState>>) -> Json<QueueSnapshot> {
    Json(state.engine.queue().snapshot().await)
}
