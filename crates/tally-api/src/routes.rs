use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::sync::{PullRequest, PushRequest, SyncResponse};
use tally_core::{CollectionName, Record};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::CollectionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<CollectionStore>,
}

impl AppState {
    pub const fn new(config: Arc<AppConfig>, store: Arc<CollectionStore>) -> Self {
        Self { config, store }
    }
}

pub fn app_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sync", post(push_batch))
        .route("/v1/pull", post(pull_batch))
        .route("/sync", post(upload_collection))
        .route("/get", get(download_collection))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn push_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SyncResponse<Record>>, AppError> {
    let request: PushRequest<Record> = parse_body(&body)?;
    let accepted = state
        .store
        .push(&request.collection, &request.data, request.last_sync_time)
        .await?;
    Ok(Json(accepted.response))
}

async fn pull_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SyncResponse<Record>>, AppError> {
    let request: PullRequest = parse_body(&body)?;
    let response = state
        .store
        .pull(&request.collection, request.last_sync_time)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct EndpointQuery {
    endpoint: String,
}

impl EndpointQuery {
    fn collection(&self) -> Result<CollectionName, AppError> {
        Ok(CollectionName::new(self.endpoint.as_str())?)
    }
}

async fn upload_collection(
    State(state): State<AppState>,
    Query(query): Query<EndpointQuery>,
    body: Bytes,
) -> Result<Json<Vec<Record>>, AppError> {
    let collection = query.collection()?;
    let value: Value = parse_body(&body)?;
    if !value.is_array() {
        return Err(AppError::bad_request("body must be a JSON array"));
    }
    let incoming: Vec<Record> = serde_json::from_value(value)
        .map_err(|error| AppError::bad_request(format!("malformed record: {error}")))?;

    let accepted = state.store.push(&collection, &incoming, None).await?;
    Ok(Json(accepted.stored))
}

async fn download_collection(
    State(state): State<AppState>,
    Query(query): Query<EndpointQuery>,
) -> Result<Json<Vec<Record>>, AppError> {
    let collection = query.collection()?;
    let response = state.store.pull(&collection, None).await?;
    Ok(Json(response.data))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|error| AppError::bad_request(format!("malformed body: {error}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tally_core::sync::{AnyTransport, SyncTransport, TransportKind};
    use tally_core::SyncRecord;

    async fn serve(data_dir: PathBuf) -> String {
        let config = Arc::new(AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            data_dir: data_dir.clone(),
            max_body_bytes: 64 * 1024,
        });
        let store = Arc::new(CollectionStore::open(data_dir).await.unwrap());
        let router = app_router(AppState::new(config, store));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn records(value: Value) -> Vec<Record> {
        serde_json::from_value(value).unwrap()
    }

    fn transport(kind: TransportKind, base: &str) -> AnyTransport {
        AnyTransport::new(kind, base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn rpc_push_merges_and_pull_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path().to_path_buf()).await;
        let rpc = transport(TransportKind::Rpc, &base);
        let name = CollectionName::new("customers").unwrap();

        let first = rpc
            .push(&name, &records(json!([{"id": "c1", "updatedAt": 400, "name": "Acme"}])), None)
            .await
            .unwrap();
        assert_eq!(first.total_count, 1);

        let second = rpc
            .push(
                &name,
                &records(json!([{"id": "c1", "updatedAt": 500, "deleted": true}])),
                Some(450),
            )
            .await
            .unwrap();
        assert_eq!(second.data.len(), 1);
        assert!(second.data[0].is_deleted());

        // A stale copy does not resurrect the tombstone.
        rpc.push(&name, &records(json!([{"id": "c1", "updatedAt": 400, "name": "Acme"}])), None)
            .await
            .unwrap();
        let pulled = rpc.pull::<Record>(&name, None).await.unwrap();
        assert_eq!(pulled.total_count, 1);
        assert!(pulled.data[0].is_deleted());
        assert_eq!(pulled.data[0].updated_at, 500);

        // Cursors are store time: nothing was accepted after the tombstone.
        let newer = rpc.pull::<Record>(&name, Some(second.sync_time)).await.unwrap();
        assert!(newer.data.is_empty());
    }

    #[tokio::test]
    async fn endpoint_style_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path().to_path_buf()).await;
        let endpoint = transport(TransportKind::Endpoint, &base);
        let name = CollectionName::new("stockChecks").unwrap();

        let first = endpoint
            .push(
                &name,
                &records(json!([
                    {"id": "s1", "updatedAt": 10, "date": "2024-05-01"},
                    {"id": "s2", "updatedAt": 20, "date": "2024-05-02"}
                ])),
                None,
            )
            .await
            .unwrap();
        assert_eq!(first.total_count, 2);
        assert_eq!(first.data.len(), 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let response = endpoint
            .push(
                &name,
                &records(json!([{"id": "s2", "updatedAt": 30, "date": "2024-05-03"}])),
                Some(first.sync_time),
            )
            .await
            .unwrap();
        assert_eq!(response.total_count, 2);
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].id, "s2");

        let all = endpoint.pull::<Record>(&name, None).await.unwrap();
        assert_eq!(all.data.len(), 2);
        assert!(dir.path().join("stockChecks.json").exists());
    }

    #[tokio::test]
    async fn rejects_bad_names_and_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path().to_path_buf()).await;
        let client = reqwest::Client::new();

        let traversal = client
            .get(format!("{base}/get?endpoint=../secrets"))
            .send()
            .await
            .unwrap();
        assert_eq!(traversal.status(), reqwest::StatusCode::BAD_REQUEST);

        let object_body = client
            .post(format!("{base}/sync?endpoint=orders"))
            .body(r#"{"id":"o1"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(object_body.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = object_body.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("JSON array"));

        let truncated = client
            .post(format!("{base}/v1/sync"))
            .body(r#"{"collection":"orders","data":[{"id":"o1""#)
            .send()
            .await
            .unwrap();
        assert_eq!(truncated.status(), reqwest::StatusCode::BAD_REQUEST);

        // Rejected pushes leave nothing behind.
        let rpc = transport(TransportKind::Rpc, &base);
        let pulled = rpc
            .pull::<Record>(&CollectionName::new("orders").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(pulled.total_count, 0);
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path().to_path_buf()).await;
        let body: Value = reqwest::get(format!("{base}/healthz"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }
}
