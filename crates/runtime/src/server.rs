//! Thin HTTP surface over the runtime.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{error, info};

use continuum_memory::MemoryError;

use crate::context::InvocationRequest;
use crate::runtime::ContinuumRuntime;
use crate::scheduler::Scheduler;
use crate::triggers::TriggerSpec;

type ApiResult<T> = Result<T, (StatusCode, String)>;

#[derive(Clone)]
pub struct AppState {
    pub runtime: ContinuumRuntime,
    pub scheduler: Scheduler,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InvokeBody {
    pub purpose: Option<String>,
    pub context: Map<String, Value>,
}

const DEFAULT_PURPOSE: &str = "Manual invocation";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/memories/recent", get(recent_memories))
        .route("/memories/identity", get(identity_memories))
        .route("/memories/pending", get(pending_memories))
        .route("/triggers", get(list_triggers).post(create_trigger))
        .route("/events/:name", post(fire_event))
        .route("/invoke", post(invoke))
        .with_state(state)
}

/// Serve until `shutdown_tx` flips to `true`.
pub async fn serve(state: AppState, bind: &str, shutdown_tx: &watch::Sender<bool>) -> Result<()> {
    let addr: SocketAddr = bind.parse().with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "http server listening");

    let mut rx = shutdown_tx.subscribe();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    break;
                }
            }
        })
        .await
        .context("http server failed")?;
    info!("http server stopped");
    Ok(())
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, String) {
    error!(error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "continuum",
        "agent": state.runtime.config.agent.name,
        "status": "alive",
        "timestamp": Utc::now(),
    }))
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let report = state.runtime.status().await.map_err(internal)?;
    Ok(Json(json!(report)))
}

async fn recent_memories(State(state): State<AppState>, Query(params): Query<LimitParams>) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(state.runtime.config.memory.recent_limit);
    let memories = state.runtime.memories.recent(limit).await.map_err(internal)?;
    Ok(Json(json!(memories)))
}

async fn identity_memories(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let memories = state.runtime.memories.identity_memories().await.map_err(internal)?;
    Ok(Json(json!(memories)))
}

async fn pending_memories(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let memories = state.runtime.memories.pending_consolidation().await.map_err(internal)?;
    Ok(Json(json!(memories)))
}

async fn list_triggers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let triggers = state.runtime.triggers.list().await.map_err(internal)?;
    Ok(Json(json!(triggers)))
}

async fn create_trigger(
    State(state): State<AppState>,
    Json(spec): Json<TriggerSpec>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    match state.runtime.triggers.upsert(spec).await {
        Ok(trigger) => Ok((StatusCode::CREATED, Json(json!(trigger)))),
        Err(err @ (MemoryError::InvalidValue { .. } | MemoryError::InvalidPath(_))) => {
            Err((StatusCode::BAD_REQUEST, err.to_string()))
        }
        Err(err) => Err(internal(err)),
    }
}

async fn fire_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult<Json<Value>> {
    let data = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let records = state.scheduler.fire_event(&name, data).await.map_err(internal)?;
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    Ok(Json(json!({ "event": name, "invocations": ids })))
}

async fn invoke(State(state): State<AppState>, Json(body): Json<InvokeBody>) -> (StatusCode, Json<Value>) {
    let purpose = body
        .purpose
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PURPOSE.to_string());
    let request = InvocationRequest::manual(purpose).with_context(body.context);
    match state.runtime.invoke(request).await {
        Ok(record) => (StatusCode::OK, Json(json!({ "success": true, "result": record }))),
        Err(err) => {
            error!(error = %format!("{err:#}"), "manual invocation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": format!("{err:#}") })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::email::LogMailer;
    use continuum_config::AppConfig;
    use continuum_llm::GenerativeModel;
    use continuum_llm::fakes::{ScriptedModel, UnreachableModel};
    use continuum_memory::InMemoryDocumentStore;

    async fn state(model: Arc<dyn GenerativeModel>) -> AppState {
        let runtime = ContinuumRuntime::assemble(
            AppConfig::default(),
            Arc::new(InMemoryDocumentStore::new()),
            model,
            Arc::new(LogMailer),
        )
        .await
        .unwrap();
        let scheduler = runtime.scheduler();
        AppState { runtime, scheduler }
    }

    #[tokio::test]
    async fn invoke_reports_success() {
        let st = state(Arc::new(ScriptedModel::new([r#"{"message": "hello there"}"#]))).await;
        let (code, Json(body)) = invoke(State(st), Json(InvokeBody::default())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["response"]["message"], "hello there");
        assert_eq!(body["result"]["request"]["purpose"], DEFAULT_PURPOSE);
    }

    #[tokio::test]
    async fn invoke_failure_is_an_envelope() {
        let st = state(Arc::new(UnreachableModel)).await;
        let (code, Json(body)) = invoke(
            State(st),
            Json(InvokeBody {
                purpose: Some("ping".into()),
                context: Map::new(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("generative call failed"));
    }

    #[tokio::test]
    async fn bad_trigger_is_rejected() {
        let st = state(Arc::new(ScriptedModel::new(["{}"]))).await;
        let spec = TriggerSpec::temporal("Broken", "not a cron", "nothing", Value::Null);
        let err = create_trigger(State(st.clone()), Json(spec)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let Json(list) = list_triggers(State(st)).await.unwrap();
        assert_eq!(list.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn recent_memories_respects_limit() {
        let st = state(Arc::new(ScriptedModel::new(["{}"]))).await;
        for i in 0..3 {
            st.runtime
                .memories
                .store(continuum_memory::NewMemory::new(format!("m{i}"), 0.5))
                .await
                .unwrap();
        }
        let Json(list) = recent_memories(State(st), Query(LimitParams { limit: Some(2) })).await.unwrap();
        assert_eq!(list.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn router_builds() {
        let st = state(Arc::new(ScriptedModel::new(["{}"]))).await;
        let _app = router(st);
    }
}
