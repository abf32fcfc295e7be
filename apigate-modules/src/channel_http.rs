use crate::runtime::ModuleRuntime;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Mounts `/{base_path}` CRUD routes for every loaded module (§4.11), with
/// one handler set shared across all modules instead of one file per
/// resource type.
pub fn router(runtime: Arc<ModuleRuntime>) -> Router {
    let mut router = Router::new();
    for name in runtime.module_names() {
        let Some(module) = runtime.module(&name) else { continue };
        let base = format!("/{}", module.base_path);
        let item = format!("/{}/{{lookup}}", module.base_path);
        let action = format!("/{}/{{lookup}}/{{action}}", module.base_path);

        router = router
            .route(&base, get(list_handler).post(create_handler))
            .route(&item, get(get_handler).patch(update_handler).delete(delete_handler))
            .route(&action, post(custom_handler));
    }
    router.with_state(runtime)
}

fn module_name_from_path(path: &str) -> &str {
    path.trim_start_matches('/').split('/').next().unwrap_or("")
}

async fn list_handler(
    State(runtime): State<Arc<ModuleRuntime>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let base_path = module_name_from_path(uri.path());
    let module = match runtime.module_by_base_path(base_path) {
        Some(m) => m,
        None => return not_found(),
    };
    let input = json!({
        "limit": params.get("limit").and_then(|v| v.parse::<i64>().ok()),
        "offset": params.get("offset").and_then(|v| v.parse::<i64>().ok()),
        "order_by": params.get("order_by"),
    });
    match runtime.execute(&module.name, "list", input).await {
        Ok(outcome) => Json(json!({"list": outcome.list, "count": outcome.count})).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_handler(
    State(runtime): State<Arc<ModuleRuntime>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    Path(lookup): Path<String>,
) -> Response {
    dispatch_by_lookup(&runtime, uri.path(), "get", lookup, Value::Null).await
}

async fn create_handler(
    State(runtime): State<Arc<ModuleRuntime>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    Json(body): Json<Value>,
) -> Response {
    let base_path = module_name_from_path(uri.path());
    let module = match runtime.module_by_base_path(base_path) {
        Some(m) => m,
        None => return not_found(),
    };
    match runtime.execute(&module.name, "create", body).await {
        Ok(outcome) => (StatusCode::CREATED, Json(envelope(outcome))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_handler(
    State(runtime): State<Arc<ModuleRuntime>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    Path(lookup): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    dispatch_by_lookup(&runtime, uri.path(), "update", lookup, body).await
}

async fn delete_handler(
    State(runtime): State<Arc<ModuleRuntime>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    Path(lookup): Path<String>,
) -> Response {
    dispatch_by_lookup(&runtime, uri.path(), "delete", lookup, Value::Null).await
}

async fn custom_handler(
    State(runtime): State<Arc<ModuleRuntime>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    Path((lookup, action)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let base_path = module_name_from_path(uri.path());
    let module = match runtime.module_by_base_path(base_path) {
        Some(m) => m,
        None => return not_found(),
    };
    let mut input = body;
    if let Value::Object(ref mut map) = input {
        map.insert("id".to_string(), json!(lookup));
    } else {
        input = json!({"id": lookup});
    }
    match runtime.execute(&module.name, &action, input).await {
        Ok(outcome) => Json(envelope(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn dispatch_by_lookup(
    runtime: &Arc<ModuleRuntime>,
    path: &str,
    action: &str,
    lookup: String,
    mut body: Value,
) -> Response {
    let base_path = module_name_from_path(path);
    let module = match runtime.module_by_base_path(base_path) {
        Some(m) => m,
        None => return not_found(),
    };
    match &mut body {
        Value::Object(map) => {
            map.insert("id".to_string(), json!(lookup));
        }
        Value::Null => body = json!({"id": lookup}),
        _ => {}
    }
    match runtime.execute(&module.name, action, body).await {
        Ok(outcome) => Json(envelope(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

fn envelope(outcome: crate::runtime::ActionOutcome) -> Value {
    let mut map = Map::new();
    map.insert("data".to_string(), outcome.data);
    if let Some(id) = map.get("data").and_then(|d| d.get("id")).cloned() {
        map.insert("id".to_string(), id);
    }
    if !outcome.meta.is_null() {
        map.insert("meta".to_string(), outcome.meta);
    }
    Value::Object(map)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": {"code": "not_found", "message": "module not found"}}))).into_response()
}

fn error_response(err: apigate_core::error::GatewayError) -> Response {
    let status = axum::http::StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_json_body())).into_response()
}
