use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const SERVICE_ROOT: &str = "/odata/standard.odata";

/// Records per resource, in insertion order.
pub type Db = Arc<RwLock<HashMap<String, Vec<Map<String, Value>>>>>;

#[derive(Clone, Default)]
pub struct AppState {
    pub db: Db,
    /// Expected `Authorization` header value; `None` disables the check.
    pub authorization: Option<String>,
}

pub fn app() -> Router {
    router(AppState::default())
}

/// Router that answers 401 unless requests carry these Basic credentials.
pub fn app_with_basic_auth(username: &str, password: &str) -> Router {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    router(AppState {
        db: Db::default(),
        authorization: Some(format!("Basic {token}")),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            &format!("{SERVICE_ROOT}/{{entity}}/"),
            get(read_entity).post(create_entity).patch(update_entity).delete(delete_entity),
        )
        .route(&format!("{SERVICE_ROOT}/{{entity}}/$count"), get(count_entities))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

/// Split `Catalog_X(guid'...')` into the resource name and its key.
pub fn parse_entity(segment: &str) -> Result<(String, Option<Uuid>), String> {
    match segment.split_once("(guid'") {
        None => Ok((segment.to_string(), None)),
        Some((resource, rest)) => {
            let raw = rest
                .strip_suffix("')")
                .ok_or_else(|| format!("malformed key predicate in '{segment}'"))?;
            let id = raw.parse::<Uuid>().map_err(|e| format!("invalid guid '{raw}': {e}"))?;
            Ok((resource.to_string(), Some(id)))
        }
    }
}

fn odata_error(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "odata.error": {
            "code": status.as_u16().to_string(),
            "message": {"lang": "en", "value": message}
        }
    });
    (status, Json(body)).into_response()
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.authorization else {
        return Ok(());
    };
    let given = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if given == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(odata_error(StatusCode::UNAUTHORIZED, "authentication required"))
    }
}

fn ref_key(record: &Map<String, Value>) -> Option<Uuid> {
    record.get("Ref_Key").and_then(Value::as_str).and_then(|s| s.parse().ok())
}

/// Supports a single `Field eq literal` comparison.
fn matches_filter(record: &Map<String, Value>, filter: &str) -> Result<bool, String> {
    let (field, literal) = filter
        .split_once(" eq ")
        .ok_or_else(|| format!("unsupported filter '{filter}'"))?;
    let literal = literal.trim();
    let expected = if let Some(s) = literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Value::String(s.to_string())
    } else if let Some(s) = literal.strip_prefix("guid'").and_then(|s| s.strip_suffix('\'')) {
        Value::String(s.to_string())
    } else {
        serde_json::from_str(literal).map_err(|_| format!("unsupported literal '{literal}'"))?
    };
    Ok(record.get(field.trim()) == Some(&expected))
}

fn filtered(records: &[Map<String, Value>], params: &HashMap<String, String>) -> Result<Vec<Map<String, Value>>, String> {
    let mut out = Vec::new();
    for record in records {
        let keep = match params.get("$filter") {
            Some(filter) => matches_filter(record, filter)?,
            None => true,
        };
        if keep {
            out.push(record.clone());
        }
    }
    Ok(out)
}

fn project(record: Map<String, Value>, select: Option<&String>) -> Map<String, Value> {
    match select {
        None => record,
        Some(fields) => {
            let wanted: Vec<&str> = fields.split(',').map(str::trim).collect();
            record.into_iter().filter(|(k, _)| wanted.contains(&k.as_str())).collect()
        }
    }
}

fn parse_count(params: &HashMap<String, String>, key: &str) -> Result<Option<usize>, Response> {
    params
        .get(key)
        .map(|raw| raw.parse::<usize>())
        .transpose()
        .map_err(|_| odata_error(StatusCode::BAD_REQUEST, &format!("invalid {key}")))
}

async fn read_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (resource, id) = match parse_entity(&entity) {
        Ok(parsed) => parsed,
        Err(msg) => return odata_error(StatusCode::BAD_REQUEST, &msg),
    };
    let db = state.db.read().await;
    let records = db.get(&resource).map(Vec::as_slice).unwrap_or_default();

    if let Some(id) = id {
        return match records.iter().find(|r| ref_key(r) == Some(id)) {
            Some(record) => Json(Value::Object(project(record.clone(), params.get("$select")))).into_response(),
            None => odata_error(StatusCode::NOT_FOUND, "entity not found"),
        };
    }

    let matching = match filtered(records, &params) {
        Ok(matching) => matching,
        Err(msg) => return odata_error(StatusCode::BAD_REQUEST, &msg),
    };
    let (skip, top) = match (parse_count(&params, "$skip"), parse_count(&params, "$top")) {
        (Ok(skip), Ok(top)) => (skip.unwrap_or(0), top),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let total = matching.len();
    let page: Vec<Value> = matching
        .into_iter()
        .skip(skip)
        .take(top.unwrap_or(usize::MAX))
        .map(|r| Value::Object(project(r, params.get("$select"))))
        .collect();

    let mut body = Map::new();
    body.insert(
        "odata.metadata".to_string(),
        Value::String(format!("{SERVICE_ROOT}/$metadata#{resource}")),
    );
    if params.get("$inlinecount").map(String::as_str) == Some("allpages") {
        body.insert("odata.count".to_string(), Value::String(total.to_string()));
    }
    body.insert("value".to_string(), Value::Array(page));
    Json(Value::Object(body)).into_response()
}

async fn count_entities(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let db = state.db.read().await;
    let records = db.get(&entity).map(Vec::as_slice).unwrap_or_default();
    match filtered(records, &params) {
        Ok(matching) => matching.len().to_string().into_response(),
        Err(msg) => odata_error(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn create_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Map<String, Value>>,
) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (resource, id) = match parse_entity(&entity) {
        Ok(parsed) => parsed,
        Err(msg) => return odata_error(StatusCode::BAD_REQUEST, &msg),
    };
    if id.is_some() {
        return odata_error(StatusCode::METHOD_NOT_ALLOWED, "cannot POST to an entity");
    }
    let mut record = Map::new();
    record.insert("Ref_Key".to_string(), Value::String(Uuid::new_v4().to_string()));
    record.insert("DeletionMark".to_string(), Value::Bool(false));
    record.extend(input);
    state.db.write().await.entry(resource).or_default().push(record.clone());
    (StatusCode::CREATED, Json(Value::Object(record))).into_response()
}

async fn update_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Map<String, Value>>,
) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (resource, id) = match parse_entity(&entity) {
        Ok((resource, Some(id))) => (resource, id),
        Ok((_, None)) => return odata_error(StatusCode::METHOD_NOT_ALLOWED, "PATCH needs an entity key"),
        Err(msg) => return odata_error(StatusCode::BAD_REQUEST, &msg),
    };
    let mut db = state.db.write().await;
    let record = db
        .get_mut(&resource)
        .and_then(|records| records.iter_mut().find(|r| ref_key(r) == Some(id)));
    match record {
        Some(record) => {
            for (key, value) in input {
                if key != "Ref_Key" {
                    record.insert(key, value);
                }
            }
            Json(Value::Object(record.clone())).into_response()
        }
        None => odata_error(StatusCode::NOT_FOUND, "entity not found"),
    }
}

async fn delete_entity(State(state): State<AppState>, Path(entity): Path<String>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (resource, id) = match parse_entity(&entity) {
        Ok((resource, Some(id))) => (resource, id),
        Ok((_, None)) => return odata_error(StatusCode::METHOD_NOT_ALLOWED, "DELETE needs an entity key"),
        Err(msg) => return odata_error(StatusCode::BAD_REQUEST, &msg),
    };
    let mut db = state.db.write().await;
    let Some(records) = db.get_mut(&resource) else {
        return odata_error(StatusCode::NOT_FOUND, "entity not found");
    };
    let before = records.len();
    records.retain(|r| ref_key(r) != Some(id));
    if records.len() == before {
        return odata_error(StatusCode::NOT_FOUND, "entity not found");
    }
    StatusCode::NO_CONTENT.into_response()
}
