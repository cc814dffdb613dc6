//! Device registration and management handlers.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use cipherpush_core::{
    Device, DeviceRequest, DeviceView, RegisterData, StatusReport, UpstreamResponse,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct RegisterQuery {
    #[serde(default)]
    pub devicetoken: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenQuery {
    #[serde(default)]
    pub device_token: String,
}

impl TokenQuery {
    fn required(&self) -> Result<&str, RelayError> {
        let token = self.device_token.trim();
        if token.is_empty() {
            return Err(RelayError::BadRequest("deviceToken is required".to_string()));
        }
        Ok(token)
    }
}

pub async fn register(
    State(state): State<AppState>,
    Query(q): Query<RegisterQuery>,
) -> Result<Json<UpstreamResponse<RegisterData>>, RelayError> {
    let legacy = Some(q.key.as_str()).filter(|k| !k.is_empty());
    let resp = state
        .registry
        .register_from_upstream(&q.devicetoken, legacy)
        .await?;
    Ok(Json(resp))
}

pub async fn upsert(
    State(state): State<AppState>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<Device>, RelayError> {
    Ok(Json(state.registry.upsert(req).await?))
}

pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<Device>, RelayError> {
    Ok(Json(state.registry.generate_config(req).await?))
}

pub async fn query(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Device>, RelayError> {
    Ok(Json(state.registry.get(q.required()?)?))
}

pub async fn query_all(State(state): State<AppState>) -> Result<Json<Vec<DeviceView>>, RelayError> {
    Ok(Json(state.registry.list_views()?))
}

pub async fn activate(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<serde_json::Value>, RelayError> {
    change_status(&state, &q, "ACTIVE")
}

pub async fn stop(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<serde_json::Value>, RelayError> {
    change_status(&state, &q, "STOPPED")
}

fn change_status(
    state: &AppState,
    q: &TokenQuery,
    status: &str,
) -> Result<Json<serde_json::Value>, RelayError> {
    let device = state.registry.update_status(q.required()?, status)?;
    Ok(Json(serde_json::json!({ "status": device.status })))
}

/// Device counts for callers presenting the configured `API-TOKEN`.
pub async fn status_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<StatusReport> {
    let presented = headers.get("API-TOKEN").and_then(|v| v.to_str().ok());
    let authorized = matches!(
        (&state.api_token, presented),
        (Some(expected), Some(got)) if expected == got
    );
    if !authorized {
        return Json(StatusReport {
            status: "unauthorized".to_string(),
            active_device_num: 0,
            all_device_num: 0,
        });
    }

    let upstream_up = state.upstream_up().await;
    match state.registry.status_report(upstream_up) {
        Ok(report) => Json(report),
        Err(e) => {
            tracing::warn!(error = %e, "Device listing failed for status report");
            Json(StatusReport {
                status: "error".to_string(),
                active_device_num: 0,
                all_device_num: 0,
            })
        }
    }
}
