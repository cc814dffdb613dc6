//! Notice submission handlers.
//!
//! All entry points funnel into one broadcast bounded by the configured
//! caller timeout. The per-device deliveries are not cancelled when the
//! timeout fires; they finish in the background and still write their logs.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use cipherpush_core::{BroadcastReport, NoticeRequest};
use serde::Deserialize;

/// Query-string form of a notice. Targets every active device.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NoticeQuery {
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub group: String,
    pub url: String,
    pub icon: String,
    pub image: String,
}

impl From<NoticeQuery> for NoticeRequest {
    fn from(q: NoticeQuery) -> Self {
        Self {
            title: q.title,
            subtitle: q.subtitle,
            body: q.body,
            group: q.group,
            url: q.url,
            icon: q.icon,
            image: q.image,
            device_keys: Vec::new(),
        }
    }
}

/// Extra query parameters accepted by the path forms.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PathExtras {
    pub group: String,
    pub url: String,
}

pub async fn send_query(
    State(state): State<AppState>,
    Query(q): Query<NoticeQuery>,
) -> Result<Json<BroadcastReport>, RelayError> {
    dispatch(&state, q.into()).await
}

pub async fn send_json(
    State(state): State<AppState>,
    Json(req): Json<NoticeRequest>,
) -> Result<Json<BroadcastReport>, RelayError> {
    dispatch(&state, req).await
}

pub async fn send_path(
    State(state): State<AppState>,
    Path((title, body)): Path<(String, String)>,
    Query(extras): Query<PathExtras>,
) -> Result<Json<BroadcastReport>, RelayError> {
    let req = NoticeRequest {
        title,
        body,
        group: extras.group,
        url: extras.url,
        ..NoticeRequest::default()
    };
    dispatch(&state, req).await
}

pub async fn send_path_with_subtitle(
    State(state): State<AppState>,
    Path((title, subtitle, body)): Path<(String, String, String)>,
    Query(extras): Query<PathExtras>,
) -> Result<Json<BroadcastReport>, RelayError> {
    let req = NoticeRequest {
        title,
        subtitle,
        body,
        group: extras.group,
        url: extras.url,
        ..NoticeRequest::default()
    };
    dispatch(&state, req).await
}

async fn dispatch(state: &AppState, req: NoticeRequest) -> Result<Json<BroadcastReport>, RelayError> {
    match tokio::time::timeout(state.broadcast_timeout, state.dispatch.broadcast(req)).await {
        Ok(outcome) => Ok(Json(outcome?)),
        Err(_) => {
            tracing::warn!(
                timeout_secs = state.broadcast_timeout.as_secs(),
                "Broadcast exceeded caller timeout, deliveries continue in background"
            );
            Err(RelayError::Timeout(state.broadcast_timeout.as_secs()))
        }
    }
}
