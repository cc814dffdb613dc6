//! Axum router setup.

use crate::config::RelayConfig;
use crate::handlers::{devices, logs, notices};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use cipherpush_core::{
    CredentialStore, DeviceRegistry, DispatchEngine, LogQueryEngine, PushGateway,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared handler state. Components are built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub dispatch: Arc<DispatchEngine>,
    pub logs: Arc<LogQueryEngine>,
    pub gateway: Option<Arc<dyn PushGateway>>,
    /// Expected `API-TOKEN` for the status endpoint.
    pub api_token: Option<String>,
    pub broadcast_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        gateway: Option<Arc<dyn PushGateway>>,
        config: &RelayConfig,
    ) -> Self {
        let core = &config.core;
        Self {
            registry: Arc::new(DeviceRegistry::new(
                Arc::clone(&store),
                core.crypto.clone(),
                gateway.clone(),
            )),
            dispatch: Arc::new(DispatchEngine::new(
                Arc::clone(&store),
                gateway.clone(),
                &core.dispatch,
            )),
            logs: Arc::new(LogQueryEngine::new(store)),
            gateway,
            api_token: core
                .upstream
                .token
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            broadcast_timeout: config.broadcast_timeout(),
        }
    }

    /// Whether the upstream answers its health probe with a success code.
    pub async fn upstream_up(&self) -> bool {
        match &self.gateway {
            Some(gateway) => matches!(
                tokio::time::timeout(PROBE_TIMEOUT, gateway.ping()).await,
                Ok(Ok(resp)) if resp.is_success()
            ),
            None => false,
        }
    }
}

pub fn build_router(state: AppState, config: &RelayConfig) -> Router {
    let device_routes = Router::new()
        .route("/register", get(devices::register))
        .route("/device", post(devices::upsert))
        .route("/device/gen", post(devices::generate))
        .route("/device/query", get(devices::query))
        .route("/device/queryAll", get(devices::query_all))
        .route("/device/active", get(devices::activate))
        .route("/device/stop", get(devices::stop))
        .route("/status/endpoint", get(devices::status_endpoint));

    let notice_routes = Router::new()
        .route("/notice", get(notices::send_query).post(notices::send_json))
        .route("/notice/{title}/{body}", get(notices::send_path))
        .route(
            "/notice/{title}/{subtitle}/{body}",
            get(notices::send_path_with_subtitle),
        );

    let log_routes = Router::new()
        .route("/api/notice/log/list", get(logs::list))
        .route("/api/notice/log/count/date", get(logs::count_by_date))
        .route("/api/notice/log/count/status", get(logs::count_by_status))
        .route("/api/notice/log/count/group", get(logs::count_by_group))
        .route("/api/notice/log/count/device", get(logs::count_by_device))
        .route("/api/notice/log/summary", get(logs::summary));

    Router::new()
        .merge(device_routes)
        .merge(notice_routes)
        .merge(log_routes)
        .route("/healthz", get(health))
        .route("/ping", get(ping))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let Some(gateway) = &state.gateway else {
        return Json(serde_json::json!({ "status": "ok" }));
    };

    let upstream = match tokio::time::timeout(PROBE_TIMEOUT, gateway.ping()).await {
        Ok(Ok(_)) => serde_json::json!({ "status": "up" }),
        Ok(Err(e)) => serde_json::json!({ "status": "degraded", "error": e.to_string() }),
        Err(_) => serde_json::json!({ "status": "degraded", "error": "ping timed out" }),
    };
    Json(serde_json::json!({ "status": "ok", "upstream": upstream }))
}

async fn ping(
    State(state): State<AppState>,
) -> Result<Json<cipherpush_core::UpstreamResponse<serde_json::Value>>, crate::error::RelayError> {
    let gateway = state
        .gateway
        .as_ref()
        .ok_or(cipherpush_core::PushError::UpstreamUnavailable)?;
    let resp = gateway
        .ping()
        .await
        .map_err(cipherpush_core::PushError::from)?;
    Ok(Json(resp))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use cipherpush_core::upstream::UpstreamError;
    use cipherpush_core::{MemoryStore, RegisterData, UpstreamResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream that registers `dk-N` keys and accepts every push.
    #[derive(Default)]
    pub struct StubUpstream {
        next: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for StubUpstream {
        async fn ping(&self) -> Result<UpstreamResponse<serde_json::Value>, UpstreamError> {
            Ok(UpstreamResponse {
                code: 200,
                message: "pong".to_string(),
                ..UpstreamResponse::default()
            })
        }

        async fn register(
            &self,
            device_token: &str,
            _legacy_key: Option<&str>,
        ) -> Result<UpstreamResponse<RegisterData>, UpstreamError> {
            let key = format!("dk-{}", self.next.fetch_add(1, Ordering::SeqCst));
            Ok(UpstreamResponse {
                code: 200,
                data: RegisterData {
                    key: key.clone(),
                    device_key: key,
                    device_token: device_token.to_string(),
                },
                ..UpstreamResponse::default()
            })
        }

        async fn push(
            &self,
            _device_key: &str,
            _ciphertext: &str,
            _iv: &str,
        ) -> Result<UpstreamResponse<serde_json::Value>, UpstreamError> {
            Ok(UpstreamResponse {
                code: 200,
                message: "success".to_string(),
                ..UpstreamResponse::default()
            })
        }

        fn device_endpoint(&self, device_key: &str) -> String {
            format!("http://stub/{}", device_key)
        }
    }

    pub fn state() -> (AppState, MemoryStore) {
        let store = MemoryStore::new();
        let mut config = RelayConfig::default();
        config.core.upstream.token = Some("api-token".to_string());
        let gateway: Arc<dyn PushGateway> = Arc::new(StubUpstream::default());
        (
            AppState::new(Arc::new(store.clone()), Some(gateway), &config),
            store,
        )
    }
}
