//! Broadcast fan-out.
//!
//! A broadcast validates the request, resolves its targets, then runs one
//! spawned task per device that encrypts the payload with that device's own
//! credentials, pushes it upstream and appends a delivery log entry. Device
//! outcomes are independent of each other; the caller waits for all of them.

use crate::config::DispatchConfig;
use crate::crypto::cipher::encrypt_string;
use crate::models::{Device, NoticeLog, NoticeRequest, NoticeResult, NoticeSummary};
use crate::storage::CredentialStore;
use crate::upstream::PushGateway;
use crate::PushError;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Successful broadcast: aggregate counts plus one result per target.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub summary: NoticeSummary,
    pub results: Vec<NoticeResult>,
}

/// Aborted broadcast, with whatever lookup results were already produced.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BroadcastFailure {
    pub error: PushError,
    pub results: Vec<NoticeResult>,
}

impl BroadcastFailure {
    fn bare(error: PushError) -> Self {
        Self {
            error,
            results: Vec::new(),
        }
    }
}

/// Plaintext handed to the cipher. Field order is fixed so every device
/// receives the same serialized bytes.
#[derive(Serialize)]
struct NoticePayload<'a> {
    body: &'a str,
    group: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    icon: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    image: &'a str,
    subtitle: &'a str,
    title: &'a str,
    url: &'a str,
}

/// Blank optional fields are left out of the payload entirely.
fn unless_blank(value: &str) -> &str {
    if value.trim().is_empty() {
        ""
    } else {
        value
    }
}

impl<'a> From<&'a NoticeRequest> for NoticePayload<'a> {
    fn from(req: &'a NoticeRequest) -> Self {
        Self {
            body: &req.body,
            group: &req.group,
            icon: unless_blank(&req.icon),
            image: unless_blank(&req.image),
            subtitle: &req.subtitle,
            title: &req.title,
            url: &req.url,
        }
    }
}

#[derive(Default)]
struct Tally {
    results: Vec<NoticeResult>,
    success: usize,
}

pub struct DispatchEngine {
    store: Arc<dyn CredentialStore>,
    gateway: Option<Arc<dyn PushGateway>>,
    limiter: Option<Arc<Semaphore>>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        gateway: Option<Arc<dyn PushGateway>>,
        config: &DispatchConfig,
    ) -> Self {
        let limiter = match config.max_in_flight {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            store,
            gateway,
            limiter,
        }
    }

    /// Deliver one notice to its targets.
    ///
    /// Validation and target resolution errors abort before any encryption
    /// or network work. Per-device failures only show up in that device's
    /// result. Dropping the returned future does not cancel the spawned
    /// per-device tasks; they still finish and write their logs.
    pub async fn broadcast(
        &self,
        request: NoticeRequest,
    ) -> Result<BroadcastReport, BroadcastFailure> {
        let span = info_span!("broadcast", id = %Uuid::new_v4());
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: NoticeRequest) -> Result<BroadcastReport, BroadcastFailure> {
        if request.body.trim().is_empty() {
            return Err(BroadcastFailure::bare(PushError::Validation(
                "body is required".to_string(),
            )));
        }
        let gateway = self
            .gateway
            .clone()
            .ok_or_else(|| BroadcastFailure::bare(PushError::UpstreamUnavailable))?;

        let (targets, lookup_failures) = self.resolve_targets(&request)?;
        if targets.is_empty() {
            return Err(BroadcastFailure {
                error: PushError::NoTargetsResolved,
                results: lookup_failures,
            });
        }

        let payload = serde_json::to_string(&NoticePayload::from(&request))
            .map_err(|e| BroadcastFailure::bare(PushError::Validation(e.to_string())))?;
        let payload = Arc::new(payload);
        let request = Arc::new(request);
        let send_num = targets.len();

        let tally = Arc::new(Mutex::new(Tally {
            results: lookup_failures,
            success: 0,
        }));

        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::with_capacity(send_num);
        for device in targets {
            let key = device.device_key.clone();
            let unit = DeliveryUnit {
                store: Arc::clone(&self.store),
                gateway: Arc::clone(&gateway),
                limiter: self.limiter.clone(),
                payload: Arc::clone(&payload),
                request: Arc::clone(&request),
            };
            let tally = Arc::clone(&tally);
            let handle = tokio::spawn(
                async move {
                    let result = unit.deliver(device).await;
                    let mut guard = tally.lock().unwrap_or_else(PoisonError::into_inner);
                    if result.is_success() {
                        guard.success += 1;
                    }
                    guard.results.push(result);
                }
                .in_current_span(),
            );
            handles.push((key, handle));
        }

        for (key, handle) in handles {
            if let Err(e) = handle.await {
                warn!(device_key = %key, error = %e, "Delivery task aborted");
                let mut guard = tally.lock().unwrap_or_else(PoisonError::into_inner);
                guard
                    .results
                    .push(NoticeResult::failed(key, format!("delivery task failed: {}", e)));
            }
        }

        let Tally { results, success } =
            std::mem::take(&mut *tally.lock().unwrap_or_else(PoisonError::into_inner));
        let summary = NoticeSummary {
            send_num,
            success_num: success,
        };
        info!(
            send_num = summary.send_num,
            success_num = summary.success_num,
            "Broadcast finished"
        );

        Ok(BroadcastReport { summary, results })
    }

    /// Explicit keys are looked up one by one (deduplicated, order kept) and
    /// may name stopped devices. Without keys, every active device is a target.
    fn resolve_targets(
        &self,
        request: &NoticeRequest,
    ) -> Result<(Vec<Device>, Vec<NoticeResult>), BroadcastFailure> {
        if request.device_keys.is_empty() {
            let devices = self
                .store
                .list_active_devices()
                .map_err(|e| BroadcastFailure::bare(e.into()))?;
            return Ok((devices, Vec::new()));
        }

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        let mut failures = Vec::new();
        for key in &request.device_keys {
            let key = key.trim();
            if !seen.insert(key) {
                continue;
            }
            match self.store.get_device_by_key(key) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    debug!(device_key = %key, error = %e, "Target lookup failed");
                    failures.push(NoticeResult::failed(key, e.to_string()));
                }
            }
        }
        Ok((devices, failures))
    }
}

/// Everything one per-device task needs, owned so the task is `'static`.
struct DeliveryUnit {
    store: Arc<dyn CredentialStore>,
    gateway: Arc<dyn PushGateway>,
    limiter: Option<Arc<Semaphore>>,
    payload: Arc<String>,
    request: Arc<NoticeRequest>,
}

impl DeliveryUnit {
    async fn deliver(self, device: Device) -> NoticeResult {
        let result = {
            // The semaphore is never closed, so acquisition only fails if
            // it is dropped; run unbounded in that case.
            let _permit = match &self.limiter {
                Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
                None => None,
            };
            self.attempt(&device).await
        };

        if !result.is_success() {
            warn!(
                device_key = %device.device_key,
                reason = result.message.as_deref().unwrap_or_default(),
                "Delivery failed"
            );
        }

        let entry = NoticeLog::new(
            &device.device_key,
            self.gateway.device_endpoint(&device.device_key),
            &self.request,
            result.status,
            result.message.clone().unwrap_or_default(),
        );
        if let Err(e) = self.store.append_log(entry) {
            warn!(device_key = %device.device_key, error = %e, "Failed to append delivery log");
        }

        result
    }

    async fn attempt(&self, device: &Device) -> NoticeResult {
        let key = device.device_key.as_str();
        if key.is_empty() {
            return NoticeResult::failed(key, "device has no delivery key");
        }

        let ciphertext = match encrypt_string(&self.payload, &device.secret, &device.iv) {
            Ok(ct) => ct,
            Err(e) => return NoticeResult::failed(key, e.to_string()),
        };

        debug!(device_key = %key, "Pushing encrypted notice");
        match self.gateway.push(key, &ciphertext, &device.iv).await {
            Ok(resp) if resp.is_success() => {
                NoticeResult::success(key, Some(resp.message).filter(|m| !m.is_empty()))
            }
            Ok(resp) => NoticeResult::failed(key, resp.message),
            Err(e) => NoticeResult::failed(key, e.to_string()),
        }
    }
}
