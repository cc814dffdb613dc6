//! End-to-end registry + dispatch behaviour against the in-memory store and a
//! scripted upstream.

use async_trait::async_trait;
use cipherpush_core::models::NoticeStatus;
use cipherpush_core::upstream::UpstreamError;
use cipherpush_core::{
    encrypt_to_base64, CredentialStore, CryptoConfig, Device, DeviceRegistry, DeviceRequest,
    DispatchConfig, DispatchEngine, MemoryStore, NoticeRequest, PushError, PushGateway,
    RegisterData, UpstreamResponse,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Issues sequential keys on registration and accepts pushes except for the
/// keys it was told to reject or to fail at the transport level.
#[derive(Default)]
struct ScriptedUpstream {
    next_key: AtomicUsize,
    rejected: HashSet<String>,
    unreachable: HashSet<String>,
    pushed: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    fn rejecting(keys: &[&str]) -> Self {
        Self {
            rejected: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    fn unreachable_for(keys: &[&str]) -> Self {
        Self {
            unreachable: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    fn push_count(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }
}

#[async_trait]
impl PushGateway for ScriptedUpstream {
    async fn ping(&self) -> Result<UpstreamResponse<Value>, UpstreamError> {
        Ok(UpstreamResponse {
            code: 200,
            ..UpstreamResponse::default()
        })
    }

    async fn register(
        &self,
        device_token: &str,
        _legacy_key: Option<&str>,
    ) -> Result<UpstreamResponse<RegisterData>, UpstreamError> {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        let key = format!("dk-{}", n);
        Ok(UpstreamResponse {
            code: 200,
            message: "success".to_string(),
            timestamp: 0,
            data: RegisterData {
                key: key.clone(),
                device_key: key,
                device_token: device_token.to_string(),
            },
        })
    }

    async fn push(
        &self,
        device_key: &str,
        _ciphertext: &str,
        _iv: &str,
    ) -> Result<UpstreamResponse<Value>, UpstreamError> {
        self.pushed.lock().unwrap().push(device_key.to_string());
        if self.unreachable.contains(device_key) {
            return Err(UpstreamError::Status {
                operation: "push",
                status: 502,
            });
        }
        if self.rejected.contains(device_key) {
            return Ok(UpstreamResponse {
                code: 400,
                message: "failed to push".to_string(),
                ..UpstreamResponse::default()
            });
        }
        Ok(UpstreamResponse {
            code: 200,
            message: "success".to_string(),
            ..UpstreamResponse::default()
        })
    }

    fn device_endpoint(&self, device_key: &str) -> String {
        format!("http://upstream.test/{}", device_key)
    }
}

struct Harness {
    store: MemoryStore,
    upstream: Arc<ScriptedUpstream>,
    registry: DeviceRegistry,
    dispatch: DispatchEngine,
}

impl Harness {
    fn new(upstream: ScriptedUpstream) -> Self {
        let store = MemoryStore::new();
        let upstream = Arc::new(upstream);
        let gateway: Arc<dyn PushGateway> = upstream.clone();
        let shared: Arc<dyn CredentialStore> = Arc::new(store.clone());

        Self {
            registry: DeviceRegistry::new(
                Arc::clone(&shared),
                CryptoConfig::default(),
                Some(Arc::clone(&gateway)),
            ),
            dispatch: DispatchEngine::new(shared, Some(gateway), &DispatchConfig::default()),
            store,
            upstream,
        }
    }

    async fn add(&self, token: &str) -> Device {
        self.registry
            .upsert(DeviceRequest {
                device_token: token.to_string(),
                ..DeviceRequest::default()
            })
            .await
            .unwrap()
    }
}

fn notice(body: &str) -> NoticeRequest {
    NoticeRequest {
        title: "Deploy".to_string(),
        body: body.to_string(),
        group: "ops".to_string(),
        ..NoticeRequest::default()
    }
}

#[tokio::test]
async fn upsert_preserves_generated_credentials() {
    let h = Harness::new(ScriptedUpstream::default());

    let first = h.add("tok-1").await;
    assert_eq!(first.secret.len(), 32);
    assert_eq!(first.iv.len(), 16);

    let second = h.add("tok-1").await;
    assert_eq!(second.secret.as_bytes(), first.secret.as_bytes());
    assert_eq!(second.iv.as_bytes(), first.iv.as_bytes());
    assert_eq!(h.store.list_devices().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_body_is_rejected_without_side_effects() {
    let h = Harness::new(ScriptedUpstream::default());
    h.add("tok-1").await;

    for body in ["", "   "] {
        let failure = h.dispatch.broadcast(notice(body)).await.unwrap_err();
        assert!(matches!(failure.error, PushError::Validation(_)));
        assert!(failure.results.is_empty());
    }
    assert!(h.store.list_logs().unwrap().is_empty());
    assert_eq!(h.upstream.push_count(), 0);
}

#[tokio::test]
async fn misconfigured_device_fails_alone() {
    let h = Harness::new(ScriptedUpstream::default());
    for i in 0..4 {
        h.add(&format!("tok-{}", i)).await;
    }

    // Corrupt one device behind the registry's back.
    let mut broken = h.store.get_device("tok-2").unwrap();
    broken.secret = "too-short".to_string();
    h.store.upsert_device(broken.clone()).unwrap();

    let report = h.dispatch.broadcast(notice("hello")).await.unwrap();
    assert_eq!(report.results.len(), 4);
    assert_eq!(report.summary.send_num, 4);
    assert_eq!(report.summary.success_num, 3);

    let failed: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.status == NoticeStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].device_key, broken.device_key);
    assert!(failed[0].message.is_some());

    // Every device gets a log entry, including the one that never reached upstream.
    assert_eq!(h.store.list_logs().unwrap().len(), 4);
    assert_eq!(h.upstream.push_count(), 3);
}

#[tokio::test]
async fn upstream_rejection_and_transport_errors_are_per_device() {
    let h = Harness::new(ScriptedUpstream::rejecting(&["dk-0"]));
    h.add("tok-0").await;
    h.add("tok-1").await;

    let report = h.dispatch.broadcast(notice("hello")).await.unwrap();
    assert_eq!(report.summary.success_num, 1);
    let rejected = report
        .results
        .iter()
        .find(|r| r.device_key == "dk-0")
        .unwrap();
    assert_eq!(rejected.status, NoticeStatus::Failed);
    assert_eq!(rejected.message.as_deref(), Some("failed to push"));

    let h = Harness::new(ScriptedUpstream::unreachable_for(&["dk-1"]));
    h.add("tok-0").await;
    h.add("tok-1").await;
    let report = h.dispatch.broadcast(notice("hello")).await.unwrap();
    assert_eq!(report.summary.success_num, 1);
    let unreachable = report
        .results
        .iter()
        .find(|r| r.device_key == "dk-1")
        .unwrap();
    assert!(unreachable.message.as_deref().unwrap().contains("502"));
}

#[tokio::test]
async fn unknown_explicit_key_is_reported_first() {
    let h = Harness::new(ScriptedUpstream::default());
    let known = h.add("tok-1").await;

    let mut req = notice("targeted");
    req.device_keys = vec!["missing".to_string(), known.device_key.clone()];
    let report = h.dispatch.broadcast(req).await.unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.summary.send_num, 1);
    assert_eq!(report.summary.success_num, 1);
    assert_eq!(report.results[0].device_key, "missing");
    assert_eq!(report.results[0].status, NoticeStatus::Failed);
    assert_eq!(report.results[1].device_key, known.device_key);
    assert_eq!(h.store.list_logs().unwrap().len(), 1);
}

#[tokio::test]
async fn only_unknown_keys_returns_lookup_results_with_error() {
    let h = Harness::new(ScriptedUpstream::default());
    h.add("tok-1").await;

    let mut req = notice("targeted");
    req.device_keys = vec!["nope-1".to_string(), "nope-2".to_string()];
    let failure = h.dispatch.broadcast(req).await.unwrap_err();

    assert!(matches!(failure.error, PushError::NoTargetsResolved));
    assert_eq!(failure.results.len(), 2);
    assert_eq!(h.upstream.push_count(), 0);
}

#[tokio::test]
async fn logs_record_endpoint_and_outcome() {
    let h = Harness::new(ScriptedUpstream::rejecting(&["dk-1"]));
    h.add("tok-0").await;
    h.add("tok-1").await;

    h.dispatch.broadcast(notice("hello")).await.unwrap();
    let mut logs = h.store.list_logs().unwrap();
    logs.sort_by(|a, b| a.device_key.cmp(&b.device_key));

    assert_eq!(logs[0].url, "http://upstream.test/dk-0");
    assert_eq!(logs[0].status, NoticeStatus::Success);
    assert_eq!(logs[0].title, "Deploy");
    assert_eq!(logs[0].group, "ops");
    assert_eq!(logs[1].status, NoticeStatus::Failed);
    assert_eq!(logs[1].result, "failed to push");

    let ids: HashSet<u64> = logs.iter().map(|l| l.id).collect();
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn dropped_caller_still_completes_delivery() {
    let h = Harness::new(ScriptedUpstream::default());
    for i in 0..3 {
        h.add(&format!("tok-{}", i)).await;
    }

    // The timeout fires on the first pending poll, after the per-device tasks
    // have been spawned.
    let _ = tokio::time::timeout(
        std::time::Duration::from_nanos(1),
        h.dispatch.broadcast(notice("late")),
    )
    .await;

    let mut written = 0;
    for _ in 0..100 {
        written = h.store.list_logs().unwrap().len();
        if written == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(written, 3);
}

#[test]
fn encryption_is_deterministic() {
    let key = b"0123456789abcdef0123456789abcdef";
    let iv = b"abcdefghijklmnop";
    let a = encrypt_to_base64(b"same input", key, iv).unwrap();
    let b = encrypt_to_base64(b"same input", key, iv).unwrap();
    assert_eq!(a, b);
}
