//! REST call path: 401 recovery and retry rules

use assert_matches::assert_matches;
use async_trait::async_trait;
use corider_transport::{
    ApiRequest, ApiResponse, Authorizer, CallError, ChannelConnection, ChannelConnector,
    ChannelError, Credential, Method, RestTransport, TransportAdapter, TransportConfig,
    TransportError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct ScriptedRest {
    replies: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    sent: Mutex<Vec<ApiRequest>>,
}

impl ScriptedRest {
    fn with(replies: Vec<Result<ApiResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<ApiRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl RestTransport for ScriptedRest {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.sent.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ApiResponse::empty(204)))
    }
}

struct RotatingAuthorizer {
    generation: AtomicU64,
    recoveries: AtomicU32,
    expired: bool,
}

impl RotatingAuthorizer {
    fn new(expired: bool) -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU64::new(1),
            recoveries: AtomicU32::new(0),
            expired,
        })
    }
}

#[async_trait]
impl Authorizer for RotatingAuthorizer {
    async fn credential(&self) -> Result<Credential, CallError> {
        let generation = self.generation.load(Ordering::SeqCst);
        Ok(Credential {
            token: format!("token-{generation}"),
            generation,
        })
    }

    async fn on_unauthorized(&self, _generation: u64) -> Result<Credential, CallError> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        if self.expired {
            return Err(CallError::RequiresLogin);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.credential().await
    }
}

struct NoChannel;

#[async_trait]
impl ChannelConnector for NoChannel {
    async fn connect(
        &self,
        endpoint: &str,
        _bearer: &str,
    ) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        Err(ChannelError::connect(endpoint, "unused"))
    }
}

fn adapter(rest: Arc<ScriptedRest>, authorizer: Arc<RotatingAuthorizer>) -> TransportAdapter {
    TransportAdapter::new(rest, Arc::new(NoChannel), authorizer, &TransportConfig::default())
}

fn ok() -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(200, serde_json::json!({ "ok": true })))
}

fn status(code: u16) -> Result<ApiResponse, TransportError> {
    Err(TransportError::server(code, None))
}

// ============================================================================
// Unauthorized recovery
// ============================================================================

#[tokio::test]
async fn unauthorized_recovers_once_with_fresh_token() {
    let rest = ScriptedRest::with(vec![status(401), ok()]);
    let auth = RotatingAuthorizer::new(false);
    let adapter = adapter(rest.clone(), auth.clone());

    let response = adapter.call(ApiRequest::get("/ride-requests/1")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(auth.recoveries.load(Ordering::SeqCst), 1);
    let sent = rest.sent();
    assert_eq!(sent[0].bearer.as_deref(), Some("token-1"));
    assert_eq!(sent[1].bearer.as_deref(), Some("token-2"));
}

#[tokio::test]
async fn repeated_unauthorized_is_surfaced() {
    let rest = ScriptedRest::with(vec![status(401), status(401)]);
    let auth = RotatingAuthorizer::new(false);
    let adapter = adapter(rest.clone(), auth.clone());

    let err = adapter.call(ApiRequest::get("/ride-requests/1")).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(auth.recoveries.load(Ordering::SeqCst), 1);
    assert_eq!(rest.sent().len(), 2);
}

#[tokio::test]
async fn expired_session_requires_login() {
    let rest = ScriptedRest::with(vec![status(401)]);
    let adapter = adapter(rest.clone(), RotatingAuthorizer::new(true));

    let err = adapter
        .call(ApiRequest::put("/ride-requests/1/reject"))
        .await
        .unwrap_err();

    assert_eq!(err, CallError::RequiresLogin);
    assert_eq!(rest.sent().len(), 1);
}

// ============================================================================
// Retry rules
// ============================================================================

#[tokio::test(start_paused = true)]
async fn network_errors_retry_for_mutations() {
    let rest = ScriptedRest::with(vec![Err(TransportError::network("refused")), ok()]);
    let adapter = adapter(rest.clone(), RotatingAuthorizer::new(false));

    adapter.call(ApiRequest::post("/ride-requests")).await.unwrap();

    assert_eq!(rest.sent().len(), 2);
    assert!(rest.sent().iter().all(|r| r.method == Method::Post));
}

#[tokio::test(start_paused = true)]
async fn mutating_timeout_is_not_retried() {
    let rest = ScriptedRest::with(vec![
        Err(TransportError::timeout(Duration::from_secs(10))),
        ok(),
    ]);
    let adapter = adapter(rest.clone(), RotatingAuthorizer::new(false));

    let err = adapter
        .call(ApiRequest::put("/ride-requests/4/broadcast/accept"))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(rest.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn read_timeout_is_retried() {
    let rest = ScriptedRest::with(vec![
        Err(TransportError::timeout(Duration::from_secs(10))),
        ok(),
    ]);
    let adapter = adapter(rest.clone(), RotatingAuthorizer::new(false));

    adapter.call(ApiRequest::get("/ride-requests/4")).await.unwrap();
    assert_eq!(rest.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_budget() {
    let rest = ScriptedRest::with(vec![
        Err(TransportError::network("refused")),
        Err(TransportError::network("refused")),
        Err(TransportError::network("refused")),
        ok(),
    ]);
    let adapter = adapter(rest.clone(), RotatingAuthorizer::new(false));

    let err = adapter.call(ApiRequest::get("/ride-requests/rider")).await.unwrap_err();

    assert_matches!(err, CallError::Transport(TransportError::Network { .. }));
    assert_eq!(rest.sent().len(), 3);
}

#[tokio::test]
async fn client_errors_are_terminal() {
    let rest = ScriptedRest::with(vec![status(409), ok()]);
    let adapter = adapter(rest.clone(), RotatingAuthorizer::new(false));

    let err = adapter
        .call(ApiRequest::put("/ride-requests/4/accept"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(409));
    assert_eq!(rest.sent().len(), 1);
}

#[tokio::test]
async fn call_json_decodes_body() {
    #[derive(serde::Deserialize)]
    struct Health {
        ok: bool,
    }
    let rest = ScriptedRest::with(vec![ok()]);
    let adapter = adapter(rest, RotatingAuthorizer::new(false));

    let body: Health = adapter.call_json(ApiRequest::get("/health")).await.unwrap();
    assert!(body.ok);
}
