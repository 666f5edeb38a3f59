use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use melodia_core::auth::{AuthBackend, AuthConfig};
use melodia_core::client::Client;
use melodia_core::config::NetworkRecovery;
use melodia_core::events::EventBus;
use melodia_core::request::{Method, RequestDescriptor};
use melodia_core::token_store::InMemoryTokenStore;
use melodia_core::transport::{HttpTransport, RawRequest, RawResponse};
use melodia_core::{Configuration, Error};

/// A transport that serves tokens from a counter and plays back a fixed
/// script of API responses, one per call, tracking whether each API call
/// carried the latest issued access token.
struct ScriptedApi {
    token_serial: AtomicUsize,
    script: std::sync::Mutex<Vec<(u16, Option<&'static str>)>>,
    seen_tokens: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl HttpTransport for ScriptedApi {
    async fn execute(&self, request: RawRequest, _timeout: Duration) -> melodia_core::Result<RawResponse> {
        if request.url.contains("/api/token") {
            let serial = self.token_serial.fetch_add(1, Ordering::SeqCst) + 1;
            let body = serde_json::json!({
                "access_token": format!("token-{serial}"),
                "token_type": "Bearer",
                "expires_in": 3600,
            });
            return Ok(RawResponse {
                status: 200,
                headers: Default::default(),
                body: bytes::Bytes::from(body.to_string()),
            });
        }

        self.seen_tokens
            .lock()
            .unwrap()
            .push(request.headers.get("authorization").cloned().unwrap_or_default());

        let (status, retry_after) = self.script.lock().unwrap().remove(0);
        let mut headers = std::collections::HashMap::new();
        if let Some(ra) = retry_after {
            headers.insert("retry-after".to_string(), ra.to_string());
        }

        Ok(RawResponse {
            status,
            headers,
            body: bytes::Bytes::from_static(b"{\"ok\":true}"),
        })
    }
}

fn test_client(
    script: Vec<(u16, Option<&'static str>)>,
    recovery: NetworkRecovery,
) -> (Client, Arc<ScriptedApi>) {
    let transport = Arc::new(ScriptedApi {
        token_serial: AtomicUsize::new(0),
        script: std::sync::Mutex::new(script),
        seen_tokens: std::sync::Mutex::new(Vec::new()),
    });
    let events = Arc::new(EventBus::new());
    let auth = Arc::new(AuthBackend::new(
        AuthConfig::ClientCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            scopes: vec![],
        },
        Arc::new(InMemoryTokenStore::new()),
        transport.clone(),
        events.clone(),
    ));
    let config = Configuration::builder()
        .network_recovery(recovery)
        .request_dedup_enabled(false)
        .build()
        .unwrap();
    (Client::new(config, auth, transport.clone(), events), transport)
}

#[tokio::test]
async fn happy_path_get_succeeds_on_first_try() {
    let (client, transport) = test_client(vec![(200, None)], NetworkRecovery::default());
    let body = client
        .request(RequestDescriptor::new(Method::Get, "/me"))
        .await
        .unwrap();
    assert_eq!(&body[..], b"{\"ok\":true}");
    assert_eq!(transport.seen_tokens.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unauthorized_forces_refresh_and_retries_with_new_token() {
    let (client, transport) = test_client(vec![(401, None), (200, None)], NetworkRecovery::default());
    let body = client
        .request(RequestDescriptor::new(Method::Get, "/me"))
        .await
        .unwrap();
    assert_eq!(&body[..], b"{\"ok\":true}");

    let tokens = transport.seen_tokens.lock().unwrap().clone();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);
    assert_eq!(transport.token_serial.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_unauthorized_after_budget_exhausted_fails() {
    let (client, _transport) = test_client(vec![(401, None), (401, None)], NetworkRecovery::default());
    let err = client
        .request(RequestDescriptor::new(Method::Get, "/me"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpError { status: 401, .. }));
}

#[tokio::test]
async fn rate_limit_honors_retry_after_header() {
    let recovery = NetworkRecovery {
        max_network_retries: 3,
        base_retry_delay: Duration::from_millis(1),
        max_retry_delay: Some(Duration::from_millis(50)),
        retryable_status_codes: (500..=599).collect(),
    };
    let (client, transport) = test_client(vec![(429, Some("0")), (200, None)], recovery);
    let body = client
        .request(RequestDescriptor::new(Method::Get, "/me"))
        .await
        .unwrap();
    assert_eq!(&body[..], b"{\"ok\":true}");
    assert_eq!(transport.seen_tokens.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_refresh_calls_issue_a_single_token_request() {
    let script: Vec<(u16, Option<&'static str>)> = (0..10).map(|_| (200, None)).collect();
    let (client, transport) = test_client(script, NetworkRecovery::default());
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .request(RequestDescriptor::new(Method::Get, format!("/items/{i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(transport.token_serial.load(Ordering::SeqCst), 1);
}
