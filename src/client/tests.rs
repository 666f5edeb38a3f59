use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::auth::AuthConfig;
use crate::request::Method;
use crate::token_store::InMemoryTokenStore;
use crate::transport::RawResponse;

struct ScriptedTransport {
    token_calls: AtomicUsize,
    api_calls: AtomicUsize,
    responses: std::sync::Mutex<Vec<u16>>,
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: RawRequest, _timeout: Duration) -> Result<RawResponse> {
        if request.url.contains("/api/token") {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            let body = serde_json::json!({
                "access_token": "token-1",
                "token_type": "Bearer",
                "expires_in": 3600,
            });
            return Ok(RawResponse {
                status: 200,
                headers: Default::default(),
                body: bytes::Bytes::from(body.to_string()),
            });
        }

        self.api_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.responses.lock().unwrap().remove(0);
        Ok(RawResponse {
            status,
            headers: Default::default(),
            body: bytes::Bytes::from_static(b"{\"ok\":true}"),
        })
    }
}

fn test_client(responses: Vec<u16>) -> (Client, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport {
        token_calls: AtomicUsize::new(0),
        api_calls: AtomicUsize::new(0),
        responses: std::sync::Mutex::new(responses),
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
    let config = Configuration::builder().build().unwrap();
    let client = Client::new(config, auth, transport.clone(), events);
    (client, transport)
}

#[tokio::test]
async fn successful_get_returns_body() {
    let (client, transport) = test_client(vec![200]);
    let body = client
        .request(RequestDescriptor::new(Method::Get, "/tracks/1"))
        .await
        .unwrap();
    assert_eq!(&body[..], b"{\"ok\":true}");
    assert_eq!(transport.api_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn offline_fails_fast_without_dispatching() {
    let (client, transport) = test_client(vec![200]);
    client.set_offline(true);
    let err = client
        .request(RequestDescriptor::new(Method::Get, "/tracks/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Offline));
    assert_eq!(transport.api_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn server_error_retries_then_succeeds() {
    let (client, transport) = test_client(vec![503, 200]);
    let body = client
        .request(RequestDescriptor::new(Method::Get, "/tracks/1"))
        .await
        .unwrap();
    assert_eq!(&body[..], b"{\"ok\":true}");
    assert_eq!(transport.api_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_identical_gets_dispatch_once() {
    let (client, transport) = test_client(vec![200]);
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .request(RequestDescriptor::new(Method::Get, "/tracks/1"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(transport.api_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interceptor_can_reject_a_request_before_dispatch() {
    let (mut client, transport) = test_client(vec![200]);
    client.add_interceptor(Arc::new(|_req: RawRequest| -> Result<RawRequest> {
        Err(Error::InvalidRequest {
            reason: "blocked by interceptor".into(),
            parameter: None,
            valid_range: None,
        })
    }));

    let err = client
        .request(RequestDescriptor::new(Method::Get, "/tracks/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert_eq!(transport.api_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn interceptor_can_add_a_header() {
    let (mut client, _transport) = test_client(vec![200]);
    client.add_interceptor(Arc::new(|mut req: RawRequest| -> Result<RawRequest> {
        req.headers.insert("x-client-version".into(), "1.0".into());
        Ok(req)
    }));

    client
        .request(RequestDescriptor::new(Method::Get, "/tracks/1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn unauthenticated_descriptor_sends_no_authorization_header() {
    let (client, transport) = test_client(vec![200]);
    client
        .request(RequestDescriptor::new(Method::Get, "/public").unauthenticated())
        .await
        .unwrap();
    assert_eq!(transport.api_calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.token_calls.load(Ordering::SeqCst), 0);
}
