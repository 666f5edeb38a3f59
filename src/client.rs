//! Client Core (C7): wires the configuration, auth backend, transport,
//! retry policy, dedup table, and event bus into the single entry point
//! callers use to dispatch a request (spec §4.2).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use url::Url;

use crate::auth::AuthBackend;
use crate::config::Configuration;
use crate::dedup::{DedupTable, Fingerprint, Lookup, join as dedup_join};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::request::RequestDescriptor;
use crate::retry::{Disposition, RetryBudget, classify_response, classify_transport_error};
use crate::transport::{HttpTransport, RawRequest};

/// Interceptors run over a built [`RawRequest`] before it is sent, in
/// registration order. A request is rebuilt per attempt, so interceptors
/// see every retry, not just the first attempt (spec §4.2 step 3). An
/// interceptor may reject the request outright by returning `Err`.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, request: RawRequest) -> Result<RawRequest>;
}

impl<F> Interceptor for F
where
    F: Fn(RawRequest) -> Result<RawRequest> + Send + Sync,
{
    fn intercept(&self, request: RawRequest) -> Result<RawRequest> {
        self(request)
    }
}

/// The request execution core: building, signing, dispatching, decoding,
/// and retrying calls to one API.
pub struct Client {
    config: Configuration,
    auth: Arc<AuthBackend>,
    transport: Arc<dyn HttpTransport>,
    dedup: DedupTable,
    events: Arc<EventBus>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    offline: AtomicBool,
}

impl Client {
    pub fn new(
        config: Configuration,
        auth: Arc<AuthBackend>,
        transport: Arc<dyn HttpTransport>,
        events: Arc<EventBus>,
    ) -> Self {
        Client {
            config,
            auth,
            transport,
            dedup: DedupTable::new(),
            events,
            interceptors: Vec::new(),
            offline: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Forces every subsequent `request` call to fail fast with
    /// [`Error::Offline`] without touching the network (spec §4.3 "offline
    /// kill-switch"). Used by callers that have detected connectivity loss
    /// out-of-band.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Executes one request end to end: auth header, dedup, dispatch,
    /// classify, retry, decode. Returns the raw successful body; typed
    /// decoding is left to the caller (spec §4.2).
    #[tracing::instrument(skip(self, descriptor), fields(method = descriptor.method.as_str(), path = %descriptor.path))]
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Bytes> {
        if self.is_offline() {
            return Err(Error::Offline);
        }

        let base = Url::parse(&self.config.api_base_url)?;
        let dedup_eligible = self.config.request_dedup_enabled && descriptor.is_idempotent();

        if dedup_eligible {
            let authorization = if descriptor.authenticated {
                self.auth.access_token(false).await?.bearer_header_value()
            } else {
                String::new()
            };
            let fingerprint = Fingerprint::compute(&descriptor, &authorization);
            match self.dedup.register(fingerprint).await {
                Lookup::Join(rx) => {
                    tracing::debug!("joining in-flight identical request");
                    let (status, body) = dedup_join(rx).await?;
                    return self.body_or_error(status, body);
                }
                Lookup::Lead(lead) => {
                    let outcome = self.dispatch_with_retry(&descriptor, &base).await;
                    self.dedup.complete(lead, &outcome).await;
                    let (status, body) = outcome?;
                    return self.body_or_error(status, body);
                }
            }
        }

        let (status, body) = self.dispatch_with_retry(&descriptor, &base).await?;
        self.body_or_error(status, body)
    }

    fn body_or_error(&self, status: u16, body: Bytes) -> Result<Bytes> {
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(Error::HttpError {
                status,
                body: String::from_utf8_lossy(&body).to_string(),
            })
        }
    }

    /// Builds and sends the request, applying the recovery policy until a
    /// terminal disposition (`Return` or `Fail`) is reached.
    #[tracing::instrument(skip(self, descriptor, base), fields(method = descriptor.method.as_str(), path = %descriptor.path))]
    async fn dispatch_with_retry(
        &self,
        descriptor: &RequestDescriptor,
        base: &Url,
    ) -> Result<(u16, Bytes)> {
        let mut budget = RetryBudget::new(
            self.config.max_rate_limit_retries,
            self.config.network_recovery.max_network_retries,
        );
        let mut invalidate_token = false;
        let mut attempt = 0u32;

        loop {
            let token = if descriptor.authenticated {
                Some(self.auth.access_token(invalidate_token).await?)
            } else {
                None
            };
            invalidate_token = false;

            let raw = self.build_raw_request(descriptor, base, token.as_ref())?;
            let raw = self.apply_interceptors(raw)?;

            let dispatch_result = self.transport.execute(raw, self.config.request_timeout).await;

            let disposition = match dispatch_result {
                Ok(response) => {
                    if let Some(info) = extract_rate_limit_info(&response) {
                        self.events.emit(Event::RateLimitInfo(info)).await;
                    }
                    let disposition = classify_response(
                        &response,
                        attempt,
                        &mut budget,
                        &self.config.network_recovery,
                    );
                    if let Disposition::Return = disposition {
                        return Ok((response.status, response.body));
                    }
                    disposition
                }
                Err(error) => classify_transport_error(
                    error,
                    attempt,
                    &mut budget,
                    &self.config.network_recovery,
                ),
            };

            match disposition {
                Disposition::Return => unreachable!("handled above"),
                Disposition::RetryWithFreshToken => {
                    if !descriptor.authenticated {
                        return Err(Error::HttpError {
                            status: 401,
                            body: "unauthenticated call received 401".to_string(),
                        });
                    }
                    tracing::warn!(attempt, "401 received, forcing token refresh and retrying");
                    invalidate_token = true;
                }
                Disposition::RetryAfter(delay) => {
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
                    tokio::time::sleep(delay).await;
                }
                Disposition::Fail(error) => return Err(error),
            }

            attempt += 1;
        }
    }

    /// Applies every registered interceptor in insertion order, short-
    /// circuiting on the first rejection.
    fn apply_interceptors(&self, mut request: RawRequest) -> Result<RawRequest> {
        if !self.interceptors.is_empty() {
            tracing::debug!(count = self.interceptors.len(), "applying interceptors");
        }
        for interceptor in &self.interceptors {
            request = interceptor.intercept(request)?;
        }
        Ok(request)
    }

    fn build_raw_request(
        &self,
        descriptor: &RequestDescriptor,
        base: &Url,
        token: Option<&crate::token::Token>,
    ) -> Result<RawRequest> {
        let url = descriptor.build_url(base)?;
        let mut headers = self.config.custom_headers.clone();
        for (k, v) in &descriptor.headers {
            headers.insert(k.clone(), v.clone());
        }
        if let Some(token) = token {
            headers.insert("authorization".to_string(), token.bearer_header_value());
        }
        if descriptor.body.is_some() && !headers.contains_key("content-type") {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }

        Ok(RawRequest {
            method: descriptor.method.as_str().to_string(),
            url: url.to_string(),
            headers,
            body: descriptor.body.clone(),
        })
    }
}

fn extract_rate_limit_info(response: &crate::transport::RawResponse) -> Option<crate::events::RateLimitInfo> {
    let limit = response.header("x-ratelimit-limit").and_then(|v| v.parse().ok());
    let remaining = response
        .header("x-ratelimit-remaining")
        .and_then(|v| v.parse().ok());
    let reset_at = response
        .header("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));

    if limit.is_none() && remaining.is_none() && reset_at.is_none() {
        return None;
    }

    Some(crate::events::RateLimitInfo {
        limit,
        remaining,
        reset_at,
    })
}

#[cfg(test)]
mod tests;
