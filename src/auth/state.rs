//! Refresh coalescing: only one outbound refresh call is ever in flight per
//! [`super::AuthBackend`]; concurrent callers observing an expired (or
//! force-invalidated) token share its result instead of each issuing their
//! own request (spec §4.1, §8 scenario 4).
//!
//! I/O never happens while the state mutex is held: `decide` and `finish`
//! only move data in and out of the mutex, and the actual token-endpoint
//! call happens in `AuthBackend::run_refresh` between the two.

use tokio::sync::{Mutex, watch};

use crate::error::{Error, Result};
use crate::token::Token;

/// What a refresh finished with, reduced to a `String` so it can travel
/// through a `watch` channel without requiring `Error: Clone`.
type SharedOutcome = Result<Token, String>;

struct Inner {
    cached: Option<Token>,
    in_flight: Option<watch::Receiver<Option<SharedOutcome>>>,
}

pub struct AuthState {
    inner: Mutex<Inner>,
}

/// Returned to the caller that must perform the refresh itself.
pub struct RefreshLead {
    pub previous: Option<Token>,
    tx: watch::Sender<Option<SharedOutcome>>,
}

/// Returned to a caller that arrived after another refresh was already
/// under way; it waits on the same channel rather than the state mutex.
pub struct Awaiter(watch::Receiver<Option<SharedOutcome>>);

impl Awaiter {
    pub async fn wait_for_result(&mut self) -> Result<Token> {
        if self
            .0
            .wait_for(|v| v.is_some())
            .await
            .is_err()
        {
            // The leader dropped its sender without sending (panicked mid-refresh).
            return Err(Error::Canceled);
        }
        match self.0.borrow().clone().expect("checked Some above") {
            Ok(token) => Ok(token),
            Err(message) => Err(Error::AuthFailure {
                kind: crate::error::AuthFailureKind::TokenEndpointHttp {
                    status: 0,
                    body: message,
                },
            }),
        }
    }
}

pub enum Decision {
    UseCached(Token),
    Await(Awaiter),
    LeadRefresh(RefreshLead),
}

impl AuthState {
    pub fn new() -> Self {
        AuthState {
            inner: Mutex::new(Inner {
                cached: None,
                in_flight: None,
            }),
        }
    }

    /// Decides, under the lock, whether this caller can use the cached
    /// token, must wait on an in-progress refresh, or must lead a new one.
    pub async fn decide(&self, invalidate_previous: bool) -> Result<Decision> {
        let mut inner = self.inner.lock().await;

        if let Some(rx) = &inner.in_flight {
            return Ok(Decision::Await(Awaiter(rx.clone())));
        }

        if !invalidate_previous {
            if let Some(token) = &inner.cached {
                if !token.is_expired() {
                    return Ok(Decision::UseCached(token.clone()));
                }
            }
        }

        let (tx, rx) = watch::channel(None);
        let previous = inner.cached.clone();
        inner.in_flight = Some(rx);
        Ok(Decision::LeadRefresh(RefreshLead { previous, tx }))
    }

    /// Publishes the refresh result to any awaiters, updates the cache on
    /// success, and clears the in-flight slot so the next caller to observe
    /// an expired token leads a fresh refresh.
    pub async fn finish(&self, lead: RefreshLead, outcome: &Result<Token>) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = None;
        if let Ok(token) = outcome {
            inner.cached = Some(token.clone());
        }
        let shared: SharedOutcome = outcome.as_ref().map(|t| t.clone()).map_err(|e| e.to_string());
        let _ = lead.tx.send(Some(shared));
    }

    /// Seeds the cache directly after a grant exchange (no refresh involved).
    pub async fn seed(&self, token: Token) {
        let mut inner = self.inner.lock().await;
        inner.cached = Some(token);
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.cached = None;
        inner.in_flight = None;
    }
}
