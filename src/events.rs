//! Event Bus (C10): best-effort lifecycle observers.
//!
//! Observers are registered through a token used to unregister, rather than
//! the event bus holding a strong, unboundable list of closures — this
//! avoids the capture-cycle trap the design notes call out (an observer
//! holding a reference back to the client that owns the bus).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::token::Token;

/// Why a refresh was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Triggered by the core itself (expiry, or a 401-driven forced refresh).
    Automatic,
    /// Triggered by an explicit caller action.
    Manual,
}

/// Rate-limit telemetry extracted from response headers (spec §3, §6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One lifecycle event, delivered in happens-before order within a call
/// (`WillStart` always precedes the matching `DidSucceed`/`DidFail`).
#[derive(Debug, Clone)]
pub enum Event {
    TokenRefreshWillStart {
        reason: RefreshReason,
        seconds_until_expiration: i64,
    },
    TokenRefreshDidSucceed {
        new_token: Token,
    },
    TokenRefreshDidFail {
        error: String,
    },
    TokenExpiring {
        seconds_until_expiration: i64,
    },
    RateLimitInfo(RateLimitInfo),
}

/// An observer of client lifecycle events. A single method keeps the trait
/// object cheap to store and call.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> Observer for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// A handle returned by [`EventBus::subscribe`], used to remove the
/// observer later. Dropping the token does not unregister; call
/// [`EventBus::unsubscribe`] explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Arc<dyn Observer>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().await.push((id, observer));
        SubscriptionId(id)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.observers.lock().await.retain(|(oid, _)| *oid != id.0);
    }

    /// Delivers an event to every observer, in subscription order. An
    /// observer that panics would abort the whole dispatch; observers are
    /// expected to be infallible, ordinary functions, so this is treated as
    /// a programmer error rather than guarded against per-call.
    pub async fn emit(&self, event: Event) {
        let observers = self.observers.lock().await.clone();
        for (_, observer) in observers {
            observer.on_event(&event);
        }
    }
}

/// Helper used by the retry engine to turn header values into telemetry,
/// tolerant of a missing or unparseable value.
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    if let Ok(seconds) = header_value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(header_value.trim())
        .ok()
        .and_then(|when| when.duration_since(std::time::SystemTime::now()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let seen_a = seen.clone();
        bus.subscribe(Arc::new(move |_e: &Event| seen_a.lock().unwrap().push("a")))
            .await;
        let seen_b = seen.clone();
        bus.subscribe(Arc::new(move |_e: &Event| seen_b.lock().unwrap().push("b")))
            .await;

        bus.emit(Event::TokenExpiring {
            seconds_until_expiration: 10,
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn parses_numeric_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
    }
}
