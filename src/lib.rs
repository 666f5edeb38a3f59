//! Request execution core for a music-service HTTP/JSON API client.
//!
//! This crate owns the parts of a client library that every endpoint
//! wrapper needs and none should reimplement: OAuth token lifecycle
//! (including coalesced concurrent refresh), request building and signing,
//! failure recovery (401/429/5xx), in-flight GET dedup, and pagination /
//! batch-ID helpers. It does not know about any particular endpoint —
//! callers bring their own `RequestDescriptor`s and JSON shapes.

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod pagination;
pub mod request;
pub mod retry;
pub mod token;
pub mod token_store;
pub mod transport;

pub use auth::{AuthBackend, AuthConfig};
pub use client::{Client, Interceptor};
pub use config::{Configuration, ConfigurationBuilder, DebugOptions, NetworkRecovery};
pub use error::{Error, Result, RetryStrategy};
pub use events::{Event, EventBus, Observer, RateLimitInfo, RefreshReason, SubscriptionId};
pub use request::{Method, RequestDescriptor};
pub use token::{PkcePair, Token};
pub use token_store::TokenStore;
pub use transport::{HttpTransport, RawRequest, RawResponse, ReqwestTransport};
