//! In-flight Request Dedup (C6): concurrent identical idempotent GETs share
//! one outbound call and one decoded result (spec §4.4).
//!
//! Same shape as the auth refresh coalescing in `crate::auth::state`: a
//! table of fingerprint -> `watch::Sender`, registration and delivery
//! happen under a short-lived lock, and the actual HTTP call runs outside
//! any lock.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use tokio::sync::{Mutex, watch};

use crate::error::{Error, Result};
use crate::request::RequestDescriptor;

/// Identifies "the same call" for dedup purposes: method, path+query, body
/// hash, and the caller's `Authorization` header, so two tenants (or a
/// token refresh mid-flight) never share one tenant's response (spec §4.4,
/// resolved design decision).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn compute(descriptor: &RequestDescriptor, authorization: &str) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        descriptor.method.hash(&mut hasher);
        descriptor.path.hash(&mut hasher);

        let mut query = descriptor.query.clone();
        query.sort();
        query.hash(&mut hasher);

        if let Some(body) = &descriptor.body {
            body.hash(&mut hasher);
        }
        authorization.hash(&mut hasher);

        Fingerprint(hasher.finish())
    }
}

type SharedBody = Result<(u16, Bytes), String>;

/// The in-flight table. One instance lives per `Client`.
#[derive(Default)]
pub struct DedupTable {
    entries: Mutex<HashMap<Fingerprint, watch::Receiver<Option<SharedBody>>>>,
}

/// A lead caller's handle: performs the call, then must call
/// [`DedupTable::complete`] with the result exactly once.
pub struct Lead {
    fingerprint: Fingerprint,
    tx: watch::Sender<Option<SharedBody>>,
}

pub enum Lookup {
    /// No call for this fingerprint is in flight; caller must perform it.
    Lead(Lead),
    /// Another caller is already performing this exact call; wait for it.
    Join(watch::Receiver<Option<SharedBody>>),
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers intent to perform `fingerprint`'s call, or discovers one is
    /// already running. Only called for idempotent descriptors.
    pub async fn register(&self, fingerprint: Fingerprint) -> Lookup {
        let mut entries = self.entries.lock().await;
        if let Some(rx) = entries.get(&fingerprint) {
            return Lookup::Join(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        entries.insert(fingerprint.clone(), rx);
        Lookup::Lead(Lead { fingerprint, tx })
    }

    /// Delivers the result to every joined waiter and removes the entry so
    /// the next call with this fingerprint starts fresh (spec §4.4: removal
    /// happens before delivery to new callers, never after).
    pub async fn complete(&self, lead: Lead, result: &Result<(u16, Bytes)>) {
        {
            let mut entries = self.entries.lock().await;
            entries.remove(&lead.fingerprint);
        }
        let shared: SharedBody = result
            .as_ref()
            .map(|(status, body)| (*status, body.clone()))
            .map_err(|e| e.to_string());
        let _ = lead.tx.send(Some(shared));
    }
}

/// Waits for a result already being fetched by another caller.
pub async fn join(mut rx: watch::Receiver<Option<SharedBody>>) -> Result<(u16, Bytes)> {
    if rx.wait_for(|v| v.is_some()).await.is_err() {
        return Err(Error::Canceled);
    }
    match rx.borrow().clone().expect("checked Some above") {
        Ok(pair) => Ok(pair),
        Err(message) => Err(Error::NetworkFailure(message)),
    }
}
