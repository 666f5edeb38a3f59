//! Token Store (C1): persist/load/clear the token triple.
//!
//! Three implementations are provided, matching spec §4.7: a restricted
//! permission JSON file store for platforms without a secure keystore, an
//! OS-keystore store where one is available (feature `keyring-store`), and
//! an in-memory store for tests. All failures surface as
//! `Error::TokenStorageError` without the `AuthBackend` altering its cached
//! in-memory token.

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring_store;

pub use file::FileTokenStore;
pub use memory::InMemoryTokenStore;
#[cfg(feature = "keyring-store")]
pub use keyring_store::KeyringTokenStore;

use async_trait::async_trait;

use crate::{error::Result, token::Token};

/// Storage contract for the token triple. Every operation is fallible;
/// callers (the Auth Backend) map failures to `Error::TokenStorageError`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Token>>;
    async fn save(&self, token: &Token) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}
