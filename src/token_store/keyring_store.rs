use async_trait::async_trait;
use keyring::Entry;

use crate::{error::Error, error::Result, token::Token};

use super::TokenStore;

/// Persists the token triple as a single named secret in the platform's
/// secure keystore (Keychain / Credential Manager / Secret Service).
///
/// Updates are atomic at the keystore API level; there is no intermediate
/// state a concurrent reader could observe.
pub struct KeyringTokenStore {
    service: String,
    account: String,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        KeyringTokenStore {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| Error::TokenStorageError(e.to_string()))
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        let entry = self.entry()?;
        // The keyring crate is synchronous; the call is fast (a single IPC
        // round-trip to the OS keystore) so it runs inline rather than via
        // spawn_blocking.
        match entry.get_password() {
            Ok(json) => {
                let token = serde_json::from_str(&json)
                    .map_err(|e| Error::TokenStorageError(e.to_string()))?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::TokenStorageError(e.to_string())),
        }
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let entry = self.entry()?;
        let json =
            serde_json::to_string(token).map_err(|e| Error::TokenStorageError(e.to_string()))?;
        entry
            .set_password(&json)
            .map_err(|e| Error::TokenStorageError(e.to_string()))
    }

    async fn clear(&self) -> Result<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::TokenStorageError(e.to_string())),
        }
    }
}
