use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{error::Result, token::Token};

use super::TokenStore;

/// An in-memory token store, for tests and for callers who intentionally
/// forgo persistence across process restarts.
#[derive(Default)]
pub struct InMemoryTokenStore {
    slot: Mutex<Option<Token>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, token: &Token) -> Result<()> {
        *self.slot.lock().await = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}
