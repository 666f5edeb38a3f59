use std::path::PathBuf;

use async_trait::async_trait;

use crate::{error::Error, error::Result, token::Token};

use super::TokenStore;

/// Persists the token triple as JSON under a single owner-only-readable
/// file, written atomically via temp-file + rename.
///
/// This is the fallback backend for platforms without a secure OS keystore;
/// the teacher crate's `~/.local/share/<app>/cache/token.json` layout is the
/// direct ancestor of this store's default path shape.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileTokenStore { path: path.into() }
    }

    /// Builds a store under the platform's local-data directory, mirroring
    /// the teacher's cache layout: `<data_local_dir>/<app>/token.json`.
    pub fn in_local_data_dir(app_name: &str) -> Self {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(app_name);
        path.push("token.json");
        FileTokenStore { path }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token: Token = serde_json::from_str(&content)
                    .map_err(|e| Error::TokenStorageError(e.to_string()))?;
                Ok(Some(token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::TokenStorageError(e.to_string())),
        }
    }

    async fn save(&self, token: &Token) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::TokenStorageError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(token)
            .map_err(|e| Error::TokenStorageError(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| Error::TokenStorageError(e.to_string()))?;

        restrict_permissions(&tmp_path).await?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::TokenStorageError(e.to_string()))
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::TokenStorageError(e.to_string())),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(|e| Error::TokenStorageError(e.to_string()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &std::path::Path) -> Result<()> {
    // Windows ACLs are not restricted here; the file still lives under the
    // user's own local-data directory, which is the platform's equivalent
    // default protection.
    Ok(())
}
