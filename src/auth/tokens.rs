//! Token storage

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Live access/refresh token pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub obtained_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            obtained_at: Utc::now(),
        }
    }

    /// A pair without a refresh token cannot be renewed.
    pub fn can_renew(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// On-disk token record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub saved_at: DateTime<Utc>,
}

impl From<&TokenPair> for StoredTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            saved_at: Utc::now(),
        }
    }
}

impl From<StoredTokens> for TokenPair {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            obtained_at: stored.saved_at,
        }
    }
}

/// Durable single-record token storage.
///
/// Absence of a record is `Ok(None)`, not an error.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredTokens>>;
    fn save(&self, tokens: &StoredTokens) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file store. Writes go to a sibling temp file that is then renamed
/// over the target, so a crash never leaves a truncated record.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file {}", self.path.display()))?;
        let tokens = serde_json::from_str(&content).context("Failed to parse token file")?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &StoredTokens) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create token directory")?;
        }

        let tmp = self.temp_path();
        let content = serde_json::to_string_pretty(tokens).context("Failed to serialize tokens")?;
        // A leftover from an interrupted save would keep its old mode
        if tmp.exists() {
            fs::remove_file(&tmp).context("Failed to remove stale token file")?;
        }
        let mut file = create_private(&tmp).context("Failed to create token file")?;
        file.write_all(content.as_bytes())
            .context("Failed to write token file")?;
        file.sync_all().context("Failed to flush token file")?;
        drop(file);

        fs::rename(&tmp, &self.path).context("Failed to replace token file")?;
        tracing::debug!("Tokens saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

/// Open `path` for writing, creating it owner-only (contains tokens).
fn create_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FileTokenStore {
        let dir = std::env::temp_dir().join(format!(
            "spotify-widget-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        FileTokenStore::new(dir.join("tokens.json"))
    }

    #[test]
    fn test_missing_file_is_none() {
        let store = temp_store("missing");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_twice_reads_back_same_record() {
        let store = temp_store("idempotent");
        let tokens = StoredTokens::from(&TokenPair::new("at".into(), "rt".into()));

        store.save(&tokens).unwrap();
        store.save(&tokens).unwrap();

        assert_eq!(store.load().unwrap(), Some(tokens));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_record_uses_camel_case_fields() {
        let store = temp_store("fields");
        let tokens = StoredTokens::from(&TokenPair::new("at".into(), "rt".into()));
        store.save(&tokens).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"accessToken\""));
        assert!(raw.contains("\"refreshToken\""));
        assert!(raw.contains("\"savedAt\""));
    }

    #[test]
    fn test_clear_removes_record() {
        let store = temp_store("clear");
        store
            .save(&StoredTokens::from(&TokenPair::new("at".into(), "rt".into())))
            .unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store("perms");
        store
            .save(&StoredTokens::from(&TokenPair::new("at".into(), "rt".into())))
            .unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_pair_without_refresh_token_cannot_renew() {
        assert!(!TokenPair::new("at".into(), String::new()).can_renew());
    }

    #[cfg(unix)]
    #[test]
    fn test_new_file_is_private_before_any_write() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store("create");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let file = create_private(&store.temp_path()).unwrap();

        let mode = file.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_leftover_temp_file_is_replaced() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store("leftover");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.temp_path(), "partial").unwrap();
        fs::set_permissions(store.temp_path(), fs::Permissions::from_mode(0o644)).unwrap();

        store
            .save(&StoredTokens::from(&TokenPair::new("at".into(), "rt".into())))
            .unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
