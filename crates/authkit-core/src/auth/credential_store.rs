use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::{AuthError, CredentialPair};

/// Persistence abstraction for the access/refresh token pair.
///
/// Implementations only store strings: expiry and renewal decisions live in
/// [`RenewalCoordinator`](super::RenewalCoordinator). A `set_*` followed by the matching getter
/// must observe the new value.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Result<Option<String>, AuthError>;
    fn refresh_token(&self) -> Result<Option<String>, AuthError>;
    fn set_access_token(&self, token: Option<&str>) -> Result<(), AuthError>;
    fn set_refresh_token(&self, token: Option<&str>) -> Result<(), AuthError>;

    fn store_pair(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        self.set_access_token(Some(&pair.access))?;
        self.set_refresh_token(Some(&pair.refresh))
    }

    /// Remove both tokens. Both writes are attempted even if the first fails.
    fn clear(&self) -> Result<(), AuthError> {
        let access = self.set_access_token(None);
        let refresh = self.set_refresh_token(None);
        access.and(refresh)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoredTokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Process-local store. Clones share the same slot.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    inner: Arc<Mutex<StoredTokens>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let store = Self::new();
        {
            let mut tokens = store.lock();
            tokens.access = access.map(str::to_owned);
            tokens.refresh = refresh.map(str::to_owned);
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredTokens> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.lock().access.clone())
    }

    fn refresh_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.lock().refresh.clone())
    }

    fn set_access_token(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.lock().access = token.map(str::to_owned);
        Ok(())
    }

    fn set_refresh_token(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.lock().refresh = token.map(str::to_owned);
        Ok(())
    }
}

/// Filesystem-backed token storage located in the user configuration directory.
pub struct FileCredentialStore {
    locator: ConfigLocator,
    profile: String,
    // Serializes read-modify-write cycles on the token file.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(locator: ConfigLocator, profile: impl Into<String>) -> Self {
        Self {
            locator,
            profile: profile.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_default_locator(profile: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self::new(ConfigLocator::new()?, profile))
    }

    fn load(&self) -> Result<StoredTokens, AuthError> {
        let path = self.locator.credentials_file(&self.profile);
        if !path.exists() {
            return Ok(StoredTokens::default());
        }
        let raw = fs::read_to_string(path)?;
        let envelope: TokenEnvelope = serde_json::from_str(&raw)?;
        Ok(envelope.tokens)
    }

    fn update(&self, apply: impl FnOnce(&mut StoredTokens)) -> Result<(), AuthError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut tokens = self.load()?;
        apply(&mut tokens);

        let path = self.locator.credentials_file(&self.profile);
        if tokens.access.is_none() && tokens.refresh.is_none() {
            return match fs::remove_file(path) {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        let envelope = TokenEnvelope {
            version: 1,
            profile: self.profile.clone(),
            tokens,
        };
        let payload = serde_json::to_string_pretty(&envelope)?;
        Self::write_file(&path, &payload)
    }

    // Written next to the target and renamed over it, so readers never see a partial file.
    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        // A leftover from an interrupted write may carry other permissions.
        let _ = fs::remove_file(&staging);
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&staging)?;
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load()?.access)
    }

    fn refresh_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load()?.refresh)
    }

    fn set_access_token(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.update(|tokens| tokens.access = token.map(str::to_owned))
    }

    fn set_refresh_token(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.update(|tokens| tokens.refresh = token.map(str::to_owned))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenEnvelope {
    version: u32,
    profile: String,
    #[serde(flatten)]
    tokens: StoredTokens,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_store(temp_dir: &TempDir) -> FileCredentialStore {
        let locator = ConfigLocator::from_root(temp_dir.path().to_path_buf());
        FileCredentialStore::new(locator, "default")
    }

    #[test]
    fn round_trip_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.store_pair(&CredentialPair::new("access", "refresh")).unwrap();

        let reopened = file_store(&temp_dir);
        assert_eq!(reopened.access_token().unwrap().as_deref(), Some("access"));
        assert_eq!(reopened.refresh_token().unwrap().as_deref(), Some("refresh"));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());
    }

    #[test]
    fn partial_update_keeps_other_token() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.store_pair(&CredentialPair::new("a1", "r1")).unwrap();
        store.set_access_token(None).unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn rewrite_leaves_no_staging_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.store_pair(&CredentialPair::new("a1", "r1")).unwrap();
        store.store_pair(&CredentialPair::new("a2", "r2")).unwrap();
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["tokens-default.json"]);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
    }

    #[test]
    fn clearing_both_tokens_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.store_pair(&CredentialPair::new("a1", "r1")).unwrap();
        store.clear().unwrap();
        let path = temp_dir.path().join("tokens-default.json");
        assert!(!path.exists());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_user_only() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.set_refresh_token(Some("r1")).unwrap();
        let path = temp_dir.path().join("tokens-default.json");
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryCredentialStore::new();
        let clone = store.clone();
        store.set_access_token(Some("a")).unwrap();
        assert_eq!(clone.access_token().unwrap().as_deref(), Some("a"));
        clone.clear().unwrap();
        assert!(store.access_token().unwrap().is_none());
    }
}
