//! Durable holder of the access/refresh token pair.

use std::sync::{Arc, PoisonError, RwLock};

use {
    secrecy::{ExposeSecret, SecretString},
    tracing::{debug, warn},
};

use crate::storage::{Storage, keys};

/// A snapshot of the stored credentials. A missing access token means
/// "unauthenticated".
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access: Option<SecretString>,
    pub refresh: Option<SecretString>,
}

/// In-memory copy of the token pair, written through to [`Storage`].
///
/// Writes come only from login/logout, the refresh coordinator and the
/// initialization guard; request call sites only read.
///
/// Every [`set`](TokenStore::set) and [`clear`](TokenStore::clear) starts a new
/// epoch. Background writers (refresh, bootstrap) capture the epoch before
/// they go to the network and write through the `_if_epoch` variants, so a
/// result that lands after a logout or a fresh login is dropped.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    current: RwLock<Slot>,
}

#[derive(Default)]
struct Slot {
    credentials: Credentials,
    epoch: u64,
}

impl TokenStore {
    /// Empty in memory; call [`TokenStore::load`] to pick up persisted tokens.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            current: RwLock::new(Slot::default()),
        }
    }

    /// Whether persistent storage holds an access token.
    pub fn has_persisted_token(&self) -> bool {
        matches!(self.storage.get(keys::ACCESS_TOKEN), Ok(Some(ref token)) if !token.is_empty())
    }

    /// Copy persisted tokens into memory. Returns whether an access token was found.
    pub fn load(&self) -> bool {
        let read = |key: &str| match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()).map(SecretString::new),
            Err(e) => {
                warn!(key, error = %e, "failed to read persisted token");
                None
            },
        };
        let loaded = Credentials {
            access: read(keys::ACCESS_TOKEN),
            refresh: read(keys::REFRESH_TOKEN),
        };
        let found = loaded.access.is_some();
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials = loaded;
        debug!(found, "loaded persisted tokens");
        found
    }

    pub fn get(&self) -> Credentials {
        self.snapshot().0
    }

    /// Current credentials together with the epoch they belong to.
    pub fn snapshot(&self) -> (Credentials, u64) {
        let slot = self.current.read().unwrap_or_else(PoisonError::into_inner);
        (slot.credentials.clone(), slot.epoch)
    }

    pub fn epoch(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .epoch
    }

    pub fn access_token(&self) -> Option<SecretString> {
        self.get().access
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        self.get().refresh
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().access.is_some()
    }

    /// Replace both tokens in memory and in storage, starting a new epoch.
    ///
    /// Persistence failures are logged; the new tokens stay usable for the
    /// lifetime of this process either way.
    pub fn set(&self, access: SecretString, refresh: SecretString) {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.write(&mut slot, access, refresh);
        slot.epoch += 1;
    }

    /// Like [`TokenStore::set`] but only while `epoch` is still current, and
    /// without starting a new one. Returns whether the tokens were written.
    pub fn set_if_epoch(&self, epoch: u64, access: SecretString, refresh: SecretString) -> bool {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if slot.epoch != epoch {
            debug!(epoch, current = slot.epoch, "stale token write dropped");
            return false;
        }
        self.write(&mut slot, access, refresh);
        true
    }

    /// Remove both tokens from memory and storage, starting a new epoch.
    pub fn clear(&self) {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.erase(&mut slot);
    }

    /// Like [`TokenStore::clear`] but only while `epoch` is still current.
    pub fn clear_if_epoch(&self, epoch: u64) -> bool {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if slot.epoch != epoch {
            debug!(epoch, current = slot.epoch, "stale token clear dropped");
            return false;
        }
        self.erase(&mut slot);
        true
    }

    fn write(&self, slot: &mut Slot, access: SecretString, refresh: SecretString) {
        if let Err(e) = self.storage.set_many(&[
            (keys::ACCESS_TOKEN, access.expose_secret().as_str()),
            (keys::REFRESH_TOKEN, refresh.expose_secret().as_str()),
        ]) {
            warn!(error = %e, "failed to persist tokens");
        }
        slot.credentials = Credentials {
            access: Some(access),
            refresh: Some(refresh),
        };
        debug!("tokens updated");
    }

    fn erase(&self, slot: &mut Slot) {
        if let Err(e) = self
            .storage
            .delete_many(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN])
        {
            warn!(error = %e, "failed to remove persisted tokens");
        }
        slot.credentials = Credentials::default();
        slot.epoch += 1;
        debug!("tokens cleared");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, crate::storage::MemoryStorage};

    fn secret(value: &str) -> SecretString {
        SecretString::new(value.to_string())
    }

    fn expose(token: Option<SecretString>) -> Option<String> {
        token.map(|t| t.expose_secret().clone())
    }

    #[test]
    fn set_persists_and_updates_memory() {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(storage.clone());
        assert!(!tokens.is_authenticated());

        tokens.set(secret("a1"), secret("r1"));

        assert_eq!(expose(tokens.access_token()).as_deref(), Some("a1"));
        assert_eq!(expose(tokens.refresh_token()).as_deref(), Some("r1"));
        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("a1"));
        assert_eq!(storage.get(keys::REFRESH_TOKEN).unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn clear_removes_memory_and_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(storage.clone());
        tokens.set(secret("a1"), secret("r1"));
        storage.set(keys::SELECTED_ACCOUNT, "4").unwrap();

        tokens.clear();

        assert!(tokens.access_token().is_none());
        assert!(tokens.refresh_token().is_none());
        assert!(storage.get(keys::ACCESS_TOKEN).unwrap().is_none());
        assert!(storage.get(keys::REFRESH_TOKEN).unwrap().is_none());
        // Unrelated keys survive.
        assert_eq!(storage.get(keys::SELECTED_ACCOUNT).unwrap().as_deref(), Some("4"));
    }

    #[test]
    fn load_reads_persisted_pair() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(keys::ACCESS_TOKEN, "a9").unwrap();
        storage.set(keys::REFRESH_TOKEN, "r9").unwrap();

        let tokens = TokenStore::new(storage);
        assert!(tokens.has_persisted_token());
        assert!(tokens.access_token().is_none());

        assert!(tokens.load());
        assert_eq!(expose(tokens.access_token()).as_deref(), Some("a9"));
        assert_eq!(expose(tokens.refresh_token()).as_deref(), Some("r9"));
    }

    #[test]
    fn empty_persisted_token_counts_as_missing() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(keys::ACCESS_TOKEN, "").unwrap();
        let tokens = TokenStore::new(storage);
        assert!(!tokens.has_persisted_token());
        assert!(!tokens.load());
    }

    #[test]
    fn debug_output_hides_tokens() {
        let tokens = TokenStore::new(Arc::new(MemoryStorage::new()));
        tokens.set(secret("a-very-secret"), secret("r-very-secret"));
        let debug = format!("{:?}", tokens.get());
        assert!(!debug.contains("very-secret"));
    }

    #[test]
    fn stale_epoch_writes_are_dropped() {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(storage.clone());
        tokens.set(secret("a1"), secret("r1"));
        let (_, epoch) = tokens.snapshot();

        assert!(tokens.set_if_epoch(epoch, secret("a2"), secret("r1")));
        assert_eq!(tokens.epoch(), epoch);

        tokens.clear();
        assert!(!tokens.set_if_epoch(epoch, secret("a3"), secret("r3")));
        assert!(!tokens.clear_if_epoch(epoch));
        assert!(tokens.access_token().is_none());
        assert!(storage.get(keys::ACCESS_TOKEN).unwrap().is_none());
    }

    #[test]
    fn login_starts_a_new_epoch() {
        let tokens = TokenStore::new(Arc::new(MemoryStorage::new()));
        let before = tokens.epoch();
        tokens.set(secret("b1"), secret("s1"));

        assert_ne!(tokens.epoch(), before);
        assert!(!tokens.clear_if_epoch(before));
        assert_eq!(expose(tokens.access_token()).as_deref(), Some("b1"));
    }
}
