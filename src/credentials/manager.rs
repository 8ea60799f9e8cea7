//! Token cache manager.
//!
//! Turns a [`CredentialBinding`] into a usable [`TokenRecord`]. Lookups go
//! through an in-memory cache first, then the encrypted vault, then the
//! provider adapter (refresh where the record allows it, mint otherwise).
//!
//! At most one refresh or mint runs per binding. Callers for the same binding
//! queue on a per-binding async mutex and re-check the cache once they hold
//! it, so they pick up the result of whoever went first. If that attempt
//! failed they simply run their own. The acquisition itself runs on a spawned
//! task, so a caller that goes away does not abort an exchange halfway.

use super::{CredentialBinding, Provider, TokenRecord, Vault, VaultRead};
use crate::error::{BoardError, Result};
use crate::oauth::ProviderAdapter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Point-in-time view of one binding, safe to expose over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub binding: String,
    pub provider: Provider,
    pub cached: bool,
    pub fresh: bool,
    pub expires_in_seconds: Option<i64>,
}

/// Thread-safe credential cache shared by every collaborator.
#[derive(Clone)]
pub struct TokenCacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    vault: Arc<Vault>,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    cache: RwLock<HashMap<CredentialBinding, TokenRecord>>,
    flights: Mutex<HashMap<CredentialBinding, Arc<AsyncMutex<()>>>>,
    refresh_buffer_seconds: i64,
}

impl TokenCacheManager {
    pub fn new(
        vault: Vault,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        refresh_buffer_seconds: i64,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.provider(), adapter))
            .collect();

        Self {
            inner: Arc::new(Inner {
                vault: Arc::new(vault),
                adapters,
                cache: RwLock::new(HashMap::new()),
                flights: Mutex::new(HashMap::new()),
                refresh_buffer_seconds,
            }),
        }
    }

    /// Returns a record with a non-empty access token for `binding`, or the
    /// error of the last strategy tried.
    pub async fn get_credential(&self, binding: &CredentialBinding) -> Result<TokenRecord> {
        let adapter = self.inner.adapter(binding.provider())?;

        // Fast path: no I/O when the cached record is still fresh.
        let cached = self.inner.cache.read().get(binding).cloned();
        if let Some(record) = cached {
            if self.inner.is_fresh(adapter.as_ref(), &record) {
                crate::metrics::record_acquisition(binding.provider().as_str(), "cache");
                return Ok(record);
            }
        }

        let inner = self.inner.clone();
        let owned = binding.clone();
        tokio::spawn(async move { inner.acquire(&owned).await })
            .await
            .map_err(|e| BoardError::Internal(format!("Credential task for {} failed: {}", binding, e)))?
    }

    /// Mints a new token regardless of what is cached or stored.
    /// Used by `--login` to force the consent flow.
    pub async fn reauthorize(&self, binding: &CredentialBinding) -> Result<TokenRecord> {
        let inner = self.inner.clone();
        let owned = binding.clone();
        tokio::spawn(async move {
            let adapter = inner.adapter(owned.provider())?;
            let flight = inner.flight(&owned);
            let _guard = flight.lock().await;

            info!("Re-authorizing {}", owned);
            let minted = adapter.mint_token(owned.scopes()).await;
            inner.finish(&owned, minted, "mint").await
        })
        .await
        .map_err(|e| BoardError::Internal(format!("Credential task for {} failed: {}", binding, e)))?
    }

    /// Drops every in-memory record. The vault is untouched.
    pub fn reset(&self) {
        self.inner.cache.write().clear();
        debug!("Cleared in-memory credential cache");
    }

    pub fn token_status(&self, binding: &CredentialBinding) -> TokenStatus {
        let cached = self.inner.cache.read().get(binding).cloned();
        let fresh = match (&cached, self.inner.adapter(binding.provider())) {
            (Some(record), Ok(adapter)) => self.inner.is_fresh(adapter.as_ref(), record),
            _ => false,
        };

        TokenStatus {
            binding: binding.to_string(),
            provider: binding.provider(),
            cached: cached.is_some(),
            fresh,
            expires_in_seconds: cached.as_ref().and_then(TokenRecord::expires_in_seconds),
        }
    }
}

impl Inner {
    fn adapter(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            BoardError::Config(format!("No adapter configured for provider {}", provider))
        })
    }

    fn flight(&self, binding: &CredentialBinding) -> Arc<AsyncMutex<()>> {
        self.flights.lock().entry(binding.clone()).or_default().clone()
    }

    /// Adapter freshness, plus cache-level expiry tracking for adapters that
    /// cannot refresh and always report stale.
    fn is_fresh(&self, adapter: &dyn ProviderAdapter, record: &TokenRecord) -> bool {
        if adapter.is_fresh(record) {
            return true;
        }
        !adapter.supports_refresh()
            && record.expiry().is_some()
            && !record.is_expired(self.refresh_buffer_seconds)
    }

    /// Freshness check that may ask the provider about records without an expiry.
    async fn is_usable(&self, adapter: &dyn ProviderAdapter, record: &TokenRecord) -> bool {
        if self.is_fresh(adapter, record) {
            return true;
        }
        if record.expiry().is_some() {
            return false;
        }

        match adapter.validate(record).await {
            Ok(valid) => valid && self.is_fresh(adapter, record),
            Err(e) => {
                warn!("Could not validate stored token: {}", e);
                false
            }
        }
    }

    /// Vault file I/O runs on the blocking pool, off the runtime workers.
    async fn read_stored(&self, token_identity: &str) -> Result<VaultRead> {
        let vault = self.vault.clone();
        let identity = token_identity.to_string();
        tokio::task::spawn_blocking(move || vault.read(&identity))
            .await
            .map_err(|e| BoardError::Internal(format!("Vault read task failed: {}", e)))?
    }

    async fn store(&self, token_identity: &str, record: TokenRecord) -> Result<()> {
        let vault = self.vault.clone();
        let identity = token_identity.to_string();
        tokio::task::spawn_blocking(move || vault.write(&identity, &record))
            .await
            .map_err(|e| BoardError::Internal(format!("Vault write task failed: {}", e)))?
    }

    async fn acquire(&self, binding: &CredentialBinding) -> Result<TokenRecord> {
        let adapter = self.adapter(binding.provider())?;
        let flight = self.flight(binding);
        let _guard = flight.lock().await;

        // Whoever held the lock before us may have produced a fresh record.
        let cached = self.cache.read().get(binding).cloned();
        if let Some(record) = &cached {
            if self.is_fresh(adapter.as_ref(), record) {
                debug!("Credential for {} produced by a concurrent caller", binding);
                crate::metrics::record_acquisition(binding.provider().as_str(), "cache");
                return Ok(record.clone());
            }
        }

        let stored = match self.read_stored(binding.token_identity()).await? {
            VaultRead::Found(record) => Some(record),
            VaultRead::Absent => {
                debug!("No stored token for {}", binding);
                None
            }
            VaultRead::Corrupt => {
                warn!("Stored token for {} is unreadable; re-authorizing", binding);
                None
            }
        };

        if let Some(record) = &stored {
            if self.is_usable(adapter.as_ref(), record).await {
                debug!("Loaded credential for {} from vault", binding);
                crate::metrics::update_token_expiry(binding.token_identity(), record.expires_in_seconds());
                self.cache.write().insert(binding.clone(), record.clone());
                crate::metrics::record_acquisition(binding.provider().as_str(), "vault");
                return Ok(record.clone());
            }
        }

        // A stale in-memory record still carries a usable refresh token if the
        // vault copy is gone.
        let candidate = stored.or(cached);
        if let Some(record) = candidate.filter(|r| r.refresh_token().is_some()) {
            if adapter.supports_refresh() {
                info!("Refreshing credential for {}", binding);
                match adapter.refresh(&record).await {
                    Ok(refreshed) => return self.finish(binding, Ok(refreshed), "refresh").await,
                    Err(BoardError::RefreshDenied(reason)) => {
                        warn!("Refresh denied for {} ({}); falling back to mint", binding, reason);
                    }
                    Err(e) => return self.finish(binding, Err(e), "refresh").await,
                }
            }
        }

        info!("Minting new credential for {}", binding);
        let minted = adapter.mint_token(binding.scopes()).await;
        self.finish(binding, minted, "mint").await
    }

    /// Persists and caches a successful exchange. A failed vault write is
    /// logged; the token is still served from memory.
    async fn finish(
        &self,
        binding: &CredentialBinding,
        outcome: Result<TokenRecord>,
        path: &str,
    ) -> Result<TokenRecord> {
        let provider = binding.provider().as_str();
        let record = match outcome {
            Ok(record) => record,
            Err(e) => {
                crate::metrics::record_acquisition(provider, "failure");
                error!("Credential {} for {} failed: {}", path, binding, e);
                return Err(e);
            }
        };

        if record.access_token().is_empty() {
            crate::metrics::record_acquisition(provider, "failure");
            return Err(BoardError::AuthExchange(format!(
                "{} for {} produced no access token",
                path, binding
            )));
        }

        if let Err(e) = self.store(binding.token_identity(), record.clone()).await {
            error!("Persistence error while saving token for {}: {}", binding, e);
        }

        crate::metrics::update_token_expiry(binding.token_identity(), record.expires_in_seconds());
        self.cache.write().insert(binding.clone(), record.clone());
        crate::metrics::record_acquisition(provider, path);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::EncryptionKey;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RefreshingAdapter {
        mints: AtomicUsize,
        refreshes: AtomicUsize,
        deny_refresh: bool,
    }

    impl RefreshingAdapter {
        fn new(deny_refresh: bool) -> Arc<Self> {
            Arc::new(Self {
                mints: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
                deny_refresh,
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for RefreshingAdapter {
        fn provider(&self) -> Provider {
            Provider::GoogleInteractive
        }

        async fn mint_token(&self, _scopes: &BTreeSet<String>) -> Result<TokenRecord> {
            let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
            TokenRecord::new(
                format!("minted-{}", n),
                Some("refresh-token".to_string()),
                Some(Utc::now() + Duration::hours(1)),
                serde_json::Value::Null,
            )
        }

        fn is_fresh(&self, record: &TokenRecord) -> bool {
            !record.is_expired(60)
        }

        async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.deny_refresh {
                return Err(BoardError::RefreshDenied("invalid_grant".to_string()));
            }
            TokenRecord::new(
                "refreshed",
                record.refresh_token().map(str::to_string),
                Some(Utc::now() + Duration::hours(1)),
                serde_json::Value::Null,
            )
        }
    }

    fn binding() -> CredentialBinding {
        CredentialBinding::new(Provider::GoogleInteractive, ["calendar.readonly"], "calendar_token").unwrap()
    }

    fn vault(dir: &std::path::Path) -> Vault {
        Vault::new(dir, EncryptionKey::from_bytes([9u8; 32])).unwrap()
    }

    fn manager(vault: Vault, adapter: Arc<RefreshingAdapter>) -> TokenCacheManager {
        let adapter: Arc<dyn ProviderAdapter> = adapter;
        TokenCacheManager::new(vault, vec![adapter], 60)
    }

    fn expired(refresh: Option<&str>) -> TokenRecord {
        TokenRecord::new(
            "expired",
            refresh.map(str::to_string),
            Some(Utc::now() - Duration::minutes(10)),
            serde_json::Value::Null,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cached_record_served_without_adapter_calls() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = RefreshingAdapter::new(false);
        let manager = manager(vault(dir.path()), adapter.clone());

        let first = manager.get_credential(&binding()).await.unwrap();
        let second = manager.get_credential(&binding()).await.unwrap();

        assert_eq!(first.access_token(), second.access_token());
        assert_eq!(adapter.mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_denied_falls_back_to_mint() {
        let dir = tempfile::tempdir().unwrap();
        let store = vault(dir.path());
        store.write("calendar_token", &expired(Some("revoked"))).unwrap();

        let adapter = RefreshingAdapter::new(true);
        let manager = manager(store, adapter.clone());
        let record = manager.get_credential(&binding()).await.unwrap();

        assert_eq!(record.access_token(), "minted-1");
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_forces_vault_reload() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = RefreshingAdapter::new(false);
        let manager = manager(vault(dir.path()), adapter.clone());

        manager.get_credential(&binding()).await.unwrap();
        assert!(manager.token_status(&binding()).cached);

        manager.reset();
        assert!(!manager.token_status(&binding()).cached);

        let reloaded = manager.get_credential(&binding()).await.unwrap();
        assert_eq!(reloaded.access_token(), "minted-1");
        assert_eq!(adapter.mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reauthorize_mints_even_when_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = RefreshingAdapter::new(false);
        let manager = manager(vault(dir.path()), adapter.clone());

        manager.get_credential(&binding()).await.unwrap();
        let forced = manager.reauthorize(&binding()).await.unwrap();

        assert_eq!(forced.access_token(), "minted-2");
        let served = manager.get_credential(&binding()).await.unwrap();
        assert_eq!(served.access_token(), "minted-2");
    }

    #[tokio::test]
    async fn test_missing_adapter_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TokenCacheManager::new(vault(dir.path()), vec![], 60);
        let result = manager.get_credential(&binding()).await;
        assert!(matches!(result, Err(BoardError::Config(_))));
    }

    #[tokio::test]
    async fn test_token_status_reports_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = RefreshingAdapter::new(false);
        let manager = manager(vault(dir.path()), adapter);

        let before = manager.token_status(&binding());
        assert!(!before.cached && !before.fresh);

        manager.get_credential(&binding()).await.unwrap();
        let after = manager.token_status(&binding());
        assert!(after.cached && after.fresh);
        assert!(after.expires_in_seconds.unwrap() > 3000);
        assert_eq!(after.binding, "google:calendar_token");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_vault_io_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(vault(dir.path()), RefreshingAdapter::new(false));
        let record = expired(Some("1//0stored"));

        manager.inner.store("calendar_token", record.clone()).await.unwrap();
        match manager.inner.read_stored("calendar_token").await.unwrap() {
            VaultRead::Found(found) => assert_eq!(found, record),
            _ => panic!("expected stored record"),
        }
        assert!(matches!(
            manager.inner.read_stored("photos_token").await.unwrap(),
            VaultRead::Absent
        ));
    }
}
