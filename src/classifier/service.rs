//! Service layer coordinating the store and the language-model provider.

use std::sync::Arc;

use super::descriptor::{CookieDescriptor, DescriptorSource};
use super::provider::{AiError, AiProvider};
use super::store::{CookieStore, StoreError, StoreStatistics};

/// Cache-first resolution of cookie descriptors.
///
/// The store is always consulted before the provider; provider answers are
/// persisted (descriptor and raw response) before being returned, so a task
/// is never "done" without its result surviving a restart.
pub struct CookieInfoService {
    store: Arc<CookieStore>,
    provider: Arc<dyn AiProvider>,
}

impl CookieInfoService {
    pub fn new(store: Arc<CookieStore>, provider: Arc<dyn AiProvider>) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &Arc<CookieStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn AiProvider> {
        &self.provider
    }

    /// Cache first, provider on miss. Degrades to an `Unknown` descriptor
    /// when the provider fails; callers that need the error use
    /// [`query_from_ai`](Self::query_from_ai) directly.
    pub fn get_cookie_info(&self, name: &str, domain: &str) -> CookieDescriptor {
        match self.get_cookie_info_cached(name, domain) {
            Ok(Some(cached)) => {
                log::debug!("[cache] found {name} in store");
                return cached;
            }
            Ok(None) => {}
            Err(err) => log::error!("store lookup failed for {name}: {err}"),
        }

        match self.query_from_ai(name, domain) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                log::error!("ai query failed for {name}: {err}");
                CookieDescriptor::unknown(name)
            }
        }
    }

    /// Cache-only lookup; never blocks on the provider.
    pub fn get_cookie_info_cached(
        &self,
        name: &str,
        domain: &str,
    ) -> Result<Option<CookieDescriptor>, StoreError> {
        self.store.lookup(name, domain)
    }

    /// Ask the provider and persist the answer. Store failures are logged
    /// and swallowed so the descriptor still reaches the caller; the cookie
    /// will simply be re-queried next time.
    pub fn query_from_ai(&self, name: &str, domain: &str) -> Result<CookieDescriptor, AiError> {
        if !self.provider.is_configured() {
            return Err(AiError::NotConfigured(format!(
                "{} provider has no credentials",
                self.provider.name()
            )));
        }

        log::debug!(
            "[ai] querying {} for {name} (domain: {domain})",
            self.provider.name()
        );
        let classification = self.provider.classify(name, domain)?;

        if let Err(err) = self.store.upsert(&classification.descriptor) {
            log::error!("failed to persist descriptor for {name}: {err}");
        }
        if let Err(err) = self
            .store
            .cache_raw_response(name, domain, &classification.raw_response)
        {
            log::error!("failed to cache raw response for {name}: {err}");
        }

        log::info!(
            "[ai] classified {name}: {} ({})",
            classification
                .descriptor
                .vendor
                .as_deref()
                .unwrap_or("unknown vendor"),
            classification.descriptor.category.as_str()
        );
        Ok(classification.descriptor)
    }

    /// Store a user-authored descriptor.
    pub fn upsert_manual(&self, mut descriptor: CookieDescriptor) -> Result<(), StoreError> {
        descriptor.source = DescriptorSource::Manual;
        self.store.upsert(&descriptor)
    }

    /// Apply a user correction with a field-level audit trail.
    pub fn apply_correction(&self, mut descriptor: CookieDescriptor) -> Result<bool, StoreError> {
        descriptor.source = DescriptorSource::Manual;
        self.store.apply_correction(&descriptor)
    }

    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        self.store.delete(name)
    }

    pub fn list_all(&self) -> Result<Vec<CookieDescriptor>, StoreError> {
        self.store.list_all()
    }

    pub fn add_pattern(&self, cookie_name: &str, pattern: &str) -> Result<bool, StoreError> {
        self.store.add_pattern(cookie_name, pattern)
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        self.store.statistics()
    }

    /// Probe the provider with a well-known cookie.
    pub fn test_connection(&self) -> bool {
        if !self.provider.is_configured() {
            return false;
        }
        match self.provider.classify("_ga", "google-analytics.com") {
            Ok(_) => true,
            Err(err) => {
                log::error!("provider connection test failed: {err}");
                false
            }
        }
    }
}
