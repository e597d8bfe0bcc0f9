//! High level wiring.
//!
//! Builds the classification pipeline (store → provider → service → queue →
//! auto-processor) and the solver from one snapshotted configuration, and
//! exposes the operations the host UI consumes. Prefer constructing one
//! [`CookieSuite`] at extension load and passing handles into consumers over
//! any process-global state.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::analyzer::request::CaptureRequest;
use crate::analyzer::solver::{AnalyzerConfig, CookieAnalyzer};
use crate::analyzer::verdict::Verdict;
use crate::classifier::auto::AutoProcessor;
use crate::classifier::descriptor::CookieDescriptor;
use crate::classifier::domain_filter::{DomainFilter, FilterMode};
use crate::classifier::provider::{provider_for, AiError, AiProvider, ProviderConfig};
use crate::classifier::queue::{DiscoveryTask, ProcessingQueue, QueueConfig, QueueStats, TaskPriority};
use crate::classifier::service::CookieInfoService;
use crate::classifier::store::{CookieStore, StoreError, StoreStatistics};
use crate::host::{Preferences, ReplayTransport, ScopeAll, ScopeCheck, TrafficHistory};

/// Errors raised while assembling the suite.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("ai provider error: {0}")]
    Ai(#[from] AiError),
    #[error("replay transport error: {0}")]
    Transport(#[from] crate::host::TransportError),
}

/// Snapshot of every tunable the suite honours. Changing a value after
/// construction requires rebuilding the suite.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub store_path: Option<PathBuf>,
    pub auto_process: bool,
    pub worker_threads: usize,
    pub queries_per_minute: u32,
    pub filter_mode: FilterMode,
    pub filter_domains: BTreeSet<String>,
    pub ai_provider: String,
    pub ai_endpoint: Option<String>,
    pub api_key: String,
    pub model: String,
    pub analyzer: AnalyzerConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            auto_process: false,
            worker_threads: 3,
            queries_per_minute: 10,
            filter_mode: FilterMode::All,
            filter_domains: BTreeSet::new(),
            ai_provider: "OpenAI".to_string(),
            ai_endpoint: None,
            api_key: String::new(),
            model: "gpt-4".to_string(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl SuiteConfig {
    /// Load the configuration from host preferences, falling back to the
    /// documented defaults and clamping out-of-range values.
    pub fn from_preferences(prefs: &dyn Preferences) -> Self {
        let defaults = Self::default();
        Self {
            store_path: prefs
                .get_string("cookiedb.path")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            auto_process: prefs
                .get_bool("cookiedb.autoProcess")
                .unwrap_or(defaults.auto_process),
            worker_threads: prefs
                .get_int("cookiedb.workerThreads")
                .map(|n| n.clamp(1, 10) as usize)
                .unwrap_or(defaults.worker_threads),
            queries_per_minute: prefs
                .get_int("cookiedb.queriesPerMinute")
                .map(|n| n.clamp(1, 60) as u32)
                .unwrap_or(defaults.queries_per_minute),
            filter_mode: prefs
                .get_string("cookiedb.domainFilter.mode")
                .map(|mode| FilterMode::parse(&mode))
                .unwrap_or(defaults.filter_mode),
            filter_domains: prefs
                .get_string("cookiedb.domainFilter.domains")
                .map(|raw| DomainFilter::parse_domain_list(&raw))
                .unwrap_or_default(),
            ai_provider: prefs
                .get_string("cookiedb.ai.provider")
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.ai_provider),
            ai_endpoint: prefs
                .get_string("cookiedb.ai.endpoint")
                .filter(|endpoint| !endpoint.is_empty()),
            api_key: prefs
                .get_string("cookiedb.openai.apiKey")
                .unwrap_or(defaults.api_key),
            model: prefs
                .get_string("cookiedb.openai.model")
                .filter(|model| !model.is_empty())
                .unwrap_or(defaults.model),
            analyzer: defaults.analyzer,
        }
    }
}

/// Fluent builder for [`CookieSuite`].
pub struct CookieSuiteBuilder {
    config: SuiteConfig,
    transport: Option<Arc<dyn ReplayTransport>>,
    scope: Option<Arc<dyn ScopeCheck>>,
    provider: Option<Arc<dyn AiProvider>>,
}

impl CookieSuiteBuilder {
    pub fn new() -> Self {
        Self {
            config: SuiteConfig::default(),
            transport: None,
            scope: None,
            provider: None,
        }
    }

    pub fn with_config(mut self, config: SuiteConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the host's replay primitive instead of the built-in reqwest
    /// transport.
    pub fn with_transport(mut self, transport: Arc<dyn ReplayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_scope(mut self, scope: Arc<dyn ScopeCheck>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Inject a provider directly, bypassing name-based selection. Used by
    /// embedders with custom LM services and by tests.
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<CookieSuite, SuiteError> {
        CookieSuite::assemble(self)
    }
}

impl Default for CookieSuiteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide entry point: owns the pipeline and the solver.
pub struct CookieSuite {
    config: SuiteConfig,
    store: Arc<CookieStore>,
    service: Arc<CookieInfoService>,
    queue: Arc<ProcessingQueue>,
    auto: AutoProcessor,
    analyzer: CookieAnalyzer,
}

impl CookieSuite {
    pub fn builder() -> CookieSuiteBuilder {
        CookieSuiteBuilder::new()
    }

    fn assemble(builder: CookieSuiteBuilder) -> Result<Self, SuiteError> {
        let config = builder.config;

        let store = Arc::new(match &config.store_path {
            Some(path) => CookieStore::open(path.clone())?,
            None => CookieStore::open_default()?,
        });

        let provider: Arc<dyn AiProvider> = match builder.provider {
            Some(provider) => provider,
            None => Arc::from(provider_for(
                &config.ai_provider,
                ProviderConfig {
                    api_key: config.api_key.clone(),
                    model: config.model.clone(),
                    endpoint: config.ai_endpoint.clone(),
                },
            )?),
        };

        let service = Arc::new(CookieInfoService::new(store.clone(), provider));
        let queue = Arc::new(ProcessingQueue::start(
            service.clone(),
            QueueConfig {
                worker_threads: config.worker_threads,
                queries_per_minute: config.queries_per_minute,
                ..QueueConfig::default()
            },
        ));

        let scope = builder.scope.unwrap_or_else(|| Arc::new(ScopeAll));
        let filter = DomainFilter::new(config.filter_mode, config.filter_domains.clone());
        let auto = AutoProcessor::new(queue.clone(), scope, filter);
        auto.set_enabled(config.auto_process);

        let transport: Arc<dyn ReplayTransport> = match builder.transport {
            Some(transport) => transport,
            None => Arc::new(crate::analyzer::replay::ReqwestReplayTransport::new()?),
        };
        let analyzer = CookieAnalyzer::with_config(transport, config.analyzer.clone());

        log::info!("cookie suite initialized, store at {}", store.path().display());
        Ok(Self {
            config,
            store,
            service,
            queue,
            auto,
            analyzer,
        })
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Run the minimal-cookie-set analysis for one captured request. Long
    /// running; call from a worker thread.
    pub fn analyze(&self, request: &CaptureRequest) -> Verdict {
        self.analyzer.analyze(request)
    }

    /// Cache-first descriptor resolution, blocking on the LM on miss.
    pub fn get_cookie_info(&self, name: &str, domain: &str) -> CookieDescriptor {
        self.service.get_cookie_info(name, domain)
    }

    /// Cache-only resolution; never blocks on the LM.
    pub fn get_cookie_info_cached(&self, name: &str, domain: &str) -> Option<CookieDescriptor> {
        match self.service.get_cookie_info_cached(name, domain) {
            Ok(found) => found,
            Err(err) => {
                log::error!("store lookup failed for {name}: {err}");
                None
            }
        }
    }

    pub fn upsert_cookie_info(&self, descriptor: CookieDescriptor) -> Result<(), StoreError> {
        self.service.upsert_manual(descriptor)
    }

    pub fn delete_cookie_info(&self, name: &str) -> Result<bool, StoreError> {
        self.service.delete(name)
    }

    pub fn list_all(&self) -> Result<Vec<CookieDescriptor>, StoreError> {
        self.service.list_all()
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        self.store.statistics()
    }

    /// Model ids offered by the configured provider, for UI selectors.
    pub fn list_models(&self) -> Result<Vec<String>, AiError> {
        self.service.provider().list_models()
    }

    /// Queue a classification task by hand.
    pub fn submit(&self, name: &str, domain: &str) {
        self.queue
            .submit(DiscoveryTask::new(name, domain, TaskPriority::Manual));
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn service(&self) -> &Arc<CookieInfoService> {
        &self.service
    }

    pub fn auto_processor(&self) -> &AutoProcessor {
        &self.auto
    }

    /// Bulk-classify the host's traffic history.
    pub fn replay_history(&self, history: Arc<dyn TrafficHistory>, force_refresh: bool) {
        self.auto.replay_history(history, force_refresh);
    }

    /// Stop the pipeline. Bounded wait; idempotent.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryPreferences;

    #[test]
    fn preference_snapshot_applies_defaults_and_clamps() {
        let prefs = MemoryPreferences::new();
        prefs.set_int("cookiedb.workerThreads", 99);
        prefs.set_int("cookiedb.queriesPerMinute", 0);
        prefs.set_string("cookiedb.domainFilter.mode", "IN_SCOPE");
        prefs.set_string("cookiedb.ai.provider", "Anthropic Claude");

        let config = SuiteConfig::from_preferences(&prefs);
        assert_eq!(config.worker_threads, 10);
        assert_eq!(config.queries_per_minute, 1);
        assert_eq!(config.filter_mode, FilterMode::InScope);
        assert_eq!(config.ai_provider, "Anthropic Claude");
        assert!(!config.auto_process);
        assert_eq!(config.model, "gpt-4");
    }

    #[test]
    fn empty_preference_strings_fall_back() {
        let prefs = MemoryPreferences::new();
        prefs.set_string("cookiedb.path", "");
        prefs.set_string("cookiedb.openai.model", "");
        prefs.set_string("cookiedb.ai.endpoint", "");

        let config = SuiteConfig::from_preferences(&prefs);
        assert!(config.store_path.is_none());
        assert_eq!(config.model, "gpt-4");
        assert!(config.ai_endpoint.is_none());
    }
}
