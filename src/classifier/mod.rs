//! Cookie classification pipeline.
//!
//! Independent of the solver: an asynchronous, rate-limited work queue that
//! resolves every observed cookie name against a persistent local store and,
//! on miss, asks a language-model service to describe it. The solver never
//! consults the classifier and the classifier never influences which cookies
//! are deemed required.

pub mod auto;
pub mod descriptor;
pub mod domain_filter;
pub mod provider;
pub mod queue;
pub mod service;
pub mod store;

pub use auto::{set_cookie_names, AutoProcessor, BackgroundExecutor};
pub use descriptor::{CookieCategory, CookieDescriptor, DescriptorSource, PrivacyImpact};
pub use domain_filter::{DomainFilter, FilterMode};
pub use provider::{
    provider_for, AiClassification, AiError, AiProvider, AnthropicProvider, OpenAiProvider,
    ProviderConfig,
};
pub use queue::{DiscoveryTask, ProcessingQueue, QueueConfig, QueueStats, TaskPriority};
pub use service::CookieInfoService;
pub use store::{query_hash, CookieStore, StoreError, StoreStatistics};
