//! # cookiescope-rs
//!
//! Cookie requirement analysis for intercepting proxies, plus an AI-backed
//! cookie classification pipeline.
//!
//! The solver replays perturbed variants of a captured request through the
//! upstream to find the minimal set of cookies the response actually depends
//! on, including OR-relationships where one cookie can substitute for
//! another. Orthogonally, the classifier consumes every cookie name observed
//! in traffic, resolves it against a local SQLite store, and on miss asks a
//! language-model service to describe it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cookiescope_rs::{CaptureRequest, CookieAnalyzer, ReqwestReplayTransport};
//! use http::Method;
//! use url::Url;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ReqwestReplayTransport::new()?);
//!     let analyzer = CookieAnalyzer::new(transport);
//!
//!     let request = CaptureRequest::new(Method::GET, Url::parse("https://example.com/account")?)
//!         .with_cookie("sid", "abc123")
//!         .with_cookie("_ga", "GA1.2.1234");
//!
//!     let verdict = analyzer.analyze(&request);
//!     for cookie in &verdict.required {
//!         println!("required: {}", cookie.name());
//!     }
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod classifier;
pub mod host;
pub mod suite;

pub use crate::analyzer::{
    digest, load_saved_results, parse_cookie_header, persist_verdict, AnalyzerConfig, Baseline,
    CaptureRequest, CaptureResponse, Cookie, CookieAnalyzer, CookieId, CookieStatus, Replayer,
    ReplayOutcome, ReplayRecord, ReplayResult, ReqwestReplayTransport, SavedResultRow, Verdict,
    DEFAULT_BODY_SLACK,
};

pub use crate::classifier::{
    provider_for, query_hash, set_cookie_names, AiClassification, AiError, AiProvider,
    AnthropicProvider, AutoProcessor, BackgroundExecutor, CookieCategory, CookieDescriptor,
    CookieInfoService, CookieStore, DescriptorSource, DiscoveryTask, DomainFilter, FilterMode,
    OpenAiProvider, PrivacyImpact, ProcessingQueue, ProviderConfig, QueueConfig, QueueStats,
    StoreError, StoreStatistics, TaskPriority,
};

pub use crate::host::{
    HistoryEntry, MemoryPreferences, MemoryProjectData, Preferences, ProjectData, ReplayTransport,
    ScopeAll, ScopeCheck, TrafficHistory, TransportError,
};

pub use crate::suite::{CookieSuite, CookieSuiteBuilder, SuiteConfig, SuiteError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
