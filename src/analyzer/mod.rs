//! Minimal-cookie-set solver.
//!
//! Everything needed to answer "which of this request's cookies does the
//! upstream actually require?": request/cookie representations, the replay
//! layer, the equivalence baseline, the multi-phase analyzer, and the typed
//! verdict it produces.

pub mod baseline;
pub mod cookie;
pub mod replay;
pub mod request;
pub mod solver;
pub mod verdict;

pub use baseline::{Baseline, DEFAULT_BODY_SLACK};
pub use cookie::{Cookie, CookieId};
pub use replay::{digest, Replayer, ReplayOutcome, ReplayResult, ReqwestReplayTransport};
pub use request::{parse_cookie_header, CaptureRequest, CaptureResponse};
pub use solver::{AnalyzerConfig, CookieAnalyzer};
pub use verdict::{
    load_saved_results, persist_verdict, CookieStatus, ReplayRecord, SavedResultRow, Verdict,
};
