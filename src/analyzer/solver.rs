//! The minimal-cookie-set solver.
//!
//! Determines which subset of a request's cookies is actually needed for the
//! response to stay equivalent to the original, by replaying perturbed
//! variants through the upstream:
//!
//! 1. Baseline with the full cookie set.
//! 2. Individual removal of each cookie, partitioning into suspicious and
//!    provisionally optional (with an optional transient-noise double check).
//! 3. Verification that the suspicious set alone reproduces the baseline.
//! 4. If it does not, a binary search over prefixes of the optional cookies
//!    widens the working set until one reproduces the baseline.
//! 5. Greedy single-pass minimization of the working set.
//! 6. Smart verification of the minimal set, with one delayed retry.
//! 7. Substitution probing for OR-relationships between cookies.
//! 8. A final confirmation replay of the minimal set.
//!
//! Replay outcomes are memoized per cookie subset for the duration of one
//! run, so a set that several phases need is only sent upstream once. The two
//! deliberate retries (the double check and the verify retry) always bypass
//! the memo. No other retries exist anywhere in the solver: blanket retrying
//! of transient failures would erase exactly the signal being measured.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crate::host::ReplayTransport;

use super::baseline::{Baseline, DEFAULT_BODY_SLACK};
use super::cookie::{Cookie, CookieId};
use super::replay::{Replayer, ReplayResult};
use super::request::CaptureRequest;
use super::verdict::{CookieStatus, ReplayRecord, Verdict};

/// Tunables for one analyzer instance. Fixed for the duration of a run.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Relative body-length slack accepted by the equivalence check.
    pub body_slack: f64,
    /// Re-test cookies flagged suspicious once before believing the flag.
    /// Guards against WAF blips and rate limits that mimic dependency
    /// signals.
    pub double_check_suspicious: bool,
    /// Pause before the suspicious double check.
    pub double_check_pause: Duration,
    /// Pause before the smart-verify retry.
    pub verify_retry_pause: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            body_slack: DEFAULT_BODY_SLACK,
            double_check_suspicious: true,
            double_check_pause: Duration::from_millis(500),
            verify_retry_pause: Duration::from_secs(1),
        }
    }
}

/// Drives the multi-phase analysis. Construct once, analyze many requests.
///
/// `analyze` is synchronous and issues replays one at a time; callers run it
/// on a worker thread and treat it as a long-running job.
pub struct CookieAnalyzer {
    replayer: Replayer,
    config: AnalyzerConfig,
}

impl CookieAnalyzer {
    pub fn new(transport: Arc<dyn ReplayTransport>) -> Self {
        Self::with_config(transport, AnalyzerConfig::default())
    }

    pub fn with_config(transport: Arc<dyn ReplayTransport>, config: AnalyzerConfig) -> Self {
        Self {
            replayer: Replayer::new(transport),
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze the request's cookies. Never panics and never returns an
    /// error: replay failures become verdict details, and a dead baseline
    /// becomes a failed verdict with every cookie marked unknown.
    pub fn analyze(&self, request: &CaptureRequest) -> Verdict {
        AnalysisRun::new(self, request).run()
    }
}

struct AnalysisRun<'a> {
    analyzer: &'a CookieAnalyzer,
    request: &'a CaptureRequest,
    cookies: Vec<Cookie>,
    memo: HashMap<Vec<CookieId>, ReplayResult>,
    replays: Vec<ReplayRecord>,
    requests_sent: u32,
    notes: BTreeMap<CookieId, Vec<String>>,
}

impl<'a> AnalysisRun<'a> {
    fn new(analyzer: &'a CookieAnalyzer, request: &'a CaptureRequest) -> Self {
        Self {
            analyzer,
            request,
            cookies: request.cookies().to_vec(),
            memo: HashMap::new(),
            replays: Vec::new(),
            requests_sent: 0,
            notes: BTreeMap::new(),
        }
    }

    fn run(mut self) -> Verdict {
        let all_ids: Vec<CookieId> = self.cookies.iter().map(Cookie::id).collect();
        log::info!(
            "cookie analysis started for {} ({} cookies)",
            self.request.url(),
            all_ids.len()
        );

        // Phase 1: baseline with the full original cookie set.
        let baseline_result = self.replay_set(&all_ids, "BASELINE".to_string(), false);
        let baseline = match baseline_result.outcome() {
            Some(outcome) if outcome.status != 0 => {
                Baseline::new(outcome.clone(), self.analyzer.config.body_slack)
            }
            _ => {
                log::error!("baseline request failed, analysis cannot proceed");
                return self.failed_verdict();
            }
        };
        log::info!(
            "baseline established: status {} length {}",
            baseline.status(),
            baseline.body_len()
        );

        if all_ids.is_empty() {
            return self.finish(&baseline, &[], BTreeMap::new(), false);
        }

        // Phase 2: individual removal of each cookie.
        let (optional0, suspicious) = self.test_individual(&all_ids, &baseline);
        log::info!(
            "individual testing: {} suspicious, {} provisionally optional",
            suspicious.len(),
            optional0.len()
        );

        if suspicious.is_empty() {
            log::info!("no cookie removal disturbed the response");
            let confirm = self.replay_set(&[], "MINIMAL SET".to_string(), false);
            if !baseline.matches_result(&confirm) {
                log::warn!("cookie-free confirmation did not match the baseline");
            }
            return self.finish(&baseline, &[], BTreeMap::new(), false);
        }

        // Phase 3: does the suspicious set alone reproduce the baseline?
        let suspicious_only =
            self.replay_set(&suspicious, "SUSPICIOUS ONLY".to_string(), false);
        let mut search_ran = false;
        let mut working = if baseline.matches_result(&suspicious_only) {
            suspicious.clone()
        } else {
            // Complex coupling: individually boring cookies carry weight.
            log::info!("suspicious set alone failed, widening via prefix search");
            search_ran = true;
            self.search_working_set(&suspicious, &optional0, &baseline)
        };

        // Phase 5: greedy minimization in input order.
        working.sort();
        let required = self.minimize(&working, &baseline);
        log::info!(
            "minimal set: {}",
            self.names(&required)
        );

        // Phase 6: smart verification with one delayed retry.
        let unreliable = self.smart_verify(&required, &baseline);

        // Phase 7: substitution probing.
        let alternatives =
            self.detect_alternatives(&required, &suspicious, &optional0, search_ran, &baseline);

        // Phase 8: final confirmation, reported but never overriding.
        let confirm = self.replay_set(&required, "MINIMAL SET".to_string(), false);
        if baseline.matches_result(&confirm) {
            log::info!("minimal set confirmed ({} cookies)", required.len());
        } else {
            log::warn!("final confirmation deviated from the baseline");
        }

        log::info!("analysis complete, {} requests sent", self.requests_sent);
        self.finish(&baseline, &required, alternatives, unreliable)
    }

    /// Replay the subset identified by `ids`, serving repeats from the memo.
    /// `fresh` forces an upstream send and refreshes the memo entry.
    fn replay_set(&mut self, ids: &[CookieId], label: String, fresh: bool) -> ReplayResult {
        let mut key: Vec<CookieId> = ids.to_vec();
        key.sort();
        key.dedup();

        let request = self.request.with_cookies_only(ids);
        if !fresh {
            if let Some(cached) = self.memo.get(&key) {
                let result = cached.clone();
                self.replays.push(ReplayRecord {
                    label,
                    request,
                    result: result.clone(),
                });
                return result;
            }
        }

        self.requests_sent += 1;
        let result = self.analyzer.replayer.replay(&request);
        match &result {
            ReplayResult::Outcome(outcome) => {
                log::debug!("[{label}] status {} length {}", outcome.status, outcome.body_len);
            }
            ReplayResult::Failed(reason) => {
                log::warn!("[{label}] replay failed: {reason}");
            }
        }
        self.memo.insert(key, result.clone());
        self.replays.push(ReplayRecord {
            label,
            request,
            result: result.clone(),
        });
        result
    }

    /// Phase 2: remove one cookie at a time and compare against the baseline.
    fn test_individual(
        &mut self,
        all_ids: &[CookieId],
        baseline: &Baseline,
    ) -> (Vec<CookieId>, Vec<CookieId>) {
        let mut optional0 = Vec::new();
        let mut suspicious = Vec::new();

        for &id in all_ids {
            let name = self.name(id);
            let without: Vec<CookieId> =
                all_ids.iter().copied().filter(|other| *other != id).collect();
            let result = self.replay_set(&without, format!("WITHOUT:{name}"), false);

            if let ReplayResult::Failed(reason) = &result {
                self.note(id, format!("removal replay failed: {reason}"));
            }

            let mut matches = baseline.matches_result(&result);
            if !matches && self.analyzer.config.double_check_suspicious {
                sleep(self.analyzer.config.double_check_pause);
                let recheck =
                    self.replay_set(&without, format!("DOUBLE CHECK:{name}"), true);
                if baseline.matches_result(&recheck) {
                    log::info!("{name}: deviation did not reproduce, treating as optional");
                    self.note(id, "transient deviation cleared on re-test".to_string());
                    matches = true;
                }
            }

            if matches {
                optional0.push(id);
            } else {
                log::debug!("{name}: suspicious, removal disturbed the response");
                suspicious.push(id);
            }
        }

        (optional0, suspicious)
    }

    /// Phase 4: binary-search the shortest prefix of `optional0` whose union
    /// with the suspicious set reproduces the baseline. Falls back to the
    /// full input set, which is known-good because the baseline matched.
    fn search_working_set(
        &mut self,
        suspicious: &[CookieId],
        optional0: &[CookieId],
        baseline: &Baseline,
    ) -> Vec<CookieId> {
        let mut current: Option<Vec<CookieId>> = None;
        let mut lo = 0usize;
        let mut hi = optional0.len();

        while lo < hi {
            let mid = (lo + hi) / 2;
            let prefix_len = mid + 1;
            let mut candidate: Vec<CookieId> = suspicious.to_vec();
            candidate.extend_from_slice(&optional0[..prefix_len]);

            let result =
                self.replay_set(&candidate, format!("SEARCH PREFIX:{prefix_len}"), false);
            if baseline.matches_result(&result) {
                hi = mid;
                current = Some(candidate);
            } else {
                lo = mid + 1;
            }
        }

        match current {
            Some(found) => found,
            None => {
                log::warn!("prefix search found no working combination, using all cookies");
                let mut all: Vec<CookieId> = suspicious.to_vec();
                all.extend_from_slice(optional0);
                all
            }
        }
    }

    /// Phase 5: single greedy pass. A committed removal shrinks the set the
    /// later probes run against, so the result is locally minimal.
    fn minimize(&mut self, working: &[CookieId], baseline: &Baseline) -> Vec<CookieId> {
        let mut minimal: Vec<CookieId> = working.to_vec();

        for &id in working {
            if minimal.len() == 1 {
                // The last cookie of a working set is required by definition.
                break;
            }
            let test: Vec<CookieId> = minimal
                .iter()
                .copied()
                .filter(|other| *other != id)
                .collect();
            let name = self.name(id);
            let result = self.replay_set(&test, format!("MINIMIZE WITHOUT:{name}"), false);
            if baseline.matches_result(&result) {
                log::debug!("{name}: removable");
                minimal = test;
            } else {
                log::debug!("{name}: required");
            }
        }

        minimal
    }

    /// Phase 6: verify the minimal set, retrying once after a pause. Returns
    /// whether the verdict must be flagged unreliable.
    fn smart_verify(&mut self, required: &[CookieId], baseline: &Baseline) -> bool {
        let result = self.replay_set(required, "VERIFY".to_string(), false);
        if baseline.matches_result(&result) {
            return false;
        }

        log::warn!("minimal-set verification deviated, retrying once");
        sleep(self.analyzer.config.verify_retry_pause);
        let retry = self.replay_set(required, "VERIFY RETRY".to_string(), true);
        if baseline.matches_result(&retry) {
            log::info!("verification succeeded on retry");
            return false;
        }

        log::error!("verification failed twice, verdict is unreliable");
        true
    }

    /// Phase 7: probe whether any candidate can stand in for a required
    /// cookie. Candidates are the suspicious leftovers; when the search phase
    /// ran, the individually-boring cookies are no longer safe to exclude and
    /// join the pool.
    fn detect_alternatives(
        &mut self,
        required: &[CookieId],
        suspicious: &[CookieId],
        optional0: &[CookieId],
        search_ran: bool,
        baseline: &Baseline,
    ) -> BTreeMap<CookieId, Vec<Cookie>> {
        let mut pool: Vec<CookieId> = suspicious
            .iter()
            .copied()
            .filter(|id| !required.contains(id))
            .collect();
        if search_ran {
            let additions: Vec<CookieId> = optional0
                .iter()
                .copied()
                .filter(|id| !required.contains(id) && !pool.contains(id))
                .collect();
            pool.extend(additions);
        }
        pool.sort();

        let mut alternatives: BTreeMap<CookieId, Vec<Cookie>> = BTreeMap::new();
        for &req in required {
            for &candidate in &pool {
                let mut test: Vec<CookieId> = required
                    .iter()
                    .copied()
                    .filter(|other| *other != req)
                    .collect();
                test.push(candidate);

                let label = format!(
                    "REPLACE:{}->{}",
                    self.name(req),
                    self.name(candidate)
                );
                let result = self.replay_set(&test, label, false);
                if baseline.matches_result(&result) {
                    log::info!(
                        "{} can substitute for {}",
                        self.name(candidate),
                        self.name(req)
                    );
                    if let Some(cookie) = self.request.cookie(candidate) {
                        alternatives.entry(req).or_default().push(cookie.clone());
                    }
                }
            }
        }

        alternatives
    }

    fn finish(
        mut self,
        baseline: &Baseline,
        required_ids: &[CookieId],
        alternatives: BTreeMap<CookieId, Vec<Cookie>>,
        unreliable: bool,
    ) -> Verdict {
        let mut required = Vec::new();
        let mut optional = Vec::new();
        let mut statuses = BTreeMap::new();
        let mut details = BTreeMap::new();

        let alternative_ids: Vec<CookieId> = alternatives
            .values()
            .flatten()
            .map(Cookie::id)
            .collect();

        for cookie in &self.cookies {
            let id = cookie.id();
            let is_required = required_ids.contains(&id);
            let status = if is_required {
                CookieStatus::Required
            } else if alternative_ids.contains(&id) {
                CookieStatus::Alternative
            } else {
                CookieStatus::Optional
            };
            statuses.insert(id, status);

            let mut detail = match status {
                CookieStatus::Required => match alternatives.get(&id) {
                    Some(alts) if !alts.is_empty() => {
                        let names: Vec<&str> = alts.iter().map(Cookie::name).collect();
                        format!("Required (OR: {})", names.join(", "))
                    }
                    _ => "Required - removal causes failure".to_string(),
                },
                CookieStatus::Alternative => {
                    "Alternative - can substitute for a required cookie".to_string()
                }
                CookieStatus::Optional => "Optional - removal has no effect".to_string(),
                CookieStatus::Unknown => "Unknown".to_string(),
            };
            if unreliable && status == CookieStatus::Required {
                detail.push_str("; minimal-set verification failed twice (unreliable)");
            }
            if let Some(notes) = self.notes.remove(&id) {
                for note in notes {
                    detail.push_str("; ");
                    detail.push_str(&note);
                }
            }
            details.insert(id, detail);

            if is_required {
                required.push(cookie.clone());
            } else {
                optional.push(cookie.clone());
            }
        }

        Verdict {
            required,
            optional,
            alternatives,
            statuses,
            details,
            requests_sent: self.requests_sent,
            baseline: Some(baseline.clone()),
            replays: self.replays,
            unreliable,
        }
    }

    fn failed_verdict(mut self) -> Verdict {
        let mut statuses = BTreeMap::new();
        let mut details = BTreeMap::new();
        let mut optional = Vec::new();
        for cookie in &self.cookies {
            statuses.insert(cookie.id(), CookieStatus::Unknown);
            let mut detail = "Unknown - baseline failed".to_string();
            if let Some(notes) = self.notes.remove(&cookie.id()) {
                for note in notes {
                    detail.push_str("; ");
                    detail.push_str(&note);
                }
            }
            details.insert(cookie.id(), detail);
            optional.push(cookie.clone());
        }

        Verdict {
            required: Vec::new(),
            optional,
            alternatives: BTreeMap::new(),
            statuses,
            details,
            requests_sent: self.requests_sent,
            baseline: None,
            replays: self.replays,
            unreliable: false,
        }
    }

    fn note(&mut self, id: CookieId, note: String) {
        self.notes.entry(id).or_default().push(note);
    }

    fn name(&self, id: CookieId) -> String {
        self.request
            .cookie(id)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn names(&self, ids: &[CookieId]) -> String {
        if ids.is_empty() {
            return "none".to_string();
        }
        ids.iter()
            .map(|id| self.name(*id))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::request::CaptureResponse;
    use crate::host::TransportError;
    use http::{HeaderMap, Method};
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    /// Transport that answers from the cookie names present on the request.
    struct RuleTransport {
        calls: AtomicU32,
        rule: Box<dyn Fn(&[String]) -> CaptureResponse + Send + Sync>,
    }

    impl RuleTransport {
        fn new(rule: impl Fn(&[String]) -> CaptureResponse + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicU32::new(0),
                rule: Box::new(rule),
            }
        }
    }

    impl ReplayTransport for RuleTransport {
        fn send(&self, request: &CaptureRequest) -> Result<CaptureResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let names: Vec<String> = request
                .cookies()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            Ok((self.rule)(&names))
        }
    }

    fn ok_body() -> CaptureResponse {
        CaptureResponse::new(200, HeaderMap::new(), &b"<html>dashboard</html>"[..])
    }

    fn denied() -> CaptureResponse {
        CaptureResponse::new(401, HeaderMap::new(), &b"login required"[..])
    }

    fn fast_config() -> AnalyzerConfig {
        AnalyzerConfig {
            double_check_suspicious: false,
            double_check_pause: Duration::ZERO,
            verify_retry_pause: Duration::ZERO,
            ..AnalyzerConfig::default()
        }
    }

    fn request(names: &[&str]) -> CaptureRequest {
        let mut request =
            CaptureRequest::new(Method::GET, Url::parse("https://example.com/app").unwrap());
        for name in names {
            request = request.with_cookie(*name, "v");
        }
        request
    }

    #[test]
    fn single_required_cookie_is_isolated() {
        let transport = Arc::new(RuleTransport::new(|names| {
            if names.iter().any(|n| n == "sid") {
                ok_body()
            } else {
                denied()
            }
        }));
        let analyzer = CookieAnalyzer::with_config(transport.clone(), fast_config());

        let verdict = analyzer.analyze(&request(&["sid", "_ga", "pref"]));

        let required: Vec<&str> = verdict.required.iter().map(Cookie::name).collect();
        assert_eq!(required, vec!["sid"]);
        assert_eq!(verdict.optional.len(), 2);
        assert!(verdict.alternatives.is_empty());
        assert_eq!(verdict.requests_sent, 5);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn memoized_replays_still_record_labels() {
        let transport = Arc::new(RuleTransport::new(|names| {
            if names.iter().any(|n| n == "sid") {
                ok_body()
            } else {
                denied()
            }
        }));
        let analyzer = CookieAnalyzer::with_config(transport, fast_config());

        let verdict = analyzer.analyze(&request(&["sid", "_ga"]));

        assert!(verdict.replay("BASELINE").is_some());
        assert!(verdict.replay("WITHOUT:sid").is_some());
        assert!(verdict.replay("SUSPICIOUS ONLY").is_some());
        assert!(verdict.replay("VERIFY").is_some());
        assert!(verdict.replay("MINIMAL SET").is_some());
    }

    #[test]
    fn baseline_failure_marks_everything_unknown() {
        let transport = Arc::new(RuleTransport::new(|_| {
            CaptureResponse::new(200, HeaderMap::new(), Vec::<u8>::new())
        }));
        let analyzer = CookieAnalyzer::with_config(transport.clone(), fast_config());

        let verdict = analyzer.analyze(&request(&["a", "b"]));

        assert!(verdict.is_failed());
        assert!(verdict.required.is_empty());
        assert_eq!(verdict.optional.len(), 2);
        for cookie in &verdict.optional {
            assert_eq!(verdict.status(cookie), CookieStatus::Unknown);
        }
        // Nothing after the dead baseline.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_input_sends_exactly_one_request() {
        let transport = Arc::new(RuleTransport::new(|_| ok_body()));
        let analyzer = CookieAnalyzer::with_config(transport.clone(), fast_config());

        let verdict = analyzer.analyze(&request(&[]));

        assert!(verdict.required.is_empty());
        assert!(verdict.optional.is_empty());
        assert_eq!(verdict.requests_sent, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn and_dependency_keeps_both_cookies() {
        let transport = Arc::new(RuleTransport::new(|names| {
            let has = |n: &str| names.iter().any(|name| name == n);
            if has("auth") && has("csrf") {
                ok_body()
            } else {
                denied()
            }
        }));
        let analyzer = CookieAnalyzer::with_config(transport, fast_config());

        let verdict = analyzer.analyze(&request(&["auth", "csrf", "theme"]));

        let required: Vec<&str> = verdict.required.iter().map(Cookie::name).collect();
        assert_eq!(required, vec!["auth", "csrf"]);
    }
}
