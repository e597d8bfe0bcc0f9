//! End-to-end solver scenarios against scripted upstreams.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cookiescope_rs::{
    load_saved_results, persist_verdict, AnalyzerConfig, CaptureRequest, CaptureResponse, Cookie,
    CookieAnalyzer, CookieStatus, MemoryProjectData, ReplayTransport, TransportError,
};
use http::{HeaderMap, Method};
use url::Url;

/// Upstream scripted by a rule over the cookie names present on the request.
struct ScriptedUpstream {
    calls: AtomicU32,
    rule: Box<dyn Fn(&[String], u32) -> Result<CaptureResponse, TransportError> + Send + Sync>,
}

impl ScriptedUpstream {
    fn new(
        rule: impl Fn(&[String], u32) -> Result<CaptureResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            rule: Box::new(rule),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReplayTransport for ScriptedUpstream {
    fn send(&self, request: &CaptureRequest) -> Result<CaptureResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let names: Vec<String> = request
            .cookies()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        (self.rule)(&names, call)
    }
}

fn page(body: &str) -> Result<CaptureResponse, TransportError> {
    Ok(CaptureResponse::new(
        200,
        HeaderMap::new(),
        body.as_bytes().to_vec(),
    ))
}

fn unauthorized() -> Result<CaptureResponse, TransportError> {
    Ok(CaptureResponse::new(
        401,
        HeaderMap::new(),
        &b"login required"[..],
    ))
}

fn server_error() -> Result<CaptureResponse, TransportError> {
    Ok(CaptureResponse::new(
        500,
        HeaderMap::new(),
        &b"internal error"[..],
    ))
}

fn has(names: &[String], wanted: &str) -> bool {
    names.iter().any(|name| name == wanted)
}

fn request(cookies: &[&str]) -> CaptureRequest {
    let mut request =
        CaptureRequest::new(Method::GET, Url::parse("https://app.example.com/me").unwrap());
    for name in cookies {
        request = request.with_cookie(*name, "value");
    }
    request
}

fn instant_config() -> AnalyzerConfig {
    AnalyzerConfig {
        double_check_suspicious: false,
        double_check_pause: Duration::ZERO,
        verify_retry_pause: Duration::ZERO,
        ..AnalyzerConfig::default()
    }
}

fn guarded_config() -> AnalyzerConfig {
    AnalyzerConfig {
        double_check_suspicious: true,
        double_check_pause: Duration::ZERO,
        verify_retry_pause: Duration::ZERO,
        ..AnalyzerConfig::default()
    }
}

fn names(cookies: &[Cookie]) -> Vec<&str> {
    cookies.iter().map(Cookie::name).collect()
}

#[test]
fn s1_single_required_cookie() {
    let upstream = ScriptedUpstream::new(|names, _| {
        if has(names, "sid") {
            page("<html>dashboard</html>")
        } else {
            unauthorized()
        }
    });
    let analyzer = CookieAnalyzer::with_config(upstream.clone(), instant_config());

    let verdict = analyzer.analyze(&request(&["sid", "_ga", "pref"]));

    assert_eq!(names(&verdict.required), vec!["sid"]);
    assert_eq!(names(&verdict.optional), vec!["_ga", "pref"]);
    assert!(verdict.alternatives.is_empty());
    assert!(!verdict.unreliable);
    assert!(
        (4..=5).contains(&verdict.requests_sent),
        "expected 4-5 requests, sent {}",
        verdict.requests_sent
    );
    assert_eq!(upstream.calls(), verdict.requests_sent);
}

#[test]
fn s2_or_alternatives_between_session_cookies() {
    // Accepts iff `u` is present AND at least one of the session cookies is.
    let upstream = ScriptedUpstream::new(|names, _| {
        if has(names, "u") && (has(names, "sidA") || has(names, "sidB")) {
            page("<html>account</html>")
        } else {
            unauthorized()
        }
    });
    let analyzer = CookieAnalyzer::with_config(upstream.clone(), instant_config());

    let captured = request(&["sidA", "sidB", "u"]);
    let verdict = analyzer.analyze(&captured);

    // The earlier session cookie wins a place in the minimal set.
    assert_eq!(names(&verdict.required), vec!["sidA", "u"]);

    let sid_a = verdict.required[0].clone();
    let alternatives = verdict.alternatives_for(&sid_a);
    assert_eq!(names(alternatives), vec!["sidB"]);

    let sid_b = &captured.cookies()[1];
    assert_eq!(verdict.status(sid_b), CookieStatus::Alternative);

    // The substitution really reproduces the baseline.
    let substitute = captured.with_cookies_only(&[sid_b.id(), captured.cookies()[2].id()]);
    let response = upstream.send(&substitute).unwrap();
    assert_eq!(response.status(), 200);
}

#[test]
fn s3_transient_failure_is_cleared_by_the_double_check() {
    // `a` is truly required; the first replay without `b` flakes with a 500.
    let flaked = Mutex::new(false);
    let upstream = ScriptedUpstream::new(move |names, _| {
        if !has(names, "a") {
            return unauthorized();
        }
        if !has(names, "b") {
            let mut flaked = flaked.lock().unwrap();
            if !*flaked {
                *flaked = true;
                return server_error();
            }
        }
        page("<html>content</html>")
    });
    let analyzer = CookieAnalyzer::with_config(upstream, guarded_config());

    let verdict = analyzer.analyze(&request(&["a", "b"]));

    assert_eq!(names(&verdict.required), vec!["a"]);
    assert_eq!(names(&verdict.optional), vec!["b"]);
    let b = verdict.optional[0].clone();
    assert!(verdict
        .detail(&b)
        .unwrap()
        .contains("transient deviation cleared"));
}

#[test]
fn zero_cookies_sends_only_the_baseline() {
    let upstream = ScriptedUpstream::new(|_, _| page("<html>public</html>"));
    let analyzer = CookieAnalyzer::with_config(upstream.clone(), instant_config());

    let verdict = analyzer.analyze(&request(&[]));

    assert!(verdict.required.is_empty());
    assert!(verdict.optional.is_empty());
    assert_eq!(verdict.requests_sent, 1);
    assert_eq!(upstream.calls(), 1);
    assert_eq!(verdict.replays.len(), 1);
    assert!(verdict.replay("BASELINE").is_some());
}

#[test]
fn singleton_required_cookie_is_never_probed_alone_for_removal() {
    let upstream = ScriptedUpstream::new(|names, _| {
        if has(names, "sid") {
            page("<html>in</html>")
        } else {
            unauthorized()
        }
    });
    let analyzer = CookieAnalyzer::with_config(upstream.clone(), instant_config());

    let verdict = analyzer.analyze(&request(&["sid"]));

    assert_eq!(names(&verdict.required), vec!["sid"]);
    // No minimize probe exists for a singleton working set.
    assert!(verdict.replay("MINIMIZE WITHOUT:sid").is_none());
    assert!(verdict.requests_sent >= 2);
}

#[test]
fn unreachable_baseline_fails_the_analysis() {
    let upstream = ScriptedUpstream::new(|_, _| {
        Err(TransportError::Transport("connection refused".to_string()))
    });
    let analyzer = CookieAnalyzer::with_config(upstream.clone(), instant_config());

    let verdict = analyzer.analyze(&request(&["sid", "_ga"]));

    assert!(verdict.is_failed());
    assert!(verdict.required.is_empty());
    for cookie in &verdict.optional {
        assert_eq!(verdict.status(cookie), CookieStatus::Unknown);
        assert!(verdict.detail(cookie).unwrap().contains("baseline failed"));
    }
    assert_eq!(upstream.calls(), 1);
}

#[test]
fn partition_invariants_hold_for_every_input() {
    let upstream = ScriptedUpstream::new(|names, _| {
        if has(names, "auth") && has(names, "csrf") {
            page("<html>form</html>")
        } else {
            unauthorized()
        }
    });
    let analyzer = CookieAnalyzer::with_config(upstream.clone(), instant_config());

    let captured = request(&["auth", "theme", "csrf", "_ga"]);
    let verdict = analyzer.analyze(&captured);

    // Required and optional partition the input.
    assert_eq!(
        verdict.required.len() + verdict.optional.len(),
        captured.cookies().len()
    );
    for cookie in captured.cookies() {
        let in_required = verdict.required.contains(cookie);
        let in_optional = verdict.optional.contains(cookie);
        assert!(in_required ^ in_optional);
    }

    // At least the baseline plus one replay per cookie.
    assert!(verdict.requests_sent >= 1 + captured.cookies().len() as u32);

    // Dropping any single required cookie breaks equivalence.
    assert!(verdict.required.len() > 1);
    for leave_out in &verdict.required {
        let kept: Vec<_> = verdict
            .required
            .iter()
            .filter(|c| *c != leave_out)
            .map(Cookie::id)
            .collect();
        let response = upstream.send(&captured.with_cookies_only(&kept)).unwrap();
        assert_ne!(response.status(), 200, "{} was removable", leave_out.name());
    }
}

#[test]
fn analysis_is_deterministic_for_a_deterministic_upstream() {
    let rule = |names: &[String], _: u32| {
        if has(names, "u") && (has(names, "sidA") || has(names, "sidB")) {
            page("<html>account</html>")
        } else {
            unauthorized()
        }
    };

    let first = CookieAnalyzer::with_config(ScriptedUpstream::new(rule), instant_config())
        .analyze(&request(&["sidA", "sidB", "u"]));
    let second = CookieAnalyzer::with_config(ScriptedUpstream::new(rule), instant_config())
        .analyze(&request(&["sidA", "sidB", "u"]));

    assert_eq!(names(&first.required), names(&second.required));
    assert_eq!(names(&first.optional), names(&second.optional));
    assert_eq!(
        first.alternatives.keys().collect::<Vec<_>>(),
        second.alternatives.keys().collect::<Vec<_>>()
    );
    assert_eq!(first.requests_sent, second.requests_sent);
}

#[test]
fn replay_failures_surface_in_details_not_panics() {
    // Removing `tracker` makes the upstream drop the connection.
    let upstream = ScriptedUpstream::new(|names, _| {
        if has(names, "tracker") {
            page("<html>ok</html>")
        } else {
            Err(TransportError::Timeout)
        }
    });
    let analyzer = CookieAnalyzer::with_config(upstream, instant_config());

    let verdict = analyzer.analyze(&request(&["tracker"]));

    assert_eq!(names(&verdict.required), vec!["tracker"]);
    let tracker = verdict.required[0].clone();
    assert!(verdict
        .detail(&tracker)
        .unwrap()
        .contains("removal replay failed"));
}

#[test]
fn verdict_rows_survive_project_persistence() {
    let upstream = ScriptedUpstream::new(|names, _| {
        if has(names, "sid") {
            page("<html>dashboard</html>")
        } else {
            unauthorized()
        }
    });
    let analyzer = CookieAnalyzer::with_config(upstream, instant_config());
    let verdict = analyzer.analyze(&request(&["sid", "_ga"]));

    let project = MemoryProjectData::new();
    persist_verdict(&project, &verdict);
    let rows = load_saved_results(&project);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].cookie_name, "sid");
    assert_eq!(rows[0].status, "REQUIRED");
    assert_eq!(rows[0].required, "Yes");
    assert_eq!(rows[0].response_code, "401");
    assert_eq!(rows[1].cookie_name, "_ga");
    assert_eq!(rows[1].status, "OPTIONAL");
}
