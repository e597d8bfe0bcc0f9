//! Passive cookie discovery from live traffic.
//!
//! The host invokes [`AutoProcessor::on_request_sent`] and
//! [`AutoProcessor::on_response_received`] from its hot path; both hand the
//! actual work to a single background executor thread and return immediately.
//! Every discovered cookie name becomes an `Auto`-priority task, gated by the
//! domain filter. A manual bulk operation walks the host's traffic history
//! with `Manual` priority.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use http::header::SET_COOKIE;
use http::HeaderMap;
use url::Url;

use crate::analyzer::request::{CaptureRequest, CaptureResponse};
use crate::host::{ScopeCheck, TrafficHistory};

use super::domain_filter::DomainFilter;
use super::queue::{DiscoveryTask, ProcessingQueue, TaskPriority};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One worker thread draining a channel of closures. Submission never blocks.
pub struct BackgroundExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundExecutor {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("cookie-auto-dispatch".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn background executor");
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = self
            .sender
            .lock()
            .expect("executor sender lock poisoned")
            .as_ref()
        {
            // A closed channel only happens during teardown; losing the job
            // is the intended behaviour then.
            let _ = sender.send(Box::new(job));
        }
    }

    fn join(&self) {
        self.sender
            .lock()
            .expect("executor sender lock poisoned")
            .take();
        if let Some(handle) = self
            .handle
            .lock()
            .expect("executor handle lock poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.join();
    }
}

/// Extract cookie names from `Set-Cookie` response headers.
///
/// Only the name segment before the first `=` is taken; names containing a
/// space or semicolon are artifacts of malformed headers and are discarded.
pub fn set_cookie_names(headers: &HeaderMap) -> Vec<String> {
    let mut names = Vec::new();
    for value in headers.get_all(SET_COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        let Some((name, _)) = raw.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.contains(';') || name.contains(' ') {
            continue;
        }
        names.push(name.to_string());
    }
    names
}

/// Consumes host traffic callbacks and feeds the processing queue.
pub struct AutoProcessor {
    queue: Arc<ProcessingQueue>,
    scope: Arc<dyn ScopeCheck>,
    filter: Arc<RwLock<DomainFilter>>,
    executor: BackgroundExecutor,
    enabled: AtomicBool,
    request_count: Arc<AtomicU64>,
}

impl AutoProcessor {
    pub fn new(
        queue: Arc<ProcessingQueue>,
        scope: Arc<dyn ScopeCheck>,
        filter: DomainFilter,
    ) -> Self {
        log::info!("domain filter loaded: {filter}");
        Self {
            queue,
            scope,
            filter: Arc::new(RwLock::new(filter)),
            executor: BackgroundExecutor::new(),
            enabled: AtomicBool::new(true),
            request_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        log::info!(
            "cookie auto-processor {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn domain_filter(&self) -> DomainFilter {
        self.filter.read().expect("filter lock poisoned").clone()
    }

    pub fn set_domain_filter(&self, filter: DomainFilter) {
        log::info!("domain filter updated: {filter}");
        *self.filter.write().expect("filter lock poisoned") = filter;
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Host callback: a request is about to be sent. Returns immediately.
    pub fn on_request_sent(&self, request: &CaptureRequest) {
        if !self.is_enabled() {
            return;
        }
        let Some(domain) = request.host().map(str::to_string) else {
            return;
        };
        let names: Vec<String> = request
            .cookies()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let url = request.url().clone();

        let queue = self.queue.clone();
        let scope = self.scope.clone();
        let filter = self.filter.clone();
        let request_count = self.request_count.clone();
        self.executor.execute(move || {
            let seen = request_count.fetch_add(1, Ordering::Relaxed) + 1;
            let snapshot = filter.read().expect("filter lock poisoned").clone();
            if !snapshot.should_process(&domain, scope.is_in_scope(&url)) {
                if seen % 100 == 0 {
                    log::debug!("auto-processor filtered out domain: {domain} ({snapshot})");
                }
                return;
            }
            for name in names {
                queue.submit(DiscoveryTask::new(name, domain.clone(), TaskPriority::Auto));
            }
            if seen % 100 == 0 {
                log::debug!("auto-processor has seen {seen} requests");
            }
        });
    }

    /// Host callback: a response was received. Returns immediately. The
    /// initiating URL supplies the domain and the scope answer.
    pub fn on_response_received(&self, initiating_url: &Url, response: &CaptureResponse) {
        if !self.is_enabled() {
            return;
        }
        let Some(domain) = initiating_url.host_str().map(str::to_string) else {
            return;
        };
        let names = set_cookie_names(response.headers());
        if names.is_empty() {
            return;
        }
        let url = initiating_url.clone();

        let queue = self.queue.clone();
        let scope = self.scope.clone();
        let filter = self.filter.clone();
        self.executor.execute(move || {
            let snapshot = filter.read().expect("filter lock poisoned").clone();
            if !snapshot.should_process(&domain, scope.is_in_scope(&url)) {
                return;
            }
            for name in names {
                queue.submit(DiscoveryTask::new(name, domain.clone(), TaskPriority::Auto));
            }
        });
    }

    /// Walk the host's persisted traffic history and enqueue every cookie
    /// name with `Manual` priority. `force_refresh` makes the workers bypass
    /// the store check once per task.
    pub fn replay_history(&self, history: Arc<dyn TrafficHistory>, force_refresh: bool) {
        log::info!(
            "processing traffic history ({})",
            if force_refresh {
                "forced re-analysis"
            } else {
                "skipping known cookies"
            }
        );

        let queue = self.queue.clone();
        let scope = self.scope.clone();
        let filter = self.filter.clone();
        self.executor.execute(move || {
            let snapshot = filter.read().expect("filter lock poisoned").clone();
            let mut queued = 0usize;
            for entry in history.entries() {
                let Some(domain) = entry.request.host().map(str::to_string) else {
                    continue;
                };
                if !snapshot.should_process(&domain, scope.is_in_scope(entry.request.url())) {
                    continue;
                }

                for cookie in entry.request.cookies() {
                    queue.submit(
                        DiscoveryTask::new(cookie.name(), domain.clone(), TaskPriority::Manual)
                            .with_force_refresh(force_refresh),
                    );
                    queued += 1;
                }
                if let Some(response) = &entry.response {
                    for name in set_cookie_names(response.headers()) {
                        queue.submit(
                            DiscoveryTask::new(name, domain.clone(), TaskPriority::Manual)
                                .with_force_refresh(force_refresh),
                        );
                        queued += 1;
                    }
                }
            }
            log::info!("history replay queued {queued} cookie task(s)");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn set_cookie_names_come_from_headers_only() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("sid=abc; Path=/; HttpOnly"));
        headers.append(SET_COOKIE, HeaderValue::from_static("_ga=GA1.2; Secure"));
        headers.append(SET_COOKIE, HeaderValue::from_static("no-equals-here"));
        headers.append(SET_COOKIE, HeaderValue::from_static("bad name=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("=orphan"));

        assert_eq!(set_cookie_names(&headers), vec!["sid", "_ga"]);
    }

    #[test]
    fn executor_runs_jobs_off_the_calling_thread() {
        let executor = BackgroundExecutor::new();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            executor.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.join();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
