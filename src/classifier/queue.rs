//! Asynchronous classification work queue.
//!
//! A bounded FIFO feeds a fixed pool of worker threads. Submissions
//! deduplicate on task identity (`name|domain`) against everything queued or
//! being processed; overflow drops the task with a log line instead of
//! blocking the submitter. Language-model calls are gated by a token bucket
//! refilled to capacity once per interval; cache hits never consume a token.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::service::CookieInfoService;

/// Who asked for the classification. Manual requests outrank auto-discovered
/// ones in the UI; the queue itself stays strictly FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Manual,
    Auto,
}

/// One unit of classification work.
#[derive(Debug, Clone)]
pub struct DiscoveryTask {
    pub cookie_name: String,
    pub domain: String,
    pub priority: TaskPriority,
    pub force_refresh: bool,
    pub submitted_at: DateTime<Utc>,
}

impl DiscoveryTask {
    pub fn new(
        cookie_name: impl Into<String>,
        domain: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            domain: domain.into(),
            priority,
            force_refresh: false,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Deduplication identity.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.cookie_name, self.domain)
    }
}

/// Queue tunables, snapshotted at construction.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_threads: usize,
    pub queries_per_minute: u32,
    pub capacity: usize,
    pub poll_timeout: Duration,
    pub refill_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_threads: 3,
            queries_per_minute: 10,
            capacity: 1000,
            poll_timeout: Duration::from_secs(1),
            refill_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Clamp user-supplied values into their supported ranges.
    pub fn clamped(mut self) -> Self {
        self.worker_threads = self.worker_threads.clamp(1, 10);
        self.queries_per_minute = self.queries_per_minute.clamp(1, 60);
        self.capacity = self.capacity.max(1);
        self
    }
}

/// Live counters exposed to the UI.
///
/// Every processed task lands in exactly one of `cache_hits`, `ai_queries`
/// (a descriptor fetched from the LM and persisted), or `failures` (finished
/// without a stored descriptor), so those three always sum to `processed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_size: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub cache_hits: u64,
    pub ai_queries: u64,
    pub failures: u64,
}

impl QueueStats {
    pub fn cache_hit_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.processed as f64
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queue={} in_flight={} processed={} cache_hits={} ({:.1}%) ai_queries={} failures={}",
            self.queue_size,
            self.in_flight,
            self.processed,
            self.cache_hits,
            self.cache_hit_rate() * 100.0,
            self.ai_queries,
            self.failures,
        )
    }
}

/// Token bucket refilled to capacity in bulk. Acquisition blocks until a
/// token is available or shutdown is requested.
struct TokenBucket {
    permits: Mutex<u32>,
    capacity: u32,
    available: Condvar,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            permits: Mutex::new(capacity),
            capacity,
            available: Condvar::new(),
        }
    }

    fn acquire(&self, stop: &AtomicBool) -> bool {
        let mut permits = self.permits.lock().expect("rate limiter lock poisoned");
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            let (guard, _) = self
                .available
                .wait_timeout(permits, Duration::from_millis(250))
                .expect("rate limiter lock poisoned");
            permits = guard;
        }
    }

    fn refill(&self) {
        let mut permits = self.permits.lock().expect("rate limiter lock poisoned");
        if *permits < self.capacity {
            let added = self.capacity - *permits;
            *permits = self.capacity;
            log::debug!("rate limiter refilled {added} permit(s)");
        }
        self.available.notify_all();
    }

    fn wake_all(&self) {
        self.available.notify_all();
    }
}

struct Shared {
    queue: Mutex<VecDeque<DiscoveryTask>>,
    available: Condvar,
    in_flight: Mutex<HashSet<String>>,
    limiter: TokenBucket,
    capacity: usize,
    stop: AtomicBool,
    processed: AtomicU64,
    cache_hits: AtomicU64,
    ai_queries: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn dequeue(&self, timeout: Duration) -> Option<DiscoveryTask> {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        if let Some(task) = queue.pop_front() {
            return Some(task);
        }
        let (mut queue, _) = self
            .available
            .wait_timeout(queue, timeout)
            .expect("queue lock poisoned");
        queue.pop_front()
    }
}

/// The running pipeline: queue, dedup set, workers, and rate-limiter refill
/// timer. Constructed started; call [`shutdown`](Self::shutdown) (or drop)
/// to stop it.
pub struct ProcessingQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    refill: Mutex<Option<JoinHandle<()>>>,
    refill_signal: Arc<(Mutex<bool>, Condvar)>,
    shutdown_grace: Duration,
}

impl ProcessingQueue {
    pub fn start(service: Arc<CookieInfoService>, config: QueueConfig) -> Self {
        let config = config.clamped();
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            in_flight: Mutex::new(HashSet::new()),
            limiter: TokenBucket::new(config.queries_per_minute),
            capacity: config.capacity,
            stop: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            ai_queries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let shared = shared.clone();
            let service = service.clone();
            let poll = config.poll_timeout;
            let handle = thread::Builder::new()
                .name(format!("cookie-worker-{index}"))
                .spawn(move || worker_loop(shared, service, poll))
                .expect("failed to spawn classifier worker");
            workers.push(handle);
        }

        let refill_signal = Arc::new((Mutex::new(false), Condvar::new()));
        let refill = {
            let shared = shared.clone();
            let signal = refill_signal.clone();
            let interval = config.refill_interval;
            thread::Builder::new()
                .name("cookie-rate-refill".to_string())
                .spawn(move || refill_loop(shared, signal, interval))
                .expect("failed to spawn rate-limiter refill thread")
        };

        log::info!(
            "cookie processor started: {} workers, {} queries/min limit",
            config.worker_threads,
            config.queries_per_minute
        );

        Self {
            shared,
            workers: Mutex::new(workers),
            refill: Mutex::new(Some(refill)),
            refill_signal,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Submit a task. Deduplicates on identity; drops on overflow. Never
    /// blocks the caller.
    pub fn submit(&self, task: DiscoveryTask) {
        if self.shared.stop.load(Ordering::Acquire) {
            return;
        }

        let identity = task.identity();
        {
            let mut in_flight = self
                .shared
                .in_flight
                .lock()
                .expect("in-flight lock poisoned");
            if in_flight.contains(&identity) {
                return;
            }
            let mut queue = self.shared.queue.lock().expect("queue lock poisoned");
            if queue.len() >= self.shared.capacity {
                log::warn!("cookie queue full, dropping task: {identity}");
                return;
            }
            queue.push_back(task);
            in_flight.insert(identity);
        }
        self.shared.available.notify_one();
    }

    pub fn stats(&self) -> QueueStats {
        // Guards are taken one at a time; nesting them here would invert the
        // in-flight -> queue lock order used by submit().
        let queue_size = {
            let queue = self.shared.queue.lock().expect("queue lock poisoned");
            queue.len()
        };
        let in_flight = {
            let in_flight = self
                .shared
                .in_flight
                .lock()
                .expect("in-flight lock poisoned");
            in_flight.len()
        };
        QueueStats {
            queue_size,
            in_flight,
            processed: self.shared.processed.load(Ordering::Relaxed),
            cache_hits: self.shared.cache_hits.load(Ordering::Relaxed),
            ai_queries: self.shared.ai_queries.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, wake every blocked thread, and wait a bounded
    /// grace period for the workers to drain. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("shutting down cookie processing queue");

        {
            let (stopped, signal) = &*self.refill_signal;
            *stopped.lock().expect("refill signal lock poisoned") = true;
            signal.notify_all();
        }
        self.shared.available.notify_all();
        self.shared.limiter.wake_all();

        let deadline = Instant::now() + self.shutdown_grace;
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("workers lock poisoned")
            .drain(..)
            .collect();
        for handle in workers {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::error!("classifier worker did not stop within the grace period");
            }
        }

        if let Some(handle) = self
            .refill
            .lock()
            .expect("refill handle lock poisoned")
            .take()
        {
            let _ = handle.join();
        }

        log::info!("cookie processing queue stopped: {}", self.stats());
    }
}

impl Drop for ProcessingQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, service: Arc<CookieInfoService>, poll: Duration) {
    while !shared.stop.load(Ordering::Acquire) {
        let Some(task) = shared.dequeue(poll) else {
            continue;
        };
        let identity = task.identity();
        handle_task(&shared, &service, &task);
        shared
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&identity);
    }
    log::debug!("classifier worker exiting");
}

fn handle_task(shared: &Shared, service: &CookieInfoService, task: &DiscoveryTask) {
    shared.processed.fetch_add(1, Ordering::Relaxed);

    if task.force_refresh {
        log::debug!(
            "[force refresh] {} ({}), bypassing cache",
            task.cookie_name,
            task.domain
        );
    } else {
        match service.get_cookie_info_cached(&task.cookie_name, &task.domain) {
            Ok(Some(_)) => {
                shared.cache_hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("[cache hit] {} ({})", task.cookie_name, task.domain);
                return;
            }
            Ok(None) => {}
            Err(err) => {
                // Treat a broken store read as a miss; the upsert later will
                // report its own failure if the store is really gone.
                log::error!("store lookup failed for {}: {err}", task.cookie_name);
            }
        }
    }

    if !shared.limiter.acquire(&shared.stop) {
        // Shutdown while waiting for a token; nothing was persisted.
        shared.failures.fetch_add(1, Ordering::Relaxed);
        return;
    }

    // Exactly one counter per task, so the outcome counters always sum back
    // to `processed`.
    match service.query_from_ai(&task.cookie_name, &task.domain) {
        Ok(descriptor) => {
            shared.ai_queries.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[ai success] {} -> {} ({})",
                task.cookie_name,
                descriptor.vendor.as_deref().unwrap_or("unknown"),
                descriptor.category.as_str()
            );
        }
        Err(err) => {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            log::error!("[ai failed] {}: {err}", task.cookie_name);
        }
    }
}

fn refill_loop(shared: Arc<Shared>, signal: Arc<(Mutex<bool>, Condvar)>, interval: Duration) {
    let (stopped, condvar) = &*signal;
    let mut guard = stopped.lock().expect("refill signal lock poisoned");
    loop {
        let (next, timed_out) = condvar
            .wait_timeout(guard, interval)
            .expect("refill signal lock poisoned");
        guard = next;
        if *guard {
            break;
        }
        if timed_out.timed_out() {
            shared.limiter.refill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_combines_name_and_domain() {
        let task = DiscoveryTask::new("_ga", "example.com", TaskPriority::Auto);
        assert_eq!(task.identity(), "_ga|example.com");
    }

    #[test]
    fn config_clamps_into_supported_ranges() {
        let config = QueueConfig {
            worker_threads: 50,
            queries_per_minute: 0,
            ..QueueConfig::default()
        }
        .clamped();
        assert_eq!(config.worker_threads, 10);
        assert_eq!(config.queries_per_minute, 1);
    }

    #[test]
    fn cache_hit_rate_handles_zero_processed() {
        let stats = QueueStats::default();
        assert_eq!(stats.cache_hit_rate(), 0.0);

        let stats = QueueStats {
            processed: 4,
            cache_hits: 3,
            ..QueueStats::default()
        };
        assert!((stats.cache_hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn token_bucket_blocks_until_refill() {
        let bucket = TokenBucket::new(1);
        let stop = AtomicBool::new(false);
        assert!(bucket.acquire(&stop));

        // Exhausted: a concurrent refill lets the waiter through.
        let bucket = Arc::new(bucket);
        let waiter = {
            let bucket = bucket.clone();
            thread::spawn(move || {
                let stop = AtomicBool::new(false);
                bucket.acquire(&stop)
            })
        };
        thread::sleep(Duration::from_millis(50));
        bucket.refill();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn token_bucket_acquire_aborts_on_stop() {
        let bucket = TokenBucket::new(1);
        let stop = AtomicBool::new(false);
        assert!(bucket.acquire(&stop));
        stop.store(true, Ordering::Release);
        assert!(!bucket.acquire(&stop));
    }
}
