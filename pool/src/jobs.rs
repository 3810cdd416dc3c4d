//! Job entity and the Job Distributor: holds the current job, lets
//! sessions subscribe, and fans out `broadcast` notifications in
//! subscription order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A work template as handed down by the external Job Source. Immutable
/// once broadcast.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub prev_hash: [u8; 32],
    pub coinb1: Vec<u8>,
    pub coinb2: Vec<u8>,
    pub merkle_branch: Vec<[u8; 32]>,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub clean_jobs: bool,
    /// The network's own acceptance target, used for the block-candidate
    /// check in step 11 of share validation. Not part of the wire
    /// `mining.notify` payload.
    pub network_target: [u8; 32],
}

/// Bounded history of recently broadcast jobs, used to classify a
/// submission's `job_id` as resolvable or stale (invariant I3).
const JOB_RING_CAPACITY: usize = 32;

struct JobRing {
    order: VecDeque<String>,
    jobs: HashMap<String, Arc<Job>>,
}

impl JobRing {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(JOB_RING_CAPACITY),
            jobs: HashMap::new(),
        }
    }

    fn push(&mut self, job: Arc<Job>) {
        if self.order.len() == JOB_RING_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
        self.order.push_back(job.job_id.clone());
        self.jobs.insert(job.job_id.clone(), job);
    }

    fn get(&self, job_id: &str) -> Option<Arc<Job>> {
        self.jobs.get(job_id).cloned()
    }

    fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }
}

/// Invoked with the newly broadcast job; must be non-blocking, i.e. it
/// should only enqueue onto its session's outbound queue.
pub type JobHandler = Box<dyn Fn(Arc<Job>) + Send + Sync>;

struct Subscriber {
    active: bool,
    handler: JobHandler,
}

struct Inner {
    current: Option<Arc<Job>>,
    ring: JobRing,
    subscribers: HashMap<u64, Subscriber>,
}

pub struct JobDistributor {
    inner: Mutex<Inner>,
    next_subscription_id: AtomicU64,
}

impl JobDistributor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                ring: JobRing::new(),
                subscribers: HashMap::new(),
            }),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a handler. If a job is already current, the handler is
    /// invoked immediately with it so a late joiner doesn't idle.
    pub fn subscribe(self: &Arc<Self>, handler: JobHandler) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);

        let current = {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribers.insert(
                id,
                Subscriber {
                    active: true,
                    handler,
                },
            );
            inner.current.clone()
        };

        if let Some(job) = current {
            let inner = self.inner.lock().unwrap();
            if let Some(sub) = inner.subscribers.get(&id) {
                (sub.handler)(job);
            }
        }

        Subscription {
            id,
            distributor: Arc::clone(self),
        }
    }

    /// Atomically set the current job, record it in the ring, then call
    /// every active subscriber's handler in subscription order.
    pub fn broadcast(&self, job: Job) {
        let job = Arc::new(job);
        let mut inner = self.inner.lock().unwrap();
        inner.current = Some(Arc::clone(&job));
        inner.ring.push(Arc::clone(&job));

        let mut ids: Vec<u64> = inner.subscribers.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(sub) = inner.subscribers.get(&id) {
                if sub.active {
                    (sub.handler)(Arc::clone(&job));
                }
            }
        }
    }

    pub fn current_job(&self) -> Option<Arc<Job>> {
        self.inner.lock().unwrap().current.clone()
    }

    /// Resolve a job_id against the ring: `Some(job)` if still live,
    /// `None` if it was never seen or has since been evicted (stale).
    pub fn resolve(&self, job_id: &str) -> Option<Arc<Job>> {
        self.inner.lock().unwrap().ring.get(job_id)
    }

    pub fn is_live(&self, job_id: &str) -> bool {
        self.inner.lock().unwrap().ring.contains(job_id)
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sub) = inner.subscribers.get_mut(&id) {
            sub.active = false;
        }
        inner.subscribers.remove(&id);
    }
}

impl Default for JobDistributor {
    fn default() -> Self {
        Self::new()
    }
}

/// Token returned by `subscribe`. `unsubscribe` is idempotent: calling it
/// twice, or after the distributor has dropped the subscriber on its own,
/// is a no-op.
pub struct Subscription {
    id: u64,
    distributor: Arc<JobDistributor>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.distributor.unsubscribe(self.id);
    }
}

/// A single session's view of recent jobs: the bounded ring (default 8)
/// that `submit`'s job lookup (step 2) checks, plus the per-job duplicate
/// set (step 3) that is evicted along with its job.
const SESSION_JOB_WINDOW: usize = 8;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ShareKey {
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
}

#[derive(Clone)]
struct KnownJob {
    job: Arc<Job>,
    seen: std::collections::HashSet<ShareKey>,
}

#[derive(Clone)]
pub struct SessionJobWindow {
    order: VecDeque<String>,
    jobs: HashMap<String, KnownJob>,
}

impl SessionJobWindow {
    pub fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SESSION_JOB_WINDOW),
            jobs: HashMap::new(),
        }
    }

    /// Called when the session receives a `mining.notify` for this job.
    pub fn accept(&mut self, job: Arc<Job>) {
        if self.jobs.contains_key(&job.job_id) {
            return;
        }
        if self.order.len() == SESSION_JOB_WINDOW {
            if let Some(evicted) = self.order.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
        self.order.push_back(job.job_id.clone());
        self.jobs.insert(
            job.job_id.clone(),
            KnownJob {
                job,
                seen: std::collections::HashSet::new(),
            },
        );
    }

    /// Step 2 of submit validation: resolve a job_id against this
    /// session's window. `None` means stale/unknown.
    pub fn get(&self, job_id: &str) -> Option<Arc<Job>> {
        self.jobs.get(job_id).map(|k| Arc::clone(&k.job))
    }

    /// Step 3: record-and-check `(job_id, extranonce2, ntime, nonce)`.
    /// Returns `true` if this exact key was already seen for this job.
    pub fn check_and_record_duplicate(&mut self, job_id: &str, key: ShareKey) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(known) => !known.seen.insert(key),
            None => false,
        }
    }
}

impl Default for SessionJobWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod window_tests {
    use super::*;

    fn job(id: &str) -> Arc<Job> {
        Arc::new(Job {
            job_id: id.to_string(),
            prev_hash: [0u8; 32],
            coinb1: vec![],
            coinb2: vec![],
            merkle_branch: vec![],
            version: 1,
            nbits: 0x1d00ffff,
            ntime: 0,
            clean_jobs: false,
            network_target: [0xff; 32],
        })
    }

    fn key(n: u32) -> ShareKey {
        ShareKey {
            extranonce2: vec![0, 0, 0, n as u8],
            ntime: 0,
            nonce: n,
        }
    }

    #[test]
    fn unknown_job_id_resolves_to_none() {
        let window = SessionJobWindow::new();
        assert!(window.get("missing").is_none());
    }

    #[test]
    fn eviction_drops_oldest_job_and_its_duplicate_set() {
        let mut window = SessionJobWindow::new();
        for i in 0..SESSION_JOB_WINDOW + 1 {
            window.accept(job(&format!("J{i}")));
        }
        assert!(window.get("J0").is_none());
        assert!(window.get(&format!("J{SESSION_JOB_WINDOW}")).is_some());
    }

    #[test]
    fn duplicate_detection_is_per_job() {
        let mut window = SessionJobWindow::new();
        window.accept(job("J1"));
        assert!(!window.check_and_record_duplicate("J1", key(1)));
        assert!(window.check_and_record_duplicate("J1", key(1)));
        assert!(!window.check_and_record_duplicate("J1", key(2)));
    }
}
