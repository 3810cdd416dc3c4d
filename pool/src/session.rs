//! Session manager for tracking miner connections.
//!
//! Manages per-connection state: subscription/authorization progress,
//! the session's current difficulty/target, and share statistics. Mutated
//! only by the session's own handler task or by the vardiff controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use stratum_core::difficulty_to_target;

use crate::jobs::SessionJobWindow;
use crate::vardiff::VardiffState;

/// Hardware class a miner self-reports (informational only; does not gate
/// behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareClass {
    Asic,
    Gpu,
    Cpu,
    Unknown,
}

impl Default for HardwareClass {
    fn default() -> Self {
        HardwareClass::Unknown
    }
}

/// Progression of a v1 connection: `NEW` before `mining.subscribe`,
/// `SUBSCRIBED` after, `AUTHORIZED` after a successful `mining.authorize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Subscribed,
    Authorized,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub worker_name: Option<String>,
    pub hardware_class: HardwareClass,

    /// Current difficulty. The table in the data-model spec calls this a
    /// u64, but the configured global minimum (0.001) only makes sense as
    /// a float, so this is `f64` throughout — see the session/vardiff
    /// design note.
    pub difficulty: f64,
    pub target: [u8; 32],

    pub hashrate_estimate: f64,
    pub share_count: u64,
    pub last_share_at: Option<u64>,

    pub extranonce1: Vec<u8>,
    pub extranonce2_size: usize,
    pub subscribed_to_jobs: bool,

    pub vardiff: VardiffState,
    pub known_jobs: SessionJobWindow,
}

impl Session {
    pub fn new(id: String, extranonce1: Vec<u8>, extranonce2_size: usize, initial_difficulty: f64) -> Self {
        Self {
            id,
            state: SessionState::New,
            worker_name: None,
            hardware_class: HardwareClass::default(),
            difficulty: initial_difficulty,
            target: difficulty_to_target(initial_difficulty),
            hashrate_estimate: 0.0,
            share_count: 0,
            last_share_at: None,
            extranonce1,
            extranonce2_size,
            subscribed_to_jobs: false,
            vardiff: VardiffState::new(),
            known_jobs: SessionJobWindow::new(),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    /// Apply a new difficulty and re-derive the target (invariant I1).
    pub fn set_difficulty(&mut self, difficulty: f64) {
        self.difficulty = difficulty;
        self.target = difficulty_to_target(difficulty);
    }

    pub fn record_share(&mut self) {
        self.share_count += 1;
        self.last_share_at = Some(now_secs());
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Concurrent map of live sessions plus the extranonce1 allocator that
/// keeps invariant I2 (extranonce1 unique across all live sessions on this
/// instance).
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    next_extranonce1: std::sync::atomic::AtomicU64,
    extranonce1_size: usize,
}

impl SessionManager {
    pub fn new(extranonce1_size: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_extranonce1: std::sync::atomic::AtomicU64::new(1),
            extranonce1_size,
        }
    }

    /// Allocate a fresh extranonce1, `extranonce1_size` bytes wide. A
    /// per-instance counter is sufficient: the server only needs
    /// uniqueness among sessions it itself holds open, not global
    /// uniqueness across pool instances. The counter is truncated to the
    /// low `extranonce1_size` bytes, big-endian.
    pub fn allocate_extranonce1(&self) -> Vec<u8> {
        let n = self
            .next_extranonce1
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let bytes = n.to_be_bytes();
        bytes[bytes.len() - self.extranonce1_size..].to_vec()
    }

    pub async fn insert(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    pub async fn update<F>(&self, session_id: &str, f: F)
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            f(session);
        }
    }

    pub async fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
    }

    pub async fn snapshot(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    pub async fn authorized_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| s.is_authorized()).count()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(4)
    }
}
