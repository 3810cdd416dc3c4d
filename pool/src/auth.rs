//! Authenticator: parses `username[.workername]`, resolves the user and
//! miner through a pluggable store, and caches both lookups with
//! independent TTLs. The password is never checked — identity is the
//! username and payout is bound at the account level.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

const DEFAULT_WORKERNAME: &str = "default";
const MIN_USERNAME_LEN: usize = 2;
const MAX_USERNAME_LEN: usize = 50;

const USER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const MINER_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct MinerRecord {
    pub miner_id: String,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
}

#[derive(Debug, Clone)]
pub struct Permissions {
    pub min_difficulty: f64,
    pub max_difficulty: f64,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            min_difficulty: 0.001,
            max_difficulty: 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub user_id: String,
    pub miner_id: String,
    pub worker_name: String,
    pub is_new_miner: bool,
    pub permissions: Permissions,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("worker name must be 2-50 characters: {0}")]
    InvalidWorkerName(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user disabled: {0}")]
    UserDisabled(String),
}

/// External collaborator: wherever users and miners actually live (a
/// database, in production). The pool core only depends on this trait.
#[async_trait::async_trait]
pub trait AuthStore: Send + Sync {
    async fn load_user(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn load_or_register_miner(
        &self,
        user_id: &str,
        worker_name: &str,
    ) -> Result<(MinerRecord, bool)>;
}

/// Parse `username[.workername]`. `workername` defaults to `"default"`.
pub fn parse_worker(worker: &str) -> Result<(String, String), AuthFailure> {
    let (username, workername) = match worker.split_once('.') {
        Some((u, w)) if !w.is_empty() => (u, w.to_string()),
        _ => (worker, DEFAULT_WORKERNAME.to_string()),
    };

    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(AuthFailure::InvalidWorkerName(worker.to_string()));
    }

    Ok((username.to_string(), workername))
}

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

struct Cache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> Cache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str, now: Instant) -> Option<T> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, key: String, value: T, now: Instant) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }
}

pub struct Authenticator<S: AuthStore> {
    store: S,
    user_cache: Cache<UserRecord>,
    miner_cache: Cache<MinerRecord>,
}

impl<S: AuthStore> Authenticator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            user_cache: Cache::new(USER_CACHE_TTL),
            miner_cache: Cache::new(MINER_CACHE_TTL),
        }
    }

    pub async fn authenticate(&self, worker: &str, _password: &str) -> Result<AuthResult, AuthFailure> {
        let (username, workername) = parse_worker(worker)?;
        let now = Instant::now();

        let user = match self.user_cache.get(&username, now) {
            Some(user) => user,
            None => {
                let loaded = self
                    .store
                    .load_user(&username)
                    .await
                    .map_err(|_| AuthFailure::UserNotFound(username.clone()))?
                    .ok_or_else(|| AuthFailure::UserNotFound(username.clone()))?;
                self.user_cache.insert(username.clone(), loaded.clone(), now);
                loaded
            }
        };

        if !user.active {
            return Err(AuthFailure::UserDisabled(username));
        }

        let miner_cache_key = format!("{}.{}", user.user_id, workername);
        let (miner, is_new_miner) = match self.miner_cache.get(&miner_cache_key, now) {
            Some(miner) => (miner, false),
            None => {
                let (loaded, is_new) = self
                    .store
                    .load_or_register_miner(&user.user_id, &workername)
                    .await
                    .map_err(|_| AuthFailure::UserNotFound(username.clone()))?;
                self.miner_cache.insert(miner_cache_key, loaded.clone(), now);
                (loaded, is_new)
            }
        };

        Ok(AuthResult {
            user_id: user.user_id,
            miner_id: miner.miner_id,
            worker_name: workername,
            is_new_miner,
            permissions: Permissions {
                min_difficulty: miner.min_difficulty,
                max_difficulty: miner.max_difficulty,
            },
        })
    }
}

/// An in-memory `AuthStore` for tests and for running the pool without a
/// real account database: every username not previously seen is accepted
/// and registered on first use.
pub struct InMemoryAuthStore {
    users: Mutex<HashMap<String, UserRecord>>,
    miners: Mutex<HashMap<String, MinerRecord>>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            miners: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuthStore for InMemoryAuthStore {
    async fn load_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let mut users = self.users.lock().unwrap();
        let record = users.entry(username.to_string()).or_insert_with(|| UserRecord {
            user_id: username.to_string(),
            active: true,
        });
        Ok(Some(record.clone()))
    }

    async fn load_or_register_miner(
        &self,
        user_id: &str,
        worker_name: &str,
    ) -> Result<(MinerRecord, bool)> {
        let key = format!("{user_id}.{worker_name}");
        let mut miners = self.miners.lock().unwrap();
        if let Some(existing) = miners.get(&key) {
            return Ok((existing.clone(), false));
        }
        let record = MinerRecord {
            miner_id: key.clone(),
            min_difficulty: Permissions::default().min_difficulty,
            max_difficulty: Permissions::default().max_difficulty,
        };
        miners.insert(key, record.clone());
        Ok((record, true))
    }
}
