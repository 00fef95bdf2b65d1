use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::secret::Secret;

const PURGE_EVERY: usize = 1000;

pub fn hash_nonce(nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

enum Status {
    Pending,
    Exchanging,
    Ready(Secret<String>),
    Failed(String),
}

struct Entry {
    nonce: Secret<String>,
    nonce_hash: String,
    ui: bool,
    created: Instant,
    status: Status,
}

/// A freshly issued challenge, or a pending one being resumed.
#[derive(Debug)]
pub struct PendingChallenge {
    pub id: String,
    pub nonce: Secret<String>,
    pub nonce_hash: String,
    pub ui: bool,
}

#[derive(Debug, PartialEq)]
pub enum TokenPoll {
    Token(String),
    Failed(String),
    Pending,
    Unknown,
}

/// Short-lived table of OAuth2 challenges keyed by challenge id.
///
/// Status moves `Pending -> Exchanging -> Ready | Failed`; the `Pending -> Exchanging` step is
/// the single point where a callback claims a challenge, so a state value is consumed at most
/// once. Finished entries are handed out once by [`ChallengeStore::poll`] and then removed.
///
/// The table holds at most `capacity` entries: when it is full, expired entries are dropped and
/// then the oldest pending challenge makes room for the new one.
pub struct ChallengeStore {
    entries: RwLock<HashMap<String, Entry>>,
    timeout: Duration,
    capacity: usize,
    counter: AtomicUsize,
}

impl ChallengeStore {
    pub fn new(timeout: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            timeout,
            capacity,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn tick(&self) {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        if count.is_multiple_of(PURGE_EVERY) {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.created.elapsed() < self.timeout);
            debug!("Purged {} expired challenges", before - entries.len());
        }
    }

    fn is_live(&self, entry: &Entry) -> bool {
        entry.created.elapsed() < self.timeout
    }

    pub async fn issue(&self, ui: bool) -> PendingChallenge {
        self.tick().await;

        let id = hex::encode(random_bytes::<16>());
        let nonce = URL_SAFE_NO_PAD.encode(random_bytes::<32>());
        let nonce_hash = hash_nonce(&nonce);

        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.created.elapsed() < self.timeout);
        }
        if entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .filter(|(_, entry)| matches!(entry.status, Status::Pending))
                .min_by_key(|(_, entry)| entry.created)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!("Challenge table full, evicting oldest pending challenge");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            id.clone(),
            Entry {
                nonce: Secret::new(nonce.clone()),
                nonce_hash: nonce_hash.clone(),
                ui,
                created: Instant::now(),
                status: Status::Pending,
            },
        );

        PendingChallenge {
            id,
            nonce: Secret::new(nonce),
            nonce_hash,
            ui,
        }
    }

    /// A live challenge still waiting for its callback.
    pub async fn pending(&self, id: &str) -> Option<PendingChallenge> {
        self.tick().await;

        let entries = self.entries.read().await;
        let entry = entries.get(id).filter(|entry| self.is_live(entry))?;
        if !matches!(entry.status, Status::Pending) {
            return None;
        }

        Some(PendingChallenge {
            id: id.to_string(),
            nonce: entry.nonce.clone(),
            nonce_hash: entry.nonce_hash.clone(),
            ui: entry.ui,
        })
    }

    /// Claims a pending challenge for code exchange. Only one caller ever succeeds.
    pub async fn begin_exchange(&self, id: &str, nonce_hash: &str) -> bool {
        self.tick().await;

        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        if !self.is_live(entry) || entry.nonce_hash != nonce_hash {
            return false;
        }
        if !matches!(entry.status, Status::Pending) {
            return false;
        }

        entry.status = Status::Exchanging;
        true
    }

    pub async fn complete(&self, id: &str, token: Secret<String>) {
        self.finish(id, Status::Ready(token)).await;
    }

    pub async fn fail(&self, id: &str, reason: &str) {
        self.finish(id, Status::Failed(reason.to_string())).await;
    }

    /// Only a claimed challenge takes an outcome; pending ones stay open for their own
    /// callback and finished ones are final.
    async fn finish(&self, id: &str, status: Status) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        if !matches!(entry.status, Status::Exchanging) {
            return;
        }

        // expiry restarts for the poller
        entry.created = Instant::now();
        entry.status = status;
    }

    pub async fn poll(&self, id: &str) -> TokenPoll {
        self.tick().await;

        let mut entries = self.entries.write().await;
        let live = entries.get(id).is_some_and(|entry| self.is_live(entry));
        if !live {
            entries.remove(id);
            return TokenPoll::Unknown;
        }

        let finished = entries
            .get(id)
            .is_some_and(|entry| matches!(entry.status, Status::Ready(_) | Status::Failed(_)));
        if !finished {
            return TokenPoll::Pending;
        }

        match entries.remove(id).map(|entry| entry.status) {
            Some(Status::Ready(token)) => TokenPoll::Token(token.expose().clone()),
            Some(Status::Failed(reason)) => TokenPoll::Failed(reason),
            _ => TokenPoll::Unknown,
        }
    }
}
