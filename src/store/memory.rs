//! In-process [`KvStore`] for tests and single-instance development.
//!
//! One mutex guards the whole keyspace, so every trait method is atomic.
//! Expiry is evaluated lazily against the injected clock.

use super::{KvStore, RevokeOutcome, WriteOp, ensure_positive_ttl};
use super::errors::{StoreError, StoreResult};
use crate::clock::SharedClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    Window(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// Mutex-guarded in-memory keyspace
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn expiry(now: DateTime<Utc>, key: &str, ttl: Duration) -> StoreResult<DateTime<Utc>> {
    ensure_positive_ttl(key, ttl)?;
    let ttl = chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(key.to_string()))?;
    Ok(now + ttl)
}

fn purge(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
}

fn wrong_type(key: &str, expected: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: format!("expected {expected}"),
    }
}

fn apply(
    staged: &mut HashMap<String, Option<Entry>>,
    op: WriteOp,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    match op {
        WriteOp::SetEx { key, value, ttl } => {
            let expires_at = expiry(now, &key, ttl)?;
            staged.insert(
                key,
                Some(Entry {
                    value: Value::Str(value),
                    expires_at: Some(expires_at),
                }),
            );
        }
        WriteOp::SetAdd { key, member } => {
            let slot = staged.entry(key.clone()).or_insert(None);
            let entry = slot.get_or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(members) => {
                    members.insert(member);
                }
                _ => return Err(wrong_type(&key, "set")),
            }
        }
        WriteOp::SetRemove { key, member } => match staged.get_mut(&key) {
            Some(Some(Entry {
                value: Value::Set(members),
                ..
            })) => {
                members.remove(&member);
                if members.is_empty() {
                    staged.insert(key, None);
                }
            }
            Some(Some(_)) => return Err(wrong_type(&key, "set")),
            _ => {}
        },
        WriteOp::Expire { key, ttl } => {
            let expires_at = expiry(now, &key, ttl)?;
            if let Some(Some(entry)) = staged.get_mut(&key) {
                entry.expires_at = Some(expires_at);
            }
        }
        WriteOp::WindowAdd {
            key,
            score_ms,
            member,
        } => {
            let slot = staged.entry(key.clone()).or_insert(None);
            let entry = slot.get_or_insert_with(|| Entry {
                value: Value::Window(Vec::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Window(items) => {
                    items.retain(|(_, m)| *m != member);
                    let at = items.partition_point(|(s, _)| *s <= score_ms);
                    items.insert(at, (score_ms, member));
                }
                _ => return Err(wrong_type(&key, "window")),
            }
        }
    }
    Ok(())
}

fn op_key(op: &WriteOp) -> &str {
    match op {
        WriteOp::SetEx { key, .. }
        | WriteOp::SetAdd { key, .. }
        | WriteOp::SetRemove { key, .. }
        | WriteOp::Expire { key, .. }
        | WriteOp::WindowAdd { key, .. } => key,
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        Ok(entries.contains_key(key))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        Ok(entries
            .get(key)
            .and_then(|e| e.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        Ok(entries.remove(key).is_some())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    async fn execute(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        // Stage every touched key so a failing op leaves the keyspace untouched
        let mut staged: HashMap<String, Option<Entry>> = HashMap::new();
        for op in &ops {
            let key = op_key(op);
            if !staged.contains_key(key) {
                purge(&mut entries, key, now);
                staged.insert(key.to_string(), entries.get(key).cloned());
            }
        }

        for op in ops {
            apply(&mut staged, op, now)?;
        }

        for (key, entry) in staged {
            match entry {
                Some(entry) => {
                    entries.insert(key, entry);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn revoke_once(
        &self,
        target: &str,
        marker: &str,
        fallback_ttl: Duration,
    ) -> StoreResult<RevokeOutcome> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, marker, now);
        purge(&mut entries, target, now);

        if entries.contains_key(marker) {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }

        let (value, expires_at) = match entries.get(target) {
            None => return Ok(RevokeOutcome::Missing),
            Some(Entry {
                value: Value::Str(v),
                expires_at,
            }) => (v.clone(), *expires_at),
            Some(_) => return Err(wrong_type(target, "string")),
        };

        let marker_expiry = match expires_at {
            Some(at) => at,
            None => expiry(now, marker, fallback_ttl)?,
        };
        entries.insert(
            marker.to_string(),
            Entry {
                value: Value::Str("1".to_string()),
                expires_at: Some(marker_expiry),
            },
        );

        Ok(RevokeOutcome::Revoked(value))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        match entries.get(key).map(|e| matches!(e.value, Value::Str(_))) {
            None => return Ok(None),
            Some(false) => return Err(wrong_type(key, "string")),
            Some(true) => {}
        }
        match entries.remove(key) {
            Some(Entry {
                value: Value::Str(v),
                ..
            }) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    async fn window_admit(
        &self,
        key: &str,
        since_ms: i64,
        max: u64,
        score_ms: i64,
        member: &str,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let now = self.clock.now();
        let expires_at = expiry(now, key, ttl)?;
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Window(Vec::new()),
            expires_at: None,
        });
        let Value::Window(items) = &mut entry.value else {
            return Err(wrong_type(key, "window"));
        };

        items.retain(|(score, _)| *score >= since_ms);
        let count = items.len() as u64;
        if count < max {
            let at = items.partition_point(|(s, _)| *s <= score_ms);
            items.insert(at, (score_ms, member.to_string()));
            entry.expires_at = Some(expires_at);
        } else if items.is_empty() {
            entries.remove(key);
        }
        Ok(count)
    }

    async fn window_count(&self, key: &str, since_ms: i64) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, key, now);
        match entries.get_mut(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Window(items),
                ..
            }) => {
                items.retain(|(score, _)| *score >= since_ms);
                Ok(items.len() as u64)
            }
            Some(_) => Err(wrong_type(key, "window")),
        }
    }
}
