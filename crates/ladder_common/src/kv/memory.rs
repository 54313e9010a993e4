//! In-process KV store with the same single-key semantics as the remote one.
//!
//! Supports TTL expiry (on tokio's clock, so paused-time tests can advance it),
//! per-command call counters, and scripted transient failures.

use super::KvStore;
use crate::error::{LadderError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const HASH_NOT_INTEGER: &str = "ERR hash value is not an integer";
const OVERFLOW: &str = "ERR increment or decrement would overflow";
const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

/// Fails one future call of a command with a transient error.
#[derive(Debug, Clone)]
struct Fault {
    command: &'static str,
    skip: usize,
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    faults: Mutex<Vec<Fault>>,
    offline: Mutex<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls made for a command name (`GET`, `INCRBY`, `SETNX`...).
    pub fn call_count(&self, command: &str) -> usize {
        lock(&self.calls).get(command).copied().unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        lock(&self.calls).clear();
    }

    /// Let `skip` calls of `command` through, then fail the next one.
    pub fn fail_after(&self, command: &'static str, skip: usize) {
        lock(&self.faults).push(Fault { command, skip });
    }

    /// Fail every call until switched back.
    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    /// Write a hash field directly, the way an external ledger producer might.
    pub fn hset(&self, key: &str, field: &str, value: &str) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Hash(BTreeMap::new()),
            expires_at: None,
        });
        if let Slot::Str(_) = entry.slot {
            entry.slot = Slot::Hash(BTreeMap::new());
        }
        if let Slot::Hash(map) = &mut entry.slot {
            map.insert(field.to_string(), value.to_string());
        }
    }

    /// Remaining lease time for a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = lock(&self.entries);
        purge_expired(&mut entries, key);
        entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn begin(&self, command: &'static str) -> Result<()> {
        *lock(&self.calls).entry(command).or_insert(0) += 1;

        if *lock(&self.offline) {
            return Err(LadderError::Transient(format!(
                "{}: connection refused",
                command
            )));
        }

        let mut faults = lock(&self.faults);
        if let Some(pos) = faults.iter().position(|f| f.command == command) {
            if faults[pos].skip == 0 {
                faults.remove(pos);
                return Err(LadderError::Transient(format!("{}: request timed out", command)));
            }
            faults[pos].skip -= 1;
        }
        Ok(())
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    let expired = entries
        .get(key)
        .and_then(|e| e.expires_at)
        .map(|at| at <= Instant::now())
        .unwrap_or(false);
    if expired {
        entries.remove(key);
    }
}

fn checked_add(current: i64, delta: i64) -> Result<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| LadderError::Backend(OVERFLOW.to_string()))
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.begin("GET")?;
        let mut entries = lock(&self.entries);
        purge_expired(&mut entries, key);
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(None),
            Some(Slot::Str(v)) => Ok(Some(v.clone())),
            Some(Slot::Hash(_)) => Err(LadderError::Backend(WRONGTYPE.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.begin("SET")?;
        lock(&self.entries).insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.begin("INCRBY")?;
        let mut entries = lock(&self.entries);
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Str("0".to_string()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Str(v) => {
                let current: i64 = v
                    .parse()
                    .map_err(|_| LadderError::Backend(NOT_INTEGER.to_string()))?;
                let next = checked_add(current, delta)?;
                *v = next.to_string();
                Ok(next)
            }
            Slot::Hash(_) => Err(LadderError::Backend(WRONGTYPE.to_string())),
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.begin("HINCRBY")?;
        let mut entries = lock(&self.entries);
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Hash(BTreeMap::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Hash(map) => {
                let current: i64 = match map.get(field) {
                    Some(v) => v
                        .parse()
                        .map_err(|_| LadderError::Backend(HASH_NOT_INTEGER.to_string()))?,
                    None => 0,
                };
                let next = checked_add(current, delta)?;
                map.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            Slot::Str(_) => Err(LadderError::Backend(WRONGTYPE.to_string())),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.begin("HGETALL")?;
        let mut entries = lock(&self.entries);
        purge_expired(&mut entries, key);
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(HashMap::new()),
            Some(Slot::Hash(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Some(Slot::Str(_)) => Err(LadderError::Backend(WRONGTYPE.to_string())),
        }
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.begin("SETNX")?;
        if ttl_secs == 0 {
            return Err(LadderError::Backend(
                "ERR invalid expire time in 'set' command".to_string(),
            ));
        }
        let mut entries = lock(&self.entries);
        purge_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_by_creates_and_accumulates() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr_by("xp", 5).await.unwrap(), 5);
        assert_eq!(kv.incr_by("xp", 7).await.unwrap(), 12);
        assert_eq!(kv.get("xp").await.unwrap().as_deref(), Some("12"));
        assert_eq!(kv.call_count("INCRBY"), 2);
    }

    #[tokio::test]
    async fn test_incr_by_on_garbage_is_backend_error() {
        let kv = MemoryKv::new();
        kv.set("xp", "{\"total\":3}").await.unwrap();
        let err = kv.incr_by("xp", 1).await.unwrap_err();
        assert!(matches!(err, LadderError::Backend(_)));
    }

    #[tokio::test]
    async fn test_wrongtype() {
        let kv = MemoryKv::new();
        kv.hincr_by("h", "f", 1).await.unwrap();
        assert!(kv.get("h").await.is_err());
        kv.set("s", "1").await.unwrap();
        assert!(kv.hgetall("s").await.is_err());
    }

    #[tokio::test]
    async fn test_hgetall_absent_is_empty() {
        let kv = MemoryKv::new();
        assert!(kv.hgetall("ledger").await.unwrap().is_empty());
        kv.hset("ledger", "u1", "10");
        kv.hincr_by("ledger", "u2", 4).await.unwrap();
        let all = kv.hgetall("ledger").await.unwrap();
        assert_eq!(all.get("u1").map(String::as_str), Some("10"));
        assert_eq!(all.get("u2").map(String::as_str), Some("4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_ex_expires() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_ex("gate", "1", 10).await.unwrap());
        assert!(!kv.set_nx_ex("gate", "2", 10).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(kv.set_nx_ex("gate", "3", 10).await.unwrap());
        assert_eq!(kv.get("gate").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_fail_after_hits_exactly_one_call() {
        let kv = MemoryKv::new();
        kv.fail_after("SET", 1);
        kv.set("a", "1").await.unwrap();
        assert!(kv.set("a", "2").await.unwrap_err().is_transient());
        kv.set("a", "3").await.unwrap();
        assert_eq!(kv.call_count("SET"), 3);
    }

    #[tokio::test]
    async fn test_offline() {
        let kv = MemoryKv::new();
        kv.set_offline(true);
        assert!(kv.get("a").await.unwrap_err().is_transient());
        kv.set_offline(false);
        assert_eq!(kv.get("a").await.unwrap(), None);
    }
}
