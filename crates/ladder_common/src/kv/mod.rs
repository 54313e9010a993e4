//! KV client contract.
//!
//! Every operation is one round trip against the remote store and touches a
//! single key. Nothing here is atomic across keys, including batched reads.
//!
//! - `RestKv` talks to a Redis-over-REST endpoint (production)
//! - `MemoryKv` keeps the same single-key semantics in process (tests, dry runs)

pub mod memory;
pub mod rest;

pub use memory::MemoryKv;
pub use rest::RestKv;

use crate::error::{LadderError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// GET. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SET, unconditional overwrite.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// INCRBY, returns the new value. Absent keys start at 0.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// HINCRBY on one field of a hash, returns the new field value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// HGETALL. Values are returned raw; an absent hash is empty.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// SET key value NX EX ttl. `true` only for the caller that created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Several GETs. Implementations may batch them; no atomicity is implied.
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }
}

/// A single store command, as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    IncrBy { key: String, delta: i64 },
    HIncrBy { key: String, field: String, delta: i64 },
    HGetAll { key: String },
    SetNxEx { key: String, value: String, ttl_secs: u64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::IncrBy { .. } => "INCRBY",
            Command::HIncrBy { .. } => "HINCRBY",
            Command::HGetAll { .. } => "HGETALL",
            Command::SetNxEx { .. } => "SETNX",
        }
    }

    /// Redis argument vector, e.g. `["INCRBY", "xp:total", "5"]`.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Command::Get { key } => vec!["GET".into(), key.clone()],
            Command::Set { key, value } => vec!["SET".into(), key.clone(), value.clone()],
            Command::IncrBy { key, delta } => {
                vec!["INCRBY".into(), key.clone(), delta.to_string()]
            }
            Command::HIncrBy { key, field, delta } => vec![
                "HINCRBY".into(),
                key.clone(),
                field.clone(),
                delta.to_string(),
            ],
            Command::HGetAll { key } => vec!["HGETALL".into(), key.clone()],
            Command::SetNxEx {
                key,
                value,
                ttl_secs,
            } => vec![
                "SET".into(),
                key.clone(),
                value.clone(),
                "NX".into(),
                "EX".into(),
                ttl_secs.to_string(),
            ],
        }
    }
}

/// Strict integer parse of a stored value (no whitespace, no decimals).
pub fn parse_int(key: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| LadderError::malformed(key, raw))
}

/// GET parsed as an integer; absent keys read as 0.
pub async fn get_int(store: &dyn KvStore, key: &str) -> Result<i64> {
    match store.get(key).await? {
        Some(raw) => parse_int(key, &raw),
        None => Ok(0),
    }
}
