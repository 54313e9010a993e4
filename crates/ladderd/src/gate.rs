//! Distributed gate - single-shot, self-expiring lease on SET NX EX.
//!
//! No renew and no release: the TTL is sized to the guarded action, and a
//! crashed holder's lease simply runs out.

use ladder_common::{Clock, GateConfig, KvStore, LadderError, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Gate {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    default_ttl_secs: u64,
}

impl Gate {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &GateConfig) -> Self {
        Self {
            store,
            clock,
            prefix: config.key_prefix.clone(),
            default_ttl_secs: config.default_ttl_secs,
        }
    }

    pub fn lease_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// `true` only for the one caller that created the lease in this TTL window.
    pub async fn acquire_once(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        if ttl_secs == 0 {
            return Err(LadderError::Config(format!(
                "gate '{}' needs a positive TTL",
                key
            )));
        }
        let lease_key = self.lease_key(key);
        let stamp = self.clock.now_ms().to_string();
        let acquired = self.store.set_nx_ex(&lease_key, &stamp, ttl_secs).await?;
        if acquired {
            info!("[GATE] Acquired {} for {}s", lease_key, ttl_secs);
        } else {
            debug!("[GATE] {} is held", lease_key);
        }
        Ok(acquired)
    }

    pub async fn acquire_default(&self, key: &str) -> Result<bool> {
        self.acquire_once(key, self.default_ttl_secs).await
    }
}
