//! Watermark aggregator - folds the external ledger into the canonical total.
//!
//! Each pass:
//! 1. Sum every field of the ledger hash
//! 2. Read the watermark (absent = 0)
//! 3. Stop if the sum did not grow past the watermark
//! 4. INCRBY the total by the difference, HINCRBY the active level's credit,
//!    then SET the watermark to the sum
//!
//! The three writes in step 4 are separate RPCs. A crash after the INCRBY and
//! before the watermark SET makes the next pass apply the same delta again.
//! That is the accepted contract: passes run at low frequency and the healer's
//! overflow check bounds runaway duplication.

use ladder_common::{get_int, KeysConfig, KvStore, LadderError, LadderTable, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Ledger sum is not above the watermark; nothing written
    Unchanged { raw_sum: i64, watermark: i64 },
    /// Delta folded into the total and credited to `level_field`
    Applied {
        delta: i64,
        raw_sum: i64,
        new_total: i64,
        level_field: String,
    },
}

pub struct Aggregator {
    store: Arc<dyn KvStore>,
    ladder: Arc<LadderTable>,
    keys: KeysConfig,
}

impl Aggregator {
    pub fn new(store: Arc<dyn KvStore>, ladder: Arc<LadderTable>, keys: KeysConfig) -> Self {
        Self {
            store,
            ladder,
            keys,
        }
    }

    /// Sum of the ledger. Non-integer fields are skipped for this pass.
    pub async fn ledger_sum(&self) -> Result<i64> {
        let fields = self.store.hgetall(&self.keys.ledger).await?;
        let mut sum: i64 = 0;
        for (entity, raw) in &fields {
            match raw.trim().parse::<i64>() {
                Ok(xp) => sum = sum.saturating_add(xp),
                Err(_) => warn!(
                    "[RECONCILE] Skipping malformed ledger entry {}={:?}",
                    entity, raw
                ),
            }
        }
        Ok(sum)
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let raw_sum = self.ledger_sum().await?;
        let watermark = get_int(self.store.as_ref(), &self.keys.watermark).await?;
        // Sums are never negative, so neither is a sound watermark.
        if watermark < 0 {
            return Err(LadderError::malformed(&self.keys.watermark, &watermark.to_string()));
        }

        // A shrinking or reset ledger is never read as negative progress.
        if raw_sum <= watermark {
            debug!(
                "[RECONCILE] Nothing to fold (sum={}, watermark={})",
                raw_sum, watermark
            );
            return Ok(ReconcileOutcome::Unchanged { raw_sum, watermark });
        }

        let delta = raw_sum
            .checked_sub(watermark)
            .ok_or_else(|| LadderError::malformed(&self.keys.watermark, &watermark.to_string()))?;
        let new_total = self.store.incr_by(&self.keys.xp_total, delta).await?;

        let state = self.ladder.compute(new_total);
        let level_field = LadderTable::level_field(&state.phase, &state.level);
        self.store
            .hincr_by(&self.keys.level_credits, &level_field, delta)
            .await?;

        self.store
            .set(&self.keys.watermark, &raw_sum.to_string())
            .await?;

        info!(
            "[RECONCILE] Applied delta={} total={} level={} watermark={}",
            delta, new_total, level_field, raw_sum
        );
        Ok(ReconcileOutcome::Applied {
            delta,
            raw_sum,
            new_total,
            level_field,
        })
    }
}
