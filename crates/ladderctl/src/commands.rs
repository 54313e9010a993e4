//! Subcommand execution - one pass of an engine component per invocation

use crate::output::{self, StatusReport};
use anyhow::{anyhow, Result};
use ladder_common::{get_int, KvStore};
use ladderd::{Engine, ReconcileOutcome, TickOutcome};
use std::collections::BTreeMap;

pub async fn status(engine: &Engine, json: bool) -> Result<()> {
    let keys = &engine.config.keys;
    let store = engine.store.as_ref();

    let total = get_int(store, &keys.xp_total).await?;
    let watermark = get_int(store, &keys.watermark).await?;
    let ledger_sum = engine.aggregator.ledger_sum().await?;
    let credits: BTreeMap<String, String> =
        store.hgetall(&keys.level_credits).await?.into_iter().collect();
    let last_notified_ms = store.get(&keys.notify_state).await?;

    let report = StatusReport {
        total,
        watermark,
        ledger_sum,
        state: engine.ladder.compute(total),
        credits,
        last_notified_ms,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_status(&report);
    }
    Ok(())
}

pub fn ladder(engine: &Engine) -> Result<()> {
    output::print_ladder(&engine.ladder);
    Ok(())
}

pub async fn reconcile(engine: &Engine) -> Result<()> {
    match engine.aggregator.reconcile().await? {
        ReconcileOutcome::Unchanged { raw_sum, watermark } => output::note(&format!(
            "Nothing to fold (ledger sum {}, watermark {})",
            raw_sum, watermark
        )),
        ReconcileOutcome::Applied {
            delta,
            new_total,
            level_field,
            ..
        } => output::ok(&format!(
            "Applied {} XP, total now {} (credited to {})",
            delta, new_total, level_field
        )),
    }
    Ok(())
}

pub async fn heal(engine: &Engine) -> Result<()> {
    let report = engine.healer.run_pass().await;
    let summary = format!(
        "{} coerced, {} reset, {} unparseable, {} errors",
        report.rewritten, report.reset, report.unparseable, report.errors
    );
    if report.errors > 0 {
        return Err(anyhow!("self-heal pass incomplete: {}", summary));
    }
    if report.unparseable > 0 {
        output::warn(&summary);
    } else {
        output::ok(&summary);
    }
    Ok(())
}

/// Returns whether the lease was taken.
pub async fn gate(engine: &Engine, key: &str, ttl: Option<u64>) -> Result<bool> {
    let acquired = match ttl {
        Some(ttl) => engine.gate.acquire_once(key, ttl).await?,
        None => engine.gate.acquire_default(key).await?,
    };
    if acquired {
        output::ok(&format!("Lease {} acquired", engine.gate.lease_key(key)));
    } else {
        output::note(&format!("Lease {} is held", engine.gate.lease_key(key)));
    }
    Ok(acquired)
}

pub async fn notify(engine: &Engine) -> Result<()> {
    let notifier = engine
        .notifier
        .as_ref()
        .ok_or_else(|| anyhow!("notifier is disabled: set notifier.completion"))?;

    match notifier.tick().await? {
        TickOutcome::NotReady => output::note(&format!(
            "Not ready: needs {} XP",
            notifier.threshold()
        )),
        TickOutcome::Suppressed { since_ms } => output::note(&format!(
            "Suppressed: last delivery {}s ago",
            since_ms / 1000
        )),
        TickOutcome::Delivered { channel } => output::ok(&format!("Delivered via {}", channel)),
        TickOutcome::AllChannelsFailed => {
            return Err(anyhow!("every notification channel failed"))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ladder_common::{Config, LevelSpec, ManualClock, MemoryKv, PhaseSpec};
    use std::sync::Arc;

    async fn engine(kv: Arc<MemoryKv>) -> Engine {
        let mut config = Config::default();
        config.ladder.phases = vec![PhaseSpec {
            name: "A".into(),
            levels: vec![LevelSpec { name: "L1".into(), cost: 100 }],
        }];
        Engine::build(config, kv, Arc::new(ManualClock::new(0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_gate_reports_held_lease() {
        let engine = engine(Arc::new(MemoryKv::new())).await;
        assert!(gate(&engine, "deploy", Some(30)).await.unwrap());
        assert!(!gate(&engine, "deploy", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_notify_disabled_is_error() {
        let engine = engine(Arc::new(MemoryKv::new())).await;
        assert!(notify(&engine).await.is_err());
    }

    #[tokio::test]
    async fn test_reconcile_then_status() {
        let kv = Arc::new(MemoryKv::new());
        kv.hset("xp:ledger", "alice", "40");
        let engine = engine(kv.clone()).await;
        reconcile(&engine).await.unwrap();
        status(&engine, true).await.unwrap();
        assert_eq!(kv.get("xp:total").await.unwrap().as_deref(), Some("40"));
    }
}
