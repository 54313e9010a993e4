//! Engine wiring - builds every component from one `Config`.
//!
//! Shared by the daemon and by `ladderctl`, which runs single passes of the
//! same components against the same store.

use crate::aggregator::Aggregator;
use crate::gate::Gate;
use crate::healer::SelfHealer;
use crate::notifier::{build_channels, Notifier};
use crate::scheduler::Scheduler;
use ladder_common::{Clock, Config, KvStore, LadderTable, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Engine {
    pub config: Config,
    pub store: Arc<dyn KvStore>,
    pub ladder: Arc<LadderTable>,
    pub aggregator: Arc<Aggregator>,
    pub healer: Arc<SelfHealer>,
    pub gate: Arc<Gate>,
    /// `None` when no completion predicate is configured
    pub notifier: Option<Arc<Notifier>>,
}

impl Engine {
    /// Load the ladder and build the components. Any error here is fatal at boot.
    pub async fn build(
        config: Config,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ladder = Arc::new(LadderTable::load(&config.ladder, store.as_ref()).await?);
        Self::with_ladder(config, store, clock, ladder)
    }

    pub fn with_ladder(
        config: Config,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        ladder: Arc<LadderTable>,
    ) -> Result<Self> {
        config.validate()?;
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&store),
            Arc::clone(&ladder),
            config.keys.clone(),
        ));
        let healer = Arc::new(SelfHealer::new(Arc::clone(&store), &config.healer, &config.keys));
        let gate = Arc::new(Gate::new(Arc::clone(&store), Arc::clone(&clock), &config.gate));

        let notifier = match &config.notifier.completion {
            Some(completion) => {
                let channels = build_channels(&config.notifier.channels)?;
                Some(Arc::new(Notifier::new(
                    Arc::clone(&store),
                    Arc::clone(&ladder),
                    clock,
                    channels,
                    completion.clone(),
                    &config.notifier,
                    &config.keys,
                )?))
            }
            None => None,
        };

        Ok(Self {
            config,
            store,
            ladder,
            aggregator,
            healer,
            gate,
            notifier,
        })
    }

    /// Spawn one periodic task per enabled component.
    pub fn start(&self) -> Scheduler {
        let mut scheduler = Scheduler::new();

        if self.config.aggregator.enabled {
            scheduler.spawn_aggregator(
                Arc::clone(&self.aggregator),
                Duration::from_secs(self.config.aggregator.interval_secs),
            );
        }
        if self.config.healer.enabled {
            scheduler.spawn_healer(
                Arc::clone(&self.healer),
                Duration::from_secs(self.config.healer.interval_secs),
            );
        }
        if let Some(notifier) = &self.notifier {
            scheduler.spawn_notifier(
                Arc::clone(notifier),
                Duration::from_secs(self.config.notifier.interval_secs),
            );
        }

        info!("[BOOT] {} periodic tasks running", scheduler.len());
        scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ladder_common::{ChannelConfig, Completion, LevelSpec, ManualClock, MemoryKv, PhaseSpec};

    fn config() -> Config {
        let mut config = Config::default();
        config.ladder.phases = vec![PhaseSpec {
            name: "A".into(),
            levels: vec![
                LevelSpec { name: "L1".into(), cost: 100 },
                LevelSpec { name: "L2".into(), cost: 200 },
            ],
        }];
        config
    }

    #[tokio::test]
    async fn test_notifier_off_without_completion() {
        let engine = Engine::build(
            config(),
            Arc::new(MemoryKv::new()),
            Arc::new(ManualClock::new(0)),
        )
        .await
        .unwrap();
        assert!(engine.notifier.is_none());
        assert_eq!(engine.ladder.total_cost(), 300);
    }

    #[tokio::test]
    async fn test_unknown_completion_phase_is_fatal() {
        let mut config = config();
        config.notifier.completion = Some(Completion::PhaseCompleted { phase: "Z".into() });
        config.notifier.channels = vec![ChannelConfig::Log];
        let built = Engine::build(
            config,
            Arc::new(MemoryKv::new()),
            Arc::new(ManualClock::new(0)),
        )
        .await;
        assert!(built.is_err());
    }

    #[tokio::test]
    async fn test_empty_ladder_is_fatal() {
        let built = Engine::build(
            Config::default(),
            Arc::new(MemoryKv::new()),
            Arc::new(ManualClock::new(0)),
        )
        .await;
        assert!(built.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_engine_reconciles() {
        let kv = Arc::new(MemoryKv::new());
        kv.hset("xp:ledger", "alice", "250");
        let engine = Engine::build(config(), kv.clone(), Arc::new(ManualClock::new(0)))
            .await
            .unwrap();

        let scheduler = engine.start();
        assert_eq!(scheduler.len(), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.shutdown().await;

        assert_eq!(kv.get("xp:total").await.unwrap().as_deref(), Some("250"));
        assert_eq!(kv.get("xp:ledger:watermark").await.unwrap().as_deref(), Some("250"));
    }
}
