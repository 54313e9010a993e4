//! Phase transition notifier - at most one delivery per interval.
//!
//! The last-notified timestamp lives in the store, so the guard holds across
//! restarts and across processes. It is written only after a channel reports
//! success; a failed tick is simply retried on the next one.

pub mod channels;

pub use channels::{build_channels, CommandChannel, LogChannel, NotificationChannel, WebhookChannel};

use ladder_common::{
    get_int, parse_int, Clock, Completion, KeysConfig, KvStore, LadderError, LadderTable,
    NotifierConfig, PhaseState, Result,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Completion predicate does not hold
    NotReady,
    /// Predicate holds but the last delivery was `since_ms` ago
    Suppressed { since_ms: i64 },
    Delivered { channel: String },
    AllChannelsFailed,
}

pub struct Notifier {
    store: Arc<dyn KvStore>,
    ladder: Arc<LadderTable>,
    clock: Arc<dyn Clock>,
    channels: Vec<Box<dyn NotificationChannel>>,
    threshold: i64,
    min_interval_ms: i64,
    template: String,
    total_key: String,
    state_key: String,
}

impl Notifier {
    /// Fails when the predicate names a phase or level the ladder lacks, or
    /// when it would already hold for an empty store (threshold 0).
    pub fn new(
        store: Arc<dyn KvStore>,
        ladder: Arc<LadderTable>,
        clock: Arc<dyn Clock>,
        channels: Vec<Box<dyn NotificationChannel>>,
        completion: Completion,
        config: &NotifierConfig,
        keys: &KeysConfig,
    ) -> Result<Self> {
        let threshold = completion_threshold(&ladder, &completion)?;
        if threshold <= 0 {
            return Err(LadderError::Config(format!(
                "notifier: {:?} holds at 0 XP and would fire on a fresh store",
                completion
            )));
        }
        Ok(Self {
            store,
            ladder,
            clock,
            channels,
            threshold,
            min_interval_ms: config.min_interval_ms,
            template: config.message.clone(),
            total_key: keys.xp_total.clone(),
            state_key: keys.notify_state.clone(),
        })
    }

    /// Total XP at which the predicate starts to hold
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        let total = get_int(self.store.as_ref(), &self.total_key).await?;
        if total < self.threshold {
            debug!("[NOTIFY] Not ready ({} < {})", total, self.threshold);
            return Ok(TickOutcome::NotReady);
        }

        let now = self.clock.now_ms();
        // Absent state means nothing was ever delivered.
        if let Some(raw) = self.store.get(&self.state_key).await? {
            let last = parse_int(&self.state_key, &raw)?;
            let since_ms = now.saturating_sub(last);
            if since_ms < self.min_interval_ms {
                debug!("[NOTIFY] Suppressed, last delivery {}ms ago", since_ms);
                return Ok(TickOutcome::Suppressed { since_ms });
            }
        }

        let state = self.ladder.compute(total);
        let text = render(&self.template, &state, total);

        for channel in &self.channels {
            if channel.send(&text).await {
                self.store.set(&self.state_key, &now.to_string()).await?;
                info!("[NOTIFY] Delivered via {} at {}", channel.name(), now);
                return Ok(TickOutcome::Delivered {
                    channel: channel.name().to_string(),
                });
            }
            warn!("[NOTIFY] Channel {} failed, trying next", channel.name());
        }

        warn!("[NOTIFY] All {} channels failed; retrying next tick", self.channels.len());
        Ok(TickOutcome::AllChannelsFailed)
    }
}

/// Smallest total for which the predicate holds.
pub fn completion_threshold(ladder: &LadderTable, completion: &Completion) -> Result<i64> {
    match completion {
        Completion::PhaseCompleted { phase } => ladder
            .phase_span(phase)
            .map(|span| span.end)
            .ok_or_else(|| LadderError::Config(format!("notifier: unknown phase '{}'", phase))),
        Completion::LevelReached { phase, level } => ladder
            .level_span(phase, level)
            .map(|span| span.start)
            .ok_or_else(|| {
                LadderError::Config(format!("notifier: unknown level '{}:{}'", phase, level))
            }),
    }
}

/// Fill `{phase}`, `{level}` and `{total}` in a message template.
pub fn render(template: &str, state: &PhaseState, total: i64) -> String {
    template
        .replace("{phase}", &state.phase)
        .replace("{level}", &state.level)
        .replace("{total}", &total.to_string())
}
