//! Ladder Daemon - periodic XP reconciliation, self-healing and notification
//!
//! Components:
//! - `aggregator`: folds the ledger into the canonical total (watermark)
//! - `healer`: coerces value shapes and corrects runaway counters
//! - `gate`: single-shot distributed lease
//! - `notifier`: at-most-once-per-interval phase transition messages
//! - `scheduler`: one interval task per component with cooperative shutdown
//! - `engine`: builds all of the above from a `Config`

pub mod aggregator;
pub mod engine;
pub mod gate;
pub mod healer;
pub mod notifier;
pub mod scheduler;

pub use aggregator::{Aggregator, ReconcileOutcome};
pub use engine::Engine;
pub use gate::Gate;
pub use healer::{CoerceOutcome, HealReport, OverflowOutcome, SelfHealer, ViolationReason};
pub use notifier::{Notifier, TickOutcome};
pub use scheduler::Scheduler;
