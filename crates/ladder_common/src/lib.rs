//! Ladder Common - shared types for the XP ladder engine
//!
//! - `kv`: single-key atomic store contract (REST and in-memory)
//! - `ladder`: phase/level table and progress derivation
//! - `config`: TOML configuration
//! - `error`: error taxonomy

pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod ladder;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AggregatorConfig, ChannelConfig, Completion, Config, GateConfig, HealerConfig, KeysConfig,
    KvConfig, LadderConfig, LevelSpec, NotifierConfig, OverflowCheck, PhaseSpec,
};
pub use error::{LadderError, Result};
pub use kv::{get_int, parse_int, KvStore, MemoryKv, RestKv};
pub use ladder::{LadderTable, Level, Phase, PhaseState, Span};
