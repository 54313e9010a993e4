//! Ladder Model
//!
//! An ordered table of phases, each an ordered list of (level, cost) pairs.
//! The table is loaded once at startup and never changes afterwards.
//!
//! ## Walking the ladder
//!
//! `compute(total)` spends `total` on levels in order. The first level whose
//! cost cannot be paid in full is the current one:
//!
//! - `percent = round(100 * remaining / cost, 1)`, clamped to [0, 100]
//! - `remaining` (to next) `= cost - remaining`
//! - `level_start_total = total - remaining`
//!
//! `total <= 0` is the first level at 0%. A total past every level is the
//! last level of the last phase at 100% (the terminal sentinel).

use crate::config::{LadderConfig, LevelSpec, PhaseSpec};
use crate::error::{LadderError, Result};
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// A level inside a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    pub cost: i64,
}

/// A named stage of progression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub levels: Vec<Level>,
}

impl Phase {
    pub fn cost(&self) -> i64 {
        self.levels.iter().map(|l| l.cost).sum()
    }
}

/// Cumulative XP range `[start, end)` covered by a phase or level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

/// Derived progress; a pure function of (total, table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: String,
    pub phase_index: usize,
    pub level: String,
    /// 0-based position within the phase
    pub level_index: usize,
    /// Progress through the current level, 0.0-100.0 with one decimal
    pub percent: f64,
    /// XP still needed to finish the current level
    pub remaining: i64,
    /// Cumulative XP at which the current level starts
    pub level_start_total: i64,
    /// Past every defined level
    pub terminal: bool,
}

impl PhaseState {
    /// 1-based level number for display
    pub fn level_number(&self) -> usize {
        self.level_index + 1
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {} (level {}, {:.1}%, {} to next)",
            self.phase,
            self.level,
            self.level_number(),
            self.percent,
            self.remaining
        )?;
        if self.terminal {
            write!(f, " [complete]")?;
        }
        Ok(())
    }
}

/// The validated, immutable ladder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LadderTable {
    phases: Vec<Phase>,
    total_cost: i64,
}

/// On-disk ladder file (TOML or JSON)
#[derive(Debug, Deserialize)]
struct LadderFile {
    #[serde(default)]
    phase_order: Vec<String>,
    #[serde(default)]
    phases: Vec<PhaseSpec>,
}

/// A level stored in a remote hash value: `["L1", 100]` or `{"name": "L1", "cost": 100}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteLevel {
    Pair(String, i64),
    Named(LevelSpec),
}

impl LadderTable {
    /// Validate phase specs in the order given.
    pub fn new(specs: Vec<PhaseSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(LadderError::InvalidLadder("no phases defined".into()));
        }

        let mut seen_phases = HashSet::new();
        let mut total_cost: i64 = 0;
        let mut phases = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(LadderError::InvalidLadder("phase with empty name".into()));
            }
            if !seen_phases.insert(spec.name.clone()) {
                return Err(LadderError::InvalidLadder(format!(
                    "duplicate phase '{}'",
                    spec.name
                )));
            }
            if spec.levels.is_empty() {
                return Err(LadderError::InvalidLadder(format!(
                    "phase '{}' has no levels",
                    spec.name
                )));
            }

            let mut seen_levels = HashSet::new();
            let mut levels = Vec::with_capacity(spec.levels.len());
            for level in spec.levels {
                if level.cost <= 0 {
                    return Err(LadderError::InvalidLadder(format!(
                        "level '{}:{}' has non-positive cost {}",
                        spec.name, level.name, level.cost
                    )));
                }
                if !seen_levels.insert(level.name.clone()) {
                    return Err(LadderError::InvalidLadder(format!(
                        "duplicate level '{}' in phase '{}'",
                        level.name, spec.name
                    )));
                }
                total_cost = total_cost.checked_add(level.cost).ok_or_else(|| {
                    LadderError::InvalidLadder("cumulative cost overflows i64".into())
                })?;
                levels.push(Level {
                    name: level.name,
                    cost: level.cost,
                });
            }

            phases.push(Phase {
                name: spec.name,
                levels,
            });
        }

        Ok(Self { phases, total_cost })
    }

    /// Validate specs after reordering them by `order` (ignored when empty).
    pub fn with_order(specs: Vec<PhaseSpec>, order: &[String]) -> Result<Self> {
        Self::new(apply_order(specs, order)?)
    }

    /// Build from inline phases or a file. Remote hashes need `load`.
    pub fn from_local(config: &LadderConfig) -> Result<Self> {
        match (config.phases.is_empty(), &config.file, &config.remote_hash) {
            (false, None, None) => Self::with_order(config.phases.clone(), &config.phase_order),
            (true, Some(path), None) => Self::from_file(path, &config.phase_order),
            (true, None, Some(key)) => Err(LadderError::Config(format!(
                "ladder comes from remote hash '{}'; a store is required to load it",
                key
            ))),
            (true, None, None) => Err(LadderError::InvalidLadder(
                "no ladder source configured (phases, file or remote_hash)".into(),
            )),
            _ => Err(LadderError::Config(
                "set exactly one of ladder.phases, ladder.file, ladder.remote_hash".into(),
            )),
        }
    }

    /// Build from whichever source the config names, reading the store if needed.
    pub async fn load(config: &LadderConfig, store: &dyn KvStore) -> Result<Self> {
        let table = match (&config.remote_hash, config.phases.is_empty(), &config.file) {
            (Some(key), true, None) => {
                Self::from_remote_hash(store, key, &config.phase_order).await?
            }
            _ => Self::from_local(config)?,
        };
        info!(
            "[BOOT] Ladder loaded: {} phases, {} levels, {} XP total",
            table.phases.len(),
            table.levels().count(),
            table.total_cost
        );
        Ok(table)
    }

    /// TOML by default, JSON when the extension is `.json`.
    pub fn from_file(path: &Path, order: &[String]) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let file: LadderFile = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        let order = if order.is_empty() { &file.phase_order } else { order };
        Self::with_order(file.phases, order)
    }

    /// Fields are phase names; hashes are unordered so `order` is mandatory.
    pub async fn from_remote_hash(
        store: &dyn KvStore,
        key: &str,
        order: &[String],
    ) -> Result<Self> {
        if order.is_empty() {
            return Err(LadderError::InvalidLadder(format!(
                "remote ladder '{}' needs ladder.phase_order",
                key
            )));
        }
        let fields = store.hgetall(key).await?;
        let mut specs = Vec::with_capacity(fields.len());
        for (phase, raw) in fields {
            let levels: Vec<RemoteLevel> = serde_json::from_str(&raw).map_err(|e| {
                LadderError::InvalidLadder(format!("phase '{}' in '{}': {}", phase, key, e))
            })?;
            let levels = levels
                .into_iter()
                .map(|l| match l {
                    RemoteLevel::Pair(name, cost) => LevelSpec { name, cost },
                    RemoteLevel::Named(spec) => spec,
                })
                .collect();
            specs.push(PhaseSpec {
                name: phase,
                levels,
            });
        }
        Self::with_order(specs, order)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// All levels in walk order, with their phase
    pub fn levels(&self) -> impl Iterator<Item = (&Phase, &Level)> {
        self.phases
            .iter()
            .flat_map(|p| p.levels.iter().map(move |l| (p, l)))
    }

    pub fn total_cost(&self) -> i64 {
        self.total_cost
    }

    /// Cumulative range of a phase
    pub fn phase_span(&self, phase: &str) -> Option<Span> {
        let mut start = 0;
        for p in &self.phases {
            let end = start + p.cost();
            if p.name == phase {
                return Some(Span { start, end });
            }
            start = end;
        }
        None
    }

    /// Cumulative range of a level
    pub fn level_span(&self, phase: &str, level: &str) -> Option<Span> {
        let mut start = 0;
        for (p, l) in self.levels() {
            if p.name == phase && l.name == level {
                return Some(Span {
                    start,
                    end: start + l.cost,
                });
            }
            start += l.cost;
        }
        None
    }

    /// Hash field under which per-level credit is kept
    pub fn level_field(phase: &str, level: &str) -> String {
        format!("{}:{}", phase, level)
    }

    /// Derive the phase state for a total. Pure and defined for every i64.
    pub fn compute(&self, total: i64) -> PhaseState {
        let first_phase = &self.phases[0];
        let first_level = &first_phase.levels[0];

        if total <= 0 {
            return PhaseState {
                phase: first_phase.name.clone(),
                phase_index: 0,
                level: first_level.name.clone(),
                level_index: 0,
                percent: 0.0,
                remaining: first_level.cost,
                level_start_total: 0,
                terminal: false,
            };
        }

        let mut remaining = total;
        for (phase_index, phase) in self.phases.iter().enumerate() {
            for (level_index, level) in phase.levels.iter().enumerate() {
                if remaining < level.cost {
                    return PhaseState {
                        phase: phase.name.clone(),
                        phase_index,
                        level: level.name.clone(),
                        level_index,
                        percent: percent_of(remaining, level.cost),
                        remaining: level.cost - remaining,
                        level_start_total: total - remaining,
                        terminal: false,
                    };
                }
                remaining -= level.cost;
            }
        }

        let phase_index = self.phases.len() - 1;
        let last_phase = &self.phases[phase_index];
        let level_index = last_phase.levels.len() - 1;
        let last_level = &last_phase.levels[level_index];
        PhaseState {
            phase: last_phase.name.clone(),
            phase_index,
            level: last_level.name.clone(),
            level_index,
            percent: 100.0,
            remaining: 0,
            level_start_total: self.total_cost - last_level.cost,
            terminal: true,
        }
    }
}

fn percent_of(part: i64, whole: i64) -> f64 {
    let raw = 100.0 * part as f64 / whole as f64;
    ((raw * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

fn apply_order(mut specs: Vec<PhaseSpec>, order: &[String]) -> Result<Vec<PhaseSpec>> {
    if order.is_empty() {
        return Ok(specs);
    }
    let mut ordered = Vec::with_capacity(specs.len());
    for name in order {
        let pos = specs.iter().position(|s| &s.name == name).ok_or_else(|| {
            LadderError::InvalidLadder(format!(
                "phase_order names unknown or repeated phase '{}'",
                name
            ))
        })?;
        ordered.push(specs.remove(pos));
    }
    if let Some(left) = specs.first() {
        return Err(LadderError::InvalidLadder(format!(
            "phase '{}' is missing from phase_order",
            left.name
        )));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use std::io::Write;

    fn spec(name: &str, levels: &[(&str, i64)]) -> PhaseSpec {
        PhaseSpec {
            name: name.to_string(),
            levels: levels
                .iter()
                .map(|(n, c)| LevelSpec {
                    name: n.to_string(),
                    cost: *c,
                })
                .collect(),
        }
    }

    fn two_phase() -> LadderTable {
        LadderTable::new(vec![
            spec("A", &[("L1", 100), ("L2", 200)]),
            spec("B", &[("M1", 50)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_mid_level() {
        let ladder = LadderTable::new(vec![spec("PhaseA", &[("L1", 100), ("L2", 200)])]).unwrap();
        let state = ladder.compute(250);
        assert_eq!(state.phase, "PhaseA");
        assert_eq!(state.level, "L2");
        assert_eq!(state.level_number(), 2);
        assert_eq!(state.percent, 75.0);
        assert_eq!(state.remaining, 50);
        assert_eq!(state.level_start_total, 100);
        assert!(!state.terminal);
    }

    #[test]
    fn test_zero_and_negative_total() {
        let ladder = two_phase();
        for total in [0, -5, i64::MIN] {
            let state = ladder.compute(total);
            assert_eq!(state.phase, "A");
            assert_eq!(state.level, "L1");
            assert_eq!(state.percent, 0.0);
            assert_eq!(state.remaining, 100);
            assert_eq!(state.level_start_total, 0);
        }
    }

    #[test]
    fn test_exact_boundary_moves_to_next_level() {
        let ladder = two_phase();
        let state = ladder.compute(100);
        assert_eq!(state.level, "L2");
        assert_eq!(state.percent, 0.0);
        assert_eq!(state.remaining, 200);

        let state = ladder.compute(300);
        assert_eq!(state.phase, "B");
        assert_eq!(state.phase_index, 1);
        assert_eq!(state.level, "M1");
    }

    #[test]
    fn test_terminal_sentinel() {
        let ladder = two_phase();
        for total in [350, 351, i64::MAX] {
            let state = ladder.compute(total);
            assert_eq!(state.phase, "B");
            assert_eq!(state.level, "M1");
            assert_eq!(state.percent, 100.0);
            assert_eq!(state.remaining, 0);
            assert_eq!(state.level_start_total, 300);
            assert!(state.terminal);
        }
    }

    #[test]
    fn test_percent_rounding_and_clamp() {
        let ladder = LadderTable::new(vec![spec("A", &[("L1", 3), ("L2", 10_000)])]).unwrap();
        assert_eq!(ladder.compute(1).percent, 33.3);
        assert_eq!(ladder.compute(2).percent, 66.7);
        // 9999/10000 rounds up to 100.0 but never beyond
        assert_eq!(ladder.compute(3 + 9_999).percent, 100.0);
    }

    #[test]
    fn test_rejects_malformed_tables() {
        assert!(LadderTable::new(vec![]).is_err());
        assert!(LadderTable::new(vec![spec("A", &[])]).is_err());
        assert!(LadderTable::new(vec![spec("A", &[("L1", 0)])]).is_err());
        assert!(LadderTable::new(vec![spec("A", &[("L1", -10)])]).is_err());
        assert!(LadderTable::new(vec![spec("A", &[("L1", 1)]), spec("A", &[("L2", 1)])]).is_err());
        assert!(LadderTable::new(vec![spec("A", &[("L1", 1), ("L1", 2)])]).is_err());
        assert!(LadderTable::new(vec![spec("A", &[("L1", i64::MAX), ("L2", 1)])]).is_err());
    }

    #[test]
    fn test_phase_order() {
        let specs = vec![spec("A", &[("L1", 10)]), spec("B", &[("M1", 20)])];
        let ladder = LadderTable::with_order(specs.clone(), &["B".into(), "A".into()]).unwrap();
        assert_eq!(ladder.phases()[0].name, "B");
        assert_eq!(ladder.compute(25).phase, "A");

        assert!(LadderTable::with_order(specs.clone(), &["B".into()]).is_err());
        assert!(LadderTable::with_order(specs.clone(), &["B".into(), "B".into()]).is_err());
        assert!(LadderTable::with_order(specs, &["A".into(), "C".into()]).is_err());
    }

    #[test]
    fn test_spans() {
        let ladder = two_phase();
        assert_eq!(ladder.phase_span("A"), Some(Span { start: 0, end: 300 }));
        assert_eq!(ladder.phase_span("B"), Some(Span { start: 300, end: 350 }));
        assert_eq!(ladder.level_span("A", "L2"), Some(Span { start: 100, end: 300 }));
        assert_eq!(ladder.phase_span("Z"), None);
        assert_eq!(ladder.total_cost(), 350);
        assert_eq!(LadderTable::level_field("A", "L2"), "A:L2");
    }

    #[test]
    fn test_from_local_sources() {
        let mut config = LadderConfig::default();
        assert!(matches!(
            LadderTable::from_local(&config),
            Err(LadderError::InvalidLadder(_))
        ));

        config.phases = vec![spec("A", &[("L1", 10)])];
        assert!(LadderTable::from_local(&config).is_ok());

        config.remote_hash = Some("xp:ladder".into());
        assert!(matches!(
            LadderTable::from_local(&config),
            Err(LadderError::Config(_))
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
phase_order = ["Core", "Intro"]

[[phases]]
name = "Intro"
levels = [{{ name = "Hello", cost = 10 }}]

[[phases]]
name = "Core"
levels = [{{ name = "Basics", cost = 40 }}, {{ name = "Depth", cost = 60 }}]
"#
        )
        .unwrap();
        let ladder = LadderTable::from_file(file.path(), &[]).unwrap();
        assert_eq!(ladder.phases()[0].name, "Core");
        assert_eq!(ladder.total_cost(), 110);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"phases": [{{"name": "A", "levels": [{{"name": "L1", "cost": 5}}]}}]}}"#
        )
        .unwrap();
        let ladder = LadderTable::from_file(file.path(), &[]).unwrap();
        assert_eq!(ladder.compute(4).percent, 80.0);
    }

    #[tokio::test]
    async fn test_from_remote_hash() {
        let kv = MemoryKv::new();
        kv.hset("xp:ladder", "A", r#"[["L1", 100], ["L2", 200]]"#);
        kv.hset("xp:ladder", "B", r#"[{"name": "M1", "cost": 50}]"#);

        let order = vec!["A".to_string(), "B".to_string()];
        let ladder = LadderTable::from_remote_hash(&kv, "xp:ladder", &order)
            .await
            .unwrap();
        assert_eq!(ladder, two_phase());

        assert!(LadderTable::from_remote_hash(&kv, "xp:ladder", &[]).await.is_err());

        kv.hset("xp:ladder", "C", "not json");
        let order = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        assert!(matches!(
            LadderTable::from_remote_hash(&kv, "xp:ladder", &order).await,
            Err(LadderError::InvalidLadder(_))
        ));
    }

    #[test]
    fn test_display() {
        let ladder = two_phase();
        assert_eq!(
            ladder.compute(250).to_string(),
            "A / L2 (level 2, 75.0%, 50 to next)"
        );
        assert!(ladder.compute(1_000).to_string().ends_with("[complete]"));
    }
}
