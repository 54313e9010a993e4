//! Self-healer - repairs type corruption and absurd values in stored counters.
//!
//! Both passes are read-then-write and race with concurrent writers. Each is a
//! fixed point: re-running with no outside change writes nothing, so a lost
//! race is corrected on the next tick.

use ladder_common::{
    parse_int, HealerConfig, KeysConfig, KvStore, LadderError, OverflowCheck, Result,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoerceOutcome {
    /// Key does not exist
    Absent,
    AlreadyInteger,
    Rewritten { from: String, to: i64 },
    /// Nothing numeric could be extracted; value left untouched
    Unparseable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    Negative,
    AboveRatio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowOutcome {
    Within,
    Reset {
        from: i64,
        to: i64,
        reason: ViolationReason,
    },
    /// Either value is not an integer; left for the coerce pass
    Skipped,
}

/// Totals from one full healer pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealReport {
    pub rewritten: usize,
    pub unparseable: usize,
    pub reset: usize,
    pub errors: usize,
}

pub struct SelfHealer {
    store: Arc<dyn KvStore>,
    coerce_keys: Vec<String>,
    candidate_fields: Vec<String>,
    overflow_checks: Vec<OverflowCheck>,
}

impl SelfHealer {
    pub fn new(store: Arc<dyn KvStore>, config: &HealerConfig, keys: &KeysConfig) -> Self {
        Self {
            store,
            coerce_keys: config.coerce_targets(keys),
            candidate_fields: config.candidate_fields.clone(),
            overflow_checks: config.overflow_checks.clone(),
        }
    }

    /// Rewrite a non-integer value as the integer it encodes, if any.
    pub async fn coerce_type(&self, key: &str) -> Result<CoerceOutcome> {
        let raw = match self.store.get(key).await? {
            Some(raw) => raw,
            None => return Ok(CoerceOutcome::Absent),
        };
        if raw.parse::<i64>().is_ok() {
            return Ok(CoerceOutcome::AlreadyInteger);
        }

        match extract_integer(&raw, &self.candidate_fields) {
            Some(value) => {
                let canonical = value.to_string();
                if canonical != raw {
                    self.store.set(key, &canonical).await?;
                    info!("[HEAL] Coerced {} from {:?} to {}", key, raw, value);
                }
                Ok(CoerceOutcome::Rewritten {
                    from: raw,
                    to: value,
                })
            }
            None => {
                warn!("[HEAL] {}", LadderError::malformed(key, &raw));
                Ok(CoerceOutcome::Unparseable)
            }
        }
    }

    /// Reset `key` to its reference when negative or above `reference * max_ratio`.
    pub async fn check_overflow(
        &self,
        key: &str,
        reference_key: &str,
        max_ratio: f64,
    ) -> Result<OverflowOutcome> {
        let values = self.store.get_many(&[key, reference_key]).await?;
        let parse = |k: &str, v: &Option<String>| -> Result<i64> {
            match v {
                Some(raw) => parse_int(k, raw),
                None => Ok(0),
            }
        };
        let (value, reference) = match (parse(key, &values[0]), parse(reference_key, &values[1])) {
            (Ok(v), Ok(r)) => (v, r),
            (Err(e), _) | (_, Err(e)) => {
                debug!("[HEAL] Overflow check on {} skipped: {}", key, e);
                return Ok(OverflowOutcome::Skipped);
            }
        };

        let reference = reference.max(0);
        let reason = if value < 0 {
            Some(ViolationReason::Negative)
        } else if value as f64 > reference as f64 * max_ratio {
            Some(ViolationReason::AboveRatio)
        } else {
            None
        };

        match reason {
            None => Ok(OverflowOutcome::Within),
            Some(reason) => {
                self.store.set(key, &reference.to_string()).await?;
                warn!(
                    "[HEAL] Reset {} from {} to {} ({:?}, reference {} x{})",
                    key, value, reference, reason, reference_key, max_ratio
                );
                Ok(OverflowOutcome::Reset {
                    from: value,
                    to: reference,
                    reason,
                })
            }
        }
    }

    /// Every coerce key, then every overflow check. One key's failure never
    /// stops the others.
    pub async fn run_pass(&self) -> HealReport {
        let mut report = HealReport::default();

        for key in &self.coerce_keys {
            match self.coerce_type(key).await {
                Ok(CoerceOutcome::Rewritten { .. }) => report.rewritten += 1,
                Ok(CoerceOutcome::Unparseable) => report.unparseable += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    log_key_error("coerce", key, &e);
                }
            }
        }

        for check in &self.overflow_checks {
            match self
                .check_overflow(&check.key, &check.reference_key, check.max_ratio)
                .await
            {
                Ok(OverflowOutcome::Reset { .. }) => report.reset += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    log_key_error("overflow", &check.key, &e);
                }
            }
        }

        report
    }
}

fn log_key_error(pass: &str, key: &str, err: &LadderError) {
    if err.is_transient() {
        warn!("[HEAL] {} pass on {} deferred: {}", pass, key, err);
    } else {
        error!("[HEAL] {} pass on {} failed: {}", pass, key, err);
    }
}

/// Pull an integer out of a stored text value.
///
/// Accepts padded integers, JSON numbers (fractions truncated toward zero),
/// numeric JSON strings, and JSON objects carrying a number under one of
/// `fields` (first match wins).
pub fn extract_integer(raw: &str, fields: &[String]) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(v);
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    match &value {
        Value::Object(map) => fields
            .iter()
            .filter_map(|f| map.get(f))
            .find_map(number_of),
        other => number_of(other),
    }
}

fn number_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_to_i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
        }
        _ => None,
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    if !f.is_finite() {
        return None;
    }
    let t = f.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return None;
    }
    Some(t as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ladder_common::MemoryKv;

    fn fields() -> Vec<String> {
        vec!["total".into(), "value".into(), "amount".into()]
    }

    fn healer(kv: Arc<MemoryKv>, checks: Vec<OverflowCheck>) -> SelfHealer {
        let config = HealerConfig {
            overflow_checks: checks,
            ..HealerConfig::default()
        };
        SelfHealer::new(kv, &config, &KeysConfig::default())
    }

    #[test]
    fn test_extract_integer() {
        let f = fields();
        assert_eq!(extract_integer("42", &f), Some(42));
        assert_eq!(extract_integer(" 42\n", &f), Some(42));
        assert_eq!(extract_integer("12.9", &f), Some(12));
        assert_eq!(extract_integer("-12.9", &f), Some(-12));
        assert_eq!(extract_integer("\"17\"", &f), Some(17));
        assert_eq!(extract_integer(r#"{"total": 900}"#, &f), Some(900));
        assert_eq!(extract_integer(r#"{"value": "33"}"#, &f), Some(33));
        // order of candidate fields decides
        assert_eq!(extract_integer(r#"{"amount": 1, "total": 2}"#, &f), Some(2));
        // non-numeric candidate falls through to the next one
        assert_eq!(extract_integer(r#"{"total": "x", "amount": 5}"#, &f), Some(5));
        assert_eq!(extract_integer(r#"{"xp": 5}"#, &f), None);
        assert_eq!(extract_integer("[1,2]", &f), None);
        assert_eq!(extract_integer("null", &f), None);
        assert_eq!(extract_integer("hello", &f), None);
        assert_eq!(extract_integer("1e300", &f), None);
    }

    #[tokio::test]
    async fn test_coerce_rewrites_json_object() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("xp:total", r#"{"total": 1234, "updated": "yesterday"}"#)
            .await
            .unwrap();
        let h = healer(kv.clone(), vec![]);

        let outcome = h.coerce_type("xp:total").await.unwrap();
        assert!(matches!(outcome, CoerceOutcome::Rewritten { to: 1234, .. }));
        assert_eq!(kv.get("xp:total").await.unwrap().as_deref(), Some("1234"));

        assert_eq!(h.coerce_type("xp:total").await.unwrap(), CoerceOutcome::AlreadyInteger);
    }

    #[tokio::test]
    async fn test_coerce_leaves_garbage_and_absent_alone() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("xp:total", "corrupted!").await.unwrap();
        let h = healer(kv.clone(), vec![]);

        assert_eq!(h.coerce_type("xp:total").await.unwrap(), CoerceOutcome::Unparseable);
        assert_eq!(kv.get("xp:total").await.unwrap().as_deref(), Some("corrupted!"));
        assert_eq!(h.coerce_type("missing").await.unwrap(), CoerceOutcome::Absent);
        assert_eq!(kv.call_count("SET"), 1);
    }

    #[tokio::test]
    async fn test_overflow_resets_to_reference() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("xp:total", "10000").await.unwrap();
        kv.set("xp:ref", "1000").await.unwrap();
        let h = healer(kv.clone(), vec![]);

        let outcome = h.check_overflow("xp:total", "xp:ref", 2.0).await.unwrap();
        assert_eq!(
            outcome,
            OverflowOutcome::Reset { from: 10000, to: 1000, reason: ViolationReason::AboveRatio }
        );
        assert_eq!(
            h.check_overflow("xp:total", "xp:ref", 2.0).await.unwrap(),
            OverflowOutcome::Within
        );
    }

    #[tokio::test]
    async fn test_overflow_negative_and_boundary() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("xp:ref", "100").await.unwrap();
        let h = healer(kv.clone(), vec![]);

        kv.set("xp:total", "-5").await.unwrap();
        assert!(matches!(
            h.check_overflow("xp:total", "xp:ref", 2.0).await.unwrap(),
            OverflowOutcome::Reset { reason: ViolationReason::Negative, to: 100, .. }
        ));

        kv.set("xp:total", "200").await.unwrap();
        assert_eq!(
            h.check_overflow("xp:total", "xp:ref", 2.0).await.unwrap(),
            OverflowOutcome::Within
        );
    }

    #[tokio::test]
    async fn test_overflow_skips_malformed() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("xp:total", "{\"total\": 5}").await.unwrap();
        let h = healer(kv.clone(), vec![]);
        assert_eq!(
            h.check_overflow("xp:total", "xp:ref", 2.0).await.unwrap(),
            OverflowOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_run_pass_isolates_failures() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("xp:total", r#"{"value": 7}"#).await.unwrap();
        kv.set("xp:ledger:watermark", "junk").await.unwrap();
        kv.set("a", "999").await.unwrap();
        kv.set("b", "10").await.unwrap();
        let h = healer(
            kv.clone(),
            vec![OverflowCheck { key: "a".into(), reference_key: "b".into(), max_ratio: 1.0 }],
        );

        // first GET (xp:total) fails; the rest of the pass still runs
        kv.fail_after("GET", 0);
        let report = h.run_pass().await;
        assert_eq!(report, HealReport { rewritten: 0, unparseable: 1, reset: 1, errors: 1 });
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("10"));

        let report = h.run_pass().await;
        assert_eq!(report.rewritten, 1);
        assert_eq!(kv.get("xp:total").await.unwrap().as_deref(), Some("7"));
    }
}
