// src/config.rs
// Engine configuration snapshot, backed by the memory_config key/value table

use crate::error::{MemoryError, Result};
use crate::types::OverflowBehavior;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Recognized configuration keys. Anything outside this set is rejected
/// when patching the persisted table.
pub mod keys {
    pub const MEMORY_ENABLED: &str = "memory_enabled";
    pub const L1_MAX_TOKENS: &str = "l1_max_tokens";
    pub const L1_OVERFLOW_CALLBACK: &str = "l1_overflow_callback";
    pub const L2_AFFECT_THRESHOLD: &str = "l2_affect_threshold";
    pub const L2_DECAY_RATE: &str = "l2_decay_rate";
    pub const L3_EMBEDDING_MODEL: &str = "l3_embedding_model";
    pub const L4_SALIENCE_THRESHOLD: &str = "l4_salience_threshold";
    pub const L5_TEMPORAL_DECAY_RATE: &str = "l5_temporal_decay_rate";
    pub const CONSOLIDATION_SCHEDULE: &str = "consolidation_schedule";

    pub const ALL: [&str; 9] = [
        MEMORY_ENABLED,
        L1_MAX_TOKENS,
        L1_OVERFLOW_CALLBACK,
        L2_AFFECT_THRESHOLD,
        L2_DECAY_RATE,
        L3_EMBEDDING_MODEL,
        L4_SALIENCE_THRESHOLD,
        L5_TEMPORAL_DECAY_RATE,
        CONSOLIDATION_SCHEDULE,
    ];
}

/// Memory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub memory_enabled: bool,
    /// Live token budget for the recency river
    pub l1_max_tokens: u32,
    pub l1_overflow_callback: OverflowBehavior,
    /// Minimum classifier intensity for an affect entry to be persisted
    pub l2_affect_threshold: f32,
    pub l2_decay_rate: f32,
    /// Embedding model tag; None disables the dense vector index
    pub l3_embedding_model: Option<String>,
    pub l4_salience_threshold: f32,
    pub l5_temporal_decay_rate: f32,
    /// Interval between scheduled consolidation cycles, in seconds
    pub consolidation_schedule_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            l1_max_tokens: 8000,
            l1_overflow_callback: OverflowBehavior::Consolidate,
            l2_affect_threshold: 0.3,
            l2_decay_rate: 0.95,
            l3_embedding_model: None,
            l4_salience_threshold: 0.7,
            l5_temporal_decay_rate: 0.98,
            consolidation_schedule_secs: 300,
        }
    }
}

impl MemoryConfig {
    /// Apply one persisted key/value pair onto this snapshot.
    ///
    /// Rejects unknown keys and unparseable values, so the same path
    /// validates patches before they are written.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            keys::MEMORY_ENABLED => self.memory_enabled = parse(key, value)?,
            keys::L1_MAX_TOKENS => self.l1_max_tokens = parse(key, value)?,
            keys::L1_OVERFLOW_CALLBACK => {
                self.l1_overflow_callback = OverflowBehavior::from_str(value).map_err(|_| {
                    MemoryError::InvalidInput(format!(
                        "{key}: expected 'consolidate' or 'discard', got {value:?}"
                    ))
                })?
            }
            keys::L2_AFFECT_THRESHOLD => self.l2_affect_threshold = parse_unit(key, value)?,
            keys::L2_DECAY_RATE => self.l2_decay_rate = parse_unit(key, value)?,
            keys::L3_EMBEDDING_MODEL => {
                self.l3_embedding_model = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            keys::L4_SALIENCE_THRESHOLD => self.l4_salience_threshold = parse_unit(key, value)?,
            keys::L5_TEMPORAL_DECAY_RATE => self.l5_temporal_decay_rate = parse_unit(key, value)?,
            keys::CONSOLIDATION_SCHEDULE => self.consolidation_schedule_secs = parse(key, value)?,
            _ => {
                return Err(MemoryError::InvalidInput(format!(
                    "unknown config key: {key}"
                )));
            }
        }
        Ok(())
    }

    /// Render the snapshot as persisted (key, value) pairs
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (keys::MEMORY_ENABLED, self.memory_enabled.to_string()),
            (keys::L1_MAX_TOKENS, self.l1_max_tokens.to_string()),
            (
                keys::L1_OVERFLOW_CALLBACK,
                <&str>::from(self.l1_overflow_callback).to_string(),
            ),
            (
                keys::L2_AFFECT_THRESHOLD,
                self.l2_affect_threshold.to_string(),
            ),
            (keys::L2_DECAY_RATE, self.l2_decay_rate.to_string()),
            (
                keys::L3_EMBEDDING_MODEL,
                self.l3_embedding_model.clone().unwrap_or_default(),
            ),
            (
                keys::L4_SALIENCE_THRESHOLD,
                self.l4_salience_threshold.to_string(),
            ),
            (
                keys::L5_TEMPORAL_DECAY_RATE,
                self.l5_temporal_decay_rate.to_string(),
            ),
            (
                keys::CONSOLIDATION_SCHEDULE,
                self.consolidation_schedule_secs.to_string(),
            ),
        ]
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MemoryError::InvalidInput(format!("{key}: cannot parse {value:?}")))
}

/// Parse a float that must land in [0, 1]
fn parse_unit(key: &str, value: &str) -> Result<f32> {
    let v: f32 = parse(key, value)?;
    if !(0.0..=1.0).contains(&v) {
        return Err(MemoryError::InvalidInput(format!(
            "{key}: {v} outside [0, 1]"
        )));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MemoryConfig::default();
        assert!(cfg.memory_enabled);
        assert_eq!(cfg.l1_max_tokens, 8000);
        assert_eq!(cfg.l1_overflow_callback, OverflowBehavior::Consolidate);
        assert!((cfg.l2_affect_threshold - 0.3).abs() < 1e-6);
        assert!((cfg.l2_decay_rate - 0.95).abs() < 1e-6);
        assert!((cfg.l4_salience_threshold - 0.7).abs() < 1e-6);
        assert!((cfg.l5_temporal_decay_rate - 0.98).abs() < 1e-6);
    }

    #[test]
    fn apply_parses_typed_values() {
        let mut cfg = MemoryConfig::default();
        cfg.apply(keys::L1_MAX_TOKENS, "40").unwrap();
        assert_eq!(cfg.l1_max_tokens, 40);

        cfg.apply(keys::MEMORY_ENABLED, "false").unwrap();
        assert!(!cfg.memory_enabled);

        cfg.apply(keys::L1_OVERFLOW_CALLBACK, "discard").unwrap();
        assert_eq!(cfg.l1_overflow_callback, OverflowBehavior::Discard);

        cfg.apply(keys::L3_EMBEDDING_MODEL, "text-embedding-3-small")
            .unwrap();
        assert_eq!(
            cfg.l3_embedding_model.as_deref(),
            Some("text-embedding-3-small")
        );
    }

    #[test]
    fn apply_rejects_unknown_keys_and_bad_values() {
        let mut cfg = MemoryConfig::default();
        assert!(cfg.apply("l9_phantom", "1").is_err());
        assert!(cfg.apply(keys::L1_MAX_TOKENS, "lots").is_err());
        assert!(cfg.apply(keys::L2_AFFECT_THRESHOLD, "1.5").is_err());
    }

    #[test]
    fn pairs_round_trip() {
        let mut cfg = MemoryConfig::default();
        cfg.l1_max_tokens = 123;
        cfg.l3_embedding_model = Some("m".to_string());

        let mut rebuilt = MemoryConfig::default();
        for (k, v) in cfg.to_pairs() {
            rebuilt.apply(k, &v).unwrap();
        }
        assert_eq!(rebuilt.l1_max_tokens, 123);
        assert_eq!(rebuilt.l3_embedding_model.as_deref(), Some("m"));
    }
}
