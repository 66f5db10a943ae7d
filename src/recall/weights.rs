// src/recall/weights.rs
// Dynamic ensemble weights: defaults plus additive bumps driven by the
// query text, then renormalized so the weights always sum to 1.

use crate::types::{MemoryLayer, TemporalBias};
use regex::Regex;
use std::sync::LazyLock;

/// Per-layer ensemble weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerWeights {
    pub river: f32,
    pub affect: f32,
    pub echo: f32,
    pub salience: f32,
    pub companion: f32,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self {
            river: 0.25,
            affect: 0.15,
            echo: 0.30,
            salience: 0.20,
            companion: 0.10,
        }
    }
}

impl LayerWeights {
    pub fn get(&self, layer: MemoryLayer) -> f32 {
        match layer {
            MemoryLayer::River => self.river,
            MemoryLayer::Affect => self.affect,
            MemoryLayer::Echo => self.echo,
            MemoryLayer::Salience => self.salience,
            MemoryLayer::Companion => self.companion,
        }
    }

    pub fn sum(&self) -> f32 {
        self.river + self.affect + self.echo + self.salience + self.companion
    }

    /// Clamp negatives to zero and rescale so the weights sum to 1
    fn normalize(mut self) -> Self {
        self.river = self.river.max(0.0);
        self.affect = self.affect.max(0.0);
        self.echo = self.echo.max(0.0);
        self.salience = self.salience.max(0.0);
        self.companion = self.companion.max(0.0);

        let total = self.sum();
        if total > 0.0 {
            self.river /= total;
            self.affect /= total;
            self.echo /= total;
            self.salience /= total;
            self.companion /= total;
        } else {
            self = Self::default();
        }
        self
    }
}

#[allow(clippy::expect_used)]
static RECENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(recent|just|earlier|before|last|now)\b").expect("valid regex")
});

#[allow(clippy::expect_used)]
static CERTAINTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(definitely|certainly|sure|always|never|exactly)\b").expect("valid regex")
});

#[allow(clippy::expect_used)]
static PROBLEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(broke|failed|error|crash|bug|issue|problem|wrong)\b").expect("valid regex")
});

#[allow(clippy::expect_used)]
static HABITUAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(usually|typically|common|often|people|everyone)\b").expect("valid regex")
});

/// Compute ensemble weights for one query.
///
/// Recency language boosts the river, problem language the salience
/// store, certainty language the echo layer, habitual language the
/// companion graph; a non-empty affect boost raises the affect layer,
/// and the temporal bias shifts river vs salience. The result always
/// sums to 1.
pub fn compute_weights(
    query_text: &str,
    has_affect_boost: bool,
    temporal_bias: TemporalBias,
) -> LayerWeights {
    let mut weights = LayerWeights::default();
    let lowered = query_text.to_lowercase();

    if RECENCY_RE.is_match(&lowered) {
        weights.river += 0.25;
    }
    if has_affect_boost {
        weights.affect += 0.20;
    }
    if CERTAINTY_RE.is_match(&lowered) {
        weights.echo += 0.20;
    }
    if PROBLEM_RE.is_match(&lowered) {
        weights.salience += 0.25;
    }
    if HABITUAL_RE.is_match(&lowered) {
        weights.companion += 0.20;
    }

    match temporal_bias {
        TemporalBias::Recent => {
            weights.river += 0.15;
            weights.salience -= 0.10;
        }
        TemporalBias::Salient => {
            weights.salience += 0.15;
            weights.river -= 0.10;
        }
        TemporalBias::Balanced => {}
    }

    weights.normalize()
}
