// src/recall/mod.rs
// Ensemble retriever: collect per-layer candidates keyed by message,
// score them under dynamic weights, and return a ranked merge.
//
// Each layer read is an independent snapshot; an empty or failed layer
// contributes zero rather than failing the call. Given identical inputs
// and rows the ordering is deterministic (score, then message id).

pub mod weights;

pub use weights::{LayerWeights, compute_weights};

use crate::db::{DatabasePool, affect, echo, river, salience};
use crate::error::{MemoryError, Result};
use crate::types::{AffectCategory, MemoryLayer, TemporalBias};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Recency half-life: one day in milliseconds
const RECENCY_HALF_LIFE_MS: f32 = 86_400_000.0;

/// Share of the echo score carried by dense similarity
const ECHO_DENSE_SHARE: f32 = 0.6;
/// Share of the echo score carried by lexical BM25
const ECHO_LEXICAL_SHARE: f32 = 0.4;

/// Score multiplier for user-pinned salience entries
const PIN_MULTIPLIER: f32 = 1.5;

/// A retrieval request
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub chat_id: String,
    pub query: String,
    pub top_k: usize,
    /// Layers to read; None reads all of them
    pub layers: Option<Vec<MemoryLayer>>,
    pub affect_boost: Option<Vec<AffectCategory>>,
    pub temporal_bias: TemporalBias,
}

impl MemoryQuery {
    pub fn new(chat_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            query: query.into(),
            top_k: 10,
            layers: None,
            affect_boost: None,
            temporal_bias: TemporalBias::Balanced,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_layers(mut self, layers: Vec<MemoryLayer>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn with_affect_boost(mut self, categories: Vec<AffectCategory>) -> Self {
        self.affect_boost = Some(categories);
        self
    }

    pub fn with_temporal_bias(mut self, bias: TemporalBias) -> Self {
        self.temporal_bias = bias;
        self
    }
}

/// Raw per-layer scores for one candidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerScores {
    pub l1: f32,
    pub l2: f32,
    pub l3: f32,
    pub l4: f32,
    pub l5: f32,
}

impl LayerScores {
    pub fn get(&self, layer: MemoryLayer) -> f32 {
        match layer {
            MemoryLayer::River => self.l1,
            MemoryLayer::Affect => self.l2,
            MemoryLayer::Echo => self.l3,
            MemoryLayer::Salience => self.l4,
            MemoryLayer::Companion => self.l5,
        }
    }
}

/// One ranked retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResult {
    pub message_id: String,
    pub content: Option<String>,
    pub final_score: f32,
    pub dominant_layer: MemoryLayer,
    pub layer_scores: LayerScores,
    pub affect_category: Option<AffectCategory>,
    pub affect_intensity: Option<f32>,
    pub salience_score: Option<f32>,
}

#[derive(Default)]
struct Candidate {
    scores: LayerScores,
    content: Option<String>,
    affect_category: Option<AffectCategory>,
    affect_intensity: Option<f32>,
    salience_score: Option<f32>,
}

/// Query-time merge over the enabled layers
pub struct EnsembleRetriever {
    pool: Arc<DatabasePool>,
}

impl EnsembleRetriever {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// Retrieve the top-k messages for a query. The optional embedding
    /// enables the dense half of the echo score.
    pub async fn retrieve(
        &self,
        query: &MemoryQuery,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<MemoryResult>> {
        let weights = compute_weights(
            &query.query,
            query.affect_boost.as_ref().map(|b| !b.is_empty()).unwrap_or(false),
            query.temporal_bias,
        );

        let enabled = |layer: MemoryLayer| {
            query
                .layers
                .as_ref()
                .map(|layers| layers.contains(&layer))
                .unwrap_or(true)
        };

        let chat_id = query.chat_id.clone();
        let query_text = query.query.clone();
        let fetch = query.top_k.saturating_mul(2).max(2);
        let embedding = query_embedding.map(|e| e.to_vec());
        let read_river = enabled(MemoryLayer::River);
        let read_affect = enabled(MemoryLayer::Affect);
        let read_echo = enabled(MemoryLayer::Echo);
        let read_salience = enabled(MemoryLayer::Salience);

        let mut candidates: HashMap<String, Candidate> = self
            .pool
            .interact(move |conn| {
                let mut candidates: HashMap<String, Candidate> = HashMap::new();
                let now = Utc::now();

                if read_river {
                    match river::recency_candidates_sync(conn, &chat_id, fetch) {
                        Ok(rows) => {
                            for (message_id, content, timestamp) in rows {
                                let age_ms =
                                    (now - timestamp).num_milliseconds().max(0) as f32;
                                let score = (-age_ms / RECENCY_HALF_LIFE_MS).exp();
                                let candidate = candidates.entry(message_id).or_default();
                                candidate.scores.l1 = candidate.scores.l1.max(score);
                                candidate.content.get_or_insert(content);
                            }
                        }
                        Err(e) => warn!("River candidates unavailable: {}", e),
                    }
                }

                if read_affect {
                    let affect_query = affect::AffectQuery {
                        limit: fetch,
                        ..Default::default()
                    };
                    match affect::get_entries_sync(conn, &chat_id, &affect_query) {
                        Ok(entries) => {
                            for entry in entries {
                                let score = entry.intensity * entry.decay_factor;
                                let candidate =
                                    candidates.entry(entry.message_id.clone()).or_default();
                                if score > candidate.scores.l2 {
                                    candidate.scores.l2 = score;
                                    candidate.affect_category = Some(entry.category);
                                    candidate.affect_intensity = Some(entry.intensity);
                                }
                            }
                        }
                        Err(e) => warn!("Affect candidates unavailable: {}", e),
                    }
                }

                if read_echo {
                    if let Some(ref embedding) = embedding {
                        match echo::vector::search_sync(conn, &chat_id, embedding, fetch, false) {
                            Ok(hits) => {
                                for hit in hits {
                                    let candidate =
                                        candidates.entry(hit.message_id).or_default();
                                    candidate.scores.l3 += hit.score * ECHO_DENSE_SHARE;
                                }
                            }
                            Err(e) => warn!("Vector candidates unavailable: {}", e),
                        }
                    }

                    match echo::lexical::search_sync(conn, &chat_id, &query_text, fetch, false) {
                        Ok(hits) => {
                            for hit in hits {
                                let candidate = candidates.entry(hit.message_id).or_default();
                                candidate.scores.l3 += hit.score * ECHO_LEXICAL_SHARE;
                                candidate.content.get_or_insert(hit.content);
                            }
                        }
                        Err(e) => warn!("Lexical candidates unavailable: {}", e),
                    }
                }

                if read_salience {
                    let salience_query = salience::SalienceQuery {
                        limit: fetch,
                        ..Default::default()
                    };
                    match salience::get_entries_sync(conn, &chat_id, &salience_query) {
                        Ok(entries) => {
                            for entry in entries {
                                let multiplier = if entry.user_pinned {
                                    PIN_MULTIPLIER
                                } else {
                                    1.0
                                };
                                let score = entry.salience_score * multiplier;
                                let candidate =
                                    candidates.entry(entry.message_id.clone()).or_default();
                                candidate.scores.l4 = candidate.scores.l4.max(score);
                                candidate.salience_score = Some(entry.salience_score);
                                candidate.content.get_or_insert(entry.content);
                            }
                        }
                        Err(e) => warn!("Salience candidates unavailable: {}", e),
                    }
                }

                // L5 reserved: concept extraction of the query itself is
                // out of scope for this version.

                Ok(candidates)
            })
            .await
            .map_err(MemoryError::Anyhow)?;

        let mut results: Vec<MemoryResult> = candidates
            .drain()
            .map(|(message_id, candidate)| {
                let mut final_score = 0.0f32;
                let mut dominant_layer = MemoryLayer::River;
                let mut dominant_contribution = f32::MIN;

                for layer in MemoryLayer::ALL {
                    let contribution = weights.get(layer) * candidate.scores.get(layer);
                    final_score += contribution;
                    if contribution > dominant_contribution {
                        dominant_contribution = contribution;
                        dominant_layer = layer;
                    }
                }

                MemoryResult {
                    message_id,
                    content: candidate.content,
                    final_score,
                    dominant_layer,
                    layer_scores: candidate.scores,
                    affect_category: candidate.affect_category,
                    affect_intensity: candidate.affect_intensity,
                    salience_score: candidate.salience_score,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        results.truncate(query.top_k);

        debug!(
            "Retrieved {} results for chat {} (weights: {:?})",
            results.len(),
            query.chat_id,
            weights
        );

        Ok(results)
    }
}
