// src/pipeline/mod.rs
// The write pipeline: fan-out ingestion across the five layers.
//
// Ordering contract: the river insert happens before any other layer. A
// failure in one layer never aborts the others; each layer's outcome is
// recorded independently in the WriteResult. Overflow consolidation is
// spawn-and-forget: the caller's result returns immediately with
// consolidation_triggered set.

pub mod affect;
pub mod concepts;
pub mod extraction;
pub mod salience_score;

use crate::config::MemoryConfig;
use crate::consolidation;
use crate::db::{DatabasePool, companion, echo, embedding_cache, river, salience};
use crate::providers::{EmbeddingProvider, LlmCallback};
use crate::similarity::{content_hash, estimate_tokens};
use crate::types::{MemoryLayer, NodeType, OverflowBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for one ingestion call
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Layers to write; None writes all of them
    pub layers: Option<Vec<MemoryLayer>>,
}

/// One message to ingest
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
}

/// Outcome of one layer's write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerWriteStatus {
    pub success: bool,
    pub skipped: bool,
    pub id: Option<String>,
    /// Whether the embedding came from the cache (vector layer only)
    pub cached: bool,
    pub error: Option<String>,
}

impl LayerWriteStatus {
    fn ok(id: Option<String>) -> Self {
        Self {
            success: true,
            ..Default::default()
        }
        .with_id(id)
    }

    fn ok_cached(id: Option<String>, cached: bool) -> Self {
        let mut status = Self::ok(id);
        status.cached = cached;
        status
    }

    fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            error: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// Per-layer outcomes of one ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub chat_id: String,
    pub message_id: String,
    pub river: LayerWriteStatus,
    pub affect: LayerWriteStatus,
    pub vector: LayerWriteStatus,
    pub lexical: LayerWriteStatus,
    pub graph: LayerWriteStatus,
    pub salience: LayerWriteStatus,
    pub companion: LayerWriteStatus,
    pub consolidation_triggered: bool,
}

impl WriteResult {
    fn all_skipped(chat_id: &str, message_id: &str, reason: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            river: LayerWriteStatus::skipped(reason),
            affect: LayerWriteStatus::skipped(reason),
            vector: LayerWriteStatus::skipped(reason),
            lexical: LayerWriteStatus::skipped(reason),
            graph: LayerWriteStatus::skipped(reason),
            salience: LayerWriteStatus::skipped(reason),
            companion: LayerWriteStatus::skipped(reason),
            consolidation_triggered: false,
        }
    }
}

/// Fan-out ingestion across the five layers
pub struct WritePipeline {
    pool: Arc<DatabasePool>,
    config: MemoryConfig,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmCallback>>,
}

impl WritePipeline {
    pub fn new(
        pool: Arc<DatabasePool>,
        config: MemoryConfig,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmCallback>>,
    ) -> Self {
        Self {
            pool,
            config,
            embeddings,
            llm,
        }
    }

    /// Ingest one message. Never fails as a whole: inspect the per-layer
    /// statuses on the returned WriteResult.
    pub async fn process(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
        options: &WriteOptions,
    ) -> WriteResult {
        if !self.config.memory_enabled {
            return WriteResult::all_skipped(chat_id, message_id, "memory disabled");
        }

        let selected = |layer: MemoryLayer| {
            options
                .layers
                .as_ref()
                .map(|layers| layers.contains(&layer))
                .unwrap_or(true)
        };

        let mut result = WriteResult::all_skipped(chat_id, message_id, "layer not selected");

        // L1 first: every other layer's reads assume the river row exists
        if selected(MemoryLayer::River) {
            result.river = self.write_river(chat_id, message_id, content).await;
            result.consolidation_triggered = self.check_overflow(chat_id).await;
        }

        // L2: requires the LLM callback
        let mut affect_intensity = None;
        if selected(MemoryLayer::Affect) {
            let (status, intensity) = self.write_affect(chat_id, message_id, content).await;
            result.affect = status;
            affect_intensity = intensity;
        }

        if selected(MemoryLayer::Echo) {
            // L3 dense: requires the embedding provider
            result.vector = self.write_vector(chat_id, message_id, content).await;

            // L3 lexical: unconditional, best-effort
            result.lexical = self.write_lexical(chat_id, message_id, content).await;

            // L3 graph: requires the LLM callback
            result.graph = self.write_graph(chat_id, message_id, content).await;
        }

        // L4: local heuristic score
        if selected(MemoryLayer::Salience) {
            result.salience = self
                .write_salience(chat_id, message_id, content, affect_intensity)
                .await;
        }

        // L5: concept co-occurrence
        if selected(MemoryLayer::Companion) {
            result.companion = self.write_companion(chat_id, content).await;
        }

        result
    }

    /// Ingest a batch. One message's failure is captured in its result;
    /// processing continues.
    pub async fn process_batch(
        &self,
        messages: &[IncomingMessage],
        options: &WriteOptions,
    ) -> Vec<WriteResult> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(
                self.process(
                    &message.chat_id,
                    &message.message_id,
                    &message.content,
                    options,
                )
                .await,
            );
        }
        results
    }

    async fn write_river(&self, chat_id: &str, message_id: &str, content: &str) -> LayerWriteStatus {
        let token_count = estimate_tokens(content);
        let (chat, message, text) = (
            chat_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        );

        match self
            .pool
            .interact_with_retry(move |conn| {
                river::add_entry_sync(conn, &chat, &message, &text, token_count)
                    .map_err(Into::into)
            })
            .await
        {
            Ok(entry) => LayerWriteStatus::ok(Some(entry.id)),
            Err(e) => {
                warn!("River write failed for {}: {}", message_id, e);
                LayerWriteStatus::failed(e)
            }
        }
    }

    /// After the river insert, spawn consolidation (or plain eviction) if
    /// the live token budget is exceeded. Spawn-and-forget.
    async fn check_overflow(&self, chat_id: &str) -> bool {
        let chat = chat_id.to_string();
        let live = self
            .pool
            .try_interact("river token count", move |conn| {
                river::token_count_sync(conn, &chat).map_err(Into::into)
            })
            .await
            .unwrap_or(0);

        if live <= self.config.l1_max_tokens as u64 {
            return false;
        }

        debug!(
            "River overflow for chat {} ({} > {})",
            chat_id, live, self.config.l1_max_tokens
        );

        match self.config.l1_overflow_callback {
            OverflowBehavior::Consolidate => {
                consolidation::spawn_overflow_consolidation(
                    self.pool.clone(),
                    self.config.clone(),
                    self.llm.clone(),
                    chat_id.to_string(),
                );
            }
            OverflowBehavior::Discard => {
                let pool = self.pool.clone();
                let chat = chat_id.to_string();
                let max_tokens = self.config.l1_max_tokens;
                tokio::spawn(async move {
                    pool.try_interact("river overflow discard", move |conn| {
                        river::evict_to_budget_sync(conn, &chat, max_tokens).map_err(Into::into)
                    })
                    .await;
                });
            }
        }
        true
    }

    async fn write_affect(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> (LayerWriteStatus, Option<f32>) {
        let Some(llm) = &self.llm else {
            return (LayerWriteStatus::skipped("no llm callback"), None);
        };

        let classification = match affect::classify(llm.as_ref(), content).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Affect classification failed for {}: {}", message_id, e);
                return (LayerWriteStatus::failed(e), None);
            }
        };

        let intensity = classification.intensity;
        if intensity < self.config.l2_affect_threshold {
            return (
                LayerWriteStatus::skipped("below affect threshold"),
                Some(intensity),
            );
        }

        let (chat, message) = (chat_id.to_string(), message_id.to_string());
        let status = match self
            .pool
            .interact(move |conn| {
                crate::db::affect::add_entry_sync(
                    conn,
                    &chat,
                    &message,
                    classification.category,
                    classification.intensity,
                    classification.reasoning.as_deref(),
                )
                .map_err(Into::into)
            })
            .await
        {
            Ok(entry) => LayerWriteStatus::ok(Some(entry.id)),
            Err(e) => LayerWriteStatus::failed(e),
        };
        (status, Some(intensity))
    }

    async fn write_vector(&self, chat_id: &str, message_id: &str, content: &str) -> LayerWriteStatus {
        let Some(provider) = &self.embeddings else {
            return LayerWriteStatus::skipped("no embedding provider");
        };

        let model = provider.model().to_string();
        let hash = content_hash(content);

        // Read-through cache keyed on (content hash, model)
        let (cache_hash, cache_model) = (hash.clone(), model.clone());
        let cached_entry = self
            .pool
            .try_interact("embedding cache lookup", move |conn| {
                embedding_cache::get_sync(conn, &cache_hash, &cache_model).map_err(Into::into)
            })
            .await
            .flatten();

        let (embedding, cached) = match cached_entry {
            Some(entry) => (entry.embedding, true),
            None => {
                let embedded = match provider.embed(content).await {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Embedding failed for {}: {}", message_id, e);
                        return LayerWriteStatus::failed(e);
                    }
                };
                if embedded.embedding.is_empty() {
                    return LayerWriteStatus::failed("provider returned empty embedding");
                }

                let (put_hash, put_model, put_vec) =
                    (hash.clone(), model.clone(), embedded.embedding.clone());
                self.pool
                    .try_interact("embedding cache store", move |conn| {
                        embedding_cache::put_sync(conn, &put_hash, &put_vec, &put_model)
                            .map_err(Into::into)
                    })
                    .await;

                (embedded.embedding, embedded.cached)
            }
        };

        let (chat, message, text) = (
            chat_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        );
        match self
            .pool
            .interact(move |conn| {
                echo::vector::add_entry_sync(conn, &chat, &message, &text, &embedding, &model)
                    .map_err(Into::into)
            })
            .await
        {
            Ok(entry) => LayerWriteStatus::ok_cached(Some(entry.id), cached),
            Err(e) => LayerWriteStatus::failed(e),
        }
    }

    async fn write_lexical(&self, chat_id: &str, message_id: &str, content: &str) -> LayerWriteStatus {
        let (chat, message, text) = (
            chat_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        );
        match self
            .pool
            .interact(move |conn| {
                echo::lexical::add_entry_sync(conn, &chat, &message, &text).map_err(Into::into)
            })
            .await
        {
            Ok(()) => LayerWriteStatus::ok(None),
            Err(e) => {
                // Best-effort: log, don't fail the pipeline
                warn!("Lexical index write failed for {}: {}", message_id, e);
                LayerWriteStatus::failed(e)
            }
        }
    }

    async fn write_graph(&self, chat_id: &str, message_id: &str, content: &str) -> LayerWriteStatus {
        let Some(llm) = &self.llm else {
            return LayerWriteStatus::skipped("no llm callback");
        };

        let extraction = match extraction::extract(llm.as_ref(), content).await {
            Ok(e) => e,
            Err(e) => {
                warn!("Entity extraction failed for {}: {}", message_id, e);
                return LayerWriteStatus::failed(e);
            }
        };

        if extraction.entities.is_empty() {
            return LayerWriteStatus::skipped("no entities extracted");
        }

        let (chat, message) = (chat_id.to_string(), message_id.to_string());
        match self
            .pool
            .interact(move |conn| {
                // Run-local name -> id map so relations resolve without
                // re-querying; canonical forms alias into the same id.
                let mut ids: HashMap<String, String> = HashMap::new();
                for entity in &extraction.entities {
                    let resolved = echo::graph::upsert_entity_sync(
                        conn,
                        entity.entity_type,
                        &entity.value,
                        Some(&chat),
                        entity.canonical_form.as_deref(),
                    )?;
                    ids.insert(entity.value.clone(), resolved.id.clone());
                    if let Some(canonical) = &entity.canonical_form {
                        ids.entry(canonical.clone()).or_insert(resolved.id);
                    }
                }

                let mut relations_added = 0usize;
                for relation in &extraction.relations {
                    if let (Some(source), Some(target)) =
                        (ids.get(&relation.source), ids.get(&relation.target))
                    {
                        echo::graph::add_relation_sync(
                            conn,
                            source,
                            target,
                            relation.relation_type,
                            Some(&message),
                            relation.confidence,
                        )?;
                        relations_added += 1;
                    }
                }

                debug!(
                    "Graph write: {} entities, {} relations",
                    extraction.entities.len(),
                    relations_added
                );
                Ok(())
            })
            .await
        {
            Ok(()) => LayerWriteStatus::ok(None),
            Err(e) => LayerWriteStatus::failed(e),
        }
    }

    async fn write_salience(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
        affect_intensity: Option<f32>,
    ) -> LayerWriteStatus {
        let score = salience_score::score_salience(content, affect_intensity);
        if score < self.config.l4_salience_threshold {
            return LayerWriteStatus::skipped("below salience threshold");
        }

        let (chat, message, text) = (
            chat_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        );
        match self
            .pool
            .interact(move |conn| {
                salience::add_entry_sync(conn, &chat, &message, &text, score, None)
                    .map_err(Into::into)
            })
            .await
        {
            Ok(entry) => LayerWriteStatus::ok(Some(entry.id)),
            Err(e) => LayerWriteStatus::failed(e),
        }
    }

    async fn write_companion(&self, chat_id: &str, content: &str) -> LayerWriteStatus {
        let concepts = concepts::extract_concepts(content);
        if concepts.is_empty() {
            return LayerWriteStatus::skipped("no concepts extracted");
        }

        let chat = chat_id.to_string();
        match self
            .pool
            .interact(move |conn| {
                let mut node_ids = Vec::with_capacity(concepts.len());
                for concept in &concepts {
                    let node = companion::upsert_node_sync(
                        conn,
                        NodeType::Concept,
                        concept,
                        Some(&chat),
                    )?;
                    node_ids.push(node.id);
                }

                // Reinforce an edge between every concept pair in the message
                for i in 0..node_ids.len() {
                    for j in (i + 1)..node_ids.len() {
                        companion::reinforce_edge_sync(conn, &node_ids[i], &node_ids[j], 1.0)?;
                    }
                }
                Ok(node_ids.into_iter().next())
            })
            .await
        {
            Ok(first_node) => LayerWriteStatus::ok(first_node),
            Err(e) => LayerWriteStatus::failed(e),
        }
    }
}
