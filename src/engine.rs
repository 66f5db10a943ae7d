// src/engine.rs
// MemoryEngine: the constructed entry point that owns the pool, the
// configuration snapshot, and the injected providers.
//
// There is no global state: callers open a DatabasePool, build an engine
// value, and thread it. The configuration snapshot is bound at
// construction; patch_config writes the persisted table and returns the
// new effective snapshot for callers that want to rebuild.

use crate::config::MemoryConfig;
use crate::consolidation::{self, ConsolidationOutcome, spawn_consolidation_scheduler};
use crate::db::{DatabasePool, affect, companion, config as config_db, consolidation as runs, echo, river, salience};
use crate::error::{MemoryError, Result};
use crate::pipeline::{IncomingMessage, WriteOptions, WritePipeline, WriteResult};
use crate::providers::{EmbeddingProvider, LlmCallback};
use crate::recall::{EnsembleRetriever, MemoryQuery, MemoryResult};
use crate::types::{
    AffectEntry, ChatStats, CompanionEdge, CompanionNode, ConsolidationRun, Entity, EntityType,
    LexicalHit, NeighborHit, NodeType, RelatedEntity, Relation, RelationType, RiverEntry,
    RiverStats, SalienceEntry, TriggerType, VectorHit,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Injected capabilities; both optional
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub embeddings: Option<Arc<dyn EmbeddingProvider>>,
    pub llm: Option<Arc<dyn LlmCallback>>,
}

/// The per-process memory engine
pub struct MemoryEngine {
    pool: Arc<DatabasePool>,
    config: MemoryConfig,
    providers: ProviderSet,
    pipeline: WritePipeline,
    retriever: EnsembleRetriever,
}

impl MemoryEngine {
    /// Build an engine from an opened pool, a configuration snapshot, and
    /// the injected providers.
    pub fn new(pool: Arc<DatabasePool>, config: MemoryConfig, providers: ProviderSet) -> Self {
        let pipeline = WritePipeline::new(
            pool.clone(),
            config.clone(),
            providers.embeddings.clone(),
            providers.llm.clone(),
        );
        let retriever = EnsembleRetriever::new(pool.clone());
        Self {
            pool,
            config,
            providers,
            pipeline,
            retriever,
        }
    }

    /// Build an engine whose snapshot comes from the persisted
    /// memory_config table (defaults overlaid with stored rows).
    pub async fn with_persisted_config(
        pool: Arc<DatabasePool>,
        providers: ProviderSet,
    ) -> Result<Self> {
        let config = pool
            .interact(|conn| config_db::load_config_sync(conn).map_err(Into::into))
            .await
            .map_err(MemoryError::Anyhow)?;
        Ok(Self::new(pool, config, providers))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    // =====================================
    // Ingestion
    // =====================================

    /// Ingest one message through the write pipeline
    pub async fn process(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
        options: &WriteOptions,
    ) -> WriteResult {
        self.pipeline
            .process(chat_id, message_id, content, options)
            .await
    }

    /// Ingest a batch; one result per message
    pub async fn process_batch(
        &self,
        messages: &[IncomingMessage],
        options: &WriteOptions,
    ) -> Vec<WriteResult> {
        self.pipeline.process_batch(messages, options).await
    }

    // =====================================
    // Retrieval
    // =====================================

    /// Ensemble retrieval across the enabled layers
    pub async fn retrieve(
        &self,
        query: &MemoryQuery,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<MemoryResult>> {
        self.retriever.retrieve(query, query_embedding).await
    }

    // =====================================
    // Consolidation
    // =====================================

    /// Run one consolidation cycle now. Overflow-triggered runs evict the
    /// river down to the configured budget; scheduled and manual runs
    /// only decay and prune.
    pub async fn consolidate(
        &self,
        chat_id: &str,
        trigger: TriggerType,
    ) -> Result<ConsolidationOutcome> {
        let limit = match trigger {
            TriggerType::Overflow => Some(self.config.l1_max_tokens),
            TriggerType::Scheduled | TriggerType::Manual => None,
        };
        consolidation::run_consolidation(
            &self.pool,
            &self.config,
            self.providers.llm.as_deref(),
            chat_id,
            trigger,
            limit,
        )
        .await
    }

    /// Consolidate a caller-supplied set of chats
    pub async fn consolidate_all(
        &self,
        chat_ids: &[String],
        trigger: TriggerType,
    ) -> Vec<ConsolidationRun> {
        consolidation::consolidate_all(
            &self.pool,
            &self.config,
            self.providers.llm.as_deref(),
            chat_ids,
            trigger,
        )
        .await
    }

    /// Start the scheduled consolidation loop. Returns the shutdown
    /// handle (send true to stop) and the task handle.
    pub fn start_scheduler(&self) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_consolidation_scheduler(
            self.pool.clone(),
            self.config.clone(),
            self.providers.llm.clone(),
            rx,
        );
        (tx, handle)
    }

    /// Recent consolidation runs for a chat, newest first
    pub async fn recent_runs(&self, chat_id: &str, limit: usize) -> Result<Vec<ConsolidationRun>> {
        let chat = chat_id.to_string();
        self.interact(move |conn| runs::recent_runs_sync(conn, &chat, limit).map_err(Into::into))
            .await
    }

    // =====================================
    // L1 river
    // =====================================

    /// Non-evicted river entries, newest first
    pub async fn recent_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<RiverEntry>> {
        let chat = chat_id.to_string();
        self.interact(move |conn| river::get_recent_sync(conn, &chat, limit).map_err(Into::into))
            .await
    }

    /// Live token budget of a chat
    pub async fn river_token_count(&self, chat_id: &str) -> Result<u64> {
        let chat = chat_id.to_string();
        self.interact(move |conn| river::token_count_sync(conn, &chat).map_err(Into::into))
            .await
    }

    pub async fn river_stats(&self, chat_id: &str) -> Result<RiverStats> {
        let chat = chat_id.to_string();
        self.interact(move |conn| river::stats_sync(conn, &chat).map_err(Into::into))
            .await
    }

    /// Chats that still have live river rows
    pub async fn active_chats(&self) -> Result<Vec<String>> {
        self.interact(|conn| river::active_chats_sync(conn).map_err(Into::into))
            .await
    }

    // =====================================
    // L2 affect
    // =====================================

    pub async fn affect_entries(
        &self,
        chat_id: &str,
        query: affect::AffectQuery,
    ) -> Result<Vec<AffectEntry>> {
        let chat = chat_id.to_string();
        self.interact(move |conn| affect::get_entries_sync(conn, &chat, &query).map_err(Into::into))
            .await
    }

    pub async fn decay_affect(&self, chat_id: &str, rate: f32) -> Result<usize> {
        let chat = chat_id.to_string();
        self.interact(move |conn| affect::decay_sync(conn, &chat, rate).map_err(Into::into))
            .await
    }

    // =====================================
    // L3 echo
    // =====================================

    /// Brute-force cosine search over the chat's stored vectors
    pub async fn search_vector(
        &self,
        chat_id: &str,
        query: Vec<f32>,
        top_k: usize,
        include_muted: bool,
    ) -> Result<Vec<VectorHit>> {
        let chat = chat_id.to_string();
        self.interact(move |conn| {
            echo::vector::search_sync(conn, &chat, &query, top_k, include_muted)
                .map_err(Into::into)
        })
        .await
    }

    /// BM25 lexical search scoped to a chat
    pub async fn search_lexical(
        &self,
        chat_id: &str,
        query: &str,
        top_k: usize,
        include_muted: bool,
    ) -> Result<Vec<LexicalHit>> {
        let (chat, text) = (chat_id.to_string(), query.to_string());
        self.interact(move |conn| {
            echo::lexical::search_sync(conn, &chat, &text, top_k, include_muted)
                .map_err(Into::into)
        })
        .await
    }

    /// Upsert an entity; None chat_id makes it global
    pub async fn add_entity(
        &self,
        entity_type: EntityType,
        value: &str,
        chat_id: Option<&str>,
        canonical_form: Option<&str>,
    ) -> Result<Entity> {
        let value = value.to_string();
        let chat = chat_id.map(|s| s.to_string());
        let canonical = canonical_form.map(|s| s.to_string());
        self.interact(move |conn| {
            echo::graph::upsert_entity_sync(
                conn,
                entity_type,
                &value,
                chat.as_deref(),
                canonical.as_deref(),
            )
            .map_err(Into::into)
        })
        .await
    }

    /// Append a relation between two existing entities
    pub async fn add_relation(
        &self,
        source_entity_id: &str,
        target_entity_id: &str,
        relation_type: RelationType,
        context_message_id: Option<&str>,
        confidence: f32,
    ) -> Result<Relation> {
        let source = source_entity_id.to_string();
        let target = target_entity_id.to_string();
        let context = context_message_id.map(|s| s.to_string());
        self.interact(move |conn| {
            for endpoint in [&source, &target] {
                if echo::graph::get_entity_sync(conn, endpoint)?.is_none() {
                    return Err(MemoryError::NotFound(format!("entity {endpoint}")).into());
                }
            }
            echo::graph::add_relation_sync(
                conn,
                &source,
                &target,
                relation_type,
                context.as_deref(),
                confidence,
            )
            .map_err(Into::into)
        })
        .await
    }

    /// Bounded breadth-first traversal from all entities with this value
    pub async fn related_entities(
        &self,
        value: &str,
        chat_id: Option<&str>,
        hops: u32,
    ) -> Result<Vec<RelatedEntity>> {
        let value = value.to_string();
        let chat = chat_id.map(|s| s.to_string());
        self.interact(move |conn| {
            echo::graph::get_related_sync(conn, &value, chat.as_deref(), hops).map_err(Into::into)
        })
        .await
    }

    // =====================================
    // L4 salience
    // =====================================

    /// Pin a message: forced score 1.0, retention priority 100
    pub async fn pin(&self, chat_id: &str, message_id: &str, content: &str) -> Result<SalienceEntry> {
        let (chat, message, text) = (
            chat_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        );
        self.interact(move |conn| {
            salience::pin_sync(conn, &chat, &message, &text).map_err(Into::into)
        })
        .await
    }

    pub async fn salience_entries(
        &self,
        chat_id: &str,
        query: salience::SalienceQuery,
    ) -> Result<Vec<SalienceEntry>> {
        let chat = chat_id.to_string();
        self.interact(move |conn| {
            salience::get_entries_sync(conn, &chat, &query).map_err(Into::into)
        })
        .await
    }

    // =====================================
    // L5 companion
    // =====================================

    pub async fn add_node(
        &self,
        node_type: NodeType,
        value: &str,
        chat_id: Option<&str>,
    ) -> Result<CompanionNode> {
        let value = value.to_string();
        let chat = chat_id.map(|s| s.to_string());
        self.interact(move |conn| {
            companion::upsert_node_sync(conn, node_type, &value, chat.as_deref())
                .map_err(Into::into)
        })
        .await
    }

    pub async fn reinforce(
        &self,
        source_node_id: &str,
        target_node_id: &str,
        strength: f32,
    ) -> Result<CompanionEdge> {
        let (source, target) = (source_node_id.to_string(), target_node_id.to_string());
        self.interact(move |conn| {
            companion::reinforce_edge_sync(conn, &source, &target, strength).map_err(Into::into)
        })
        .await
    }

    pub async fn neighbors(&self, node_id: &str, top_k: usize) -> Result<Vec<NeighborHit>> {
        let node = node_id.to_string();
        self.interact(move |conn| companion::neighbors_sync(conn, &node, top_k).map_err(Into::into))
            .await
    }

    pub async fn decay_edges(&self, rate: f32) -> Result<usize> {
        self.interact(move |conn| companion::decay_edges_sync(conn, rate).map_err(Into::into))
            .await
    }

    pub async fn prune_weak_edges(&self, threshold: f32) -> Result<usize> {
        self.interact(move |conn| {
            companion::prune_weak_edges_sync(conn, threshold).map_err(Into::into)
        })
        .await
    }

    // =====================================
    // Configuration
    // =====================================

    /// All persisted configuration rows
    pub async fn config_values(&self) -> Result<BTreeMap<String, String>> {
        self.interact(|conn| config_db::all_values_sync(conn).map_err(Into::into))
            .await
    }

    /// Patch one persisted key (validated) and return the new effective
    /// snapshot. The running engine keeps its constructor-bound snapshot.
    pub async fn patch_config(&self, key: &str, value: &str) -> Result<MemoryConfig> {
        let (key, value) = (key.to_string(), value.to_string());
        self.interact(move |conn| {
            config_db::patch_value_sync(conn, &key, &value).map_err(anyhow::Error::from)?;
            config_db::load_config_sync(conn).map_err(Into::into)
        })
        .await
    }

    // =====================================
    // Observability
    // =====================================

    /// Per-layer counts for one chat
    pub async fn stats(&self, chat_id: &str) -> Result<ChatStats> {
        let chat = chat_id.to_string();
        self.interact(move |conn| {
            let river_stats = river::stats_sync(conn, &chat)?;
            let (companion_nodes, companion_edges) = companion::counts_sync(conn, &chat)?;
            let total_river: i64 = conn.query_row(
                "SELECT COUNT(*) FROM l1_river WHERE chat_id = ?1",
                [&chat],
                |row| row.get(0),
            )?;
            Ok(ChatStats {
                river_entries: total_river as u64,
                river_live_tokens: river_stats.token_count,
                affect_entries: affect::count_sync(conn, &chat)?,
                vector_entries: echo::vector::count_sync(conn, &chat)?,
                lexical_entries: echo::lexical::count_sync(conn, &chat)?,
                salience_entries: salience::count_sync(conn, &chat)?,
                companion_nodes,
                companion_edges,
            })
        })
        .await
    }

    async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Connection) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.pool.interact(f).await.map_err(|e| {
            // Surface a structured error when the closure produced one
            match e.downcast::<MemoryError>() {
                Ok(memory_err) => memory_err,
                Err(other) => MemoryError::Anyhow(other),
            }
        })
    }
}
