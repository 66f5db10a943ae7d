// src/types.rs
// Closed sum types and domain entry types for the five memory layers.
//
// Every enumerated tag the store persists is a closed enum with a string
// parser; rows coming back from SQLite are normalized into these domain
// types (0/1 -> bool, nullable TEXT -> Option) by the db modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Affective/cognitive state markers tracked by the affect layer
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AffectCategory {
    Frustrated,
    Confused,
    Curious,
    Satisfied,
    Urgent,
    Reflective,
}

impl AffectCategory {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Entity classification for the echo layer's relation graph
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Concept,
    Tool,
    Location,
    File,
    Technology,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Relation classification between two entities
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Uses,
    PartOf,
    RelatedTo,
    MentionedWith,
    DependsOn,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Node classification for the companion co-occurrence graph
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Concept,
    Topic,
    Entity,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// The five memory layers, addressable in queries and write options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    River,
    Affect,
    Echo,
    Salience,
    Companion,
}

impl MemoryLayer {
    pub const ALL: [MemoryLayer; 5] = [
        MemoryLayer::River,
        MemoryLayer::Affect,
        MemoryLayer::Echo,
        MemoryLayer::Salience,
        MemoryLayer::Companion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::River => "l1",
            MemoryLayer::Affect => "l2",
            MemoryLayer::Echo => "l3",
            MemoryLayer::Salience => "l4",
            MemoryLayer::Companion => "l5",
        }
    }

    /// Parse either the short tag ("l1") or the layer name ("river")
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "l1" | "river" => Some(MemoryLayer::River),
            "l2" | "affect" => Some(MemoryLayer::Affect),
            "l3" | "echo" => Some(MemoryLayer::Echo),
            "l4" | "salience" => Some(MemoryLayer::Salience),
            "l5" | "companion" => Some(MemoryLayer::Companion),
            _ => None,
        }
    }
}

/// Retrieval-time preference for what kind of memory should dominate
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TemporalBias {
    Recent,
    #[default]
    Balanced,
    Salient,
}

impl TemporalBias {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// What caused a consolidation run
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Overflow,
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// What the write pipeline does when the river exceeds its token budget
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum OverflowBehavior {
    Consolidate,
    Discard,
}

// ============================================================================
// Domain entry types (one per persisted table)
// ============================================================================

/// A message in the sliding recency buffer. Eviction is logical: the row
/// stays for lexical lookups, only `evicted_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiverEntry {
    pub id: String,
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
    pub token_count: u32,
    pub timestamp: DateTime<Utc>,
    pub evicted_at: Option<DateTime<Utc>>,
}

/// Aggregate view over the live (non-evicted) river rows of a chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiverStats {
    pub entry_count: u64,
    pub token_count: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// A categorical affect marker with intensity and multiplicative decay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectEntry {
    pub id: String,
    pub chat_id: String,
    pub message_id: String,
    pub category: AffectCategory,
    pub intensity: f32,
    pub reasoning: Option<String>,
    pub decay_factor: f32,
    pub is_muted: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A dense embedding of one message. The packed blob is internal to the
/// store; callers only ever see the decoded vector.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub chat_id: String,
    pub message_id: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
    pub boost_factor: f32,
    pub is_muted: bool,
    pub created_at: DateTime<Utc>,
}

/// One hit from brute-force vector search
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub message_id: String,
    pub score: f32,
    pub model: String,
}

/// One hit from BM25 lexical search. `score` is |bm25| * boost_factor.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub message_id: String,
    pub content: String,
    pub score: f32,
}

/// An entity observed in conversation. `chat_id = None` means global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    pub value: String,
    pub canonical_form: Option<String>,
    pub chat_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A directed relation between two entities, anchored to the message it
/// was observed in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: RelationType,
    pub context_message_id: Option<String>,
    pub confidence: f32,
    pub is_muted: bool,
    pub created_at: DateTime<Utc>,
}

/// An entity reached by graph traversal, with its hop distance from the seed
#[derive(Debug, Clone)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub distance: u32,
}

/// A high-signal or user-pinned message retained with priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalienceEntry {
    pub id: String,
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
    pub salience_score: f32,
    pub prediction_error: Option<f32>,
    pub user_pinned: bool,
    pub retention_priority: u8,
    pub is_muted: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A node in the concept co-occurrence graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionNode {
    pub id: String,
    pub node_type: NodeType,
    pub value: String,
    pub chat_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A weighted, temporally decaying edge between two companion nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub weight: f32,
    pub temporal_decay: f32,
    pub last_reinforced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A neighbor of a companion node, ranked by weight * temporal_decay
#[derive(Debug, Clone)]
pub struct NeighborHit {
    pub node: CompanionNode,
    pub strength: f32,
}

/// A content-hash deduplicated embedding in the read-through cache
#[derive(Debug, Clone)]
pub struct EmbeddingCacheEntry {
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Bookkeeping row for one consolidation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRun {
    pub id: String,
    pub chat_id: String,
    pub trigger_type: TriggerType,
    pub items_processed: u64,
    pub summaries_created: u64,
    pub conflicts_detected: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-layer counts for one chat, plus the live river token budget
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatStats {
    pub river_entries: u64,
    pub river_live_tokens: u64,
    pub affect_entries: u64,
    pub vector_entries: u64,
    pub lexical_entries: u64,
    pub salience_entries: u64,
    pub companion_nodes: u64,
    pub companion_edges: u64,
}
