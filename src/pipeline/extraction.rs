// src/pipeline/extraction.rs
// Entity/relation extraction: LLM-driven with a heuristic regex fallback.
//
// The LLM response must parse as {entities: [...], relations: [...]};
// invalid types and values are dropped, and relations survive only when
// both endpoints appear in the entity list (matched by value or canonical
// form). Parse failures degrade to the regex extractor, which produces
// MENTIONED_WITH edges between at most five entities.

use crate::error::{MemoryError, Result};
use crate::pipeline::concepts::TECH_TERMS;
use crate::providers::{LlmCallback, extract_json};
use crate::types::{EntityType, RelationType};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Max entities the heuristic extractor links pairwise
const HEURISTIC_RELATION_CAP: usize = 5;

#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub value: String,
    pub canonical_form: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

/// Extract entities and relations via the LLM callback. Parse failures
/// degrade to [`extract_heuristic`].
pub async fn extract(llm: &dyn LlmCallback, content: &str) -> Result<ExtractionResult> {
    let prompt = build_prompt(content);
    let response = llm
        .complete(&prompt)
        .await
        .map_err(|e| MemoryError::ExtractionFailed(e.to_string()))?;

    match parse_extraction(&response) {
        Ok(result) => Ok(result),
        Err(e) => {
            warn!("Extraction parse failed ({}), using heuristic extractor", e);
            Ok(extract_heuristic(content))
        }
    }
}

fn build_prompt(content: &str) -> String {
    format!(
        r#"Extract entities and relations from this message.

Message: "{content}"

Return JSON:
{{
  "entities": [{{"type": "PERSON|CONCEPT|TOOL|LOCATION|FILE|TECHNOLOGY|OTHER", "value": "...", "canonicalForm": "..." }}],
  "relations": [{{"source": "...", "target": "...", "type": "USES|PART_OF|RELATED_TO|MENTIONED_WITH|DEPENDS_ON", "confidence": 0.0}}]
}}

Rules:
- canonicalForm is optional; include it only when the surface form is an alias
- relation source/target must reference entity values from the list
- 2-8 entities; skip filler words"#
    )
}

fn parse_extraction(response: &str) -> anyhow::Result<ExtractionResult> {
    #[derive(Deserialize)]
    struct RawEntity {
        #[serde(rename = "type")]
        entity_type: String,
        value: String,
        #[serde(rename = "canonicalForm")]
        canonical_form: Option<String>,
    }

    #[derive(Deserialize)]
    struct RawRelation {
        source: String,
        target: String,
        #[serde(rename = "type")]
        relation_type: String,
        confidence: Option<f32>,
    }

    #[derive(Deserialize)]
    struct RawExtraction {
        entities: Vec<RawEntity>,
        #[serde(default)]
        relations: Vec<RawRelation>,
    }

    let json = extract_json(response)?;
    let raw: RawExtraction = serde_json::from_str(&json)?;

    // Drop entities with unknown types or empty values
    let entities: Vec<ExtractedEntity> = raw
        .entities
        .into_iter()
        .filter_map(|e| {
            let entity_type: EntityType = e.entity_type.parse().ok()?;
            let value = e.value.trim().to_string();
            if value.is_empty() {
                return None;
            }
            Some(ExtractedEntity {
                entity_type,
                value,
                canonical_form: e.canonical_form.filter(|c| !c.trim().is_empty()),
            })
        })
        .collect();

    // Keep relations only when both endpoints resolve to a listed entity
    let known: HashSet<&str> = entities
        .iter()
        .flat_map(|e| {
            std::iter::once(e.value.as_str()).chain(e.canonical_form.as_deref())
        })
        .collect();

    let relations: Vec<ExtractedRelation> = raw
        .relations
        .into_iter()
        .filter_map(|r| {
            let relation_type: RelationType = r.relation_type.parse().ok()?;
            if !known.contains(r.source.as_str()) || !known.contains(r.target.as_str()) {
                return None;
            }
            Some(ExtractedRelation {
                source: r.source,
                target: r.target,
                relation_type,
                confidence: r.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            })
        })
        .collect();

    debug!(
        "LLM extraction: {} entities, {} relations",
        entities.len(),
        relations.len()
    );

    Ok(ExtractionResult { entities, relations })
}

// ============================================================================
// Heuristic fallback
// ============================================================================

/// File paths: word chars, dots, slashes, hyphens ending in known extensions
#[allow(clippy::expect_used)]
static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w./\\\-]+\.(rs|ts|js|py|go|toml|json|yaml|yml|md|sql|sh|css|html|tsx|jsx)")
        .expect("valid regex")
});

/// CamelCase identifiers: 2+ humps, proper-noun concepts
#[allow(clippy::expect_used)]
static CAMEL_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z0-9]+)+)\b").expect("valid regex"));

/// Tool names commonly mentioned by name
#[allow(clippy::expect_used)]
static TOOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(git|cargo|npm|pnpm|yarn|pip|docker|kubectl|make|cmake|bazel|gradle|maven|curl|grep|sed|awk|vim|emacs|tmux)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static TECH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", TECH_TERMS.join("|"))).expect("valid regex")
});

/// Regex-dictionary extractor: technologies, file names, proper-noun
/// concepts, and tools. Generates MENTIONED_WITH edges between the first
/// five entities.
pub fn extract_heuristic(content: &str) -> ExtractionResult {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    let mut push = |entity_type: EntityType, value: String| {
        let key = (entity_type, value.to_lowercase());
        if seen.insert(key) {
            entities.push(ExtractedEntity {
                entity_type,
                value,
                canonical_form: None,
            });
        }
    };

    for m in FILE_PATH_RE.find_iter(content) {
        push(EntityType::File, m.as_str().to_string());
    }
    for m in TECH_RE.find_iter(content) {
        push(EntityType::Technology, m.as_str().to_lowercase());
    }
    for m in TOOL_RE.find_iter(content) {
        push(EntityType::Tool, m.as_str().to_lowercase());
    }
    for cap in CAMEL_CASE_RE.captures_iter(content) {
        if let Some(m) = cap.get(1) {
            push(EntityType::Concept, m.as_str().to_string());
        }
    }

    // Pairwise co-mention edges over a small prefix
    let linked = &entities[..entities.len().min(HEURISTIC_RELATION_CAP)];
    let mut relations = Vec::new();
    for i in 0..linked.len() {
        for j in (i + 1)..linked.len() {
            relations.push(ExtractedRelation {
                source: linked[i].value.clone(),
                target: linked[j].value.clone(),
                relation_type: RelationType::MentionedWith,
                confidence: 0.5,
            });
        }
    }

    debug!(
        "Heuristic extraction: {} entities, {} relations",
        entities.len(),
        relations.len()
    );

    ExtractionResult { entities, relations }
}
