// src/pipeline/affect.rs
// Affect classification: LLM-driven with a deterministic keyword fallback.
//
// The LLM path can fail two ways: the call itself (surfaced to the caller,
// the pipeline records the layer as failed) and the response parse (falls
// back to the keyword classifier, which never fails).

use crate::error::{MemoryError, Result};
use crate::providers::{LlmCallback, extract_json};
use crate::types::AffectCategory;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Classification outcome, from either path
#[derive(Debug, Clone)]
pub struct AffectClassification {
    pub category: AffectCategory,
    pub intensity: f32,
    pub reasoning: Option<String>,
}

/// Classify a message via the LLM callback, parsing the JSON response.
/// Parse failures degrade to [`classify_keywords`].
pub async fn classify(llm: &dyn LlmCallback, content: &str) -> Result<AffectClassification> {
    let prompt = build_prompt(content);
    let response = llm
        .complete(&prompt)
        .await
        .map_err(|e| MemoryError::ClassificationFailed(e.to_string()))?;

    match parse_classification(&response) {
        Ok(classification) => Ok(classification),
        Err(e) => {
            warn!("Affect parse failed ({}), using keyword classifier", e);
            Ok(classify_keywords(content))
        }
    }
}

fn build_prompt(content: &str) -> String {
    format!(
        r#"Classify the emotional/cognitive state expressed in this message.

Message: "{content}"

Return JSON with exactly these fields:
- category: one of FRUSTRATED, CONFUSED, CURIOUS, SATISFIED, URGENT, REFLECTIVE
- intensity: 0.0-1.0 (how strongly the state is expressed)
- reasoning: one short sentence explaining the classification

Examples:
- "why does this keep crashing??" -> {{"category": "FRUSTRATED", "intensity": 0.8, "reasoning": "repeated failure with emphatic punctuation"}}
- "interesting, how does the cache work?" -> {{"category": "CURIOUS", "intensity": 0.6, "reasoning": "open question about internals"}}

Be precise and consistent."#
    )
}

fn parse_classification(response: &str) -> anyhow::Result<AffectClassification> {
    #[derive(Deserialize)]
    struct LlmResponse {
        category: String,
        intensity: f32,
        reasoning: Option<String>,
    }

    let json = extract_json(response)?;
    let parsed: LlmResponse = serde_json::from_str(&json)?;

    let category: AffectCategory = parsed
        .category
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown category {:?}", parsed.category))?;

    Ok(AffectClassification {
        category,
        intensity: parsed.intensity.clamp(0.0, 1.0),
        reasoning: parsed.reasoning,
    })
}

// ============================================================================
// Keyword fallback
// ============================================================================

#[allow(clippy::expect_used)]
static FRUSTRATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(frustrat\w*|annoy\w*|angry|ugh|argh|damn|hate|sick of|fed up|keeps? (?:crashing|breaking|failing))\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static CONFUSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(confus\w*|unclear|lost|puzzl\w*|don'?t (?:understand|get)|makes no sense|what does .{1,40} mean)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static CURIOUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(curious|wonder\w*|interesting|intrigu\w*|how (?:does|do|would)|why (?:does|do|is)|what if)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static SATISFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(thanks|thank you|great|perfect|awesome|excellent|works now|that worked|nailed it|solved)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static URGENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(urgent\w*|asap|immediately|right now|critical|emergency|deadline|blocking|production (?:is )?down)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static REFLECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(looking back|in hindsight|reflect\w*|realiz\w*|thinking about it|on second thought|learned)\b")
        .expect("valid regex")
});

/// Deterministic keyword classifier. Never fails: when nothing matches it
/// returns a zero-intensity result the threshold check will drop.
pub fn classify_keywords(content: &str) -> AffectClassification {
    // Fixed evaluation order keeps ties deterministic
    let patterns: [(AffectCategory, &Regex); 6] = [
        (AffectCategory::Urgent, &URGENT_RE),
        (AffectCategory::Frustrated, &FRUSTRATED_RE),
        (AffectCategory::Confused, &CONFUSED_RE),
        (AffectCategory::Satisfied, &SATISFIED_RE),
        (AffectCategory::Curious, &CURIOUS_RE),
        (AffectCategory::Reflective, &REFLECTIVE_RE),
    ];

    let mut best: Option<(AffectCategory, usize)> = None;
    for (category, pattern) in patterns {
        let matches = pattern.find_iter(content).count();
        if matches > 0 && best.map(|(_, n)| matches > n).unwrap_or(true) {
            best = Some((category, matches));
        }
    }

    match best {
        Some((category, matches)) => {
            let intensity = (0.4 + 0.15 * (matches as f32 - 1.0)).min(0.9);
            debug!(
                "Keyword classifier: {} ({} matches)",
                category.as_str(),
                matches
            );
            AffectClassification {
                category,
                intensity,
                reasoning: Some(format!(
                    "keyword match: {} {} cue(s)",
                    matches,
                    category.as_str().to_lowercase()
                )),
            }
        }
        None => AffectClassification {
            category: AffectCategory::Reflective,
            intensity: 0.0,
            reasoning: None,
        },
    }
}
