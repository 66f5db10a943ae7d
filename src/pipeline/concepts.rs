// src/pipeline/concepts.rs
// Cheap concept tokenizer for the companion graph: case-folded words,
// stop-word filtered, augmented with a technology dictionary.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Max concepts extracted per message
pub const MAX_CONCEPTS: usize = 10;

/// Minimum word length for a free-form concept
const MIN_CONCEPT_LEN: usize = 4;

/// Technology terms recognized even when common-word filtering would
/// otherwise drop them. Shared with the heuristic entity extractor.
pub(crate) const TECH_TERMS: &[&str] = &[
    "rust",
    "python",
    "javascript",
    "typescript",
    "golang",
    "java",
    "kotlin",
    "swift",
    "sqlite",
    "postgres",
    "postgresql",
    "mysql",
    "redis",
    "mongodb",
    "kafka",
    "docker",
    "kubernetes",
    "terraform",
    "linux",
    "macos",
    "windows",
    "react",
    "vue",
    "svelte",
    "angular",
    "nodejs",
    "deno",
    "tokio",
    "axum",
    "django",
    "flask",
    "rails",
    "spring",
    "graphql",
    "grpc",
    "websocket",
    "http",
    "oauth",
    "jwt",
    "tls",
    "ssh",
    "git",
    "github",
    "gitlab",
    "cargo",
    "webpack",
    "vite",
    "llm",
    "embedding",
    "transformer",
];

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "this", "that", "these", "those", "there", "their", "they", "them", "then", "than",
        "what", "when", "where", "which", "while", "with", "without", "would", "could",
        "should", "have", "has", "had", "been", "being", "were", "was", "will", "shall",
        "from", "into", "onto", "over", "under", "about", "after", "before", "because",
        "between", "through", "during", "just", "like", "some", "such", "only", "also",
        "very", "really", "again", "still", "even", "much", "many", "more", "most", "other",
        "another", "every", "each", "here", "does", "doing", "done", "make", "makes",
        "made", "making", "want", "wants", "need", "needs", "think", "know", "going",
        "yeah", "okay", "thanks", "please", "maybe", "something", "anything", "everything",
        "nothing", "someone", "anyone", "everyone", "thing", "things", "stuff", "kind",
        "sort", "lets", "dont", "cant", "wont", "didnt", "doesnt", "isnt", "arent",
        "youre", "youll", "weve", "theyre", "whats", "thats", "your", "yours", "mine",
        "ours", "theirs", "itself", "myself", "yourself",
    ]
    .into_iter()
    .collect()
});

static TECH_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| TECH_TERMS.iter().copied().collect());

/// Extract up to [`MAX_CONCEPTS`] concepts from a message, in order of
/// first appearance. Technology terms always qualify; other words must be
/// >= 4 chars and pass the stop-word filter.
pub fn extract_concepts(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut concepts = Vec::new();

    for raw in content.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-') {
        if concepts.len() >= MAX_CONCEPTS {
            break;
        }

        let word = raw.trim_matches(|c: char| c == '_' || c == '-').to_lowercase();
        if word.is_empty() {
            continue;
        }

        let qualifies = TECH_SET.contains(word.as_str())
            || (word.len() >= MIN_CONCEPT_LEN
                && !STOP_WORDS.contains(word.as_str())
                && word.chars().any(|c| c.is_alphabetic()));

        if qualifies && seen.insert(word.clone()) {
            concepts.push(word);
        }
    }

    concepts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_words_in_order() {
        let concepts = extract_concepts("the memory engine consolidates conversation state");
        assert_eq!(
            concepts,
            vec!["memory", "engine", "consolidates", "conversation", "state"]
        );
    }

    #[test]
    fn filters_stop_words_and_short_words() {
        let concepts = extract_concepts("this is a very good day");
        assert_eq!(concepts, vec!["good"]);
    }

    #[test]
    fn tech_terms_bypass_length_filter() {
        let concepts = extract_concepts("we use git and jwt for auth");
        assert!(concepts.contains(&"git".to_string()));
        assert!(concepts.contains(&"jwt".to_string()));
        assert!(concepts.contains(&"auth".to_string()));
    }

    #[test]
    fn dedupes_case_insensitively() {
        let concepts = extract_concepts("Rust rust RUST tokio Tokio");
        assert_eq!(concepts, vec!["rust", "tokio"]);
    }

    #[test]
    fn caps_at_max_concepts() {
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima";
        let concepts = extract_concepts(text);
        assert_eq!(concepts.len(), MAX_CONCEPTS);
        assert_eq!(concepts[0], "alpha");
    }

    #[test]
    fn empty_and_symbol_only_input() {
        assert!(extract_concepts("").is_empty());
        assert!(extract_concepts("!!! ??? ...").is_empty());
        assert!(extract_concepts("1234 5678").is_empty());
    }
}
