//! Continuation relevance heuristic.
//!
//! A deterministic bag-of-words overlap between two texts. It does no
//! stemming and no semantic matching: "gato" and "gatos" are different
//! tokens. The result is advisory only; the orchestrator never blocks or
//! alters a reply because of it.

use std::collections::HashSet;

/// Function words and persona words that would otherwise match in almost
/// every pair of replies. Tokens of three characters or fewer are dropped
/// before this list is consulted, so short words need not appear here.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    // articles, pronouns, prepositions and conjunctions
    "unos", "unas", "este", "esta", "esto", "estos", "estas", "esos", "esas", "aquel",
    "aquella", "para", "pero", "porque", "pues", "como", "cuando", "donde", "sobre", "entre",
    "desde", "hasta", "hacia", "según", "sino", "aunque", "entonces", "mientras", "cual",
    "cuales", "quien", "quienes", "todo", "toda", "todos", "todas", "otro", "otra", "otros",
    "otras", "cada", "algo", "nada", "ella", "ellos", "ellas", "nosotros", "usted", "ustedes",
    // recurring verbs
    "eres", "estoy", "estás", "está", "están", "somos", "tiene", "tienes", "tengo",
    "puede", "puedes", "puedo", "hace", "hacer", "sido", "había", "sería",
    // persona words and catchphrases
    "guau", "hola", "amigo", "amiga", "perrito", "perrita", "claro", "bueno", "vale",
];

/// Percentage of the previous reply's tokens that must reappear.
const THRESHOLD_PERCENT: usize = 15;
const MIN_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelevanceResult {
    pub match_count: usize,
    pub threshold: usize,
    pub related: bool,
}

#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    stop_words: HashSet<String>,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl RelevanceScorer {
    /// Adds domain words (typically the agent's own name) to the default list.
    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_words
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    /// The set of significant tokens in `text`.
    pub fn tokens(&self, text: &str) -> HashSet<String> {
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .filter(|c| is_latin_alphanumeric(*c) || c.is_whitespace())
            .collect();

        cleaned
            .split_whitespace()
            .filter(|token| token.chars().count() > 3)
            .filter(|token| !self.stop_words.contains(*token))
            .map(str::to_string)
            .collect()
    }

    pub fn score(&self, previous: &str, candidate: &str) -> RelevanceResult {
        let previous_tokens = self.tokens(previous);
        let candidate_tokens = self.tokens(candidate);

        let match_count = candidate_tokens
            .iter()
            .filter(|token| previous_tokens.contains(*token))
            .count();
        let threshold = MIN_THRESHOLD.max(previous_tokens.len() * THRESHOLD_PERCENT / 100);

        RelevanceResult {
            match_count,
            threshold,
            related: match_count >= threshold,
        }
    }
}

/// ASCII letters and digits plus the accented letters of the Latin-1 and
/// Latin Extended-A/B blocks.
fn is_latin_alphanumeric(c: char) -> bool {
    c.is_ascii_alphanumeric() || (c.is_alphabetic() && ('\u{00C0}'..='\u{024F}').contains(&c))
}

/// Scores with the default stop-word list.
pub fn score(previous: &str, candidate: &str) -> RelevanceResult {
    RelevanceScorer::default().score(previous, candidate)
}
