//! Keyword extraction for content-based matching.
//!
//! Reduces free text to its most frequent salient terms. Both document text
//! and clause descriptions go through the same pipeline so their keyword
//! sets are comparable.

use std::collections::HashMap;

/// Common English words that carry no signal for clause matching.
pub const STOP_WORDS: &[&str] = &[
    "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
    "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
    "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
    "what", "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when", "make",
    "can", "like", "time", "no", "just", "him", "know", "take", "people", "into", "year", "your",
    "good", "some", "could", "them", "see", "other", "than", "then", "now", "look", "only",
    "come", "its", "over", "also", "back", "after", "use", "two", "how", "our", "work", "first",
    "well", "way", "even", "new", "want", "because", "any", "these", "give", "day", "most", "us",
];

/// Tokens this short are dropped before counting.
const MIN_KEYWORD_LEN: usize = 3;

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Returns up to `top_n` keywords ordered by descending frequency.
///
/// Text is lowercased, every non-alphanumeric ASCII character becomes a
/// separator, and tokens shorter than three characters or in
/// [`STOP_WORDS`] are dropped. Equal counts keep first-occurrence order.
pub fn extract_keywords(text: &str, top_n: usize) -> Vec<String> {
    let normalized: String = text
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in normalized.split_whitespace() {
        if word.len() < MIN_KEYWORD_LEN || is_stop_word(word) {
            continue;
        }
        let count = counts.entry(word).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }

    // sort_by_key is stable, so ties stay in first-occurrence order
    order.sort_by_key(|word| std::cmp::Reverse(counts[word]));
    order
        .into_iter()
        .take(top_n)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_keywords() {
        assert!(extract_keywords("", 30).is_empty());
        assert!(extract_keywords("   \n\t ", 30).is_empty());
    }

    #[test]
    fn drops_short_tokens_and_stop_words() {
        let kws = extract_keywords("The OH&S policy is an important policy for us", 10);
        assert_eq!(kws, vec!["policy", "important"]);
    }

    #[test]
    fn orders_by_frequency_then_first_occurrence() {
        let kws = extract_keywords("hazard risk control risk hazard audit risk", 10);
        assert_eq!(kws, vec!["risk", "hazard", "control", "audit"]);
    }

    #[test]
    fn punctuation_splits_tokens() {
        let kws = extract_keywords("risk-assessment;hazard_register(2024)", 10);
        assert_eq!(kws, vec!["risk", "assessment", "hazard", "register", "2024"]);
    }

    #[test]
    fn truncates_to_top_n() {
        let kws = extract_keywords("alpha beta gamma delta", 2);
        assert_eq!(kws, vec!["alpha", "beta"]);
    }

    #[test]
    fn stop_word_list_is_lowercase() {
        assert!(STOP_WORDS.iter().all(|w| w.chars().all(|c| c.is_ascii_lowercase())));
        assert!(STOP_WORDS.len() >= 90);
    }
}
