//! Content validation, skip-decision, truncation and metadata extraction
//! run ahead of any provider call whose cost scales with input size
//! (spec.md §4.H).

use crate::config::PreflightConfig;
use regex::Regex;
use std::sync::OnceLock;

fn binary_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f-\xff]").unwrap())
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap())
}

fn mention_or_hashtag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[@#]\S+$").unwrap())
}

const SPAM_PHRASES: &[&str] = &[
    "click here",
    "buy now",
    "limited time offer",
    "act now",
    "subscribe now",
    "free money",
];

/// Validation and metric output of [`validate_content`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContentInfo {
    pub valid: bool,
    pub errors: Vec<String>,
    pub word_count: usize,
    pub char_count: usize,
    pub estimated_tokens: u64,
    pub content_type: String,
    pub language: Option<String>,
}

/// Secondary, non-gating analysis (spec.md §4.H supplement). Never affects
/// `ContentInfo::valid` or the skip decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentMetadata {
    pub urls: Vec<String>,
    pub emails: Vec<String>,
    pub has_code: bool,
    pub has_lists: bool,
    pub paragraph_count: usize,
    pub sentence_count: usize,
}

/// `average of chars/4 and words*0.75`, rounded up, plus 1 (spec.md §4.H).
pub fn estimate_tokens(text: &str) -> u64 {
    let char_estimate = text.chars().count() as f64 / 4.0;
    let word_estimate = text.split_whitespace().count() as f64 * 0.75;
    ((char_estimate + word_estimate) / 2.0).floor() as u64 + 1
}

pub fn validate_content(text: &str, content_type: &str, config: &PreflightConfig) -> ContentInfo {
    let text = text.trim();
    let mut errors = Vec::new();

    if binary_pattern().is_match(text) {
        errors.push("content appears to contain binary data".to_string());
    }

    let word_count = text.split_whitespace().count();
    let char_count = text.chars().count();
    let estimated_tokens = estimate_tokens(text);

    let bounds = config.bounds_for(content_type);

    if word_count < bounds.min_words {
        errors.push(format!(
            "content too short: {} words (minimum: {})",
            word_count, bounds.min_words
        ));
    } else if word_count > bounds.max_words {
        errors.push(format!(
            "content too long: {} words (maximum: {})",
            word_count, bounds.max_words
        ));
    }

    if char_count < bounds.min_chars {
        errors.push(format!(
            "content too short: {} chars (minimum: {})",
            char_count, bounds.min_chars
        ));
    } else if char_count > bounds.max_chars {
        errors.push(format!(
            "content too long: {} chars (maximum: {})",
            char_count, bounds.max_chars
        ));
    }

    let unique_words: std::collections::HashSet<&str> = text.split_whitespace().collect();
    if unique_words.len() < 5 {
        errors.push("content has very few unique words".to_string());
    }

    let valid = errors.is_empty();

    #[cfg(feature = "tracing")]
    if !valid {
        tracing::warn!(?errors, content_type, "content validation issues");
    }

    ContentInfo {
        valid,
        errors,
        word_count,
        char_count,
        estimated_tokens,
        content_type: content_type.to_string(),
        language: None,
    }
}

/// Whether `text` should be skipped as a terminal non-error outcome rather
/// than processed or failed (spec.md §4.H).
pub fn should_skip(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return true;
    }

    if text.split_whitespace().all(|token| {
        url_pattern().is_match(token) || mention_or_hashtag_pattern().is_match(token)
    }) {
        return true;
    }

    is_spam(text)
}

fn is_spam(text: &str) -> bool {
    let lower = text.to_lowercase();
    if SPAM_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }

    if text.chars().count() > 20 {
        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if !letters.is_empty() {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            if upper as f64 / letters.len() as f64 > 0.7 {
                return true;
            }
        }
    }

    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total > 0 {
        let non_alphanumeric = text
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_alphanumeric())
            .count();
        if non_alphanumeric as f64 / total as f64 > 0.5 {
            return true;
        }
    }

    false
}

/// Truncate to `target_tokens`, preferring a sentence boundary past 80% of
/// the cut, else the last newline past 80% (spec.md §4.H).
pub fn truncate_to_limit(text: &str, target_tokens: u64) -> (String, bool) {
    let estimated = estimate_tokens(text);
    if estimated <= target_tokens {
        return (text.to_string(), false);
    }

    let chars: Vec<char> = text.chars().collect();
    let ratio = target_tokens as f64 / estimated as f64;
    let target_chars = ((chars.len() as f64) * ratio * 0.95).floor() as usize;
    let target_chars = target_chars.min(chars.len());

    let candidate: String = chars[..target_chars].iter().collect();
    let cutoff = (target_chars as f64 * 0.8) as usize;

    let last_period = candidate.rfind('.');
    let last_newline = candidate.rfind('\n');

    let truncated = if let Some(period_byte) = last_period {
        let period_chars = candidate[..period_byte].chars().count();
        if period_chars > cutoff {
            candidate[..period_byte + 1].to_string()
        } else if let Some(newline_byte) = last_newline {
            let newline_chars = candidate[..newline_byte].chars().count();
            if newline_chars > cutoff {
                candidate[..newline_byte].to_string()
            } else {
                candidate
            }
        } else {
            candidate
        }
    } else if let Some(newline_byte) = last_newline {
        let newline_chars = candidate[..newline_byte].chars().count();
        if newline_chars > cutoff {
            candidate[..newline_byte].to_string()
        } else {
            candidate
        }
    } else {
        candidate
    };

    (truncated, true)
}

/// Supplemental, non-gating metadata (spec.md §4.H supplement, grounded on
/// `content_preflight.py`'s `extract_metadata`).
pub fn extract_metadata(text: &str) -> ContentMetadata {
    ContentMetadata {
        urls: url_pattern().find_iter(text).map(|m| m.as_str().to_string()).collect(),
        emails: email_pattern().find_iter(text).map(|m| m.as_str().to_string()).collect(),
        has_code: text.contains("```") || text.contains("<code>"),
        has_lists: ["1.", "-", "*"].iter().any(|marker| text.contains(marker)),
        paragraph_count: text.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
        sentence_count: text.chars().filter(|c| matches!(c, '.' | '!' | '?')).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PreflightConfig {
        PreflightConfig::defaults()
    }

    #[test]
    fn valid_article_passes() {
        let text = "word ".repeat(120);
        let info = validate_content(&text, "article", &config());
        assert!(info.valid, "{:?}", info.errors);
    }

    #[test]
    fn short_article_fails_with_word_count_error() {
        let info = validate_content("too short text here", "article", &config());
        assert!(!info.valid);
        assert!(info.errors.iter().any(|e| e.contains("too short")));
    }

    #[test]
    fn binary_content_is_flagged() {
        let text = format!("{}{}", "hello world this has enough unique words ", '\u{0007}');
        let info = validate_content(&text, "article", &config());
        assert!(info.errors.iter().any(|e| e.contains("binary")));
    }

    #[test]
    fn degenerate_repeated_word_content_fails_unique_word_check() {
        let text = "same ".repeat(50);
        let info = validate_content(&text, "article", &config());
        assert!(info.errors.iter().any(|e| e.contains("unique words")));
    }

    #[test]
    fn all_urls_is_skipped() {
        assert!(should_skip("https://example.com/a https://example.com/b"));
    }

    #[test]
    fn all_mentions_and_hashtags_is_skipped() {
        assert!(should_skip("@someone #trending #another"));
    }

    #[test]
    fn all_caps_long_text_is_spam() {
        assert!(should_skip("THIS IS A VERY LOUD MESSAGE SHOUTING AT EVERYONE READING IT"));
    }

    #[test]
    fn mostly_punctuation_is_spam() {
        assert!(should_skip("!!!***###$$$%%%^^^&&&(((care)))"));
    }

    #[test]
    fn ordinary_sentence_is_not_skipped() {
        assert!(!should_skip("This is a perfectly normal sentence about something interesting."));
    }

    #[test]
    fn token_estimate_matches_spec_formula() {
        let text = "one two three four";
        let tokens = estimate_tokens(text);
        let char_estimate = text.len() as f64 / 4.0;
        let word_estimate = 4.0 * 0.75;
        let expected = ((char_estimate + word_estimate) / 2.0).floor() as u64 + 1;
        assert_eq!(tokens, expected);
    }

    #[test]
    fn truncation_noop_when_within_limit() {
        let (text, was_truncated) = truncate_to_limit("short text", 1000);
        assert_eq!(text, "short text");
        assert!(!was_truncated);
    }

    #[test]
    fn truncation_prefers_sentence_boundary() {
        let sentence = "This is one sentence that has enough words in it to matter. ";
        let text = sentence.repeat(50);
        let (truncated, was_truncated) = truncate_to_limit(&text, 40);
        assert!(was_truncated);
        assert!(truncated.ends_with('.'));
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn metadata_extracts_urls_and_emails() {
        let text = "Visit https://example.com or email me@example.com for more.";
        let metadata = extract_metadata(text);
        assert_eq!(metadata.urls, vec!["https://example.com"]);
        assert_eq!(metadata.emails, vec!["me@example.com"]);
    }

    #[test]
    fn metadata_counts_paragraphs_and_sentences() {
        let text = "First paragraph sentence one. Sentence two!\n\nSecond paragraph here?";
        let metadata = extract_metadata(text);
        assert_eq!(metadata.paragraph_count, 2);
        assert_eq!(metadata.sentence_count, 3);
    }
}
