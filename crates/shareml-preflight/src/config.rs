//! Per-content-type length bounds, loaded from an embedded YAML document the
//! same way `shareml_ratelimit::config` loads its limits.

use serde::Deserialize;
use std::collections::HashMap;

const DEFAULT_CONFIG_YAML: &str = include_str!("default_config.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBounds {
    pub min_words: usize,
    pub max_words: usize,
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for ContentBounds {
    fn default() -> Self {
        Self {
            min_words: 10,
            max_words: 50_000,
            min_chars: 50,
            max_chars: 200_000,
        }
    }
}

impl ContentBounds {
    /// Token budget implied by these bounds, using the same
    /// average-of-chars/4-and-words*0.75 estimate [`crate::estimate_tokens`]
    /// applies to actual text, so a truncation target stays in the same
    /// unit the estimator measures content in.
    pub fn max_tokens(&self) -> u64 {
        let char_estimate = self.max_chars as f64 / 4.0;
        let word_estimate = self.max_words as f64 * 0.75;
        ((char_estimate + word_estimate) / 2.0).floor() as u64 + 1
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PreflightConfig {
    #[serde(flatten)]
    pub content_types: HashMap<String, ContentBounds>,
}

impl PreflightConfig {
    pub fn defaults() -> Self {
        serde_yaml::from_str(DEFAULT_CONFIG_YAML).expect("embedded default_config.yaml must parse")
    }

    /// Falls back to built-in defaults on any parse failure, matching the
    /// rate-limit config loader's fail-soft behavior (there is no
    /// unknown-algorithm-style fatal case here, since an unrecognized
    /// content type just means "use the `article` bounds").
    pub fn load(yaml: &str) -> Self {
        if yaml.trim().is_empty() {
            return Self::defaults();
        }
        serde_yaml::from_str(yaml).unwrap_or_else(|_| Self::defaults())
    }

    pub fn bounds_for(&self, content_type: &str) -> ContentBounds {
        self.content_types
            .get(content_type)
            .cloned()
            .or_else(|| self.content_types.get("article").cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_cover_article() {
        let config = PreflightConfig::defaults();
        let bounds = config.bounds_for("article");
        assert!(bounds.min_words >= 10);
    }

    #[test]
    fn unknown_content_type_falls_back_to_article() {
        let config = PreflightConfig::defaults();
        let article = config.bounds_for("article");
        let unknown = config.bounds_for("totally-unheard-of");
        assert_eq!(unknown.min_words, article.min_words);
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = PreflightConfig::load("");
        assert_eq!(config.bounds_for("tweet").max_words, 280);
    }
}
