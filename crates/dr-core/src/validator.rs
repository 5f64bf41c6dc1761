//! Quality gate applied to every candidate final answer.
//!
//! The thresholds are policy, not law: they live in [`ValidatorConfig`] and
//! default to 300 words and 5 distinct cited URLs.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_WORDS: usize = 300;
pub const DEFAULT_MIN_CITATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum number of whitespace-delimited tokens.
    pub min_words: usize,
    /// Minimum number of distinct URLs cited in the answer.
    pub min_citations: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_words: DEFAULT_MIN_WORDS,
            min_citations: DEFAULT_MIN_CITATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub reason: String,
    pub word_count: usize,
    pub citation_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AnswerValidator {
    config: ValidatorConfig,
}

impl AnswerValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, answer: &str) -> ValidationOutcome {
        let word_count = count_words(answer);
        let citation_count = distinct_urls(answer).len();

        let mut problems = Vec::new();
        if word_count < self.config.min_words {
            problems.push(format!(
                "Answer has only {} words (minimum: {})",
                word_count, self.config.min_words
            ));
        }
        if citation_count < self.config.min_citations {
            problems.push(format!(
                "Answer cites only {} distinct URLs (minimum: {})",
                citation_count, self.config.min_citations
            ));
        }

        let accepted = problems.is_empty();
        let reason = if accepted {
            format!(
                "Answer meets quality thresholds ({} words, {} distinct URLs)",
                word_count, citation_count
            )
        } else {
            problems.join("; ")
        };

        ValidationOutcome {
            accepted,
            reason,
            word_count,
            citation_count,
        }
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Distinct `scheme://host/...` substrings. Trailing sentence punctuation
/// and markdown emphasis are stripped, so `https://a.io/x.`,
/// `**https://a.io/x**` and `https://a.io/x` are one citation.
pub fn distinct_urls(text: &str) -> BTreeSet<String> {
    url_pattern()
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"', '*', '_', '~'])
                .to_string()
        })
        .filter(|url| url.contains("://") && !url.ends_with("://"))
        .collect()
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"[A-Za-z][A-Za-z0-9+.-]*://[^\s/?#<>()\[\]"'`*]+[^\s<>()\[\]"'`*]*"#)
            .expect("URL pattern is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn urls(n: usize) -> String {
        (0..n)
            .map(|i| format!("https://example{}.com/page", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_accepts_when_thresholds_met() {
        let validator = AnswerValidator::default();
        let answer = format!("{} {}", words(300), urls(5));
        let outcome = validator.validate(&answer);
        assert!(outcome.accepted);
        assert_eq!(outcome.citation_count, 5);
        assert_eq!(outcome.word_count, 305);
    }

    #[test]
    fn test_reports_both_failures() {
        let validator = AnswerValidator::default();
        let answer = format!("{} {}", words(178), urls(2));
        let outcome = validator.validate(&answer);
        assert!(!outcome.accepted);
        assert!(outcome.reason.contains("Answer has only 180 words (minimum: 300)"));
        assert!(outcome.reason.contains("2 distinct URLs (minimum: 5)"));
    }

    #[test]
    fn test_reports_single_failure() {
        let validator = AnswerValidator::new(ValidatorConfig {
            min_words: 10,
            min_citations: 3,
        });
        let outcome = validator.validate(&format!("{} {}", words(20), urls(1)));
        assert!(!outcome.accepted);
        assert!(!outcome.reason.contains("words"));
        assert!(outcome.reason.contains("URLs"));
    }

    #[test]
    fn test_duplicate_urls_count_once() {
        let text = "See https://a.io/x, and again https://a.io/x. Also (https://b.org/y) \
                    and [docs](https://c.dev/z?q=1#frag).";
        let found = distinct_urls(text);
        assert_eq!(found.len(), 3);
        assert!(found.contains("https://a.io/x"));
        assert!(found.contains("https://b.org/y"));
        assert!(found.contains("https://c.dev/z?q=1#frag"));
    }

    #[test]
    fn test_markdown_emphasis_does_not_split_citations() {
        let text = "Bold **https://a.io/x** then plain https://a.io/x and *https://a.io/x* \
                    and `https://a.io/x`, _https://a.io/x_ and ~~https://a.io/x~~.";
        let found = distinct_urls(text);
        assert_eq!(found.len(), 1, "{:?}", found);
        assert!(found.contains("https://a.io/x"));

        // Underscores inside a path are part of the URL.
        let found = distinct_urls("**https://en.wikipedia.org/wiki/Large_language_model**");
        assert!(found.contains("https://en.wikipedia.org/wiki/Large_language_model"));
    }

    #[test]
    fn test_repeated_bold_links_do_not_pass_the_gate() {
        let validator = AnswerValidator::default();
        let answer = format!(
            "{} **https://a.io/x** *https://a.io/x* https://a.io/x https://b.io/y **https://b.io/y**",
            words(300)
        );
        let outcome = validator.validate(&answer);
        assert_eq!(outcome.citation_count, 2);
        assert!(!outcome.accepted);
    }

    #[test]
    fn test_bare_scheme_is_not_a_citation() {
        assert!(distinct_urls("the https:// prefix alone").is_empty());
        assert!(distinct_urls("no links here").is_empty());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let validator = AnswerValidator::default();
        let answer = format!("{} {}", words(120), urls(3));
        assert_eq!(validator.validate(&answer), validator.validate(&answer));
    }

    #[test]
    fn test_empty_answer() {
        let outcome = AnswerValidator::default().validate("");
        assert!(!outcome.accepted);
        assert_eq!(outcome.word_count, 0);
        assert_eq!(outcome.citation_count, 0);
    }
}
