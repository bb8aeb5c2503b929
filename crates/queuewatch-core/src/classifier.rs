//! Queue classifier
//!
//! Labels message text with the queue it announces, if any. Rules are plain
//! configuration ([`ClassifierConfig`]) compiled once into a
//! [`QueueClassifier`]; classification itself is a pure function of the text
//! and the compiled rules.
//!
//! Evaluation order:
//! 1. Text is lower-cased.
//! 2. Any skip string wins outright and yields [`Classification::None`].
//! 3. Rules are tried in configured order; the first rule with any matching
//!    pattern determines the queue kind.

use std::collections::HashSet;
use std::fmt;

use aho_corasick::AhoCorasick;
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::Result;
use crate::error::PatternError;

/// Number of characters kept in [`ScanResult::matched_text`].
pub const MATCHED_TEXT_CHARS: usize = 100;

/// Name of a configured queue rule (e.g. `COSTCO`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueKind(String);

impl QueueKind {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of classifying one piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No queue announced (or a skip string matched).
    None,
    /// A queue of the given kind.
    Queue(QueueKind),
}

impl Classification {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn kind(&self) -> Option<&QueueKind> {
        match self {
            Self::None => None,
            Self::Queue(kind) => Some(kind),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("NONE"),
            Self::Queue(kind) => write!(f, "{kind}"),
        }
    }
}

/// Per-message classification result. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub classification: Classification,
    /// Leading snippet of the lower-cased text (empty for `None`).
    pub matched_text: String,
}

impl ScanResult {
    #[must_use]
    pub fn none() -> Self {
        Self {
            classification: Classification::None,
            matched_text: String::new(),
        }
    }
}

/// One way a rule can match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePattern {
    /// Case-insensitive regular expression (fancy-regex syntax).
    Regex(String),
    /// Case-insensitive substring.
    Contains(String),
}

/// Named queue rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRule {
    /// Queue kind emitted on match (e.g. `POKEMON_CENTER`).
    pub name: String,
    /// Any matching pattern selects this rule.
    pub patterns: Vec<RulePattern>,
}

impl QueueRule {
    #[must_use]
    pub fn new(name: impl Into<String>, patterns: Vec<RulePattern>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }
}

/// Classifier configuration
///
/// ```toml
/// [classifier]
/// skip_strings = ["plush is up at target"]
///
/// [[classifier.rules]]
/// name = "COSTCO"
/// patterns = [{ regex = "(queue\\s*.*?\\s*costco)|(costco\\s*.*?\\s*queue)" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Substrings that veto any match.
    pub skip_strings: Vec<String>,
    /// Rules in priority order.
    pub rules: Vec<QueueRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            skip_strings: vec!["plush is up at target".to_string()],
            rules: default_rules(),
        }
    }
}

/// Rule set shipped with the watcher.
#[must_use]
pub fn default_rules() -> Vec<QueueRule> {
    vec![
        QueueRule::new(
            "POKEMON_CENTER",
            vec![
                RulePattern::Regex(r"pok[eé]mon center\s*queue".to_string()),
                RulePattern::Regex(r"queue.*pok[eé]mon center".to_string()),
            ],
        ),
        QueueRule::new(
            "COSTCO",
            vec![RulePattern::Regex(
                r"(queue\s*.*?\s*costco)|(costco\s*.*?\s*queue)".to_string(),
            )],
        ),
        QueueRule::new(
            "TARGET",
            vec![
                RulePattern::Contains("mavely.app.link".to_string()),
                RulePattern::Contains("target.com/p".to_string()),
            ],
        ),
    ]
}

impl ClassifierConfig {
    /// Validate rule names and patterns without keeping the compiled form.
    pub fn validate(&self) -> Result<()> {
        QueueClassifier::compile(self).map(|_| ())
    }
}

#[derive(Debug)]
enum CompiledPattern {
    Regex(Regex),
    Contains(String),
}

impl CompiledPattern {
    fn is_match(&self, lowered: &str) -> bool {
        match self {
            Self::Contains(needle) => lowered.contains(needle.as_str()),
            Self::Regex(regex) => match regex.is_match(lowered) {
                Ok(matched) => matched,
                Err(err) => {
                    trace!(error = %err, "Regex evaluation aborted; treating as no match");
                    false
                }
            },
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    kind: QueueKind,
    patterns: Vec<CompiledPattern>,
}

/// Compiled, immutable rule set.
#[derive(Debug)]
pub struct QueueClassifier {
    skip_matcher: Option<AhoCorasick>,
    rules: Vec<CompiledRule>,
}

impl QueueClassifier {
    /// Validate and compile a configuration.
    pub fn compile(config: &ClassifierConfig) -> Result<Self> {
        let skip_strings: Vec<String> = config
            .skip_strings
            .iter()
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let skip_matcher = if skip_strings.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&skip_strings).map_err(|e| {
                PatternError::InvalidRule(format!("skip strings could not be compiled: {e}"))
            })?)
        };

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let name = rule.name.trim();
            if name.is_empty() {
                return Err(PatternError::InvalidRule("rule name cannot be empty".to_string()).into());
            }
            if !seen.insert(name.to_string()) {
                return Err(
                    PatternError::InvalidRule(format!("duplicate rule name '{name}'")).into(),
                );
            }
            if rule.patterns.is_empty() {
                return Err(PatternError::InvalidRule(format!(
                    "rule '{name}' must include at least one pattern"
                ))
                .into());
            }

            let mut patterns = Vec::with_capacity(rule.patterns.len());
            for pattern in &rule.patterns {
                patterns.push(compile_pattern(name, pattern)?);
            }
            rules.push(CompiledRule {
                kind: QueueKind::new(name),
                patterns,
            });
        }

        Ok(Self {
            skip_matcher,
            rules,
        })
    }

    /// Classifier built from [`ClassifierConfig::default`].
    pub fn with_defaults() -> Result<Self> {
        Self::compile(&ClassifierConfig::default())
    }

    /// Queue kinds in priority order.
    pub fn kinds(&self) -> impl Iterator<Item = &QueueKind> {
        self.rules.iter().map(|r| &r.kind)
    }

    /// Classify a single piece of text.
    #[must_use]
    pub fn classify(&self, text: &str) -> ScanResult {
        if text.trim().is_empty() {
            return ScanResult::none();
        }
        let lowered = text.to_lowercase();

        if self
            .skip_matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(&lowered))
        {
            trace!("Skipping text - matches skip string");
            return ScanResult::none();
        }

        for rule in &self.rules {
            if rule.patterns.iter().any(|p| p.is_match(&lowered)) {
                return ScanResult {
                    classification: Classification::Queue(rule.kind.clone()),
                    matched_text: lowered.chars().take(MATCHED_TEXT_CHARS).collect(),
                };
            }
        }

        ScanResult::none()
    }

    /// Classify the text segments of one message (e.g. its embeds).
    ///
    /// Each segment is classified independently; a skip string only vetoes
    /// its own segment. The first segment with a queue match wins.
    #[must_use]
    pub fn classify_segments<S: AsRef<str>>(&self, segments: &[S]) -> ScanResult {
        segments
            .iter()
            .map(|segment| self.classify(segment.as_ref()))
            .find(|result| !result.classification.is_none())
            .unwrap_or_else(ScanResult::none)
    }
}

fn compile_pattern(rule_name: &str, pattern: &RulePattern) -> Result<CompiledPattern> {
    match pattern {
        RulePattern::Contains(needle) => {
            let needle = needle.trim().to_lowercase();
            if needle.is_empty() {
                return Err(PatternError::InvalidRule(format!(
                    "rule '{rule_name}' has an empty `contains` pattern"
                ))
                .into());
            }
            Ok(CompiledPattern::Contains(needle))
        }
        RulePattern::Regex(source) => {
            if source.trim().is_empty() {
                return Err(PatternError::InvalidRule(format!(
                    "rule '{rule_name}' has an empty regex"
                ))
                .into());
            }
            let regex = Regex::new(&format!("(?i){source}")).map_err(|e| {
                PatternError::InvalidRegex(format!("rule '{rule_name}' has invalid regex: {e}"))
            })?;
            Ok(CompiledPattern::Regex(regex))
        }
    }
}
