//! Heuristic spam scorer.
//!
//! Runs before the phishing classifier to short-circuit obvious spam:
//! - each indicator phrase found in the subject or body adds one point
//! - each attachment with an executable-like extension adds one point
//!
//! The message is spam iff the score exceeds the threshold (default 1, so a
//! single weak signal is not enough). Pure and stateless between calls.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::pipeline::types::{Attachment, NormalizedContent, SpamReport};

/// Spam iff score > this.
pub const DEFAULT_SPAM_THRESHOLD: usize = 1;

/// Attachment extensions treated as suspicious.
pub const DEFAULT_SUSPICIOUS_EXTENSIONS: &[&str] = &[".exe", ".bat", ".cmd"];

/// Built-in indicator phrases.
pub const DEFAULT_INDICATORS: &[&str] = &[
    "account suspended",
    "verify your account",
    "click here",
    "winner",
    "limited time offer",
    "act now",
    "congratulations",
    "you have been selected",
    "risk-free",
    "guaranteed",
    "you won the",
];

/// A case-insensitive literal phrase associated with spam intent.
#[derive(Debug, Clone)]
pub struct Indicator {
    /// The phrase as configured.
    pub phrase: String,
    regex: Regex,
}

impl Indicator {
    pub fn new(phrase: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&regex::escape(phrase))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            phrase: phrase.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Whether an attachment filename has a suspicious extension.
///
/// The payload is not inspected yet.
pub fn analyze_attachment(filename: &str, _payload: &[u8]) -> bool {
    has_suspicious_extension(filename, DEFAULT_SUSPICIOUS_EXTENSIONS)
}

fn has_suspicious_extension<S: AsRef<str>>(filename: &str, extensions: &[S]) -> bool {
    let lower = filename.trim().to_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.as_ref().to_lowercase()))
}

/// Heuristic spam scorer over a fixed indicator set.
#[derive(Debug, Clone)]
pub struct SpamScorer {
    indicators: Vec<Indicator>,
    suspicious_extensions: Vec<String>,
    threshold: usize,
}

impl SpamScorer {
    /// Scorer with the built-in indicators, extensions and threshold.
    pub fn default_rules() -> Self {
        let indicators = DEFAULT_INDICATORS
            .iter()
            .map(|phrase| Indicator::new(phrase).expect("escaped literal always compiles"))
            .collect();
        Self {
            indicators,
            suspicious_extensions: DEFAULT_SUSPICIOUS_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            threshold: DEFAULT_SPAM_THRESHOLD,
        }
    }

    /// Scorer with no indicators and no suspicious extensions (for testing).
    pub fn empty() -> Self {
        Self {
            indicators: Vec::new(),
            suspicious_extensions: Vec::new(),
            threshold: DEFAULT_SPAM_THRESHOLD,
        }
    }

    /// Add an indicator phrase.
    pub fn add_indicator(&mut self, phrase: &str) -> Result<(), regex::Error> {
        self.indicators.push(Indicator::new(phrase)?);
        Ok(())
    }

    /// Replace the suspicious extension list.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.suspicious_extensions = extensions;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn indicator_count(&self) -> usize {
        self.indicators.len()
    }

    /// Whether an attachment counts as a spam signal under this scorer's extensions.
    pub fn is_suspicious_attachment(&self, attachment: &Attachment) -> bool {
        has_suspicious_extension(&attachment.filename, &self.suspicious_extensions)
    }

    /// Score a message.
    ///
    /// Each indicator counts at most once, whether it matches the subject,
    /// the body, or both.
    pub fn evaluate(&self, content: &NormalizedContent) -> SpamReport {
        let matched_indicators: Vec<String> = self
            .indicators
            .iter()
            .filter(|ind| ind.is_match(&content.subject) || ind.is_match(&content.body))
            .map(|ind| ind.phrase.clone())
            .collect();

        let suspicious_attachments: Vec<String> = content
            .attachments
            .iter()
            .filter(|a| self.is_suspicious_attachment(a))
            .map(|a| a.filename.clone())
            .collect();

        for name in &suspicious_attachments {
            debug!(attachment = %name, "Suspicious attachment detected");
        }

        let score = matched_indicators.len() + suspicious_attachments.len();
        let is_spam = score > self.threshold;

        if score > 0 {
            debug!(
                subject = %content.subject,
                score,
                indicators = ?matched_indicators,
                is_spam,
                "Spam indicators matched"
            );
        }

        SpamReport {
            matched_indicators,
            suspicious_attachments,
            score,
            is_spam,
        }
    }
}
