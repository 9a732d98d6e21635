//! Threat processor: the two-stage classification pipeline.
//!
//! Flow for one raw message:
//! 1. Content extraction (never fails)
//! 2. Spam scorer (cheap heuristics) → may short-circuit
//! 3. Normalization + phishing classifier, only for non-spam
//!
//! Spam is decided first and exclusively: a spam verdict carries no phishing
//! result and the classifier is never invoked for it.

use chrono::Utc;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::classifier::PhishingClassifier;
use crate::pipeline::extract::ContentExtractor;
use crate::pipeline::normalize::normalize_message;
use crate::pipeline::rules::SpamScorer;
use crate::pipeline::types::{ClassificationOutcome, NormalizedContent, ThreatVerdict};

pub struct ThreatProcessor {
    extractor: ContentExtractor,
    scorer: SpamScorer,
    classifier: PhishingClassifier,
}

impl ThreatProcessor {
    pub fn new(
        extractor: ContentExtractor,
        scorer: SpamScorer,
        classifier: PhishingClassifier,
    ) -> Self {
        Self {
            extractor,
            scorer,
            classifier,
        }
    }

    /// Build the pipeline from configuration around a ready classifier.
    pub fn from_config(
        config: &PipelineConfig,
        classifier: PhishingClassifier,
    ) -> Result<Self, regex::Error> {
        let mut scorer = SpamScorer::default_rules()
            .with_extensions(config.suspicious_extensions.clone())
            .with_threshold(config.spam_threshold);
        for phrase in &config.extra_indicators {
            scorer.add_indicator(phrase)?;
        }
        Ok(Self::new(
            ContentExtractor::new(config.scan_html),
            scorer,
            classifier.with_threshold(config.phishing_threshold),
        ))
    }

    pub fn scorer(&self) -> &SpamScorer {
        &self.scorer
    }

    /// Run one raw message through extraction and both stages.
    pub fn process(&self, mailbox_id: &str, raw: &[u8]) -> ClassificationOutcome {
        let content = self.extractor.extract(raw);
        let result = self.classify_content(&content);
        if let Err(e) = &result {
            error!(
                mailbox_id,
                message_id = %content.message_id,
                error = %e,
                "Message left unclassified"
            );
        }
        ClassificationOutcome {
            mailbox_id: mailbox_id.to_string(),
            subject: content.subject,
            result,
            processed_at: Utc::now(),
        }
    }

    /// Classify already-extracted content.
    pub fn classify_content(
        &self,
        content: &NormalizedContent,
    ) -> Result<ThreatVerdict, PipelineError> {
        let spam = self.scorer.evaluate(content);

        if spam.is_spam {
            info!(
                message_id = %content.message_id,
                subject = %content.subject,
                score = spam.score,
                "Spam detected, skipping phishing classifier"
            );
            return Ok(ThreatVerdict {
                message_id: content.message_id.clone(),
                subject: content.subject.clone(),
                sender: content.sender.clone(),
                is_spam: true,
                is_phishing: None,
                phishing_probability: None,
                spam,
            });
        }

        let normalized = normalize_message(&content.subject, &content.body);
        debug!(
            message_id = %content.message_id,
            tokens = normalized.split_whitespace().count(),
            "Running phishing classifier"
        );
        let outcome = self
            .classifier
            .classify(&normalized)
            .map_err(|source| PipelineError::Classification {
                stage: "phishing",
                source,
            })?;

        if outcome.is_phishing {
            info!(
                message_id = %content.message_id,
                subject = %content.subject,
                p_threat = outcome.probabilities.threat,
                "Phishing detected"
            );
        }

        Ok(ThreatVerdict {
            message_id: content.message_id.clone(),
            subject: content.subject.clone(),
            sender: content.sender.clone(),
            is_spam: false,
            is_phishing: Some(outcome.is_phishing),
            phishing_probability: Some(outcome.probabilities.threat),
            spam,
        })
    }
}
