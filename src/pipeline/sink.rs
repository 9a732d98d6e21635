//! Verdict sinks.
//!
//! Every outcome the poll loop produces is handed to a sink exactly once.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::types::ClassificationOutcome;

/// Receives classification outcomes.
pub trait VerdictSink: Send {
    fn publish(&mut self, outcome: &ClassificationOutcome);
}

/// One line of the JSON-lines audit file.
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: DateTime<Utc>,
    mailbox_id: &'a str,
    message_id: Option<&'a str>,
    subject: &'a str,
    sender: Option<&'a str>,
    verdict: &'static str,
    is_spam: Option<bool>,
    is_phishing: Option<bool>,
    phishing_probability: Option<f64>,
    spam_score: Option<usize>,
    matched_indicators: Option<&'a [String]>,
    error: Option<String>,
}

impl<'a> AuditRecord<'a> {
    fn from_outcome(outcome: &'a ClassificationOutcome) -> Self {
        let verdict = outcome.verdict();
        Self {
            timestamp: outcome.processed_at,
            mailbox_id: &outcome.mailbox_id,
            message_id: verdict.map(|v| v.message_id.as_str()),
            subject: &outcome.subject,
            sender: verdict.map(|v| v.sender.as_str()),
            verdict: outcome.label(),
            is_spam: verdict.map(|v| v.is_spam),
            is_phishing: verdict.and_then(|v| v.is_phishing),
            phishing_probability: verdict.and_then(|v| v.phishing_probability),
            spam_score: verdict.map(|v| v.spam.score),
            matched_indicators: verdict.map(|v| v.spam.matched_indicators.as_slice()),
            error: outcome.result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Human-readable one-line summary of an outcome.
pub fn render_line(outcome: &ClassificationOutcome) -> String {
    match &outcome.result {
        Ok(v) if v.is_spam => format!("Spam: {}", v.subject),
        Ok(v) if v.is_phishing == Some(true) => match v.phishing_probability {
            Some(p) => format!("Phishing detected (p={p:.2}): {}", v.subject),
            None => format!("Phishing detected: {}", v.subject),
        },
        Ok(v) => format!("Legitimate: {}", v.subject),
        Err(e) => format!("Unclassified: {} ({e})", outcome.subject),
    }
}

/// Logs every outcome, optionally echoes it to stdout and appends it to an
/// audit file.
pub struct ConsoleSink {
    stdout: bool,
    audit: Option<File>,
}

impl ConsoleSink {
    pub fn new(stdout: bool) -> Self {
        Self {
            stdout,
            audit: None,
        }
    }

    /// Append JSON-lines records to `path`, creating it if needed.
    pub fn with_audit_log(mut self, path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.audit = Some(file);
        Ok(self)
    }

    fn append_audit(&mut self, outcome: &ClassificationOutcome) {
        let Some(file) = self.audit.as_mut() else {
            return;
        };
        let record = AuditRecord::from_outcome(outcome);
        let written = serde_json::to_string(&record)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(file, "{line}"));
        if let Err(e) = written {
            warn!(error = %e, mailbox_id = %outcome.mailbox_id, "Failed to write audit record");
        }
    }
}

impl VerdictSink for ConsoleSink {
    fn publish(&mut self, outcome: &ClassificationOutcome) {
        match &outcome.result {
            Ok(v) => info!(
                mailbox_id = %outcome.mailbox_id,
                message_id = %v.message_id,
                sender = %v.sender,
                subject = %v.subject,
                verdict = outcome.label(),
                spam_score = v.spam.score,
                p_threat = ?v.phishing_probability,
                "Message classified"
            ),
            Err(e) => warn!(
                mailbox_id = %outcome.mailbox_id,
                subject = %outcome.subject,
                error = %e,
                "Message unclassified"
            ),
        }
        if self.stdout {
            println!("{}", render_line(outcome));
        }
        self.append_audit(outcome);
    }
}

/// Collects outcomes in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub labels: Vec<(String, &'static str)>,
}

#[cfg(test)]
impl VerdictSink for CollectingSink {
    fn publish(&mut self, outcome: &ClassificationOutcome) {
        self.labels
            .push((outcome.mailbox_id.clone(), outcome.label()));
    }
}
