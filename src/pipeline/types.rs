//! Shared types for the classification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ── Extracted content ───────────────────────────────────────────────

/// A MIME part with `Content-Disposition: attachment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Declared filename, empty when the part has none.
    pub filename: String,
    /// Decoded payload, empty when the part has none.
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            payload: payload.into(),
        }
    }
}

/// Everything the detectors look at, extracted once per raw message.
///
/// Missing headers are empty strings, never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedContent {
    /// `Message-ID` header, or a generated `gen-<uuid>` when absent.
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// Body text with markup removed.
    pub body: String,
    /// Attachments in message order.
    pub attachments: Vec<Attachment>,
}

// ── Labels ──────────────────────────────────────────────────────────

/// Classifier output class.
///
/// Integer encoding used by training data and persisted models:
/// `1` is the threat class, `0` the benign class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Legitimate,
    Threat,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Legitimate, Label::Threat];

    /// Integer label as stored in datasets and model files.
    pub fn as_index(self) -> usize {
        match self {
            Self::Legitimate => 0,
            Self::Threat => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Legitimate),
            1 => Some(Self::Threat),
            _ => None,
        }
    }

    pub fn is_threat(self) -> bool {
        self == Self::Threat
    }
}

/// Per-class probabilities. Both entries sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub legitimate: f64,
    pub threat: f64,
}

impl ClassProbabilities {
    pub fn of(&self, label: Label) -> f64 {
        match label {
            Label::Legitimate => self.legitimate,
            Label::Threat => self.threat,
        }
    }

    /// Class with the larger probability. Ties go to `Legitimate`.
    pub fn argmax(&self) -> Label {
        if self.threat > self.legitimate {
            Label::Threat
        } else {
            Label::Legitimate
        }
    }
}

// ── Detector outputs ────────────────────────────────────────────────

/// Heuristic spam scorer result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamReport {
    /// Indicator phrases found in subject or body.
    pub matched_indicators: Vec<String>,
    /// Attachment filenames with a suspicious extension.
    pub suspicious_attachments: Vec<String>,
    /// Total signal count.
    pub score: usize,
    pub is_spam: bool,
}

/// Phishing classifier result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhishingOutcome {
    /// Discrete model prediction.
    pub label: Label,
    pub probabilities: ClassProbabilities,
    /// Final decision after the optional probability threshold.
    pub is_phishing: bool,
}

// ── Verdict ─────────────────────────────────────────────────────────

/// Which bucket an outcome falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Spam,
    Phishing,
    Legitimate,
    /// Processing failed before a verdict was reached.
    Unclassified,
}

impl VerdictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictKind::Spam => "spam",
            VerdictKind::Phishing => "phishing",
            VerdictKind::Legitimate => "legitimate",
            VerdictKind::Unclassified => "unclassified",
        }
    }
}

/// Final classification of one message.
///
/// `is_phishing` and `phishing_probability` are `None` when the spam stage
/// short-circuited and the classifier never ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatVerdict {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub is_spam: bool,
    pub is_phishing: Option<bool>,
    pub phishing_probability: Option<f64>,
    pub spam: SpamReport,
}

impl ThreatVerdict {
    pub fn kind(&self) -> VerdictKind {
        match (self.is_spam, self.is_phishing) {
            (true, _) => VerdictKind::Spam,
            (false, Some(true)) => VerdictKind::Phishing,
            (false, _) => VerdictKind::Legitimate,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Outcome of running one message through the pipeline.
///
/// Per-message failures are carried as values; the poll loop aggregates
/// them without unwinding.
#[derive(Debug)]
pub struct ClassificationOutcome {
    /// Mailbox identifier the message was fetched under.
    pub mailbox_id: String,
    pub subject: String,
    pub result: Result<ThreatVerdict, PipelineError>,
    pub processed_at: DateTime<Utc>,
}

impl ClassificationOutcome {
    pub fn verdict(&self) -> Option<&ThreatVerdict> {
        self.result.as_ref().ok()
    }

    pub fn kind(&self) -> VerdictKind {
        match &self.result {
            Ok(verdict) => verdict.kind(),
            Err(_) => VerdictKind::Unclassified,
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Per-cycle counters, logged after every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub spam: usize,
    pub phishing: usize,
    pub legitimate: usize,
    pub unclassified: usize,
    pub fetch_failures: usize,
    pub quarantined: usize,
}

impl CycleReport {
    /// Count one outcome into the matching bucket.
    pub fn record(&mut self, outcome: &ClassificationOutcome) {
        match outcome.kind() {
            VerdictKind::Spam => self.spam += 1,
            VerdictKind::Phishing => self.phishing += 1,
            VerdictKind::Legitimate => self.legitimate += 1,
            VerdictKind::Unclassified => self.unclassified += 1,
        }
    }
}
