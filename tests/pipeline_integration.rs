//! End-to-end tests: mock mailbox session → poller → processor → sink.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mailguard::channels::MailboxSession;
use mailguard::config::{PipelineConfig, PollConfig};
use mailguard::error::{ClassifierError, PollError, SessionError};
use mailguard::model::{DEFAULT_MAX_FEATURES, ModelBundle, TrainingExample};
use mailguard::pipeline::classifier::{FeatureVector, PhishingClassifier, ThreatModel, Vectorizer};
use mailguard::pipeline::normalize::normalize_message;
use mailguard::pipeline::poller::Poller;
use mailguard::pipeline::processor::ThreatProcessor;
use mailguard::pipeline::sink::VerdictSink;
use mailguard::pipeline::types::{ClassProbabilities, ClassificationOutcome, CycleReport, Label};
use mailguard::resources::{FixedProbe, ResourceSample};

// ── Test doubles ────────────────────────────────────────────────────

const PHISHING_EMAIL: &[u8] = b"From: attacker@evil.example\r\n\
Subject: Urgent! Verify Your Account\r\n\
Message-ID: <phish-1@evil.example>\r\n\
\r\n\
Please verify your account immediately. Click here: http://phishing.com/verify\r\n";

const LUNCH_EMAIL: &[u8] = b"From: colleague@example.com\r\n\
Subject: Team lunch Friday\r\n\
Message-ID: <lunch-1@example.com>\r\n\
\r\n\
Let's meet at noon.\r\n";

const PASSWORD_EMAIL: &[u8] = b"From: it@corp.example\r\n\
Subject: Password expired\r\n\
\r\n\
Login now and confirm your password\r\n";

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<String, Vec<u8>>,
    broken: HashSet<String>,
    /// Moves into these folders are refused with a `NO` reply.
    full_folders: HashSet<String>,
    /// Number of upcoming searches answered with a `NO` reply.
    failing_searches: usize,
    moved: Vec<(String, String)>,
    lost: bool,
}

/// In-memory mailbox. `broken` ids fail to fetch with a `NO` reply;
/// `lost` makes every call fail as a dropped connection.
#[derive(Clone, Default)]
struct MockSession {
    state: Arc<Mutex<MailboxState>>,
}

impl MockSession {
    fn with_messages(messages: &[(&str, &[u8])]) -> Self {
        let session = Self::default();
        {
            let mut state = session.state.lock().unwrap();
            for (id, raw) in messages {
                state.messages.insert(id.to_string(), raw.to_vec());
            }
        }
        session
    }

    fn check_alive(&self) -> Result<(), SessionError> {
        if self.state.lock().unwrap().lost {
            return Err(SessionError::Disconnected("connection reset".into()));
        }
        Ok(())
    }
}

impl MailboxSession for MockSession {
    fn select(&mut self, _mailbox: &str) -> Result<(), SessionError> {
        self.check_alive()
    }

    fn search(&mut self, _criterion: &str) -> Result<Vec<String>, SessionError> {
        self.check_alive()?;
        let mut state = self.state.lock().unwrap();
        if state.failing_searches > 0 {
            state.failing_searches -= 1;
            return Err(SessionError::Command {
                command: "UID SEARCH".into(),
                reason: "NO server busy".into(),
            });
        }
        Ok(state.messages.keys().cloned().collect())
    }

    fn fetch(&mut self, id: &str) -> Result<Vec<u8>, SessionError> {
        self.check_alive()?;
        let state = self.state.lock().unwrap();
        if state.broken.contains(id) {
            return Err(SessionError::Command {
                command: "UID FETCH".into(),
                reason: "NO message unavailable".into(),
            });
        }
        state.messages.get(id).cloned().ok_or(SessionError::Command {
            command: "UID FETCH".into(),
            reason: "NO no such message".into(),
        })
    }

    fn move_to(&mut self, id: &str, folder: &str) -> Result<(), SessionError> {
        self.check_alive()?;
        let mut state = self.state.lock().unwrap();
        if state.full_folders.contains(folder) {
            return Err(SessionError::Command {
                command: "UID COPY".into(),
                reason: "NO [OVERQUOTA] folder full".into(),
            });
        }
        state.messages.remove(id);
        state.moved.push((id.to_string(), folder.to_string()));
        Ok(())
    }

    fn logout(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Records every published outcome's label.
#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

impl VerdictSink for RecordingSink {
    fn publish(&mut self, outcome: &ClassificationOutcome) {
        self.seen
            .lock()
            .unwrap()
            .push((outcome.mailbox_id.clone(), outcome.label().to_string()));
    }
}

/// Wraps a real model and counts inferences.
struct CountingModel<M> {
    inner: M,
    calls: Arc<AtomicUsize>,
}

impl<M: ThreatModel> ThreatModel for CountingModel<M> {
    fn n_features(&self) -> usize {
        self.inner.n_features()
    }

    fn predict(&self, features: &FeatureVector) -> Result<Label, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(features)
    }

    fn predict_proba(
        &self,
        features: &FeatureVector,
    ) -> Result<ClassProbabilities, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict_proba(features)
    }
}

fn example(subject: &str, body: &str, label: u8) -> TrainingExample {
    TrainingExample {
        subject: Some(subject.into()),
        body: body.into(),
        label,
    }
}

fn training_corpus() -> Vec<TrainingExample> {
    vec![
        example("Password expired", "Your password has expired, login now to confirm your bank details", 1),
        example("Unusual sign in", "We detected suspicious activity, confirm your password and bank login", 1),
        example("Invoice overdue", "Login to the secure portal and confirm payment details or your account closes", 1),
        example("Mailbox full", "Your mailbox is full, login with your password to restore access", 1),
        example("Team lunch", "Let's meet for lunch at noon on Friday with the whole team", 0),
        example("Meeting moved", "The planning meeting moved to Thursday afternoon, see you there", 0),
        example("Weekend plans", "Are we still meeting Saturday for the hike? Bring lunch", 0),
        example("Project update", "Notes from today's team meeting are in the shared folder", 0),
    ]
}

struct Harness {
    processor: ThreatProcessor,
    calls: Arc<AtomicUsize>,
    bundle: ModelBundle,
}

fn harness() -> Harness {
    let bundle = ModelBundle::train(&training_corpus(), DEFAULT_MAX_FEATURES).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let model = CountingModel {
        inner: bundle.model.clone(),
        calls: calls.clone(),
    };
    let classifier =
        PhishingClassifier::new(Arc::new(bundle.vectorizer.clone()), Arc::new(model)).unwrap();
    let processor = ThreatProcessor::from_config(&PipelineConfig::default(), classifier).unwrap();
    Harness {
        processor,
        calls,
        bundle,
    }
}

fn poller(session: MockSession, processor: ThreatProcessor, sink: RecordingSink, config: PollConfig) -> Poller {
    Poller::new(Box::new(session), processor, Box::new(sink), "INBOX", config)
        .with_probe(Box::new(FixedProbe(ResourceSample::default())))
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn obvious_spam_never_reaches_classifier() {
    let h = harness();
    let outcome = h.processor.process("1", PHISHING_EMAIL);
    let verdict = outcome.verdict().unwrap();

    assert!(verdict.is_spam);
    assert!(verdict.spam.score >= 2);
    assert!(verdict.spam.matched_indicators.contains(&"verify your account".to_string()));
    assert!(verdict.spam.matched_indicators.contains(&"click here".to_string()));
    assert_eq!(verdict.is_phishing, None);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn team_lunch_is_legitimate() {
    let h = harness();
    let outcome = h.processor.process("2", LUNCH_EMAIL);
    let verdict = outcome.verdict().unwrap();

    assert!(!verdict.is_spam);
    assert_eq!(verdict.spam.score, 0);
    assert_eq!(verdict.is_phishing, Some(false));
    assert!(h.calls.load(Ordering::SeqCst) > 0);

    // Same answer as the model's own predict on identically normalized text.
    let text = normalize_message("Team lunch Friday", "Let's meet at noon.");
    let x = h.bundle.vectorizer.transform(&text);
    assert_eq!(h.bundle.model.predict(&x).unwrap(), Label::Legitimate);
}

#[test]
fn non_spam_phishing_is_flagged() {
    let h = harness();
    let verdict = h.processor.process("3", PASSWORD_EMAIL).result.unwrap();
    assert!(!verdict.is_spam);
    assert_eq!(verdict.is_phishing, Some(true));
    assert!(verdict.phishing_probability.unwrap() > 0.5);
}

#[test]
fn empty_message_is_legitimate_not_an_error() {
    let h = harness();
    let verdict = h.processor.process("4", b"").result.unwrap();
    assert!(!verdict.is_spam);
    assert_eq!(verdict.spam.score, 0);
    assert!(verdict.is_phishing.is_some());
}

#[test]
fn cycle_classifies_every_message_and_quarantines() {
    let h = harness();
    let session = MockSession::with_messages(&[
        ("1", PHISHING_EMAIL),
        ("2", LUNCH_EMAIL),
        ("3", PASSWORD_EMAIL),
    ]);
    let sink = RecordingSink::default();
    let config = PollConfig {
        spam_folder: Some("Junk".into()),
        phishing_folder: Some("Quarantine".into()),
        ..Default::default()
    };

    let mut p = poller(session.clone(), h.processor, sink.clone(), config);
    let report = p.poll_once().unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.spam, 1);
    assert_eq!(report.phishing, 1);
    assert_eq!(report.legitimate, 1);
    assert_eq!(report.quarantined, 2);

    let state = session.state.lock().unwrap();
    assert!(state.moved.contains(&("1".to_string(), "Junk".to_string())));
    assert!(state.moved.contains(&("3".to_string(), "Quarantine".to_string())));
    assert!(state.messages.contains_key("2"));

    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
}

#[test]
fn fetch_failure_skips_only_that_message() {
    let h = harness();
    let session = MockSession::with_messages(&[("1", LUNCH_EMAIL), ("2", LUNCH_EMAIL), ("3", PHISHING_EMAIL)]);
    session.state.lock().unwrap().broken.insert("2".into());
    let sink = RecordingSink::default();

    let mut p = poller(session, h.processor, sink.clone(), PollConfig::default());
    let report = p.poll_once().unwrap();

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.fetched, 2);
    let ids: Vec<String> = sink.seen.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(ids, vec!["1", "3"]);
}

#[test]
fn failed_search_skips_cycle_and_next_cycle_runs() {
    let h = harness();
    let session = MockSession::with_messages(&[("1", LUNCH_EMAIL), ("2", PASSWORD_EMAIL)]);
    session.state.lock().unwrap().failing_searches = 1;
    let sink = RecordingSink::default();

    let mut p = poller(session, h.processor, sink.clone(), PollConfig::default());
    let skipped = p.poll_once().unwrap();
    assert_eq!(skipped, CycleReport::default());
    assert!(sink.seen.lock().unwrap().is_empty());

    let report = p.poll_once().unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(sink.seen.lock().unwrap().len(), 2);
}

#[test]
fn refused_move_leaves_other_messages_unaffected() {
    let h = harness();
    let session = MockSession::with_messages(&[
        ("1", PHISHING_EMAIL),
        ("2", LUNCH_EMAIL),
        ("3", PASSWORD_EMAIL),
    ]);
    session.state.lock().unwrap().full_folders.insert("Junk".into());
    let sink = RecordingSink::default();
    let config = PollConfig {
        spam_folder: Some("Junk".into()),
        phishing_folder: Some("Quarantine".into()),
        ..Default::default()
    };

    let mut p = poller(session.clone(), h.processor, sink.clone(), config);
    let report = p.poll_once().unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.spam, 1);
    assert_eq!(report.phishing, 1);
    assert_eq!(report.quarantined, 1);

    let state = session.state.lock().unwrap();
    assert!(state.messages.contains_key("1"));
    assert_eq!(state.moved, vec![("3".to_string(), "Quarantine".to_string())]);

    let seen = sink.seen.lock().unwrap();
    let labels: Vec<&str> = seen.iter().map(|(_, label)| label.as_str()).collect();
    assert_eq!(labels, vec!["spam", "legitimate", "phishing"]);
}

#[test]
fn lost_session_ends_the_cycle() {
    let h = harness();
    let session = MockSession::with_messages(&[("1", LUNCH_EMAIL)]);
    session.state.lock().unwrap().lost = true;

    let mut p = poller(session, h.processor, RecordingSink::default(), PollConfig::default());
    assert!(matches!(
        p.poll_once(),
        Err(PollError::SessionFatal(SessionError::Disconnected(_)))
    ));
}

#[test]
fn batch_size_caps_messages_per_cycle() {
    let h = harness();
    let messages: Vec<(String, &[u8])> = (10..30).map(|n| (n.to_string(), LUNCH_EMAIL)).collect();
    let refs: Vec<(&str, &[u8])> = messages.iter().map(|(id, raw)| (id.as_str(), *raw)).collect();
    let session = MockSession::with_messages(&refs);
    let sink = RecordingSink::default();
    let config = PollConfig {
        batch_size: 5,
        ..Default::default()
    };

    let mut p = poller(session, h.processor, sink.clone(), config);
    let report = p.poll_once().unwrap();
    assert_eq!(report.fetched, 5);
    let first = sink.seen.lock().unwrap()[0].0.clone();
    assert_eq!(first, "25");
}

#[test]
fn persisted_model_classifies_like_the_trained_one() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.json");
    let dataset_path = dir.path().join("emails.json");
    std::fs::write(&dataset_path, serde_json::to_vec(&training_corpus()).unwrap()).unwrap();

    let bundle = ModelBundle::load_or_train(&model_path, &dataset_path, DEFAULT_MAX_FEATURES).unwrap();
    let reloaded = ModelBundle::load(&model_path).unwrap();

    let classify = |b: &ModelBundle| {
        let processor =
            ThreatProcessor::from_config(&PipelineConfig::default(), b.classifier(None).unwrap())
                .unwrap();
        processor.process("1", LUNCH_EMAIL).result.unwrap().is_phishing
    };
    assert_eq!(classify(&bundle), classify(&reloaded));
    assert_eq!(classify(&reloaded), Some(false));
}
