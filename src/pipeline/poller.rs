//! Mailbox poll loop.
//!
//! Each cycle selects the mailbox, searches for candidate messages, keeps the
//! most recent `batch_size` identifiers, then fetches and classifies them one
//! at a time. Between cycles the loop samples host utilization and sleeps for
//! the interval the [`IntervalPolicy`](crate::resources::IntervalPolicy) picks.
//!
//! Cycles are blocking and run on `spawn_blocking`; the async side only sleeps
//! and waits for the shutdown signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::channels::MailboxSession;
use crate::config::PollConfig;
use crate::error::{PipelineError, PollError, SessionError};
use crate::pipeline::processor::ThreatProcessor;
use crate::pipeline::sink::VerdictSink;
use crate::pipeline::types::{ClassificationOutcome, CycleReport, VerdictKind};
use crate::resources::{ResourceProbe, SystemProbe};

/// Cooperative shutdown flag shared between the signal handler and the loop.
///
/// Checked between cycles and between messages; never interrupts a
/// classification in progress.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Interrupted,
}

pub struct Poller {
    session: Box<dyn MailboxSession>,
    processor: ThreatProcessor,
    sink: Box<dyn VerdictSink>,
    probe: Box<dyn ResourceProbe>,
    mailbox: String,
    config: PollConfig,
    shutdown: ShutdownHandle,
}

impl Poller {
    pub fn new(
        session: Box<dyn MailboxSession>,
        processor: ThreatProcessor,
        sink: Box<dyn VerdictSink>,
        mailbox: impl Into<String>,
        config: PollConfig,
    ) -> Self {
        Self {
            session,
            processor,
            sink,
            probe: Box::new(SystemProbe::new()),
            mailbox: mailbox.into(),
            config,
            shutdown: ShutdownHandle::default(),
        }
    }

    /// Replace the host utilization probe.
    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Handle that stops this poller when triggered.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run cycles until shutdown is triggered or the session is lost.
    pub async fn run(mut self) -> Result<LoopExit, PollError> {
        info!(
            mailbox = %self.mailbox,
            mode = self.config.fetch_mode.search_criterion(),
            batch_size = self.config.batch_size,
            base_secs = self.config.interval.base.as_secs(),
            backoff_secs = self.config.interval.backoff.as_secs(),
            high_water = self.config.interval.high_water_percent,
            "Poll loop started"
        );
        let shutdown = self.shutdown.clone();

        while !shutdown.is_triggered() {
            let (poller, result) = tokio::task::spawn_blocking(move || {
                let result = self.poll_once();
                (self, result)
            })
            .await
            .map_err(|e| PollError::Worker(e.to_string()))?;
            self = poller;

            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "Poll loop stopping");
                    return Err(e);
                }
            };

            let sample = self.probe.sample();
            let interval = self.config.interval.next_interval(&sample);
            info!(
                fetched = report.fetched,
                spam = report.spam,
                phishing = report.phishing,
                legitimate = report.legitimate,
                unclassified = report.unclassified,
                fetch_failures = report.fetch_failures,
                quarantined = report.quarantined,
                cpu_percent = sample.cpu_percent,
                memory_percent = sample.memory_percent,
                under_pressure = self.config.interval.under_pressure(&sample),
                next_interval_secs = interval.as_secs_f64(),
                "Poll cycle complete"
            );

            tokio::select! {
                biased;
                _ = shutdown.wait() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Shutdown requested, closing mailbox session");
        let mut session = self.session;
        match tokio::task::spawn_blocking(move || session.logout()).await {
            Ok(Ok(())) => debug!("Logged out"),
            Ok(Err(e)) => warn!(error = %e, "Logout failed"),
            Err(e) => warn!(error = %e, "Logout task failed"),
        }
        Ok(LoopExit::Interrupted)
    }

    /// Run a single cycle synchronously.
    ///
    /// Per-message failures are counted in the report. Only a fatal session
    /// error ends the cycle with `Err`.
    pub fn poll_once(&mut self) -> Result<CycleReport, PollError> {
        let mut report = CycleReport::default();

        let ids = match self.candidate_ids() {
            Ok(ids) => ids,
            Err(e) if e.is_fatal() => return Err(PollError::SessionFatal(e)),
            Err(e) => {
                warn!(mailbox = %self.mailbox, error = %e, "Mailbox search failed, skipping cycle");
                return Ok(report);
            }
        };
        debug!(count = ids.len(), "Messages selected for this cycle");

        for id in ids {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested mid-cycle, leaving remaining messages");
                break;
            }

            let raw = match self.session.fetch(&id) {
                Ok(raw) => raw,
                Err(e) if e.is_fatal() => return Err(PollError::SessionFatal(e)),
                Err(source) => {
                    report.fetch_failures += 1;
                    let err = PipelineError::Fetch { id, source };
                    warn!(error = %err, "Skipping message");
                    continue;
                }
            };
            report.fetched += 1;

            let outcome = self.processor.process(&id, &raw);
            report.record(&outcome);
            self.sink.publish(&outcome);

            if let Some(folder) = self.quarantine_folder(&outcome) {
                match self.session.move_to(&id, &folder) {
                    Ok(()) => {
                        report.quarantined += 1;
                        info!(id = %id, folder = %folder, verdict = outcome.label(), "Message quarantined");
                    }
                    Err(e) if e.is_fatal() => return Err(PollError::SessionFatal(e)),
                    Err(source) => {
                        let err = PipelineError::Quarantine { id, source };
                        warn!(error = %err, "Quarantine failed");
                    }
                }
            }
        }

        Ok(report)
    }

    fn candidate_ids(&mut self) -> Result<Vec<String>, SessionError> {
        self.session.select(&self.mailbox)?;
        let mut ids = self.session.search(self.config.fetch_mode.search_criterion())?;
        let keep_from = ids.len().saturating_sub(self.config.batch_size);
        Ok(ids.split_off(keep_from))
    }

    fn quarantine_folder(&self, outcome: &ClassificationOutcome) -> Option<String> {
        match outcome.kind() {
            VerdictKind::Spam => self.config.spam_folder.clone(),
            VerdictKind::Phishing => self.config.phishing_folder.clone(),
            VerdictKind::Legitimate | VerdictKind::Unclassified => None,
        }
    }
}
