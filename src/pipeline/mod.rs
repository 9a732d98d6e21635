//! Two-stage mail threat classification pipeline.
//!
//! Every fetched message flows through:
//! 1. `ContentExtractor::extract()`: MIME parsing, never fails
//! 2. `SpamScorer::evaluate()`: cheap indicator heuristics, may short-circuit
//! 3. `PhishingClassifier::classify()`: vectorizer + trained model, non-spam only
//! 4. `VerdictSink::publish()`: log, console line, audit record
//!
//! `Poller` drives the whole thing against a mailbox session.

pub mod classifier;
pub mod extract;
pub mod normalize;
pub mod poller;
pub mod processor;
pub mod rules;
pub mod sink;
pub mod types;
