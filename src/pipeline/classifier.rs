//! Phishing classifier.
//!
//! Vectorizes normalized text and asks a trained model for a label and
//! per-class probabilities. The vectorizer and model are injected; this
//! component holds no training logic and never mutates either.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClassifierError;
use crate::pipeline::types::{ClassProbabilities, Label, PhishingOutcome};

/// Fixed-dimension numeric encoding of normalized text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(dimension: usize) -> Self {
        Self(vec![0.0; dimension])
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.0
    }

    /// Number of non-zero entries.
    pub fn non_zero(&self) -> usize {
        self.0.iter().filter(|v| **v != 0.0).count()
    }
}

/// Maps normalized text onto a fitted vocabulary.
///
/// Input must come from [`crate::pipeline::normalize::normalize`], the same
/// function used when the vocabulary was fitted.
pub trait Vectorizer: Send + Sync {
    /// Dimension of every vector this vectorizer produces.
    fn dimension(&self) -> usize;

    fn transform(&self, normalized: &str) -> FeatureVector;
}

/// A trained two-class model.
pub trait ThreatModel: Send + Sync {
    /// Dimension of the feature vectors the model was trained on.
    fn n_features(&self) -> usize;

    fn predict(&self, features: &FeatureVector) -> Result<Label, ClassifierError>;

    fn predict_proba(&self, features: &FeatureVector) -> Result<ClassProbabilities, ClassifierError>;
}

/// Phishing classifier over an injected vectorizer and model.
#[derive(Clone)]
pub struct PhishingClassifier {
    vectorizer: Arc<dyn Vectorizer>,
    model: Arc<dyn ThreatModel>,
    threshold: Option<f64>,
}

impl PhishingClassifier {
    /// Pair a vectorizer with a model. Their dimensions must agree.
    pub fn new(
        vectorizer: Arc<dyn Vectorizer>,
        model: Arc<dyn ThreatModel>,
    ) -> Result<Self, ClassifierError> {
        if vectorizer.dimension() == 0 {
            return Err(ClassifierError::NotFitted(
                "vectorizer has an empty vocabulary".into(),
            ));
        }
        if vectorizer.dimension() != model.n_features() {
            return Err(ClassifierError::DimensionMismatch {
                expected: model.n_features(),
                got: vectorizer.dimension(),
            });
        }
        Ok(Self {
            vectorizer,
            model,
            threshold: None,
        })
    }

    /// Decide by `P(threat) >= threshold` instead of the model's label.
    pub fn with_threshold(mut self, threshold: Option<f64>) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn dimension(&self) -> usize {
        self.vectorizer.dimension()
    }

    /// Vectorize normalized text with the fitted vocabulary.
    pub fn vectorize(&self, normalized: &str) -> Result<FeatureVector, ClassifierError> {
        let features = self.vectorizer.transform(normalized);
        if features.dimension() != self.vectorizer.dimension() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.vectorizer.dimension(),
                got: features.dimension(),
            });
        }
        Ok(features)
    }

    /// Classify normalized text.
    pub fn classify(&self, normalized: &str) -> Result<PhishingOutcome, ClassifierError> {
        let features = self.vectorize(normalized)?;
        let label = self.model.predict(&features)?;
        let probabilities = self.model.predict_proba(&features)?;

        let is_phishing = match self.threshold {
            Some(threshold) => probabilities.threat >= threshold,
            None => label.is_threat(),
        };

        debug!(
            dimension = features.dimension(),
            non_zero = features.non_zero(),
            ?label,
            p_threat = probabilities.threat,
            p_legitimate = probabilities.legitimate,
            "Phishing classifier prediction"
        );

        Ok(PhishingOutcome {
            label,
            probabilities,
            is_phishing,
        })
    }
}
