//! Two-class multinomial naive Bayes.

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, ModelError};
use crate::pipeline::classifier::{FeatureVector, ThreatModel};
use crate::pipeline::types::{ClassProbabilities, Label};

/// Additive (Laplace) smoothing used by the trainer.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// Multinomial naive Bayes over term counts.
///
/// Per-class arrays are indexed by [`Label::as_index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultinomialNb {
    alpha: f64,
    class_count: [usize; 2],
    class_log_prior: [f64; 2],
    feature_log_prob: [Vec<f64>; 2],
}

impl MultinomialNb {
    /// Fit on term-count vectors. Both classes must be present.
    pub fn fit(
        vectors: &[FeatureVector],
        labels: &[Label],
        alpha: f64,
    ) -> Result<Self, ModelError> {
        if vectors.len() != labels.len() {
            return Err(ModelError::Training(format!(
                "{} vectors but {} labels",
                vectors.len(),
                labels.len()
            )));
        }
        if alpha.is_nan() || alpha <= 0.0 {
            return Err(ModelError::Training("alpha must be positive".into()));
        }
        let Some(first) = vectors.first() else {
            return Err(ModelError::Training("no training examples".into()));
        };
        let n_features = first.dimension();

        let mut class_count = [0usize; 2];
        let mut feature_count = [vec![0.0; n_features], vec![0.0; n_features]];
        for (vector, label) in vectors.iter().zip(labels) {
            if vector.dimension() != n_features {
                return Err(ModelError::Training(format!(
                    "inconsistent vector dimension {} (expected {n_features})",
                    vector.dimension()
                )));
            }
            let c = label.as_index();
            class_count[c] += 1;
            for (acc, value) in feature_count[c].iter_mut().zip(vector.values()) {
                *acc += value;
            }
        }

        if class_count.contains(&0) {
            return Err(ModelError::Training(format!(
                "need examples of both classes (legitimate: {}, threat: {})",
                class_count[0], class_count[1]
            )));
        }

        let total = vectors.len() as f64;
        let class_log_prior = class_count.map(|n| (n as f64 / total).ln());
        let feature_log_prob = feature_count.map(|counts| {
            let denom = counts.iter().sum::<f64>() + alpha * n_features as f64;
            counts
                .iter()
                .map(|c| ((c + alpha) / denom).ln())
                .collect::<Vec<f64>>()
        });

        Ok(Self {
            alpha,
            class_count,
            class_log_prior,
            feature_log_prob,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Training examples seen per class.
    pub fn class_count(&self, label: Label) -> usize {
        self.class_count[label.as_index()]
    }

    fn check_dimension(&self, features: &FeatureVector) -> Result<(), ClassifierError> {
        let expected = self.n_features();
        if features.dimension() != expected {
            return Err(ClassifierError::DimensionMismatch {
                expected,
                got: features.dimension(),
            });
        }
        Ok(())
    }

    fn joint_log_likelihood(&self, features: &FeatureVector) -> Result<[f64; 2], ClassifierError> {
        self.check_dimension(features)?;
        Ok(Label::ALL.map(|label| {
            let c = label.as_index();
            self.class_log_prior[c]
                + features
                    .values()
                    .iter()
                    .zip(&self.feature_log_prob[c])
                    .map(|(x, lp)| x * lp)
                    .sum::<f64>()
        }))
    }
}

impl ThreatModel for MultinomialNb {
    fn n_features(&self) -> usize {
        self.feature_log_prob[0].len()
    }

    fn predict(&self, features: &FeatureVector) -> Result<Label, ClassifierError> {
        Ok(self.predict_proba(features)?.argmax())
    }

    fn predict_proba(&self, features: &FeatureVector) -> Result<ClassProbabilities, ClassifierError> {
        let jll = self.joint_log_likelihood(features)?;
        // log-sum-exp
        let max = jll[0].max(jll[1]);
        let exp = jll.map(|v| (v - max).exp());
        let sum = exp[0] + exp[1];
        if !sum.is_finite() || sum <= 0.0 {
            return Err(ClassifierError::Inference(format!(
                "degenerate likelihoods {jll:?}"
            )));
        }
        Ok(ClassProbabilities {
            legitimate: exp[Label::Legitimate.as_index()] / sum,
            threat: exp[Label::Threat.as_index()] / sum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f64]) -> FeatureVector {
        FeatureVector::new(values.to_vec())
    }

    /// Feature 0 = "verify", feature 1 = "lunch".
    fn trained() -> MultinomialNb {
        MultinomialNb::fit(
            &[v(&[3.0, 0.0]), v(&[2.0, 0.0]), v(&[0.0, 2.0]), v(&[0.0, 3.0])],
            &[Label::Threat, Label::Threat, Label::Legitimate, Label::Legitimate],
            DEFAULT_ALPHA,
        )
        .unwrap()
    }

    #[test]
    fn predicts_by_dominant_feature() {
        let model = trained();
        assert_eq!(model.predict(&v(&[2.0, 0.0])).unwrap(), Label::Threat);
        assert_eq!(model.predict(&v(&[0.0, 1.0])).unwrap(), Label::Legitimate);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let model = trained();
        for x in [v(&[1.0, 0.0]), v(&[0.0, 4.0]), v(&[0.0, 0.0]), v(&[50.0, 49.0])] {
            let p = model.predict_proba(&x).unwrap();
            assert!((p.legitimate + p.threat - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn predict_agrees_with_proba() {
        let model = trained();
        let x = v(&[1.0, 0.0]);
        let p = model.predict_proba(&x).unwrap();
        assert!(p.threat > 0.5);
        assert_eq!(model.predict(&x).unwrap(), p.argmax());
    }

    #[test]
    fn zero_vector_falls_back_to_priors() {
        let model = MultinomialNb::fit(
            &[v(&[1.0]), v(&[1.0]), v(&[1.0])],
            &[Label::Legitimate, Label::Legitimate, Label::Threat],
            DEFAULT_ALPHA,
        )
        .unwrap();
        let p = model.predict_proba(&v(&[0.0])).unwrap();
        assert!((p.legitimate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(model.class_count(Label::Legitimate), 2);
    }

    #[test]
    fn wrong_dimension_is_an_error() {
        let err = trained().predict(&v(&[1.0])).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::DimensionMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn single_class_training_rejected() {
        assert!(
            MultinomialNb::fit(&[v(&[1.0])], &[Label::Threat], DEFAULT_ALPHA).is_err()
        );
        assert!(MultinomialNb::fit(&[], &[], DEFAULT_ALPHA).is_err());
        assert!(
            MultinomialNb::fit(&[v(&[1.0])], &[Label::Threat, Label::Legitimate], 1.0).is_err()
        );
    }
}
