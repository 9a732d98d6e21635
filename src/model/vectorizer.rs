//! Bag-of-words count vectorizer.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::pipeline::classifier::{FeatureVector, Vectorizer};

/// Tokens shorter than this (in chars) are not part of the vocabulary.
const MIN_TOKEN_CHARS: usize = 2;

/// Term-count vectorizer over a vocabulary fitted on normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountVectorizer {
    /// Term → column index. Indices follow alphabetical order.
    vocabulary: BTreeMap<String, usize>,
}

fn tokens(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
}

impl CountVectorizer {
    /// Fit a vocabulary of the `max_features` most frequent terms.
    ///
    /// Ties in corpus frequency are broken alphabetically.
    pub fn fit<S: AsRef<str>>(documents: &[S], max_features: usize) -> Result<Self, ModelError> {
        if max_features == 0 {
            return Err(ModelError::Training("max_features must be at least 1".into()));
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for doc in documents {
            for token in tokens(doc.as_ref()) {
                *counts.entry(token).or_default() += 1;
            }
        }
        if counts.is_empty() {
            return Err(ModelError::Training(
                "no usable tokens in training documents".into(),
            ));
        }

        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(max_features);

        let mut terms: Vec<&str> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort_unstable();
        let vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect();

        Ok(Self { vocabulary })
    }

    pub fn vocabulary(&self) -> &BTreeMap<String, usize> {
        &self.vocabulary
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// Vectorize many documents.
    pub fn transform_all<S: AsRef<str>>(&self, documents: &[S]) -> Vec<FeatureVector> {
        documents
            .iter()
            .map(|d| self.transform(d.as_ref()))
            .collect()
    }
}

impl Vectorizer for CountVectorizer {
    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    fn transform(&self, normalized: &str) -> FeatureVector {
        let mut vector = FeatureVector::zeros(self.vocabulary.len());
        let values = vector.values_mut();
        for token in tokens(normalized) {
            if let Some(&index) = self.vocabulary.get(token) {
                values[index] += 1.0;
            }
        }
        vector
    }
}
