//! Trained phishing model: vectorizer + naive Bayes, persisted as JSON.
//!
//! Label contract for datasets and model files: `1` = threat (phishing),
//! `0` = legitimate. A bundle recording any other convention is refused.

pub mod naive_bayes;
pub mod vectorizer;

pub use naive_bayes::{DEFAULT_ALPHA, MultinomialNb};
pub use vectorizer::CountVectorizer;

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ClassifierError, ModelError};
use crate::pipeline::classifier::PhishingClassifier;
use crate::pipeline::normalize::normalize_message;
use crate::pipeline::types::Label;

/// Vocabulary cap used when fitting the vectorizer.
pub const DEFAULT_MAX_FEATURES: usize = 1000;

/// The only label convention this crate reads or writes.
pub const LABEL_CONVENTION: &str = "1=threat,0=legitimate";

/// One labeled training message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    /// `1` for phishing, `0` for legitimate.
    pub label: u8,
}

impl TrainingExample {
    /// The normalized document the vectorizer sees.
    pub fn document(&self) -> String {
        normalize_message(self.subject.as_deref().unwrap_or(""), &self.body)
    }
}

/// Read a JSON array of [`TrainingExample`]s.
pub fn load_dataset(path: &Path) -> Result<Vec<TrainingExample>, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound(path.display().to_string()));
    }
    let reader = BufReader::new(File::open(path)?);
    let examples: Vec<TrainingExample> = serde_json::from_reader(reader)?;
    Ok(examples)
}

/// A fitted vectorizer and model, plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub label_convention: String,
    pub trained_at: DateTime<Utc>,
    pub examples: usize,
    pub vectorizer: CountVectorizer,
    pub model: MultinomialNb,
}

impl ModelBundle {
    /// Fit a vectorizer and model on labeled examples.
    pub fn train(examples: &[TrainingExample], max_features: usize) -> Result<Self, ModelError> {
        let mut documents = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        for (i, example) in examples.iter().enumerate() {
            let label = Label::from_index(example.label).ok_or_else(|| {
                ModelError::Dataset(format!(
                    "example {i} has label {} (expected 0 or 1)",
                    example.label
                ))
            })?;
            documents.push(example.document());
            labels.push(label);
        }

        let vectorizer = CountVectorizer::fit(&documents, max_features)?;
        let vectors = vectorizer.transform_all(&documents);
        let model = MultinomialNb::fit(&vectors, &labels, DEFAULT_ALPHA)?;

        info!(
            examples = examples.len(),
            vocabulary = vectorizer.len(),
            threats = model.class_count(Label::Threat),
            legitimate = model.class_count(Label::Legitimate),
            "Trained phishing model"
        );

        Ok(Self {
            label_convention: LABEL_CONVENTION.to_string(),
            trained_at: Utc::now(),
            examples: examples.len(),
            vectorizer,
            model,
        })
    }

    /// Read a bundle from disk.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.display().to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let bundle: Self = serde_json::from_reader(reader)?;
        if bundle.label_convention != LABEL_CONVENTION {
            return Err(ModelError::LabelConvention {
                expected: LABEL_CONVENTION.to_string(),
                found: bundle.label_convention,
            });
        }
        info!(
            path = %path.display(),
            vocabulary = bundle.vectorizer.len(),
            trained_at = %bundle.trained_at,
            "Model and vectorizer loaded"
        );
        Ok(bundle)
    }

    /// Write the bundle to disk, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Serialize fully before truncating the target.
        let bytes = serde_json::to_vec(self)?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        info!(path = %path.display(), "Model and vectorizer saved");
        Ok(())
    }

    /// Load the persisted model, or train one from the dataset and persist it.
    pub fn load_or_train(
        model_path: &Path,
        dataset_path: &Path,
        max_features: usize,
    ) -> Result<Self, ModelError> {
        if model_path.exists() {
            info!(path = %model_path.display(), "Loading existing model");
            return Self::load(model_path);
        }
        warn!(
            model = %model_path.display(),
            dataset = %dataset_path.display(),
            "No model found, training from dataset"
        );
        let examples = load_dataset(dataset_path)?;
        let bundle = Self::train(&examples, max_features)?;
        bundle.save(model_path)?;
        Ok(bundle)
    }

    /// Build a classifier that shares this bundle's vectorizer and model.
    pub fn classifier(&self, threshold: Option<f64>) -> Result<PhishingClassifier, ClassifierError> {
        Ok(PhishingClassifier::new(
            Arc::new(self.vectorizer.clone()),
            Arc::new(self.model.clone()),
        )?
        .with_threshold(threshold))
    }
}
