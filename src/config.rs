//! Configuration types.
//!
//! Everything is read from `MAILGUARD_*` environment variables with defaults.
//! Parsing goes through a lookup function so tests never touch the process env.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::model::DEFAULT_MAX_FEATURES;
use crate::pipeline::rules::{DEFAULT_SPAM_THRESHOLD, DEFAULT_SUSPICIOUS_EXTENSIONS};
use crate::resources::IntervalPolicy;

/// Which messages a poll cycle fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Every message without the `\Seen` flag (capped at the batch size).
    Unseen,
    /// The most recent `batch_size` messages, seen or not.
    Recent,
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unseen" => Ok(Self::Unseen),
            "recent" | "all" => Ok(Self::Recent),
            other => Err(format!("expected \"unseen\" or \"recent\", got {other:?}")),
        }
    }
}

impl FetchMode {
    /// IMAP SEARCH criterion for this mode.
    pub fn search_criterion(&self) -> &'static str {
        match self {
            Self::Unseen => "UNSEEN",
            Self::Recent => "ALL",
        }
    }
}

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
}

impl EmailConfig {
    /// Build from environment variables.
    /// Returns `None` if `MAILGUARD_IMAP_HOST` is not set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let Some(imap_host) = non_empty(lookup, "MAILGUARD_IMAP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            imap_host,
            imap_port: parse_or(lookup, "MAILGUARD_IMAP_PORT", 993)?,
            username: non_empty(lookup, "MAILGUARD_USERNAME").unwrap_or_default(),
            password: SecretString::from(
                non_empty(lookup, "MAILGUARD_PASSWORD").unwrap_or_default(),
            ),
            mailbox: non_empty(lookup, "MAILGUARD_MAILBOX").unwrap_or_else(|| "INBOX".into()),
        }))
    }
}

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub fetch_mode: FetchMode,
    /// Upper bound on messages processed per cycle.
    pub batch_size: usize,
    pub interval: IntervalPolicy,
    /// Destination folder for confirmed phishing. `None` leaves messages in place.
    pub phishing_folder: Option<String>,
    /// Destination folder for spam. `None` leaves messages in place.
    pub spam_folder: Option<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            fetch_mode: FetchMode::Unseen,
            batch_size: 10,
            interval: IntervalPolicy::default(),
            phishing_folder: None,
            spam_folder: None,
        }
    }
}

/// Extraction and classification settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Accept `text/html` parts (markup stripped) when scanning for a body.
    pub scan_html: bool,
    /// Spam iff the indicator score is strictly greater than this.
    pub spam_threshold: usize,
    /// Indicator phrases added to the built-in set.
    pub extra_indicators: Vec<String>,
    pub suspicious_extensions: Vec<String>,
    /// When set, a message is phishing iff P(threat) >= threshold instead of
    /// following the model's discrete label.
    pub phishing_threshold: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan_html: false,
            spam_threshold: DEFAULT_SPAM_THRESHOLD,
            extra_indicators: Vec::new(),
            suspicious_extensions: DEFAULT_SUSPICIOUS_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            phishing_threshold: None,
        }
    }
}

/// Model bundle locations.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    /// Dataset used to train a fresh model when `model_path` does not exist.
    pub dataset_path: PathBuf,
    pub max_features: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("phishing_model.json"),
            dataset_path: PathBuf::from("emails.json"),
            max_features: DEFAULT_MAX_FEATURES,
        }
    }
}

/// Verdict output and operator log settings.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Print one human-readable line per verdict on stdout.
    pub console: bool,
    /// Append-only JSON-lines verdict file.
    pub audit_log: Option<PathBuf>,
    /// Directory for the rolling operator log.
    pub log_dir: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            console: true,
            audit_log: None,
            log_dir: PathBuf::from("./logs"),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub email: Option<EmailConfig>,
    pub poll: PollConfig,
    pub pipeline: PipelineConfig,
    pub model: ModelConfig,
    pub sink: SinkConfig,
}

impl AppConfig {
    /// Build config from `MAILGUARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let poll_defaults = PollConfig::default();
        let interval = IntervalPolicy {
            base: Duration::from_secs(parse_or(
                lookup,
                "MAILGUARD_POLL_INTERVAL_SECS",
                poll_defaults.interval.base.as_secs(),
            )?),
            backoff: Duration::from_secs(parse_or(
                lookup,
                "MAILGUARD_BACKOFF_INTERVAL_SECS",
                poll_defaults.interval.backoff.as_secs(),
            )?),
            high_water_percent: parse_or(
                lookup,
                "MAILGUARD_HIGH_WATER_PERCENT",
                poll_defaults.interval.high_water_percent,
            )?,
        };
        if !(0.0..=100.0).contains(&interval.high_water_percent) {
            return Err(ConfigError::InvalidValue {
                key: "MAILGUARD_HIGH_WATER_PERCENT".into(),
                message: "must be between 0 and 100".into(),
            });
        }

        let batch_size: usize = parse_or(lookup, "MAILGUARD_BATCH_SIZE", poll_defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILGUARD_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        let poll = PollConfig {
            fetch_mode: parse_or(lookup, "MAILGUARD_FETCH_MODE", poll_defaults.fetch_mode)?,
            batch_size,
            interval,
            phishing_folder: non_empty(lookup, "MAILGUARD_PHISHING_FOLDER"),
            spam_folder: non_empty(lookup, "MAILGUARD_SPAM_FOLDER"),
        };

        let pipeline_defaults = PipelineConfig::default();
        let suspicious_extensions = match non_empty(lookup, "MAILGUARD_SUSPICIOUS_EXTENSIONS") {
            Some(raw) => split_list(&raw)
                .into_iter()
                .map(|ext| {
                    if ext.starts_with('.') {
                        ext
                    } else {
                        format!(".{ext}")
                    }
                })
                .collect(),
            None => pipeline_defaults.suspicious_extensions,
        };
        let phishing_threshold = match non_empty(lookup, "MAILGUARD_PHISHING_THRESHOLD") {
            Some(raw) => {
                let value: f64 = parse_value("MAILGUARD_PHISHING_THRESHOLD", &raw)?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigError::InvalidValue {
                        key: "MAILGUARD_PHISHING_THRESHOLD".into(),
                        message: "must be a probability between 0 and 1".into(),
                    });
                }
                Some(value)
            }
            None => None,
        };
        let pipeline = PipelineConfig {
            scan_html: parse_or(lookup, "MAILGUARD_SCAN_HTML", pipeline_defaults.scan_html)?,
            spam_threshold: parse_or(
                lookup,
                "MAILGUARD_SPAM_THRESHOLD",
                pipeline_defaults.spam_threshold,
            )?,
            extra_indicators: non_empty(lookup, "MAILGUARD_EXTRA_INDICATORS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            suspicious_extensions,
            phishing_threshold,
        };

        let model_defaults = ModelConfig::default();
        let model = ModelConfig {
            model_path: non_empty(lookup, "MAILGUARD_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(model_defaults.model_path),
            dataset_path: non_empty(lookup, "MAILGUARD_DATASET_PATH")
                .map(PathBuf::from)
                .unwrap_or(model_defaults.dataset_path),
            max_features: parse_or(
                lookup,
                "MAILGUARD_MAX_FEATURES",
                model_defaults.max_features,
            )?,
        };

        let sink_defaults = SinkConfig::default();
        let sink = SinkConfig {
            console: parse_or(lookup, "MAILGUARD_CONSOLE", sink_defaults.console)?,
            audit_log: non_empty(lookup, "MAILGUARD_AUDIT_LOG").map(PathBuf::from),
            log_dir: non_empty(lookup, "MAILGUARD_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(sink_defaults.log_dir),
        };

        Ok(Self {
            email: EmailConfig::from_lookup(lookup)?,
            poll,
            pipeline,
            model,
            sink,
        })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn non_empty(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_or<T>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_variables() {
        let config = AppConfig::from_lookup(&lookup_from(&[])).unwrap();
        assert!(config.email.is_none());
        assert_eq!(config.poll.fetch_mode, FetchMode::Unseen);
        assert_eq!(config.poll.batch_size, 10);
        assert_eq!(config.poll.interval, IntervalPolicy::default());
        assert_eq!(config.pipeline.spam_threshold, 1);
        assert!(!config.pipeline.scan_html);
        assert_eq!(
            config.pipeline.suspicious_extensions,
            vec![".exe", ".bat", ".cmd"]
        );
        assert!(config.pipeline.phishing_threshold.is_none());
        assert_eq!(config.model.model_path, PathBuf::from("phishing_model.json"));
        assert!(config.sink.console);
    }

    #[test]
    fn email_config_from_variables() {
        let config = AppConfig::from_lookup(&lookup_from(&[
            ("MAILGUARD_IMAP_HOST", "imap.example.com"),
            ("MAILGUARD_USERNAME", "alice@example.com"),
            ("MAILGUARD_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        let email = config.email.unwrap();
        assert_eq!(email.imap_host, "imap.example.com");
        assert_eq!(email.imap_port, 993);
        assert_eq!(email.username, "alice@example.com");
        assert_eq!(email.password.expose_secret(), "hunter2");
        assert_eq!(email.mailbox, "INBOX");
    }

    #[test]
    fn poll_settings_override() {
        let config = AppConfig::from_lookup(&lookup_from(&[
            ("MAILGUARD_FETCH_MODE", "recent"),
            ("MAILGUARD_BATCH_SIZE", "25"),
            ("MAILGUARD_POLL_INTERVAL_SECS", "30"),
            ("MAILGUARD_BACKOFF_INTERVAL_SECS", "300"),
            ("MAILGUARD_HIGH_WATER_PERCENT", "70"),
            ("MAILGUARD_PHISHING_FOLDER", "Quarantine"),
        ]))
        .unwrap();
        assert_eq!(config.poll.fetch_mode, FetchMode::Recent);
        assert_eq!(config.poll.batch_size, 25);
        assert_eq!(config.poll.interval.base, Duration::from_secs(30));
        assert_eq!(config.poll.interval.backoff, Duration::from_secs(300));
        assert_eq!(config.poll.interval.high_water_percent, 70.0);
        assert_eq!(config.poll.phishing_folder.as_deref(), Some("Quarantine"));
        assert!(config.poll.spam_folder.is_none());
    }

    #[test]
    fn pipeline_settings_override() {
        let config = AppConfig::from_lookup(&lookup_from(&[
            ("MAILGUARD_SCAN_HTML", "true"),
            ("MAILGUARD_SPAM_THRESHOLD", "2"),
            ("MAILGUARD_EXTRA_INDICATORS", "wire transfer, gift card ,"),
            ("MAILGUARD_SUSPICIOUS_EXTENSIONS", "exe,.js, scr"),
            ("MAILGUARD_PHISHING_THRESHOLD", "0.75"),
        ]))
        .unwrap();
        assert!(config.pipeline.scan_html);
        assert_eq!(config.pipeline.spam_threshold, 2);
        assert_eq!(
            config.pipeline.extra_indicators,
            vec!["wire transfer", "gift card"]
        );
        assert_eq!(
            config.pipeline.suspicious_extensions,
            vec![".exe", ".js", ".scr"]
        );
        assert_eq!(config.pipeline.phishing_threshold, Some(0.75));
    }

    #[test]
    fn invalid_number_is_reported_with_key() {
        let err = AppConfig::from_lookup(&lookup_from(&[("MAILGUARD_BATCH_SIZE", "lots")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "MAILGUARD_BATCH_SIZE"),
            other => panic!("Expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(AppConfig::from_lookup(&lookup_from(&[("MAILGUARD_BATCH_SIZE", "0")])).is_err());
    }

    #[test]
    fn out_of_range_thresholds_rejected() {
        assert!(
            AppConfig::from_lookup(&lookup_from(&[("MAILGUARD_PHISHING_THRESHOLD", "1.5")]))
                .is_err()
        );
        assert!(
            AppConfig::from_lookup(&lookup_from(&[("MAILGUARD_HIGH_WATER_PERCENT", "150")]))
                .is_err()
        );
    }

    #[test]
    fn unknown_fetch_mode_rejected() {
        assert!("newest".parse::<FetchMode>().is_err());
        assert_eq!("UNSEEN".parse::<FetchMode>(), Ok(FetchMode::Unseen));
        assert_eq!(FetchMode::Recent.search_criterion(), "ALL");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = AppConfig::from_lookup(&lookup_from(&[
            ("MAILGUARD_IMAP_HOST", "   "),
            ("MAILGUARD_BATCH_SIZE", ""),
        ]))
        .unwrap();
        assert!(config.email.is_none());
        assert_eq!(config.poll.batch_size, 10);
    }
}
