use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mailguard::channels::ImapSession;
use mailguard::config::{AppConfig, SinkConfig};
use mailguard::error::{ConfigError, PollError};
use mailguard::model::{ModelBundle, load_dataset};
use mailguard::pipeline::poller::{LoopExit, Poller};
use mailguard::pipeline::processor::ThreatProcessor;
use mailguard::pipeline::sink::{ConsoleSink, VerdictSink};

const EXIT_SESSION_FATAL: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(version, about = "Two-stage spam and phishing classifier for an IMAP mailbox")]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Poll the configured mailbox until interrupted (default).
    Watch,
    /// Classify one raw message from disk.
    Check { file: PathBuf },
    /// Fit a model from a labeled JSON dataset and save it.
    Train {
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long = "max-features")]
        max_features: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Error: failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match init_tracing(&config.sink, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(config).await,
        Command::Check { file } => check(&config, &file).map(|()| ExitCode::SUCCESS),
        Command::Train {
            dataset,
            output,
            max_features,
        } => train(&config, dataset, output, max_features).map(|()| ExitCode::SUCCESS),
    };

    result.unwrap_or_else(|e| {
        error!(error = %format!("{e:#}"), "mailguard failed");
        eprintln!("Error: {e:#}");
        ExitCode::FAILURE
    })
}

/// Console on stderr plus a daily-rotated file under the log directory.
fn init_tracing(
    sink: &SinkConfig,
    verbose: bool,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&sink.log_dir)
        .with_context(|| format!("creating log directory {}", sink.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&sink.log_dir, "mailguard.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("initializing tracing")?;

    Ok(guard)
}

fn load_processor(config: &AppConfig) -> anyhow::Result<ThreatProcessor> {
    let bundle = ModelBundle::load_or_train(
        &config.model.model_path,
        &config.model.dataset_path,
        config.model.max_features,
    )
    .context("loading phishing model")?;
    let classifier = bundle
        .classifier(config.pipeline.phishing_threshold)
        .context("building phishing classifier")?;
    ThreatProcessor::from_config(&config.pipeline, classifier).context("compiling spam indicators")
}

fn build_sink(config: &SinkConfig) -> anyhow::Result<ConsoleSink> {
    let sink = ConsoleSink::new(config.console);
    match &config.audit_log {
        Some(path) => sink
            .with_audit_log(path)
            .with_context(|| format!("opening audit log {}", path.display())),
        None => Ok(sink),
    }
}

async fn watch(config: AppConfig) -> anyhow::Result<ExitCode> {
    let Some(email) = config.email.clone() else {
        return Err(ConfigError::MissingEnvVar("MAILGUARD_IMAP_HOST".into()).into());
    };

    let processor = load_processor(&config)?;
    let sink = build_sink(&config.sink)?;

    let connect_config = email.clone();
    let session = match tokio::task::spawn_blocking(move || ImapSession::connect(&connect_config))
        .await
        .context("IMAP connect task failed")?
    {
        Ok(session) => session,
        Err(e) => {
            error!(host = %email.imap_host, error = %e, "Could not open mailbox session");
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(EXIT_SESSION_FATAL));
        }
    };

    let poller = Poller::new(
        Box::new(session),
        processor,
        Box::new(sink),
        email.mailbox.clone(),
        config.poll.clone(),
    );

    let shutdown = poller.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
            shutdown.trigger();
        }
    });

    match poller.run().await {
        Ok(LoopExit::Interrupted) => Ok(ExitCode::from(EXIT_INTERRUPTED)),
        Err(PollError::SessionFatal(e)) => {
            eprintln!("Error: mailbox session lost: {e}");
            Ok(ExitCode::from(EXIT_SESSION_FATAL))
        }
        Err(e) => Err(e.into()),
    }
}

fn check(config: &AppConfig, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let processor = load_processor(config)?;
    let mut sink = build_sink(&SinkConfig {
        console: true,
        ..config.sink.clone()
    })?;

    let outcome = processor.process(&file.display().to_string(), &raw);
    sink.publish(&outcome);
    if let Some(verdict) = outcome.verdict() {
        println!("{}", serde_json::to_string_pretty(verdict)?);
    }
    Ok(())
}

fn train(
    config: &AppConfig,
    dataset: Option<PathBuf>,
    output: Option<PathBuf>,
    max_features: Option<usize>,
) -> anyhow::Result<()> {
    let dataset = dataset.unwrap_or_else(|| config.model.dataset_path.clone());
    let output = output.unwrap_or_else(|| config.model.model_path.clone());
    let max_features = max_features.unwrap_or(config.model.max_features);

    let examples = load_dataset(&dataset)
        .with_context(|| format!("reading dataset {}", dataset.display()))?;
    let bundle = ModelBundle::train(&examples, max_features).context("training model")?;
    bundle
        .save(&output)
        .with_context(|| format!("writing model {}", output.display()))?;

    println!(
        "Trained on {} examples ({} features), saved to {}",
        bundle.examples,
        bundle.vectorizer.len(),
        output.display()
    );
    Ok(())
}
