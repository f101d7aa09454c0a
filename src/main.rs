use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use pdf_mailer::audit::TracingAuditSink;
use pdf_mailer::config::PipelineConfig;
use pdf_mailer::dispatch::{DispatchEngine, MessageTemplate, SmtpSession, SmtpSettings};
use pdf_mailer::logging;
use pdf_mailer::pipeline::run_pipeline;
use pdf_mailer::producer::generate_documents;

const COMPLETION_MESSAGE: &str =
    "All done! Please check logs for any errors, invalid_emails and sent_emails!";

/// Mail each `<address>.pdf` in a directory to its address.
#[derive(Debug, Parser)]
#[command(name = "pdf-mailer", version, about)]
struct Cli {
    /// Directory holding `<recipient address>.pdf` files.
    #[arg(short, long)]
    directory: PathBuf,

    /// Generate the documents first from this recipient procedure.
    #[arg(short, long, value_name = "NAME")]
    stored_procedure: Option<String>,

    /// Dry run: stage and log, but send nothing.
    #[arg(short, long, visible_alias = "dry-run")]
    test: bool,

    /// Where errors.log, invalid_emails.log and sent_emails.log go.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Debug-level console output (ignored when RUST_LOG is set).
    #[arg(short, long)]
    verbose: bool,

    /// Print the run report as JSON instead of the summary line.
    #[arg(long)]
    json: bool,
}

fn completion_note(log_dir: &Path) -> String {
    format!("{COMPLETION_MESSAGE}\nLogs: {}", log_dir.display())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();

    let guards = logging::init(&cli.log_dir, cli.verbose)
        .with_context(|| format!("Failed to set up logging in {}", cli.log_dir.display()))?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Run aborted");
    }
    // Flush the audit files before reporting.
    drop(guards);
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("Invalid configuration")?;

    eprintln!("📄 PDF Mailer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Directory: {}", cli.directory.display());
    eprintln!("   Relay: {}:{} ({})", config.host, config.port, config.security);
    if cli.test {
        eprintln!("   Mode: test run, nothing will be sent");
    }

    if let Some(procedure) = &cli.stored_procedure {
        let produced = generate_documents(&config, procedure, &cli.directory)
            .await
            .with_context(|| format!("Document generation from {procedure} failed"))?;
        eprintln!(
            "   Generated: {} of {} documents",
            produced.written, produced.rows
        );
    }

    let template = MessageTemplate::new(&config.sender_address, &config.subject, &config.body)
        .context("Invalid sender address")?;
    let session = SmtpSession::new(SmtpSettings::from_config(&config));
    let mut engine = DispatchEngine::new(session, template, cli.test);

    let directory = cli.directory.clone();
    let prefix = config.display_prefix.clone();
    let report = tokio::task::spawn_blocking(move || {
        run_pipeline(&directory, &prefix, &mut engine, &TracingAuditSink::new())
    })
    .await
    .context("Pipeline task panicked")??;

    info!(
        run_id = %report.run_id,
        sent = report.sent,
        skipped = report.skipped,
        failed = report.failed,
        "Run finished"
    );

    if cli.json {
        // stdout stays machine-readable; the operator note goes to stderr.
        println!("{}", serde_json::to_string_pretty(&report)?);
        eprintln!("{}", completion_note(&cli.log_dir));
    } else {
        println!("{}", completion_note(&cli.log_dir));
    }
    Ok(())
}
