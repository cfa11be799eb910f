//! `roundtable`: run a specialist council over a request.
//!
//! ```bash
//! # Inline request against the configured endpoint
//! roundtable run "Assess moving our VPN to zero-trust access" --output report.md
//!
//! # Request file, custom roster, scripted replies
//! roundtable run --request req.md --config council.toml --replay replay.json
//!
//! # Validate config and check the endpoint
//! roundtable check --config council.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coordination::backend::replay::ReplayBackend;
use coordination::GenerationBackend;
use roundtable::backend::RigBackend;
use roundtable::config::{check_endpoint, AppConfig};
use roundtable::documents::SectionStore;
use roundtable::session::{build_council, read_request, write_outputs};
use roundtable::telemetry::{
    append_session_record, init_tracing, write_session_record, SessionRecord,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one council session and print the final report
    Run(RunArgs),
    /// Validate configuration and check the inference endpoint is reachable
    Check {
        /// Council configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Request text (alternative to --request)
    text: Option<String>,

    /// Read the request from a file
    #[arg(long, conflicts_with = "text")]
    request: Option<PathBuf>,

    /// Council configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the full session record as JSON
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Append the session record to a JSONL history file
    #[arg(long)]
    history: Option<PathBuf>,

    /// Write the merged section document as markdown
    #[arg(long)]
    document: Option<PathBuf>,

    /// Answer from a replay script instead of the endpoint
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Override council.max_rounds_per_specialist
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Override council.message_budget
    #[arg(long)]
    budget: Option<u32>,

    /// Enable the conclusion polish pass
    #[arg(long, default_value_t = false)]
    polish: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check { config } => check(config.as_deref()).await,
    };
    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let request = match (&args.text, &args.request) {
        (Some(text), _) if !text.trim().is_empty() => text.trim().to_string(),
        (_, Some(path)) => read_request(path)?,
        _ => anyhow::bail!("Provide the request as text or with --request <FILE>"),
    };

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(rounds) = args.max_rounds {
        config.council.max_rounds_per_specialist = rounds;
    }
    if let Some(budget) = args.budget {
        config.council.message_budget = budget;
    }
    if args.polish {
        config.council.polish_conclusions = true;
    }

    let backend: Arc<dyn GenerationBackend> = match &args.replay {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .context(format!("Failed to read replay script {}", path.display()))?;
            let replay = ReplayBackend::from_json(&json)
                .context(format!("Failed to parse replay script {}", path.display()))?;
            info!(path = %path.display(), "Using replay backend");
            Arc::new(replay)
        }
        None => {
            let rig = RigBackend::new(&config.endpoint)?;
            info!(endpoint = %config.endpoint.base_url, model = rig.model(), "Using endpoint");
            Arc::new(rig)
        }
    };

    let documents = Arc::new(SectionStore::new());
    let council = build_council(&config, backend, documents.clone())?;
    info!(
        specialists = council.specialists().count(),
        budget = council.config().message_budget,
        "Council ready"
    );

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling session");
            watcher.cancel();
        }
    });

    let outcome = council.consult(&request, &cancel).await?;
    let record = SessionRecord::from_outcome(&outcome);
    info!("{}", record.summary_line());

    if let Some(path) = &args.transcript {
        write_session_record(&record, path);
    }
    if let Some(path) = &args.history {
        append_session_record(&record, path);
    }
    write_outputs(
        &outcome,
        &documents,
        args.output.as_deref(),
        args.document.as_deref(),
    )?;
    if args.output.is_none() {
        println!("{}", outcome.report);
    }
    Ok(())
}

async fn check(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    println!("Configuration OK");
    for specialist in &config.specialists {
        println!("  {}: {}", specialist.id, specialist.description);
    }
    if let Some(knowledge) = &config.knowledge {
        println!("  knowledge: {}", knowledge.dir.display());
    }

    let url = &config.endpoint.base_url;
    if check_endpoint(url).await {
        println!("Endpoint {url} reachable (model {})", config.endpoint.model);
        Ok(())
    } else {
        anyhow::bail!("Endpoint {url} is not reachable")
    }
}
