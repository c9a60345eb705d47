//! Mergeward CLI
//!
//! The `mergeward` command drives merge reconciliation for release tickets.
//!
//! ## Commands
//!
//! - `run`: reconcile one or more categories and post their summaries
//! - `notify`: rebuild a category's summary from the run log and post it
//! - `sheet-status`: mirror review, QA and merge flags into the release sheet
//! - `code-move`: clone tickets into code-move tickets
//! - `relink`: move tickets from one control ticket to another
//! - `references`: print the merge request URLs a ticket's notes reference

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

use mergeward_clients::{build_collaborators, parse_sheet_key, ChatNotifier, MantisClient};
use mergeward_core::config::ENV_TRACKER_TOKEN;
use mergeward_core::summary::summary_from_log_dir;
use mergeward_core::telemetry::init_tracing;
use mergeward_core::{
    CategoryConfig, CodeMoveRequest, MergeService, Notifier, ProgressTracker, RelinkRequest,
    RunCategory, RunOptions, Secrets, StartRun, TicketId, TicketSource, TicketTracker,
};

#[derive(Parser)]
#[command(name = "mergeward")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Merge reconciliation for review-gated release tickets", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding common.json and <category>.json
    #[arg(long, global = true, env = "MERGEWARD_CONFIG_DIR", default_value = "configs")]
    config_dir: PathBuf,

    /// Directory for the rolling run log
    #[arg(long, global = true, env = "MERGEWARD_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile tickets and merge what review and QA allow
    Run {
        /// Categories to run; each runs in its own lane
        #[arg(short, long = "category", default_value = RunCategory::REGRESSION)]
        categories: Vec<String>,

        /// Explicit ticket ids instead of the configured filters
        #[arg(short, long, value_delimiter = ',')]
        tickets: Vec<TicketId>,

        /// Do not post the summary
        #[arg(long)]
        no_notify: bool,
    },

    /// Post a category's summary rebuilt from the newest run log
    Notify {
        #[arg(short, long, default_value = RunCategory::REGRESSION)]
        category: String,

        /// Print the message instead of posting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Write review, QA and merge flags into the release sheet
    SheetStatus {
        /// Sheet URL or key overriding the configured one
        #[arg(long)]
        sheet_url: Option<String>,
    },

    /// Clone tickets into code-move tickets
    CodeMove {
        #[arg(short, long, value_delimiter = ',', required = true)]
        tickets: Vec<TicketId>,

        /// ER date (YYYY-MM-DD)
        #[arg(long)]
        er_date: NaiveDate,

        #[arg(long)]
        target_version: String,

        #[arg(long)]
        target_patch: String,

        #[arg(long)]
        qa_owner: String,

        /// Text appended to each clone's description
        #[arg(long, default_value = "")]
        instructions: String,

        /// Bold prefix of each clone's title
        #[arg(long)]
        prefix: String,
    },

    /// Move tickets from one control ticket to another
    Relink {
        #[arg(short, long, value_delimiter = ',', required = true)]
        tickets: Vec<TicketId>,

        #[arg(long)]
        new_control: TicketId,

        #[arg(long)]
        old_control: TicketId,
    },

    /// Print the merge request URLs referenced by tickets' notes
    References {
        #[arg(short, long, default_value = RunCategory::REGRESSION)]
        category: String,

        #[arg(required = true)]
        tickets: Vec<TicketId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let _guard = init_tracing(cli.json, level, cli.log_dir.as_deref());

    match cli.command {
        Commands::Run {
            categories,
            tickets,
            no_notify,
        } => cmd_run(&cli.config_dir, &categories, tickets, !no_notify, cli.json).await,
        Commands::Notify { category, dry_run } => {
            let log_dir = cli
                .log_dir
                .as_deref()
                .context("notify needs --log-dir or MERGEWARD_LOG_DIR")?;
            cmd_notify(&cli.config_dir, log_dir, &category, dry_run).await
        }
        Commands::SheetStatus { sheet_url } => {
            cmd_sheet_status(&cli.config_dir, sheet_url.as_deref(), cli.json).await
        }
        Commands::CodeMove {
            tickets,
            er_date,
            target_version,
            target_patch,
            qa_owner,
            instructions,
            prefix,
        } => {
            let request = CodeMoveRequest {
                ticket_ids: tickets,
                er_date,
                target_version,
                target_patch,
                qa_owner,
                instructions,
                title_prefix: prefix,
            };
            cmd_code_move(&cli.config_dir, request).await
        }
        Commands::Relink {
            tickets,
            new_control,
            old_control,
        } => {
            let request = RelinkRequest {
                ticket_ids: tickets,
                new_control,
                old_control,
            };
            cmd_relink(&cli.config_dir, request).await
        }
        Commands::References { category, tickets } => {
            cmd_references(&cli.config_dir, &category, &tickets, cli.json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Service wiring
// ---------------------------------------------------------------------------

fn load_config(config_dir: &Path, category: &RunCategory) -> Result<CategoryConfig> {
    CategoryConfig::load(config_dir, category)
        .with_context(|| format!("Failed to load {category} config from {:?}", config_dir))
}

/// A service with one lane per given category config.
fn build_service(lanes: Vec<(RunCategory, CategoryConfig)>) -> Result<MergeService> {
    let secrets = Secrets::from_env();
    let mut service = MergeService::new(ProgressTracker::new(RunCategory::known()));
    for (category, config) in lanes {
        let collab = build_collaborators(&config, &secrets)
            .with_context(|| format!("Failed to set up clients for {category}"))?;
        service = service.with_lane(category, config, collab);
    }
    Ok(service)
}

fn service_for(config_dir: &Path, category: &RunCategory) -> Result<MergeService> {
    build_service(vec![(category.clone(), load_config(config_dir, category)?)])
}

/// Log percentage changes for `category` until its run leaves `Running`.
fn watch_progress(service: &MergeService, category: &RunCategory) -> Result<JoinHandle<()>> {
    let mut rx = service.progress_tracker().subscribe(category)?;
    let category = category.clone();
    Ok(tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = rx.borrow_and_update().clone();
            info!(category = %category, percentage = progress.percentage, "progress {}%", progress.percentage);
            if !progress.is_running() {
                break;
            }
        }
    }))
}

/// Wait for an accepted run. A busy lane is an error.
async fn finish<T>(category: &RunCategory, start: StartRun<T>) -> Result<T> {
    match start {
        StartRun::Accepted { run_id, handle } => {
            println!("Started {category} run {run_id}");
            let outcome = handle
                .await
                .with_context(|| format!("{category} run {run_id} did not finish"))?;
            outcome.with_context(|| format!("{category} run {run_id} failed"))
        }
        StartRun::Busy => bail!("A {category} run is already in progress"),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Reconcile each category in its own lane, concurrently.
async fn cmd_run(
    config_dir: &Path,
    categories: &[String],
    tickets: Vec<TicketId>,
    notify: bool,
    json: bool,
) -> Result<()> {
    let categories: Vec<RunCategory> = categories.iter().map(RunCategory::new).collect();
    let lanes = categories
        .iter()
        .map(|c| Ok((c.clone(), load_config(config_dir, c)?)))
        .collect::<Result<Vec<_>>>()?;
    let service = build_service(lanes)?;

    let mut pending = Vec::new();
    for category in &categories {
        let watcher = watch_progress(&service, category)?;
        let options = RunOptions {
            source: (!tickets.is_empty()).then(|| TicketSource::Ids(tickets.clone())),
            notify,
        };
        let start = service.start_run_with(category, options)?;
        pending.push((category, start, watcher));
    }

    let mut failed = 0;
    for (category, start, watcher) in pending {
        let result = finish(category, start).await;
        watcher.abort();
        match result {
            Ok(report) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&report.statistics)?);
                } else {
                    let s = &report.statistics;
                    println!(
                        "{category}: {} tickets, {} merged, {} already merged, {} failed, {} fixed",
                        report.total_tickets,
                        s.merged,
                        s.already_merged,
                        s.merge_failures,
                        s.tickets_fixed
                    );
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("{err:#}");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} runs failed", categories.len());
    }
    Ok(())
}

async fn cmd_notify(config_dir: &Path, log_dir: &Path, category: &str, dry_run: bool) -> Result<()> {
    let category = RunCategory::new(category);
    let config = load_config(config_dir, &category)?;
    let buckets = summary_from_log_dir(log_dir, &category)?;

    if buckets.processed_tickets.is_empty() {
        println!("No {category} tickets found in the latest log; nothing to post.");
        return Ok(());
    }
    let message = buckets.render(&category);

    match (&config.webhook_url, dry_run) {
        (Some(webhook), false) => {
            let notifier = ChatNotifier::new(webhook.as_str())?;
            notifier
                .post(&message)
                .await
                .context("Failed to post summary")?;
            println!("Posted {category} summary");
        }
        (None, false) => {
            warn!(category = %category, "no webhook_url configured; printing summary");
            println!("{message}");
        }
        (_, true) => println!("{message}"),
    }
    Ok(())
}

async fn cmd_sheet_status(config_dir: &Path, sheet_url: Option<&str>, json: bool) -> Result<()> {
    let category = RunCategory::new(RunCategory::SHEET_STATUS);
    let mut config = load_config(config_dir, &category)?;
    if let Some(input) = sheet_url {
        let key = parse_sheet_key(input)
            .with_context(|| format!("No spreadsheet key in {input:?}"))?;
        match config.sheet.as_mut() {
            Some(sheet) => sheet.sheet_key = key,
            None => bail!("{category} config has no sheet section to override"),
        }
    }

    let service = build_service(vec![(category.clone(), config)])?;
    let watcher = watch_progress(&service, &category)?;
    let report = finish(&category, service.start_sheet_status()?).await;
    watcher.abort();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Sheet rows: {}, updated: {}, no MR: {}, failed: {}",
            report.rows, report.updated, report.no_mr, report.failed
        );
    }
    Ok(())
}

async fn cmd_code_move(config_dir: &Path, request: CodeMoveRequest) -> Result<()> {
    let category = RunCategory::new(RunCategory::CODE_MOVE);
    let service = service_for(config_dir, &category)?;
    let clones = finish(&category, service.start_code_move(request)?).await?;

    for clone in clones {
        println!("Created code move ticket {clone}");
    }
    Ok(())
}

async fn cmd_relink(config_dir: &Path, request: RelinkRequest) -> Result<()> {
    let category = RunCategory::new(RunCategory::REGRESSION);
    let service = service_for(config_dir, &category)?;
    let moved = finish(&category, service.start_relink(request)?).await?;

    println!("Relinked {moved} tickets");
    Ok(())
}

async fn cmd_references(
    config_dir: &Path,
    category: &str,
    tickets: &[TicketId],
    json: bool,
) -> Result<()> {
    let category = RunCategory::new(category);
    let config = load_config(config_dir, &category)?;
    let secrets = Secrets::from_env();
    let token = Secrets::require(&secrets.tracker_token, ENV_TRACKER_TOKEN)?;
    let tracker = MantisClient::new(&config.tracker_url, token)?;
    let extractor = config.extractor();

    let mut found = serde_json::Map::new();
    for id in tickets {
        let Some(ticket) = tracker.fetch_by_id(*id).await? else {
            warn!(ticket = id, "ticket {id} not found");
            continue;
        };
        let urls = extractor.extract(&ticket.notes);
        if !json {
            println!("{} ({} references)", tracker.public_url(*id), urls.len());
            for url in &urls {
                println!("  {url}");
            }
        }
        found.insert(id.to_string(), serde_json::json!(urls));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    }
    Ok(())
}
