//! # Analytics Harvester CLI (`harvest`)
//!
//! Pages through an analytics endpoint, flattens the records and writes them
//! to the configured sink.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config harvester.toml run agent-status
//! harvest --config harvester.toml run user-status --date 2024-11-18
//! harvest --config harvester.toml run call-details --start 2024-11-01 --end 2024-11-07 --output calls.json
//! harvest kinds
//! ```
//!
//! Ctrl-C stops the run between pages (or during a wait). The process exits
//! non-zero unless the run completed.

use analytics_harvester::client::{HttpTransport, ReplayTransport};
use analytics_harvester::config::{self, Config};
use analytics_harvester::executor::{HarvestExecutor, RunResult, RunStatus};
use analytics_harvester::harvest::HarvestKind;
use analytics_harvester::logging;
use analytics_harvester::model::DateRange;
use analytics_harvester::sink;
use analytics_harvester::traits::Transport;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Harvest paginated analytics records into flat tables",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./harvester.toml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one harvest.
    Run {
        /// Harvest kind (see `harvest kinds`).
        kind: HarvestKind,

        /// Single day to harvest (YYYY-MM-DD).
        #[arg(long, conflicts_with_all = ["start", "end"])]
        date: Option<NaiveDate>,

        /// First day of the range (YYYY-MM-DD).
        #[arg(long, requires = "end")]
        start: Option<NaiveDate>,

        /// Last day of the range (YYYY-MM-DD).
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,

        /// Overrides `sink.path`. A `.csv` or `.json` extension also selects
        /// the sink kind.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Serve responses from a JSON array of captured pages instead of
        /// calling the API.
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// List the harvest kinds.
    Kinds,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Kinds => {
            for kind in HarvestKind::all() {
                println!("{:<14} {}", kind.name(), kind.format().description());
            }
            Ok(())
        }
        Commands::Run {
            kind,
            date,
            start,
            end,
            output,
            replay,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let today = chrono::Local::now().date_naive();
            let range = match (date, start, end) {
                (Some(day), _, _) => DateRange::single(day),
                (None, Some(start), Some(end)) => {
                    if start > end {
                        bail!("--start {} is after --end {}", start, end);
                    }
                    DateRange { start, end }
                }
                _ => kind.format().default_range(today),
            };

            let result = match replay {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
                    let transport = ReplayTransport::from_json(&text)
                        .with_context(|| "Replay file must be a JSON array of pages")?;
                    run(&cfg, kind, range, output, transport).await?
                }
                None => {
                    let transport = HttpTransport::new(cfg.harvest.request_timeout())?;
                    run(&cfg, kind, range, output, transport).await?
                }
            };

            println!(
                "{}: {} rows harvested, {} written ({} pages, {} rate limited, {} pauses, {} ms)",
                kind,
                result.row_count,
                result.report.rows_written,
                result.stats.pages,
                result.stats.rate_limited,
                result.stats.pauses,
                result.stats.total_duration_ms
            );

            match result.status {
                RunStatus::Completed(_) => Ok(()),
                RunStatus::Cancelled => bail!("harvest cancelled"),
                RunStatus::HarvestFailed {
                    error,
                    sink_error: Some(sink_error),
                    ..
                } => bail!(
                    "harvest failed: {} (partial rows not written: {})",
                    error,
                    sink_error
                ),
                RunStatus::HarvestFailed {
                    error,
                    partial_flushed,
                    sink_error: None,
                } => bail!(
                    "harvest failed: {} (partial rows {})",
                    error,
                    if partial_flushed { "written" } else { "discarded" }
                ),
                RunStatus::SinkFailed { error } => bail!("sink failed: {}", error),
            }
        }
    }
}

async fn run<T: Transport>(
    cfg: &Config,
    kind: HarvestKind,
    range: DateRange,
    output: Option<PathBuf>,
    transport: T,
) -> Result<RunResult> {
    let credentials = cfg.resolve_credentials()?;
    let format = kind.format();
    let request = format.build_request(
        &credentials,
        range,
        cfg.harvest.time_zone_offset,
        cfg.harvest.page_size,
    );

    let sink_config = match output {
        Some(path) => cfg.sink.clone().with_path(path),
        None => cfg.sink.clone(),
    };
    let mut sink = sink::from_config(&sink_config);

    let executor = HarvestExecutor::from_settings(&cfg.harvest);
    let cancel = executor.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    info!(
        kind = %kind,
        sink = ?sink_config.kind,
        path = %sink_config.path.display(),
        "Harvest configured"
    );
    Ok(executor.run(request, format, transport, sink.as_mut()).await)
}
