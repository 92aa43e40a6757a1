use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod export;
mod filter;
mod ingest;
mod parser;
mod record;
mod store;
mod timefmt;

#[derive(Parser, Debug)]
#[command(name = "logvault", version, about)]
struct Cli {
    /// Time zone the source logs were written in; exports render back to it.
    #[clap(long, default_value = "Europe/Berlin", global = true)]
    timezone: Tz,

    /// Log processed files and skipped lines.
    #[clap(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge per-vhost access log files into the store.
    Ingest(IngestArgs),
    /// Export a filtered, time-ordered slice of the store.
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Directory containing one folder per vhost.
    #[clap(long)]
    pub logdir: PathBuf,

    /// SQLite database file the logs are stored in.
    #[clap(long, default_value = "logs.db")]
    pub db: PathBuf,

    /// Drop all stored records before ingesting.
    #[clap(long)]
    pub db_reset: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// SQLite database file the logs are stored in.
    #[clap(long, default_value = "logs.db")]
    pub db: PathBuf,

    /// Range start, `YYYY-MM-DD HH:MM:SS` wall clock time. Needs --to-date.
    #[clap(long)]
    pub from_date: Option<String>,

    /// Range end, inclusive. Needs --from-date.
    #[clap(long)]
    pub to_date: Option<String>,

    /// Comma-separated list of vhosts to restrict the export to.
    #[clap(long)]
    pub vhosts: Option<String>,

    /// Raw SQL condition appended to the query. Passed through unvalidated.
    #[clap(long = "where")]
    pub condition: Option<String>,

    /// Output log file path.
    #[clap(long, default_value = "access_log.log")]
    pub output: PathBuf,

    /// Gzip-compress the output file.
    #[clap(long)]
    pub gzip: bool,

    /// Pipe the export into goaccess and write a report instead of a log file.
    #[clap(long, num_args = 0..=1, default_missing_value = "report.html")]
    pub report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    std::env::set_var(
        "RUST_LOG",
        format!(
            "{},{}",
            default_level,
            std::env::var("RUST_LOG").unwrap_or_default()
        ),
    );
    let enable_color = std::env::var("NO_COLOR").is_err();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(enable_color)
        .init();

    tracing::debug!("{:?}", args);

    match &args.command {
        Commands::Ingest(ingest_args) => ingest::run(ingest_args),
        Commands::Export(export_args) => export::run(export_args, args.timezone),
    }
}
