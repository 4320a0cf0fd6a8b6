//! CLI argument definitions for tariffsync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sync-db` | Fetch tariffs and upsert them into the warehouse |
//! | `sync-sheet` | Mirror stored snapshots into the configured spreadsheets |
//! | `latest` | Print stored snapshots of a date as JSON |
//! | `sql` | Read-only SQL against the DuckDB warehouse |
//! | `run` | Run both flows on fixed intervals until Ctrl-C |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `-v` | off | More log output (`-vv` for trace); `RUST_LOG` wins when set |
//! | `--log-json` | `false` | Emit logs as JSON lines on stderr |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! tariffsync sync-db
//! tariffsync latest --date 2026-10-18 --pretty
//! tariffsync sql "SELECT warehouse_name, box_delivery_coef_expr FROM warehouse_rates LIMIT 5"
//! tariffsync run --db-interval-secs 3600 --sheet-interval-secs 900
//! ```

use clap::{ArgAction, Args, Parser, Subcommand};
use time::Date;

/// Box-tariff sync: marketplace API → DuckDB → Google Sheets.
#[derive(Debug, Parser)]
#[command(
    name = "tariffsync",
    author,
    version,
    about = "Sync marketplace box tariffs into DuckDB and Google Sheets",
    long_about = "tariffsync fetches box tariffs for a date, stores them in a local DuckDB \
warehouse keyed by (date, warehouse), and mirrors the latest snapshot into Google Sheets.\n\
\n\
Configuration comes from the environment (and an optional .env file)."
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch tariffs for a date and upsert them into the warehouse.
    ///
    /// Rows are stamped with today's date in TARIFFSYNC_UTC_OFFSET.
    SyncDb(DateArgs),

    /// Mirror the stored snapshots of a date into every configured spreadsheet.
    SyncSheet(DateArgs),

    /// Print the stored snapshots of a date, ordered by boxDeliveryCoefExpr.
    Latest(DateArgs),

    /// Run a read-only SQL query against the warehouse.
    ///
    /// Only a single SELECT/WITH/EXPLAIN/SHOW/DESCRIBE statement is accepted.
    Sql(SqlArgs),

    /// Run both flows on fixed intervals until interrupted.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct DateArgs {
    /// Date as YYYY-MM-DD; defaults to today in TARIFFSYNC_UTC_OFFSET.
    #[arg(long, value_parser = parse_date_arg)]
    pub date: Option<Date>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL query to execute.
    pub query: String,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Seconds between database syncs.
    #[arg(long, default_value_t = 3_600, value_parser = clap::value_parser!(u64).range(1..))]
    pub db_interval_secs: u64,

    /// Seconds between sheet syncs.
    #[arg(long, default_value_t = 3_600, value_parser = clap::value_parser!(u64).range(1..))]
    pub sheet_interval_secs: u64,
}

fn parse_date_arg(raw: &str) -> Result<Date, String> {
    tariffsync_core::validate_date(raw).map_err(|error| error.message().to_string())
}
