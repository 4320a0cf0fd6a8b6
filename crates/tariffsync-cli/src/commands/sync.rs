use serde_json::{json, Value};
use tariffsync_core::{format_date, Flow, RunStatus, SyncRun, TariffSync};

use crate::cli::DateArgs;
use crate::error::CliError;
use crate::output;

pub async fn run_database(args: &DateArgs, sync: &TariffSync, pretty: bool) -> Result<(), CliError> {
    finish(sync.run_database_flow(args.date).await, pretty)
}

pub async fn run_sheet(args: &DateArgs, sync: &TariffSync, pretty: bool) -> Result<(), CliError> {
    finish(sync.run_sheet_flow(args.date).await, pretty)
}

fn finish(run: SyncRun, pretty: bool) -> Result<(), CliError> {
    output::render(&run_summary(&run), pretty)?;
    match run.status {
        RunStatus::Ok => Ok(()),
        RunStatus::Failed => Err(CliError::FlowFailed {
            flow: run.flow,
            detail: run.detail.unwrap_or_default(),
        }),
    }
}

pub fn run_summary(run: &SyncRun) -> Value {
    json!({
        "run_id": run.run_id.to_string(),
        "flow": run.flow.as_str(),
        "date": run.target_date.map(format_date),
        "status": run.status.as_str(),
        "rows": run.row_count,
        "latency_ms": run.latency_ms(),
        "detail": run.detail,
    })
}
