use tariffsync_warehouse::{QueryGuardrails, Warehouse};

use crate::cli::SqlArgs;
use crate::error::CliError;
use crate::output;

pub fn run(args: &SqlArgs, warehouse: &Warehouse, pretty: bool) -> Result<(), CliError> {
    let result = warehouse.execute_query(
        &args.query,
        QueryGuardrails {
            max_rows: args.max_rows,
            query_timeout_ms: args.query_timeout_ms,
        },
    )?;
    if result.truncated {
        tracing::warn!(max_rows = args.max_rows, "result truncated");
    }
    output::render(&result, pretty)
}
