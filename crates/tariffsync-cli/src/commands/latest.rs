use tariffsync_core::{SnapshotStore, TariffStore};

use crate::cli::DateArgs;
use crate::error::CliError;
use crate::output;

pub async fn run(args: &DateArgs, store: &SnapshotStore, pretty: bool) -> Result<(), CliError> {
    let snapshots = store.latest(args.date).await?;
    tracing::debug!(rows = snapshots.len(), "loaded snapshots");
    output::render(&snapshots, pretty)
}
