use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tariffsync_core::{Flow, RunStatus, SyncRun, TariffSync};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::cli::RunArgs;
use crate::error::CliError;

/// Run both flows on their own intervals until Ctrl-C.
///
/// Each flow lives in one task and awaits its run before the next tick, so a flow
/// never overlaps itself. Ticks missed during a long run are skipped. If either task
/// dies the other is stopped and the scheduler exits with an error.
pub async fn run(args: &RunArgs, sync: TariffSync) -> Result<(), CliError> {
    tracing::info!(
        db_interval_secs = args.db_interval_secs,
        sheet_interval_secs = args.sheet_interval_secs,
        "scheduler started"
    );
    let database = spawn_flow(
        Flow::Database,
        Duration::from_secs(args.db_interval_secs),
        flow_runner(sync.clone(), Flow::Database),
    );
    let sheet = spawn_flow(
        Flow::Sheet,
        Duration::from_secs(args.sheet_interval_secs),
        flow_runner(sync, Flow::Sheet),
    );

    supervise(database, sheet, tokio::signal::ctrl_c()).await
}

fn flow_runner(
    sync: TariffSync,
    flow: Flow,
) -> impl Fn() -> Pin<Box<dyn Future<Output = SyncRun> + Send>> + Send + 'static {
    move || {
        let sync = sync.clone();
        Box::pin(async move { sync.run_flow(flow, None).await })
    }
}

fn spawn_flow<F, Fut>(flow: Flow, period: Duration, run: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = SyncRun> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let run = run().await;
            if run.status == RunStatus::Failed {
                tracing::warn!(%flow, run_id = %run.run_id, "run failed, retrying on next tick");
            }
        }
    })
}

/// Wait for `shutdown` while watching both flow tasks, then stop whatever is left.
async fn supervise<S>(
    mut database: JoinHandle<()>,
    mut sheet: JoinHandle<()>,
    shutdown: S,
) -> Result<(), CliError>
where
    S: Future<Output = std::io::Result<()>>,
{
    let outcome = tokio::select! {
        signal = shutdown => signal.map(|()| {
            tracing::info!("interrupt received, stopping scheduler");
        }).map_err(CliError::from),
        result = &mut database => Err(stopped(Flow::Database, result)),
        result = &mut sheet => Err(stopped(Flow::Sheet, result)),
    };
    database.abort();
    sheet.abort();
    outcome
}

fn stopped(flow: Flow, result: Result<(), JoinError>) -> CliError {
    let reason = match result {
        Ok(()) => String::from("task exited"),
        Err(error) if error.is_panic() => String::from("task panicked"),
        Err(error) => error.to_string(),
    };
    tracing::error!(%flow, reason = %reason, "flow task stopped, shutting down scheduler");
    CliError::ScheduleStopped { flow, reason }
}
