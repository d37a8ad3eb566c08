use super::{Task, TaskOutcome, TaskRunner};
use crate::signal::CancellationSignal;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Run `primary`; if and only if it fails, run `secondary` under the same
/// signal. Cancellation is never retried.
///
/// When both fail, the secondary's error is returned with the primary's
/// message attached as context.
pub fn run_with_fallback<T>(
    runner: &TaskRunner,
    primary: Task<T>,
    secondary: Task<T>,
    signal: &dyn CancellationSignal,
) -> TaskOutcome<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let primary_name = primary.name().to_string();
    let primary_err = match runner.run(primary, signal) {
        TaskOutcome::Failed(err) => err,
        settled => return settled,
    };
    let primary_msg = format!("{primary_err:#}");
    tracing::warn!(
        task = %primary_name,
        fallback = secondary.name(),
        error = %primary_msg,
        "primary task failed; running fallback"
    );
    match runner.run(secondary, signal) {
        TaskOutcome::Failed(err) => TaskOutcome::Failed(
            err.context(format!("fallback after '{primary_name}' failed: {primary_msg}")),
        ),
        settled => settled,
    }
}
