pub mod interview;
pub mod run;

use conformity_core::cancel::CancelFlag;
use conformity_core::model::DEFAULT_TASKS;

/// Trip the cancel flag on ctrl-c; the driver drains in-flight work and keeps
/// the last checkpoint.
pub(crate) fn spawn_interrupt_handler(cancel: &CancelFlag) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, cancelling in-flight work.");
            cancel.cancel();
        }
    });
}

pub(crate) fn resolve_tasks(tasks: Option<Vec<String>>) -> Vec<String> {
    tasks.unwrap_or_else(|| DEFAULT_TASKS.iter().map(|t| t.to_string()).collect())
}
