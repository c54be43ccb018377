use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use conformity_core::cancel::CancelFlag;
use conformity_core::checkpoint::CheckpointStore;
use conformity_core::driver::{ConfigOutcome, DriverSettings, RunDriver, SweepReport};
use conformity_core::limiter::RateLimiter;
use conformity_core::model::enumerate_sweep;
use conformity_core::progress::{ProgressEvent, ProgressSink};
use conformity_core::providers::backend_for_model;
use conformity_core::retry::RetryingInvoker;

use crate::args::RunArgs;

pub async fn execute(args: RunArgs) -> Result<i32> {
    let tasks = super::resolve_tasks(args.tasks);
    let configs = enumerate_sweep(
        &args.model,
        &tasks,
        args.rounds,
        args.peers,
        args.mode.into(),
        args.batch,
    );

    let backend = backend_for_model(&args.model);
    let limiter = Arc::new(RateLimiter::per_minute(args.rate_limit));
    let invoker = Arc::new(RetryingInvoker::new(limiter));
    let store = Arc::new(CheckpointStore::new(&args.out));

    let cancel = CancelFlag::new();
    super::spawn_interrupt_handler(&cancel);

    let driver = RunDriver {
        backend,
        invoker,
        store,
        data_dir: args.data_dir,
        settings: DriverSettings {
            resume: args.resume,
            checkpoint_interval: args.checkpoint_every,
            task_timeout: Duration::from_secs(args.task_timeout_secs),
        },
        progress: Some(progress_sink()),
    };

    let report = driver.run_sweep(&configs, &cancel).await?;
    summarize(&report);
    Ok(if report.interrupted { 1 } else { 0 })
}

/// One bar per configuration; a new run identifier finishes the previous bar.
fn progress_sink() -> ProgressSink {
    let current: Mutex<Option<(Arc<str>, ProgressBar)>> = Mutex::new(None);
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    Arc::new(move |event: ProgressEvent| {
        let Ok(mut current) = current.lock() else {
            return;
        };
        let stale = match current.as_ref() {
            Some((run_id, _)) => run_id.as_ref() != event.run_id.as_ref(),
            None => true,
        };
        if stale {
            if let Some((_, old)) = current.take() {
                old.finish();
            }
            let bar = ProgressBar::new(event.total as u64);
            bar.set_style(style.clone());
            *current = Some((event.run_id.clone(), bar));
        }
        if let Some((_, bar)) = current.as_ref() {
            bar.set_position(event.done as u64);
            bar.set_message(format!("{} ({} failed)", event.run_id, event.failed));
            if event.done >= event.total {
                bar.finish();
            }
        }
    })
}

fn summarize(report: &SweepReport) {
    println!();
    for config in &report.configs {
        match &config.outcome {
            ConfigOutcome::Done => println!(
                "{}: done, {}/{} correct, {} failed",
                config.run_id, config.correct, config.total, config.failed
            ),
            ConfigOutcome::Failed(error) => println!("{}: FAILED: {error}", config.run_id),
            ConfigOutcome::Interrupted => println!(
                "{}: interrupted ({} correct, {} failed so far)",
                config.run_id, config.correct, config.failed
            ),
        }
    }
    if report.interrupted {
        println!("sweep interrupted; re-run with --resume to retry failed indices only");
    }
}
