use std::sync::Arc;

use anyhow::Result;

use conformity_core::cancel::CancelFlag;
use conformity_core::checkpoint::CheckpointStore;
use conformity_core::interview::{tally, write_study_csv, write_tally, BehavioralStudy};
use conformity_core::limiter::RateLimiter;
use conformity_core::model::enumerate_sweep;
use conformity_core::providers::backend_for_model;
use conformity_core::retry::RetryingInvoker;

use crate::args::InterviewArgs;

pub async fn execute(args: InterviewArgs) -> Result<i32> {
    let tasks = super::resolve_tasks(args.tasks);
    // Same enumeration as the sweep so checkpoint identifiers line up; batch
    // width is excluded from identifiers, so any value works here.
    let configs = enumerate_sweep(
        &args.model,
        &tasks,
        args.rounds,
        args.peers,
        args.mode.into(),
        5,
    );

    let limiter = Arc::new(RateLimiter::per_minute(args.rate_limit));
    let cancel = CancelFlag::new();
    super::spawn_interrupt_handler(&cancel);

    let study = BehavioralStudy {
        subject: backend_for_model(&args.model),
        judge: backend_for_model(&args.judge_model),
        invoker: Arc::new(RetryingInvoker::new(limiter)),
        store: Arc::new(CheckpointStore::new(&args.out)),
        max_samples: args.max_samples,
    };

    let records = study.run(&configs, &cancel).await?;
    if records.is_empty() {
        println!("no conformity samples found; run the sweep first");
        return Ok(0);
    }

    let study_path = args
        .out
        .join(format!("{}-behavioral_study.csv", args.model.replace(':', "_")));
    write_study_csv(&study_path, &records)?;
    write_tally(&args.out.join("behavioral_results.txt"), &args.model, &records)?;

    println!("interviewed {} samples -> {}", records.len(), study_path.display());
    for (category, count) in tally(&records) {
        println!("{}-{category}: {count}", args.model);
    }
    Ok(if cancel.is_cancelled() { 1 } else { 0 })
}
