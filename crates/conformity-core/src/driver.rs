//! Sweep orchestration: enumerate configurations, run each through a first
//! pass and a retry pass over its failed indices, checkpointing along the way.
//!
//! Configurations execute strictly one at a time so total outstanding remote
//! concurrency stays bounded by a single configuration's batch width and the
//! rate-limiter accounting stays simple.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::cancel::CancelFlag;
use crate::checkpoint::StateStore;
use crate::dataset;
use crate::errors::HarnessError;
use crate::executor::{ExecEnd, TaskExecutor, DEFAULT_TASK_TIMEOUT};
use crate::model::{validate_unique, ExperimentConfig, TaskInput, TaskResult};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompt;
use crate::providers::{self, ChatBackend};
use crate::retry::{CallOutcome, RetryingInvoker};
use crate::state::RunState;

pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Consult existing checkpoints: a configuration with one skips its first
    /// pass and goes straight to the retry pass over the stored failed list.
    pub resume: bool,
    /// Save after this many completions (and at pass end).
    pub checkpoint_interval: usize,
    pub task_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            resume: false,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

/// Terminal state of one configuration within a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOutcome {
    Done,
    /// The configuration blew up (missing dataset, bad checkpoint, ...). The
    /// sweep moves on to the next configuration.
    Failed(String),
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct ConfigReport {
    pub run_id: String,
    pub outcome: ConfigOutcome,
    pub correct: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub configs: Vec<ConfigReport>,
    pub interrupted: bool,
}

pub struct RunDriver {
    pub backend: Arc<dyn ChatBackend>,
    pub invoker: Arc<RetryingInvoker>,
    pub store: Arc<dyn StateStore>,
    pub data_dir: PathBuf,
    pub settings: DriverSettings,
    pub progress: Option<ProgressSink>,
}

impl RunDriver {
    /// Run every configuration to DONE or FAILED. Returns an error only for
    /// startup problems (run-identifier collisions); anything that goes wrong
    /// inside one configuration is absorbed into its report.
    pub async fn run_sweep(
        &self,
        configs: &[ExperimentConfig],
        cancel: &CancelFlag,
    ) -> Result<SweepReport> {
        validate_unique(configs)?;

        let mut report = SweepReport::default();
        for cfg in configs {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let run_id = cfg.run_id();
            info!(%run_id, task = %cfg.task, protocol = cfg.run_label(), "starting configuration");
            match self.run_config(cfg, cancel).await {
                Ok(cfg_report) => {
                    let interrupted = cfg_report.outcome == ConfigOutcome::Interrupted;
                    report.configs.push(cfg_report);
                    if interrupted {
                        report.interrupted = true;
                        break;
                    }
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    error!(%run_id, %error, "configuration failed, continuing sweep");
                    report.configs.push(ConfigReport {
                        run_id,
                        outcome: ConfigOutcome::Failed(error),
                        correct: 0,
                        failed: 0,
                        total: 0,
                    });
                }
            }
        }
        Ok(report)
    }

    async fn run_config(
        &self,
        cfg: &ExperimentConfig,
        cancel: &CancelFlag,
    ) -> Result<ConfigReport> {
        let run_id = cfg.run_id();
        let examples = dataset::load_task(&self.data_dir, &cfg.task)?;
        let bank = if cfg.multi_rounds {
            Some(dataset::load_round_bank(
                &self.data_dir,
                &cfg.task,
                cfg.peer_count,
            )?)
        } else {
            None
        };
        let inputs = prompt::render_inputs(cfg, &examples, bank.as_ref(), &mut rand::thread_rng())?;
        let inputs: Arc<Vec<TaskInput>> = Arc::new(inputs);

        let mut state = RunState::new(inputs.len());
        let mut first_pass: Option<Vec<usize>> = Some((0..inputs.len()).collect());
        if self.settings.resume {
            if let Some(loaded) = self.store.load(&run_id)? {
                if loaded.len() != inputs.len()
                    || loaded.failed().iter().any(|&i| i >= inputs.len())
                {
                    return Err(HarnessError::StateMismatch {
                        run_id: run_id.clone(),
                        stored: loaded.len(),
                        expected: inputs.len(),
                    }
                    .into());
                }
                info!(%run_id, failed = loaded.failed().len(), "resuming from checkpoint, skipping first pass");
                state = loaded;
                first_pass = None;
            }
        }

        if let Some(indices) = first_pass {
            let end = self
                .run_pass(cfg, &run_id, &inputs, &indices, &mut state, cancel)
                .await?;
            if end == ExecEnd::Interrupted {
                warn!(%run_id, "interrupted during first pass, last checkpoint kept");
                return Ok(Self::report(run_id, ConfigOutcome::Interrupted, &state));
            }
        }

        // The retry pass always runs; with no failures it is a cheap no-op.
        let retry_indices = state.failed().to_vec();
        info!(%run_id, retrying = retry_indices.len(), "retry pass");
        let end = self
            .run_pass(cfg, &run_id, &inputs, &retry_indices, &mut state, cancel)
            .await?;
        if end == ExecEnd::Interrupted {
            warn!(%run_id, "interrupted during retry pass, last checkpoint kept");
            return Ok(Self::report(run_id, ConfigOutcome::Interrupted, &state));
        }

        info!(
            %run_id,
            correct = state.correct_count(),
            failed = state.failed().len(),
            total = state.len(),
            "configuration done"
        );
        Ok(Self::report(run_id, ConfigOutcome::Done, &state))
    }

    fn report(run_id: String, outcome: ConfigOutcome, state: &RunState) -> ConfigReport {
        ConfigReport {
            run_id,
            outcome,
            correct: state.correct_count(),
            failed: state.failed().len(),
            total: state.len(),
        }
    }

    async fn run_pass(
        &self,
        cfg: &ExperimentConfig,
        run_id: &str,
        inputs: &Arc<Vec<TaskInput>>,
        indices: &[usize],
        state: &mut RunState,
        cancel: &CancelFlag,
    ) -> Result<ExecEnd> {
        state.begin_pass();
        if indices.is_empty() {
            return Ok(ExecEnd::Drained);
        }

        let interval = self.settings.checkpoint_interval.max(1);
        let executor = TaskExecutor::new(cfg.batch_width, self.settings.task_timeout);
        let total = indices.len();
        let run_id_shared: Arc<str> = Arc::from(run_id);
        let mut done = 0usize;
        let mut since_save = 0usize;

        let make_task = {
            let backend = Arc::clone(&self.backend);
            let invoker = Arc::clone(&self.invoker);
            let cancel = cancel.clone();
            let inputs = Arc::clone(inputs);
            let system = providers::system_prompt_for(cfg.mode);
            move |index: usize| {
                let backend = Arc::clone(&backend);
                let invoker = Arc::clone(&invoker);
                let cancel = cancel.clone();
                let input = inputs[index].clone();
                async move {
                    let outcome = invoker
                        .invoke(&cancel, || backend.chat(system, &[], &input.prompt))
                        .await;
                    match outcome {
                        CallOutcome::Completed(text) => {
                            TaskResult::from_output(index, text, input.truth)
                        }
                        CallOutcome::Exhausted { error } => TaskResult::failure(index, error),
                        CallOutcome::Interrupted => {
                            TaskResult::failure(index, "interrupted before completion".to_string())
                        }
                    }
                }
            }
        };

        let end = executor
            .run(indices, cancel, make_task, |result| {
                let input = inputs
                    .get(result.index)
                    .context("result index out of range")?;
                state.apply(input, &result);
                done += 1;
                since_save += 1;
                if let Some(sink) = &self.progress {
                    sink(ProgressEvent {
                        run_id: run_id_shared.clone(),
                        done,
                        total,
                        failed: state.failed().len(),
                    });
                }
                if since_save == interval {
                    self.store.save(cfg, state)?;
                    since_save = 0;
                    info!(
                        run_id,
                        done,
                        total,
                        correct = state.correct_count(),
                        failed = state.failed().len(),
                        "checkpoint saved"
                    );
                }
                Ok(())
            })
            .await?;

        if end == ExecEnd::Drained && since_save > 0 {
            self.store.save(cfg, state)?;
        }
        Ok(end)
    }
}
