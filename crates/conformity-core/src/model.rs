//! Experiment configurations and per-example task types.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::answer;
use crate::errors::HarnessError;

/// The thirteen BBH tasks the study sweeps by default.
pub const DEFAULT_TASKS: &[&str] = &[
    "sports_understanding",
    "snarks",
    "disambiguation_qa",
    "movie_recommendation",
    "causal_judgment",
    "date_understanding",
    "tracking_shuffled_objects_three_objects",
    "temporal_sequences",
    "ruin_names",
    "web_of_lies",
    "navigate",
    "logical_deduction_five_objects",
    "hyperbaton",
];

/// Peer-pressure framing applied to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// No peers; the model answers alone.
    Raw,
    /// The peer majority endorses a wrong answer.
    Trust,
    /// The peer majority endorses the correct answer.
    Doubt,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Raw => "raw",
            Protocol::Trust => "trust",
            Protocol::Doubt => "doubt",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Protocol::Raw),
            "trust" => Ok(Protocol::Trust),
            "doubt" => Ok(Protocol::Doubt),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

/// Operating mode: which system prompt the subject model runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Default,
    /// "Independent thinker" system prompt that nudges the model to cross-check
    /// peer answers before agreeing.
    Empowered,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Empowered => "empowered",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Mode::Default),
            "empowered" => Ok(Mode::Empowered),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Immutable descriptor of one run: which task, model, and framing, and how the
/// batch executes. The full field tuple (minus `batch_width`) determines the
/// run identifier used for checkpoint and output naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub task: String,
    pub model: String,
    pub protocol: Protocol,
    /// Whether the prompt carries a multi-round discussion history.
    pub multi_rounds: bool,
    /// Prior discussion rounds included when `multi_rounds` is set (0..=5).
    pub history_rounds: u8,
    /// Number of simulated peers endorsing the majority answer (3..=6).
    pub peer_count: u8,
    pub mode: Mode,
    /// Max concurrent workers for this configuration.
    pub batch_width: usize,
}

impl ExperimentConfig {
    /// Label used in the run identifier. Single-round trust/doubt runs are
    /// published under their guidance names so downstream tooling can tell the
    /// framings apart without consulting the flags.
    pub fn run_label(&self) -> &'static str {
        match (self.multi_rounds, self.protocol) {
            (false, Protocol::Trust) => "wrong_guidance",
            (false, Protocol::Doubt) => "correct_guidance",
            (_, p) => p.as_str(),
        }
    }

    /// Human-facing protocol label stored in the checkpoint config block.
    pub fn display_protocol(&self) -> &'static str {
        match (self.multi_rounds, self.protocol) {
            (false, Protocol::Trust) => "wrong guidance",
            (false, Protocol::Doubt) => "correct guidance",
            (_, p) => p.as_str(),
        }
    }

    /// Deterministic run identifier: model (`:` flattened to `_`), task, label,
    /// then the remaining fields in stable order. Batch width is deliberately
    /// excluded so reruns at a different width resume the same checkpoint.
    pub fn run_id(&self) -> String {
        let mut id = format!(
            "{}-{}-{}",
            self.model.replace(':', "_"),
            self.task,
            self.run_label()
        );
        id.push_str(&format!("-majoritynum{}", self.peer_count));
        id.push_str(&format!("-mode{}", self.mode.as_str()));
        id.push_str(&format!("-multirounds{}", self.multi_rounds));
        id.push_str(&format!("-previousdiscussionsrounds{}", self.history_rounds));
        id
    }

    /// Config block serialized into every checkpoint file.
    pub fn checkpoint_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "task": self.task,
            "model": self.model,
            "protocol": self.display_protocol(),
            "multi_rounds": self.multi_rounds,
            "previous_discussions_rounds": self.history_rounds,
            "majority_num": self.peer_count,
            "mode": self.mode.as_str(),
            "batch": self.batch_width,
            "fname": format!("{}.json", self.run_id()),
        })
    }
}

/// Enumerate the full sweep for one model: per task, a raw baseline plus trust
/// and doubt framings in the single-round flavor, and trust/doubt again with
/// multi-round history.
pub fn enumerate_sweep(
    model: &str,
    tasks: &[String],
    history_rounds: u8,
    peer_count: u8,
    mode: Mode,
    batch_width: usize,
) -> Vec<ExperimentConfig> {
    let mut configs = Vec::new();
    for multi_rounds in [false, true] {
        for task in tasks {
            let mut push = |protocol| {
                configs.push(ExperimentConfig {
                    task: task.clone(),
                    model: model.to_string(),
                    protocol,
                    multi_rounds,
                    history_rounds,
                    peer_count,
                    mode,
                    batch_width,
                });
            };
            if !multi_rounds {
                push(Protocol::Raw);
            }
            push(Protocol::Trust);
            push(Protocol::Doubt);
        }
    }
    configs
}

/// Assert that no two configurations share a run identifier. Collisions are a
/// programming error and abort the sweep before any remote call.
pub fn validate_unique(configs: &[ExperimentConfig]) -> Result<(), HarnessError> {
    let mut seen = HashSet::new();
    for cfg in configs {
        let id = cfg.run_id();
        if !seen.insert(id.clone()) {
            return Err(HarnessError::RunIdCollision(id));
        }
    }
    Ok(())
}

/// One evaluation item: a stable dataset index, the fully rendered prompt, and
/// the ground-truth choice index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub index: usize,
    pub prompt: String,
    pub truth: i64,
}

/// One evaluation outcome. `predicted` is the parsed choice index or `-1` when
/// no choice could be extracted; `truth` is carried through from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub index: usize,
    pub output: String,
    pub predicted: i64,
    pub truth: i64,
}

impl TaskResult {
    pub fn from_output(index: usize, output: String, truth: i64) -> Self {
        let predicted = answer::predicted_index(&output);
        Self {
            index,
            output,
            predicted,
            truth,
        }
    }

    /// Terminal failure: retries exhausted, task panicked, or similar. The
    /// error description stands in for the model output so it survives in the
    /// checkpoint for later inspection.
    pub fn failure(index: usize, error: String) -> Self {
        Self {
            index,
            output: error,
            predicted: -1,
            truth: -1,
        }
    }

    pub fn timed_out(index: usize, limit: Duration) -> Self {
        Self::failure(index, format!("task timed out after {}s", limit.as_secs()))
    }

    pub fn is_parsed(&self) -> bool {
        self.predicted >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(protocol: Protocol, multi_rounds: bool) -> ExperimentConfig {
        ExperimentConfig {
            task: "snarks".into(),
            model: "llama3:70b".into(),
            protocol,
            multi_rounds,
            history_rounds: 5,
            peer_count: 6,
            mode: Mode::Default,
            batch_width: 5,
        }
    }

    #[test]
    fn run_id_flattens_model_and_relabels_single_round_guidance() {
        let id = config(Protocol::Trust, false).run_id();
        assert_eq!(
            id,
            "llama3_70b-snarks-wrong_guidance-majoritynum6-modedefault-multiroundsfalse-previousdiscussionsrounds5"
        );
        let id = config(Protocol::Doubt, false).run_id();
        assert!(id.contains("-correct_guidance-"));
        // Multi-round runs keep the protocol name.
        let id = config(Protocol::Trust, true).run_id();
        assert!(id.contains("-trust-"));
    }

    #[test]
    fn run_id_ignores_batch_width() {
        let mut a = config(Protocol::Raw, false);
        let mut b = a.clone();
        a.batch_width = 1;
        b.batch_width = 10;
        assert_eq!(a.run_id(), b.run_id());
    }

    #[test]
    fn sweep_enumerates_three_single_and_two_multi_per_task() {
        let tasks = vec!["snarks".to_string(), "navigate".to_string()];
        let configs = enumerate_sweep("gpt-4o", &tasks, 5, 6, Mode::Default, 5);
        assert_eq!(configs.len(), 2 * 5);
        assert!(validate_unique(&configs).is_ok());
    }

    #[test]
    fn duplicate_configs_collide() {
        let configs = vec![config(Protocol::Raw, false), config(Protocol::Raw, false)];
        let err = validate_unique(&configs).unwrap_err();
        assert!(matches!(err, HarnessError::RunIdCollision(_)));
    }

    #[test]
    fn task_result_parses_choice_on_construction() {
        let res = TaskResult::from_output(3, "The best answer is: \"(B) x\"".into(), 1);
        assert_eq!(res.predicted, 1);
        assert!(res.is_parsed());
        let res = TaskResult::from_output(3, "no trigger here".into(), 1);
        assert_eq!(res.predicted, -1);
        assert!(!res.is_parsed());
    }
}
