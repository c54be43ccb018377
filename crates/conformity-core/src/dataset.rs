//! BBH-style task data: `<data_dir>/<task>/val_data.json` plus the pre-built
//! multi-round discussion banks `majority_<n>.json`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::HarnessError;

/// One multiple-choice example. `multiple_choice_scores` is a one-hot vector
/// marking the correct target.
#[derive(Debug, Clone, Deserialize)]
pub struct Example {
    pub parsed_inputs: String,
    pub multiple_choice_targets: Vec<String>,
    pub multiple_choice_scores: Vec<u8>,
}

impl Example {
    /// Ground-truth choice index: the position of the `1` entry.
    pub fn truth_index(&self) -> Option<usize> {
        self.multiple_choice_scores.iter().position(|&s| s == 1)
    }

    /// Positions of the wrong choices.
    pub fn wrong_indices(&self) -> Vec<usize> {
        self.multiple_choice_scores
            .iter()
            .enumerate()
            .filter(|(_, &s)| s == 0)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    data: Vec<Example>,
}

/// Load a task's validation split, checking every record carries a marked
/// correct choice.
pub fn load_task(data_dir: &Path, task: &str) -> Result<Vec<Example>> {
    let path = data_dir.join(task).join("val_data.json");
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let file: TaskFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse dataset {}", path.display()))?;
    for (index, example) in file.data.iter().enumerate() {
        if example.truth_index().is_none() {
            return Err(HarnessError::MissingGroundTruth {
                task: task.to_string(),
                index,
            }
            .into());
        }
    }
    Ok(file.data)
}

/// Pre-built multi-round discussion prompts for one task and peer count. Each
/// field is a `\n\n###\n\n`-separated sequence of rounds.
#[derive(Debug, Clone, Deserialize)]
pub struct RoundBank {
    pub baseline_multi_rounds_prompt: String,
    pub trust_multi_rounds_prompt: String,
    pub doubt_multi_rounds_prompt: String,
}

pub fn load_round_bank(data_dir: &Path, task: &str, peer_count: u8) -> Result<RoundBank> {
    let path = data_dir.join(task).join(format!("majority_{peer_count}.json"));
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read round bank {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse round bank {}", path.display()))
}
