//! Durable checkpoints, one JSON file per configuration, plus a companion CSV
//! table rewritten after each save.
//!
//! Writes go through a temp file in the target directory followed by an atomic
//! rename, so a reader (or a resumed run) never observes a half-written state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::ExperimentConfig;
use crate::state::{ExampleRecord, RunState};

/// Persistence seam for run state. The driver only needs save/load; tests and
/// instrumentation wrap the file-backed store behind this.
pub trait StateStore: Send + Sync {
    fn save(&self, config: &ExperimentConfig, state: &RunState) -> Result<()>;
    fn load(&self, run_id: &str) -> Result<Option<RunState>>;
}

/// On-disk checkpoint layout. Outputs are column arrays aligned by index with
/// nulls at positions not yet computed, matching the files previously scored
/// runs produced.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDoc {
    config: serde_json::Value,
    fname: String,
    correct_num: usize,
    failed_idx: Vec<usize>,
    outputs: Columns,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Columns {
    inputs: Vec<Option<String>>,
    outputs: Vec<Option<String>>,
    y_pred: Vec<Option<i64>>,
    y_true: Vec<Option<i64>>,
}

impl Columns {
    fn from_state(state: &RunState) -> Self {
        let mut columns = Columns::default();
        for record in state.records() {
            columns.inputs.push(record.as_ref().map(|r| r.input.clone()));
            columns
                .outputs
                .push(record.as_ref().map(|r| r.output.clone()));
            columns.y_pred.push(record.as_ref().map(|r| r.y_pred));
            columns.y_true.push(record.as_ref().map(|r| r.y_true));
        }
        columns
    }

    fn into_records(self) -> Result<Vec<Option<ExampleRecord>>> {
        let len = self.inputs.len();
        if self.outputs.len() != len || self.y_pred.len() != len || self.y_true.len() != len {
            anyhow::bail!("checkpoint columns have mismatched lengths");
        }
        let mut records = Vec::with_capacity(len);
        for (((input, output), y_pred), y_true) in self
            .inputs
            .into_iter()
            .zip(self.outputs)
            .zip(self.y_pred)
            .zip(self.y_true)
        {
            records.push(match (input, output, y_pred, y_true) {
                (Some(input), Some(output), Some(y_pred), Some(y_true)) => Some(ExampleRecord {
                    input,
                    output,
                    y_pred,
                    y_true,
                }),
                _ => None,
            });
        }
        Ok(records)
    }
}

/// File-backed store rooted at the sweep's output directory.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn checkpoint_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    pub fn table_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.csv"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Row-oriented companion table: one row per example with the parsed
    /// prediction compared against ground truth.
    fn render_table(state: &RunState) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["inputs", "outputs", "y_pred", "y_true", "is_correct"])?;
        for record in state.records() {
            match record {
                Some(r) => writer.write_record([
                    r.input.as_str(),
                    r.output.as_str(),
                    &r.y_pred.to_string(),
                    &r.y_true.to_string(),
                    if r.is_correct() { "true" } else { "false" },
                ])?,
                None => writer.write_record(["", "", "", "", ""])?,
            }
        }
        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush result table: {e}"))
    }
}

impl StateStore for CheckpointStore {
    fn save(&self, config: &ExperimentConfig, state: &RunState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let run_id = config.run_id();
        let doc = CheckpointDoc {
            config: config.checkpoint_fields(),
            fname: format!("{run_id}.json"),
            correct_num: state.correct_count(),
            failed_idx: state.failed().to_vec(),
            outputs: Columns::from_state(state),
        };
        let bytes = serde_json::to_vec(&doc)?;
        self.write_atomic(&self.checkpoint_path(&run_id), &bytes)?;
        let table = Self::render_table(state)?;
        self.write_atomic(&self.table_path(&run_id), &table)?;
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        let path = self.checkpoint_path(run_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read checkpoint {}", path.display()))
            }
        };
        let doc: CheckpointDoc = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse checkpoint {}", path.display()))?;
        Ok(Some(RunState::from_parts(
            doc.outputs.into_records()?,
            doc.failed_idx,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mode, Protocol, TaskInput, TaskResult};

    fn config() -> ExperimentConfig {
        ExperimentConfig {
            task: "snarks".into(),
            model: "gpt-4o".into(),
            protocol: Protocol::Trust,
            multi_rounds: false,
            history_rounds: 5,
            peer_count: 6,
            mode: Mode::Default,
            batch_width: 5,
        }
    }

    fn populated_state() -> RunState {
        let mut state = RunState::new(4);
        for (index, text) in [(0, "the answer is: \"(A) x\""), (2, "no choice")] {
            let input = TaskInput {
                index,
                prompt: format!("q{index}"),
                truth: 0,
            };
            state.apply(&input, &TaskResult::from_output(index, text.into(), 0));
        }
        state
    }

    #[test]
    fn save_then_load_round_trips_the_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let config = config();
        let state = populated_state();

        store.save(&config, &state).unwrap();
        let loaded = store.load(&config.run_id()).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load("no-such-run").unwrap().is_none());
    }

    #[test]
    fn checkpoint_file_uses_columnar_layout_with_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let config = config();
        store.save(&config, &populated_state()).unwrap();

        let raw = fs::read_to_string(store.checkpoint_path(&config.run_id())).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["fname"], format!("{}.json", config.run_id()));
        assert_eq!(doc["correct_num"], 1);
        assert_eq!(doc["failed_idx"], serde_json::json!([2]));
        assert_eq!(doc["config"]["protocol"], "wrong guidance");
        assert_eq!(doc["config"]["majority_num"], 6);
        let y_pred = doc["outputs"]["y_pred"].as_array().unwrap();
        assert_eq!(y_pred.len(), 4);
        assert_eq!(y_pred[0], 0);
        assert!(y_pred[1].is_null());
        assert_eq!(y_pred[2], -1);
        assert!(y_pred[3].is_null());
    }

    #[test]
    fn companion_table_has_a_row_per_example() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let config = config();
        store.save(&config, &populated_state()).unwrap();

        let raw = fs::read_to_string(store.table_path(&config.run_id())).unwrap();
        let mut lines = raw.lines();
        assert_eq!(lines.next(), Some("inputs,outputs,y_pred,y_true,is_correct"));
        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].ends_with("0,0,true"));
        assert_eq!(rows[1], ",,,,");
        assert!(rows[2].ends_with("-1,0,false"));
    }

    #[test]
    fn save_overwrites_atomically_and_stays_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let config = config();
        let mut state = populated_state();
        store.save(&config, &state).unwrap();

        let input = TaskInput {
            index: 2,
            prompt: "q2".into(),
            truth: 0,
        };
        state.begin_pass();
        state.apply(
            &input,
            &TaskResult::from_output(2, "the answer is: \"(B) y\"".into(), 0),
        );
        store.save(&config, &state).unwrap();

        let loaded = store.load(&config.run_id()).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.failed().is_empty());
    }
}
