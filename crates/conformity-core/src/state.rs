//! Accumulated per-index results for one configuration.
//!
//! Workers never touch this directly; the coordinating task folds each
//! completed [`TaskResult`] in as it arrives, so the final state is independent
//! of completion order.

use tracing::warn;

use crate::model::{TaskInput, TaskResult};

/// One completed example: prompt, raw output, parsed prediction, ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleRecord {
    pub input: String,
    pub output: String,
    pub y_pred: i64,
    pub y_true: i64,
}

impl ExampleRecord {
    pub fn is_correct(&self) -> bool {
        self.y_pred == self.y_true
    }
}

/// Run state for one configuration: a slot per dataset index plus the ordered
/// list of indices whose last attempt produced no parseable choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    records: Vec<Option<ExampleRecord>>,
    failed: Vec<usize>,
}

impl RunState {
    pub fn new(len: usize) -> Self {
        Self {
            records: vec![None; len],
            failed: Vec::new(),
        }
    }

    pub fn from_parts(records: Vec<Option<ExampleRecord>>, failed: Vec<usize>) -> Self {
        Self { records, failed }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Option<ExampleRecord>] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&ExampleRecord> {
        self.records.get(index).and_then(Option::as_ref)
    }

    /// Indices to re-schedule in the retry pass, in the order they failed.
    pub fn failed(&self) -> &[usize] {
        &self.failed
    }

    /// Each pass tracks its own failures: indices that parse on retry must not
    /// linger in the failed list from the previous pass.
    pub fn begin_pass(&mut self) {
        self.failed.clear();
    }

    /// Fold one completed task into the state. Ground truth comes from the
    /// input, which is authoritative even for results that errored before the
    /// truth could be echoed back.
    pub fn apply(&mut self, input: &TaskInput, result: &TaskResult) {
        if result.index >= self.records.len() {
            warn!(index = result.index, len = self.records.len(), "result index out of range");
            return;
        }
        self.records[result.index] = Some(ExampleRecord {
            input: input.prompt.clone(),
            output: result.output.clone(),
            y_pred: result.predicted,
            y_true: input.truth,
        });
        if !result.is_parsed() && !self.failed.contains(&result.index) {
            self.failed.push(result.index);
        }
    }

    /// Running correct-count over all filled slots.
    pub fn correct_count(&self) -> usize {
        self.records
            .iter()
            .flatten()
            .filter(|r| r.is_correct())
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.records.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(index: usize, truth: i64) -> TaskInput {
        TaskInput {
            index,
            prompt: format!("q{index}"),
            truth,
        }
    }

    #[test]
    fn apply_records_result_and_tracks_failures() {
        let mut state = RunState::new(3);
        let inp = input(1, 0);
        state.apply(
            &inp,
            &TaskResult::from_output(1, "the answer is: \"(A) yes\"".into(), 0),
        );
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.correct_count(), 1);
        assert!(state.failed().is_empty());

        let inp = input(2, 1);
        state.apply(&inp, &TaskResult::from_output(2, "garbled".into(), 1));
        assert_eq!(state.failed(), &[2]);
        assert_eq!(state.correct_count(), 1);
    }

    #[test]
    fn reapplying_a_failure_does_not_duplicate_the_index() {
        let mut state = RunState::new(2);
        let inp = input(0, 0);
        state.apply(&inp, &TaskResult::from_output(0, "??".into(), 0));
        state.apply(&inp, &TaskResult::from_output(0, "??".into(), 0));
        assert_eq!(state.failed(), &[0]);
    }

    #[test]
    fn begin_pass_clears_failures_but_keeps_records() {
        let mut state = RunState::new(2);
        let inp = input(0, 0);
        state.apply(&inp, &TaskResult::from_output(0, "??".into(), 0));
        state.begin_pass();
        assert!(state.failed().is_empty());
        assert_eq!(state.completed_count(), 1);
    }

    #[test]
    fn truth_comes_from_the_input_for_failed_tasks() {
        let mut state = RunState::new(1);
        let inp = input(0, 3);
        state.apply(&inp, &TaskResult::failure(0, "boom".into()));
        let rec = state.record(0).unwrap();
        assert_eq!(rec.y_true, 3);
        assert_eq!(rec.y_pred, -1);
    }
}
