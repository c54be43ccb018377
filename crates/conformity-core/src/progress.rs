//! Progress reporting. The driver emits one event per completed task, in
//! completion order; the CLI consumes them via a sink.

use std::sync::Arc;

/// One progress update for the configuration currently executing.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub run_id: Arc<str>,
    pub done: usize,
    pub total: usize,
    pub failed: usize,
}

/// Sink for progress events. Implementations may throttle.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
