//! Scriptable in-process backend for tests and dry runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{ChatBackend, ChatTurn};

type ReplyFn = dyn Fn(&str) -> anyhow::Result<String> + Send + Sync;

/// Backend whose replies are computed from the user prompt by a closure.
/// Tracks how many calls it has served so tests can assert on retry counts.
pub struct FakeBackend {
    reply: Box<ReplyFn>,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_fn(reply: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_fn(move |_| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn chat(&self, _system: &str, _turns: &[ChatTurn], user: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(user)
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_and_call_counting() {
        let backend = FakeBackend::with_fn(|user| Ok(format!("echo: {user}")));
        let reply = backend.chat("sys", &[], "hello").await.unwrap();
        assert_eq!(reply, "echo: hello");
        assert_eq!(backend.calls(), 1);
    }
}
