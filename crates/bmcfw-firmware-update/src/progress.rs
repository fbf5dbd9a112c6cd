//! Progress side channel.

use tracing::debug;

use crate::state::percent;

/// Receives progress reports from a running session.
pub trait ProgressSink {
    /// `done` of `total` work units of `stage` are complete.
    fn report(&mut self, stage: &str, done: usize, total: usize);
}

/// Emits one `debug!` line per percentage step.
#[derive(Debug, Default)]
pub struct LogProgress {
    last: Option<(String, u8)>,
}

impl LogProgress {
    /// Sink with no history.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn report(&mut self, stage: &str, done: usize, total: usize) {
        let pct = percent(done, total);
        let unchanged = self
            .last
            .as_ref()
            .is_some_and(|(s, p)| s == stage && *p == pct);
        if unchanged {
            return;
        }
        debug!(stage, done, total, "{stage}: {pct}%");
        self.last = Some((stage.to_string(), pct));
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _stage: &str, _done: usize, _total: usize) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, usize, usize),
{
    fn report(&mut self, stage: &str, done: usize, total: usize) {
        self(stage, done, total);
    }
}
