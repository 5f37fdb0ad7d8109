//! Result publication: the shared line board and the statistics aggregator.
//!
//! The aggregator task is the board's sole writer; the presentation side
//! only snapshots. The lock is held for one append or one snapshot at a
//! time, and published lines are never mutated or removed.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::session::{RunSummary, SessionEvent, TrialOutcome, TrialStatus};

/// Append-only sequence of display lines, shared between the aggregator
/// (writer) and any number of readers.
#[derive(Clone)]
pub struct ResultBoard {
    lines: Arc<Mutex<Vec<String>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl ResultBoard {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            revision: Arc::new(revision),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn push(&self, line: String) {
        {
            self.guard().push(line);
        }
        self.revision.send_modify(|r| *r += 1);
    }

    /// Copy of the current contents; readers never see a partial line.
    pub fn snapshot(&self) -> Vec<String> {
        self.guard().clone()
    }

    /// Bumped once per append; lets a consumer wake only when new lines
    /// have landed.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl Default for ResultBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds trial outcomes into lines and running statistics.
pub struct Aggregator {
    board: ResultBoard,
    count: u32,
    sum_ms: f64,
    min_ms: Option<f64>,
    max_ms: Option<f64>,
    summary: watch::Sender<Option<RunSummary>>,
}

impl Aggregator {
    pub fn new(board: ResultBoard) -> Self {
        let (summary, _) = watch::channel(None);
        Self {
            board,
            count: 0,
            sum_ms: 0.0,
            min_ms: None,
            max_ms: None,
            summary,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RunSummary>> {
        self.summary.subscribe()
    }

    pub fn record(&mut self, outcome: &TrialOutcome) {
        debug!(
            "Recording trial {} ({:?}) at {}",
            outcome.index,
            outcome.status,
            outcome.recorded_at.format("%H:%M:%S%.3f")
        );

        match outcome.status {
            TrialStatus::Success => {
                self.count += 1;
                self.sum_ms += outcome.elapsed_ms;
                self.min_ms = Some(
                    self.min_ms
                        .map(|m| m.min(outcome.elapsed_ms))
                        .unwrap_or(outcome.elapsed_ms),
                );
                self.max_ms = Some(
                    self.max_ms
                        .map(|m| m.max(outcome.elapsed_ms))
                        .unwrap_or(outcome.elapsed_ms),
                );

                self.board
                    .push(format!("trial {}: {:.2} ms", outcome.index, outcome.elapsed_ms));

                if self.summary.send(self.summary_value()).is_err() {
                    debug!("No summary subscribers");
                }
            }
            TrialStatus::Timeout => {
                self.board
                    .push(format!("trial {}: no input before timeout", outcome.index));
            }
            TrialStatus::DeviceLost => {
                self.board
                    .push(format!("trial {}: controller connection lost", outcome.index));
            }
        }
    }

    /// Diagnostics that are not trial outcomes (transport faults).
    pub fn fault(&mut self, message: &str) {
        warn!("Session fault: {}", message);
        self.board.push(message.to_string());
    }

    pub fn summary_value(&self) -> Option<RunSummary> {
        if self.count == 0 {
            return None;
        }
        Some(RunSummary {
            count: self.count,
            average_ms: self.sum_ms / f64::from(self.count),
            min_ms: self.min_ms.unwrap_or(0.0),
            max_ms: self.max_ms.unwrap_or(0.0),
        })
    }

    /// Appends the closing summary. With zero successful trials there is
    /// nothing to summarize and nothing is appended.
    pub fn finalize(&mut self) {
        if let Some(summary) = self.summary_value() {
            info!(
                "Run summary: {} trials, average {:.2} ms",
                summary.count, summary.average_ms
            );
            self.board.push(String::new());
            self.board.push(format!(
                "average: {:.2} ms  min: {:.2} ms  max: {:.2} ms",
                summary.average_ms, summary.min_ms, summary.max_ms
            ));
        }
    }
}

/// Drains the session event stream until the engine drops its sender, then
/// appends the summary.
pub async fn run_aggregator(mut events: mpsc::Receiver<SessionEvent>, mut aggregator: Aggregator) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Outcome(outcome) => aggregator.record(&outcome),
            SessionEvent::Fault(message) => aggregator.fault(&message),
        }
    }
    aggregator.finalize();
}
