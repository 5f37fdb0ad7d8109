//! Latency measurement engine
//!
//! Drives one session of N trials against a serial-triggered stimulus rig:
//!
//! ```text
//! TriggerChannel ──arm──► rig presses the pad
//!                              │
//! ControllerPad ◄───poll───────┘   (tight loop, fixed device order)
//!                              │
//! MeasurementLoop ──TrialOutcome──► Aggregator ──lines──► ResultBoard
//! ```
//!
//! The loop runs on a dedicated blocking worker (polling must never sleep);
//! the aggregator task is the sole writer of the shared result board. One
//! session at a time; a handle holds no state across runs.

pub mod clock;
pub mod runner;

pub use clock::TrialClock;
pub use runner::MeasurementLoop;

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::ControllerPad;
use crate::report::{run_aggregator, Aggregator, ResultBoard};
use crate::trigger::{TriggerChannel, TriggerError};

/// How a single trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStatus {
    Success,
    Timeout,
    DeviceLost,
}

/// One record per trial, in completion order.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    /// 1-based trial number.
    pub index: u32,
    pub status: TrialStatus,
    /// Stimulus-to-detection time. Meaningful only for `Success`; for
    /// `Timeout` it carries the reading at expiry, for diagnostics.
    pub elapsed_ms: f64,
    pub recorded_at: DateTime<Local>,
}

impl TrialOutcome {
    pub fn success(index: u32, elapsed_ms: f64) -> Self {
        Self {
            index,
            status: TrialStatus::Success,
            elapsed_ms,
            recorded_at: Local::now(),
        }
    }

    pub fn timed_out(index: u32, elapsed_ms: f64) -> Self {
        Self {
            index,
            status: TrialStatus::Timeout,
            elapsed_ms,
            recorded_at: Local::now(),
        }
    }

    pub fn lost(index: u32, elapsed_ms: f64) -> Self {
        Self {
            index,
            status: TrialStatus::DeviceLost,
            elapsed_ms,
            recorded_at: Local::now(),
        }
    }
}

/// Running statistics over the successful trials so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub count: u32,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Engine-to-aggregator stream payload.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Outcome(TrialOutcome),
    /// Transport diagnostics that are not trial outcomes.
    Fault(String),
}

/// Why a session stopped before its requested trial count.
#[derive(Debug, thiserror::Error)]
pub enum AbortCause {
    #[error("no input before timeout")]
    Timeout,

    #[error("controller {pad} lost")]
    DeviceLost { pad: String },

    #[error(transparent)]
    Transport(#[from] TriggerError),
}

/// Final state of one session.
#[derive(Debug)]
pub enum SessionVerdict {
    Completed { trials: u32 },
    Aborted { after_trial: u32, cause: AbortCause },
}

// Session settings
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Number of arm/detect/disarm repetitions.
    pub trial_count: u32,

    /// Per-trial detection deadline. A trial exceeding it aborts the
    /// whole session, not just the trial.
    pub timeout: Duration,

    /// Pause between a disarm and the next arm, letting mechanical and
    /// electrical state settle. Not part of any measured interval.
    pub settle: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            trial_count: 10,
            timeout: Duration::from_millis(1000),
            settle: Duration::from_millis(100),
        }
    }
}

// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("worker error: {0}")]
    Worker(String),
}

/// Handle for one running measurement session.
///
/// `spawn` wires the blocking measurement worker to the aggregator task
/// over an event channel; `join` resolves once the worker has returned and
/// every result line has been flushed to the board.
pub struct SessionHandle {
    summary: watch::Receiver<Option<RunSummary>>,
    aggregator: JoinHandle<()>,
    worker: JoinHandle<SessionVerdict>,
}

impl SessionHandle {
    pub fn spawn(
        settings: SessionSettings,
        devices: Vec<Box<dyn ControllerPad>>,
        trigger: Box<dyn TriggerChannel>,
        board: ResultBoard,
    ) -> Result<Self, SessionError> {
        info!(
            "Starting session: {} trials, {} devices",
            settings.trial_count,
            devices.len()
        );

        let (events_tx, events_rx) = mpsc::channel(64);

        let machine = match MeasurementLoop::create(settings, devices, trigger, events_tx) {
            Ok(machine) => machine,
            Err(e) => {
                board.push("no controllers configured".to_string());
                return Err(e);
            }
        };
        let measuring = machine.start()?;

        let aggregator = Aggregator::new(board);
        let summary = aggregator.subscribe();
        let aggregator = tokio::spawn(run_aggregator(events_rx, aggregator));

        let worker = tokio::task::spawn_blocking(move || measuring.run_trials());

        Ok(Self {
            summary,
            aggregator,
            worker,
        })
    }

    /// Receiver for the evolving run summary; `None` until the first
    /// successful trial.
    pub fn summary(&self) -> watch::Receiver<Option<RunSummary>> {
        self.summary.clone()
    }

    pub async fn join(self) -> Result<SessionVerdict, SessionError> {
        let verdict = self
            .worker
            .await
            .map_err(|e| SessionError::Worker(e.to_string()))?;

        // The worker dropped its event sender; wait for the aggregator to
        // drain the stream and publish the summary line.
        if let Err(e) = self.aggregator.await {
            warn!("Aggregator task failed: {}", e);
        }

        Ok(verdict)
    }
}
