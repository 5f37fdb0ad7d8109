use std::time::{Duration, Instant};

/// Restartable monotonic stopwatch with a freezing stop.
///
/// After `stop()` the reading no longer advances until the next
/// `restart()`. Resolution is that of [`Instant`], well below one
/// millisecond on every supported host.
#[derive(Debug, Clone)]
pub struct TrialClock {
    started_at: Instant,
    frozen: Option<Duration>,
}

impl TrialClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frozen: None,
        }
    }

    pub fn restart(&mut self) {
        self.started_at = Instant::now();
        self.frozen = None;
    }

    pub fn stop(&mut self) {
        if self.frozen.is_none() {
            self.frozen = Some(self.started_at.elapsed());
        }
    }

    pub fn is_running(&self) -> bool {
        self.frozen.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.frozen.unwrap_or_else(|| self.started_at.elapsed())
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for TrialClock {
    fn default() -> Self {
        Self::new()
    }
}
