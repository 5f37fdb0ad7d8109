use statum::{machine, state};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::controller::ControllerPad;
use crate::session::{
    AbortCause, SessionError, SessionEvent, SessionSettings, SessionVerdict, TrialClock,
    TrialOutcome,
};
use crate::trigger::TriggerChannel;

// How one trial's polling phase ended
#[derive(Debug)]
enum TrialVerdict {
    Pressed,
    TimedOut,
    Lost { pad: String },
}

// Define session states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum RunPhase {
    Preparing,
    Measuring,
}

#[machine]
pub struct MeasurementLoop<S: RunPhase> {
    // Session settings
    settings: SessionSettings,

    // Devices polled each tick, in fixed order
    devices: Vec<Box<dyn ControllerPad>>,

    // Stimulus transport
    trigger: Box<dyn TriggerChannel>,

    // Per-trial stopwatch
    clock: TrialClock,

    // Outcome stream consumed by the aggregator
    events: mpsc::Sender<SessionEvent>,
}

// Implementation for Preparing state
impl MeasurementLoop<Preparing> {
    pub fn create(
        settings: SessionSettings,
        devices: Vec<Box<dyn ControllerPad>>,
        trigger: Box<dyn TriggerChannel>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        debug!("Creating measurement loop with settings: {:?}", settings);

        if devices.is_empty() {
            error!("No controllers configured, refusing to start");
            return Err(SessionError::Configuration(
                "no controllers configured".to_string(),
            ));
        }

        Ok(Self::new(
            settings,
            devices,
            trigger,
            TrialClock::new(),
            events,
        ))
    }

    // Validate and transition to Measuring state
    pub fn start(self) -> Result<MeasurementLoop<Measuring>, SessionError> {
        info!(
            "Session ready: {} trials, timeout {:?}, settle {:?}, polling {} devices",
            self.settings.trial_count,
            self.settings.timeout,
            self.settings.settle,
            self.devices.len()
        );
        for (slot, pad) in self.devices.iter().enumerate() {
            info!("  [{}] {}", slot, pad.name());
        }

        Ok(self.transition())
    }
}

// Implementation for Measuring state
impl MeasurementLoop<Measuring> {
    /// Run all trials to completion or first failure.
    ///
    /// Every exit path closes the trigger, so the actuator ends disarmed
    /// whether the session completed, timed out, lost a device, or hit a
    /// transport fault.
    pub fn run_trials(mut self) -> SessionVerdict {
        let trial_count = self.settings.trial_count;

        for index in 1..=trial_count {
            // Arming: the measured interval starts at the arm write.
            self.clock.restart();
            if let Err(e) = self.trigger.send_arm() {
                error!("Trial {}: arm signal failed: {}", index, e);
                self.publish(SessionEvent::Fault(format!("trigger port error: {e}")));
                self.trigger.close();
                return SessionVerdict::Aborted {
                    after_trial: index - 1,
                    cause: AbortCause::Transport(e),
                };
            }

            match self.poll_for_press() {
                TrialVerdict::Pressed => {
                    // Disarm before reading the (already frozen) clock, like
                    // the rig expects; the measured time is kept even when
                    // the disarm write fails.
                    debug_assert!(!self.clock.is_running());
                    let disarm_result = self.trigger.send_disarm();
                    let elapsed = self.clock.elapsed_ms();

                    info!("Trial {}: detected after {:.2} ms", index, elapsed);
                    self.publish(SessionEvent::Outcome(TrialOutcome::success(index, elapsed)));

                    if let Err(e) = disarm_result {
                        error!("Trial {}: disarm signal failed: {}", index, e);
                        self.publish(SessionEvent::Fault(format!("trigger port error: {e}")));
                        self.trigger.close();
                        return SessionVerdict::Aborted {
                            after_trial: index,
                            cause: AbortCause::Transport(e),
                        };
                    }

                    if index < trial_count {
                        std::thread::sleep(self.settings.settle);
                    }
                }
                TrialVerdict::TimedOut => {
                    let elapsed = self.clock.elapsed_ms();
                    warn!("Trial {}: no input after {:.2} ms", index, elapsed);
                    self.publish(SessionEvent::Outcome(TrialOutcome::timed_out(
                        index, elapsed,
                    )));
                    self.trigger.close();
                    return SessionVerdict::Aborted {
                        after_trial: index,
                        cause: AbortCause::Timeout,
                    };
                }
                TrialVerdict::Lost { pad } => {
                    let elapsed = self.clock.elapsed_ms();
                    warn!("Trial {}: {} lost after {:.2} ms", index, pad, elapsed);
                    self.publish(SessionEvent::Outcome(TrialOutcome::lost(index, elapsed)));
                    self.trigger.close();
                    return SessionVerdict::Aborted {
                        after_trial: index,
                        cause: AbortCause::DeviceLost { pad },
                    };
                }
            }
        }

        self.trigger.close();
        info!("Session completed: {} trials", trial_count);
        SessionVerdict::Completed {
            trials: trial_count,
        }
    }

    // Tight polling loop; no sleep, any delay here would be measured.
    fn poll_for_press(&mut self) -> TrialVerdict {
        let mut ticks: u64 = 0;

        loop {
            ticks += 1;

            for slot in 0..self.devices.len() {
                match self.devices[slot].poll() {
                    Err(e) => {
                        self.clock.stop();
                        let pad = self.devices[slot].name().to_string();
                        debug!("Poll error on {} after {} ticks: {}", pad, ticks, e);
                        return TrialVerdict::Lost { pad };
                    }
                    Ok(mask) if !mask.is_empty() => {
                        // Detection edge. Lowest slot wins within a tick.
                        self.clock.stop();
                        debug!(
                            "Detection edge on {} after {} ticks (mask {:?})",
                            self.devices[slot].name(),
                            ticks,
                            mask
                        );
                        return TrialVerdict::Pressed;
                    }
                    Ok(_) => {}
                }
            }

            if self.clock.elapsed() > self.settings.timeout {
                self.clock.stop();
                debug!("Polled {} ticks without input", ticks);
                return TrialVerdict::TimedOut;
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.blocking_send(event) {
            warn!("Dropping session event, aggregator gone: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ButtonMask, PadError};
    use crate::report::ResultBoard;
    use crate::session::{SessionHandle, TrialStatus};
    use crate::trigger::TriggerError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum PollScript {
        Idle,
        Pressed,
        Gone,
    }

    struct ScriptedPad {
        name: String,
        script: VecDeque<PollScript>,
        sticky: PollScript,
        polls: Arc<AtomicU32>,
    }

    impl ScriptedPad {
        fn new(name: &str, steps: &[PollScript]) -> Self {
            Self {
                name: name.to_string(),
                script: steps.iter().copied().collect(),
                sticky: PollScript::Idle,
                polls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn poll_counter(&self) -> Arc<AtomicU32> {
            self.polls.clone()
        }
    }

    impl ControllerPad for ScriptedPad {
        fn name(&self) -> &str {
            &self.name
        }

        fn poll(&mut self) -> Result<ButtonMask, PadError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.pop_front().unwrap_or(self.sticky);
            self.sticky = step;
            match step {
                PollScript::Idle => Ok(ButtonMask::empty()),
                PollScript::Pressed => Ok(ButtonMask::SOUTH),
                PollScript::Gone => Err(PadError::Unavailable(self.name.clone())),
            }
        }

        fn is_connected(&self) -> bool {
            self.sticky != PollScript::Gone
        }
    }

    #[derive(Clone, Default)]
    struct TriggerLog(Arc<Mutex<Vec<&'static str>>>);

    impl TriggerLog {
        fn entries(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct ScriptedTrigger {
        log: TriggerLog,
        fail_arm_on: Option<u32>,
        fail_disarm_on: Option<u32>,
        arms: u32,
        disarms: u32,
    }

    impl ScriptedTrigger {
        fn reliable(log: TriggerLog) -> Self {
            Self {
                log,
                fail_arm_on: None,
                fail_disarm_on: None,
                arms: 0,
                disarms: 0,
            }
        }

        fn broken_pipe() -> TriggerError {
            TriggerError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "wire unplugged",
            ))
        }
    }

    impl TriggerChannel for ScriptedTrigger {
        fn send_arm(&mut self) -> Result<(), TriggerError> {
            self.arms += 1;
            if self.fail_arm_on == Some(self.arms) {
                return Err(Self::broken_pipe());
            }
            self.log.0.lock().unwrap().push("arm");
            Ok(())
        }

        fn send_disarm(&mut self) -> Result<(), TriggerError> {
            self.disarms += 1;
            if self.fail_disarm_on == Some(self.disarms) {
                return Err(Self::broken_pipe());
            }
            self.log.0.lock().unwrap().push("disarm");
            Ok(())
        }

        fn close(&mut self) {
            let _ = self.send_disarm();
        }
    }

    fn quick_settings(trial_count: u32) -> SessionSettings {
        SessionSettings {
            trial_count,
            timeout: Duration::from_millis(40),
            settle: Duration::ZERO,
        }
    }

    fn run_session(
        settings: SessionSettings,
        pads: Vec<Box<dyn ControllerPad>>,
        trigger: ScriptedTrigger,
    ) -> (SessionVerdict, Vec<SessionEvent>) {
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let machine =
            MeasurementLoop::create(settings, pads, Box::new(trigger), events_tx).unwrap();
        let verdict = machine.start().unwrap().run_trials();

        let mut events = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            events.push(event);
        }
        (verdict, events)
    }

    fn outcomes(events: &[SessionEvent]) -> Vec<(u32, TrialStatus)> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Outcome(o) => Some((o.index, o.status)),
                SessionEvent::Fault(_) => None,
            })
            .collect()
    }

    // Every arm must be answered by a disarm before the next arm; the
    // session must end disarmed (or never armed at all).
    fn assert_alternating(log: &[&'static str]) {
        let mut armed = false;
        for entry in log {
            match *entry {
                "arm" => {
                    assert!(!armed, "arm sent while already armed: {log:?}");
                    armed = true;
                }
                "disarm" => armed = false,
                other => panic!("unexpected log entry {other}"),
            }
        }
        assert!(!armed, "session ended with the actuator armed: {log:?}");
    }

    #[test]
    fn responsive_pad_completes_all_trials() {
        let log = TriggerLog::default();
        let pad = ScriptedPad::new("pad-a", &[PollScript::Pressed]);

        let (verdict, events) = run_session(
            quick_settings(4),
            vec![Box::new(pad)],
            ScriptedTrigger::reliable(log.clone()),
        );

        assert!(matches!(verdict, SessionVerdict::Completed { trials: 4 }));
        assert_eq!(
            outcomes(&events),
            vec![
                (1, TrialStatus::Success),
                (2, TrialStatus::Success),
                (3, TrialStatus::Success),
                (4, TrialStatus::Success),
            ]
        );
        assert_alternating(&log.entries());
    }

    #[test]
    fn empty_device_set_is_a_configuration_error() {
        let log = TriggerLog::default();
        let (events_tx, _events_rx) = mpsc::channel(8);

        let result = MeasurementLoop::create(
            quick_settings(5),
            Vec::new(),
            Box::new(ScriptedTrigger::reliable(log.clone())),
            events_tx,
        );

        assert!(matches!(result, Err(SessionError::Configuration(_))));
        assert!(log.entries().is_empty(), "arm sent without any devices");
    }

    #[test]
    fn zero_trials_completes_immediately() {
        let log = TriggerLog::default();
        let pad = ScriptedPad::new("pad-a", &[PollScript::Pressed]);

        let (verdict, events) = run_session(
            quick_settings(0),
            vec![Box::new(pad)],
            ScriptedTrigger::reliable(log.clone()),
        );

        assert!(matches!(verdict, SessionVerdict::Completed { trials: 0 }));
        assert!(events.is_empty());
        // Only the final cleanup disarm.
        assert_eq!(log.entries(), vec!["disarm"]);
    }

    #[test]
    fn silent_pad_times_out_and_aborts_the_session() {
        let log = TriggerLog::default();
        let pad = ScriptedPad::new("pad-a", &[]);

        let (verdict, events) = run_session(
            quick_settings(5),
            vec![Box::new(pad)],
            ScriptedTrigger::reliable(log.clone()),
        );

        match verdict {
            SessionVerdict::Aborted { after_trial, cause } => {
                assert_eq!(after_trial, 1);
                assert!(matches!(cause, AbortCause::Timeout));
            }
            other => panic!("expected abort, got {other:?}"),
        }

        assert_eq!(outcomes(&events), vec![(1, TrialStatus::Timeout)]);
        match &events[0] {
            SessionEvent::Outcome(outcome) => assert!(outcome.elapsed_ms >= 40.0),
            other => panic!("expected outcome, got {other:?}"),
        }

        // One arm, one cleanup disarm, nothing more.
        let entries = log.entries();
        assert_eq!(entries, vec!["arm", "disarm"]);
        assert_alternating(&entries);
    }

    #[test]
    fn device_loss_mid_session_stops_after_its_trial() {
        let log = TriggerLog::default();
        let pad = ScriptedPad::new(
            "pad-a",
            &[PollScript::Pressed, PollScript::Pressed, PollScript::Gone],
        );

        let (verdict, events) = run_session(
            quick_settings(10),
            vec![Box::new(pad)],
            ScriptedTrigger::reliable(log.clone()),
        );

        match verdict {
            SessionVerdict::Aborted { after_trial, cause } => {
                assert_eq!(after_trial, 3);
                assert!(matches!(cause, AbortCause::DeviceLost { pad } if pad == "pad-a"));
            }
            other => panic!("expected abort, got {other:?}"),
        }

        assert_eq!(
            outcomes(&events),
            vec![
                (1, TrialStatus::Success),
                (2, TrialStatus::Success),
                (3, TrialStatus::DeviceLost),
            ]
        );
        assert_alternating(&log.entries());
    }

    #[test]
    fn arm_failure_aborts_before_the_trial_counts() {
        let log = TriggerLog::default();
        let pad = ScriptedPad::new("pad-a", &[PollScript::Pressed]);
        let mut trigger = ScriptedTrigger::reliable(log.clone());
        trigger.fail_arm_on = Some(1);

        let (verdict, events) = run_session(quick_settings(3), vec![Box::new(pad)], trigger);

        match verdict {
            SessionVerdict::Aborted { after_trial, cause } => {
                assert_eq!(after_trial, 0);
                assert!(matches!(cause, AbortCause::Transport(_)));
            }
            other => panic!("expected abort, got {other:?}"),
        }

        assert_eq!(outcomes(&events), Vec::new());
        assert!(matches!(&events[..], [SessionEvent::Fault(_)]));
        assert_alternating(&log.entries());
    }

    #[test]
    fn disarm_failure_keeps_the_measured_success() {
        let log = TriggerLog::default();
        let pad = ScriptedPad::new("pad-a", &[PollScript::Pressed]);
        let mut trigger = ScriptedTrigger::reliable(log.clone());
        trigger.fail_disarm_on = Some(1);

        let (verdict, events) = run_session(quick_settings(3), vec![Box::new(pad)], trigger);

        match verdict {
            SessionVerdict::Aborted { after_trial, cause } => {
                assert_eq!(after_trial, 1);
                assert!(matches!(cause, AbortCause::Transport(_)));
            }
            other => panic!("expected abort, got {other:?}"),
        }

        // The success is recorded first, then the transport fault.
        assert_eq!(outcomes(&events), vec![(1, TrialStatus::Success)]);
        assert!(matches!(
            &events[..],
            [SessionEvent::Outcome(_), SessionEvent::Fault(_)]
        ));
        assert_alternating(&log.entries());
    }

    #[test]
    fn lowest_slot_wins_a_simultaneous_press() {
        let log = TriggerLog::default();
        let first = ScriptedPad::new("pad-a", &[PollScript::Pressed]);
        let second = ScriptedPad::new("pad-b", &[PollScript::Pressed]);
        let second_polls = second.poll_counter();

        let (verdict, _) = run_session(
            quick_settings(1),
            vec![Box::new(first), Box::new(second)],
            ScriptedTrigger::reliable(log),
        );

        assert!(matches!(verdict, SessionVerdict::Completed { trials: 1 }));
        // The scan returns at the first pressed pad, so the later slot is
        // never consulted that tick.
        assert_eq!(second_polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn identical_scripts_produce_identical_status_sequences() {
        let run = || {
            let pad = ScriptedPad::new(
                "pad-a",
                &[PollScript::Pressed, PollScript::Pressed, PollScript::Gone],
            );
            let (_, events) = run_session(
                quick_settings(6),
                vec![Box::new(pad)],
                ScriptedTrigger::reliable(TriggerLog::default()),
            );
            outcomes(&events)
        };

        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn handle_publishes_lines_and_summary() {
        let log = TriggerLog::default();
        let board = ResultBoard::new();
        let pad = ScriptedPad::new("pad-a", &[PollScript::Pressed]);

        let handle = SessionHandle::spawn(
            quick_settings(3),
            vec![Box::new(pad)],
            Box::new(ScriptedTrigger::reliable(log.clone())),
            board.clone(),
        )
        .unwrap();

        let verdict = handle.join().await.unwrap();
        assert!(matches!(verdict, SessionVerdict::Completed { trials: 3 }));

        let lines = board.snapshot();
        assert_eq!(lines.len(), 5, "unexpected lines: {lines:?}");
        for (i, line) in lines[..3].iter().enumerate() {
            assert!(line.starts_with(&format!("trial {}: ", i + 1)));
            assert!(line.ends_with(" ms"));
        }
        assert_eq!(lines[3], "");
        assert!(lines[4].starts_with("average: "));
        assert_alternating(&log.entries());
    }

    #[tokio::test]
    async fn handle_reports_the_configuration_diagnostic() {
        let log = TriggerLog::default();
        let board = ResultBoard::new();

        let result = SessionHandle::spawn(
            quick_settings(3),
            Vec::new(),
            Box::new(ScriptedTrigger::reliable(log.clone())),
            board.clone(),
        );

        assert!(matches!(result, Err(SessionError::Configuration(_))));
        assert_eq!(board.snapshot(), vec!["no controllers configured"]);
        assert!(log.entries().is_empty());
    }
}
