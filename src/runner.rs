//! Timed multi-step programs with cooperative cancellation.
//!
//! Idle -> Running -> (Completed | Cancelled) -> homing -> Idle.
//! At most one program (a sequence or `go_home`) holds the arm at a time.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatcher::MotionDispatcher;
use crate::error::ArmError;
use crate::registry::JointRegistry;
use crate::state::SharedState;
use crate::types::{LinkStatus, MotionMode, MoveOutcome, Sequence, SequenceEvent, SequenceOutcome, SequenceStatus};

const EVENT_CAPACITY: usize = 64;
const HOME_PROGRAM: &str = "home";

/// Holds the `running` flag; releases it on drop, including when the owning
/// future is dropped mid-run.
struct RunGuard {
    state: SharedState,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.active = None;
    }
}

#[derive(Clone)]
pub struct SequenceRunner {
    state: SharedState,
    dispatcher: MotionDispatcher,
    registry: Arc<JointRegistry>,
    events: broadcast::Sender<SequenceEvent>,
    home_duration_ms: u64,
}

impl SequenceRunner {
    pub fn new(state: SharedState, dispatcher: MotionDispatcher, registry: Arc<JointRegistry>, home_duration_ms: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SequenceRunner {
            state,
            dispatcher,
            registry,
            events,
            home_duration_ms,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Runs `sequence` to the end or until cancelled, then drives the arm home.
    ///
    /// Transport failures on individual steps are counted, not fatal. Losing
    /// the link ends the run as cancelled at that step.
    pub async fn start(&self, sequence: &Sequence) -> Result<SequenceOutcome, ArmError> {
        if sequence.is_empty() {
            return Err(ArmError::InvalidSequence {
                name: sequence.name().to_string(),
                reason: "sequence has no steps".into(),
            });
        }
        let name = sequence.name().to_string();
        let _guard = self.claim(&name, "run a sequence")?;
        self.dispatcher.yield_to_program();

        info!("running {} ({} steps)", name, sequence.steps().len());
        self.emit(SequenceEvent::Started { name: name.clone() });

        let mut status = SequenceStatus::Completed;
        let mut steps_executed = 0;
        let mut write_failures = 0;

        for (index, step) in sequence.steps().iter().enumerate() {
            if self.state.lock().cancel_requested {
                status = SequenceStatus::Cancelled { at_step: index };
                break;
            }

            match self.dispatcher.move_joint(step.joint, step.target, MotionMode::Instant, false) {
                Ok(_) => {}
                Err(ArmError::NotConnected { .. }) => {
                    warn!("{} step {}: link closed", name, index);
                    status = SequenceStatus::Cancelled { at_step: index };
                    break;
                }
                Err(e) => {
                    warn!("{} step {}: {}", name, index, e);
                    write_failures += 1;
                }
            }
            steps_executed += 1;
            self.emit(SequenceEvent::StepDispatched {
                name: name.clone(),
                index,
                step: *step,
            });

            tokio::time::sleep(Duration::from_millis(step.hold_ms)).await;
        }

        match status {
            SequenceStatus::Completed => {
                info!("{} completed", name);
                self.emit(SequenceEvent::Completed { name: name.clone() });
            }
            SequenceStatus::Cancelled { at_step } => {
                info!("{} cancelled before step {}", name, at_step);
                self.emit(SequenceEvent::Cancelled {
                    name: name.clone(),
                    at_step,
                });
            }
        }

        if let Err(e) = self.drive_home().await {
            warn!("{}: return to home incomplete: {}", name, e);
        }

        Ok(SequenceOutcome {
            name,
            status,
            steps_executed,
            write_failures,
        })
    }

    /// Requests cancellation of the running program. Returns false when
    /// nothing is running.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        if !state.cancel_requested {
            info!("cancel requested for {}", state.active.as_deref().unwrap_or("program"));
        }
        state.cancel_requested = true;
        true
    }

    /// Smoothly moves every joint to its home angle, one at a time.
    pub async fn go_home(&self) -> Result<(), ArmError> {
        let _guard = self.claim(HOME_PROGRAM, "go home")?;
        self.dispatcher.yield_to_program();
        self.drive_home().await
    }

    fn claim(&self, name: &str, operation: &'static str) -> Result<RunGuard, ArmError> {
        let mut state = self.state.lock();
        if state.running {
            return Err(ArmError::AlreadyRunning {
                requested: name.to_string(),
                active: state.active.clone().unwrap_or_default(),
            });
        }
        if state.link == LinkStatus::Disconnected {
            return Err(ArmError::NotConnected { operation });
        }
        state.running = true;
        state.cancel_requested = false;
        state.active = Some(name.to_string());
        Ok(RunGuard {
            state: Arc::clone(&self.state),
        })
    }

    /// Visits every joint even after a failed write; reports the first error.
    /// Joints already at home get no move and no settle delay.
    async fn drive_home(&self) -> Result<(), ArmError> {
        let mode = MotionMode::smooth(self.home_duration_ms);
        let mut first_error = None;

        for (joint, home) in self.registry.home_pose() {
            if self.state.lock().position(joint) == home {
                continue;
            }
            match self.dispatcher.move_joint(joint, home, mode, false) {
                Ok(MoveOutcome::Skipped) => continue,
                Ok(_) => {}
                Err(e @ ArmError::NotConnected { .. }) => return Err(e),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
            let settle = self.registry.spec(joint).settle_ms;
            debug!("{} homing, settling {}ms", joint, settle);
            tokio::time::sleep(Duration::from_millis(settle)).await;
        }

        self.emit(SequenceEvent::Homed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn emit(&self, event: SequenceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;
    use crate::transport::RecordingTransport;
    use crate::types::{JointId, Step};

    fn runner(link: LinkStatus) -> (SequenceRunner, SharedState, RecordingTransport) {
        let registry = Arc::new(JointRegistry::default());
        let state = SessionState::shared(&registry);
        state.lock().link = link;
        let dispatcher = MotionDispatcher::new(state.clone(), registry.clone(), Duration::from_millis(100));
        let transport = RecordingTransport::new();
        dispatcher.attach(Arc::new(transport.clone()));
        (SequenceRunner::new(state.clone(), dispatcher, registry, 600), state, transport)
    }

    fn nod() -> Sequence {
        Sequence::new(
            "NOD",
            vec![
                Step::new(JointId::Elbow, 110, 400),
                Step::new(JointId::Elbow, 70, 400),
                Step::new(JointId::Elbow, 110, 400),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sequence_is_rejected() {
        let (runner, state, _) = runner(LinkStatus::Connected);
        let err = runner.start(&Sequence::new("NOTHING", vec![])).await.unwrap_err();
        assert!(matches!(err, ArmError::InvalidSequence { ref name, .. } if name == "NOTHING"));
        assert!(!state.lock().running);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_start_is_rejected() {
        let (runner, state, _) = runner(LinkStatus::Disconnected);
        let err = runner.start(&nod()).await.unwrap_err();
        assert!(matches!(err, ArmError::NotConnected { .. }));
        assert!(!state.lock().running);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_returns_home() {
        let (runner, state, transport) = runner(LinkStatus::Connected);
        let mut events = runner.subscribe();
        let outcome = runner.start(&nod()).await.unwrap();

        assert_eq!(outcome.status, SequenceStatus::Completed);
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(outcome.write_failures, 0);
        assert_eq!(
            transport.lines(),
            vec!["#2P1722", "#2P1277", "#2P1722", "#2S1500T600"]
        );
        assert!(!state.lock().running);
        assert_eq!(state.lock().position(JointId::Elbow), 90);

        assert_eq!(events.recv().await.unwrap(), SequenceEvent::Started { name: "NOD".into() });
        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(SequenceEvent::Homed));
    }

    #[tokio::test(start_paused = true)]
    async fn write_failures_do_not_abort_the_run() {
        let (runner, state, transport) = runner(LinkStatus::Connected);
        transport.set_failing(true);
        let outcome = runner.start(&nod()).await.unwrap();
        assert_eq!(outcome.status, SequenceStatus::Completed);
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(outcome.write_failures, 3);
        assert!(!state.lock().running);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_takes_effect_at_next_step() {
        let (runner, state, _) = runner(LinkStatus::Simulated);
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&nod()).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(runner.cancel());

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, SequenceStatus::Cancelled { at_step: 2 });
        assert_eq!(outcome.steps_executed, 2);
        let state = state.lock();
        assert!(!state.running);
        assert_eq!(state.position(JointId::Elbow), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_when_idle_is_a_no_op() {
        let (runner, state, _) = runner(LinkStatus::Connected);
        assert!(!runner.cancel());
        assert!(!state.lock().cancel_requested);
    }

    #[tokio::test(start_paused = true)]
    async fn go_home_is_exclusive() {
        let (runner, _state, _) = runner(LinkStatus::Simulated);
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&nod()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = runner.go_home().await.unwrap_err();
        assert!(matches!(err, ArmError::AlreadyRunning { ref active, .. } if active == "NOD"));
        task.await.unwrap().unwrap();
        runner.go_home().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_link_ends_the_run_as_cancelled() {
        let (runner, state, _) = runner(LinkStatus::Simulated);
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&nod()).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        state.lock().link = LinkStatus::Disconnected;

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, SequenceStatus::Cancelled { at_step: 2 });
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(outcome.write_failures, 0);
        assert!(!state.lock().running);
    }

    #[tokio::test(start_paused = true)]
    async fn homing_skips_joints_already_home() {
        let (runner, state, _) = runner(LinkStatus::Simulated);
        let started = tokio::time::Instant::now();
        runner.go_home().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);

        state.lock().positions.insert(JointId::Shoulder, 30);
        let started = tokio::time::Instant::now();
        runner.go_home().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert_eq!(state.lock().position(JointId::Shoulder), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn claiming_the_arm_drops_parked_manual_moves() {
        let (runner, state, transport) = runner(LinkStatus::Connected);
        runner.dispatcher.move_manual(JointId::Shoulder, 10, MotionMode::Instant, true).unwrap();
        assert_eq!(runner.dispatcher.pending_count(), 1);

        runner.start(&nod()).await.unwrap();
        assert_eq!(runner.dispatcher.pending_count(), 0);
        assert!(!transport.lines().contains(&"#1P611".to_string()));
        // The optimistic position was still recorded, so homing smooths it back.
        assert!(transport.lines().contains(&"#1S1500T600".to_string()));
        assert_eq!(state.lock().position(JointId::Shoulder), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_releases_the_arm() {
        let (runner, state, _) = runner(LinkStatus::Simulated);
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&nod()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(state.lock().running);
        task.abort();
        let _ = task.await;
        assert!(!state.lock().running);
    }
}
