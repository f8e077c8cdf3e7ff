use crate::{
    config::{ArmConfig, SequenceBook},
    dispatcher::MotionDispatcher,
    error::{ArmError, ConfigError},
    registry::JointRegistry,
    runner::SequenceRunner,
    state::{SessionSnapshot, SessionState, SharedState},
    transport::Transport,
    types::{Angle, Command, JointId, LinkStatus, MotionMode, MoveOutcome, Sequence, SequenceEvent, SequenceOutcome},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{info, warn};

/// Result of [`Controller::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Moved(MoveOutcome),
    Sequence(SequenceOutcome),
    Homed,
    /// `true` when a running program was told to stop.
    Stopped(bool),
}

/// Entry point for the arm: one instance per session. Cheap to clone; clones
/// share the same session, so one task can `stop()` while another awaits a
/// sequence.
#[derive(Clone)]
pub struct Controller {
    state: SharedState,
    registry: Arc<JointRegistry>,
    sequences: Arc<SequenceBook>,
    dispatcher: MotionDispatcher,
    runner: SequenceRunner,
}

impl Controller {
    pub fn new(config: &ArmConfig) -> Result<Self, ConfigError> {
        let (registry, sequences) = config.build()?;
        let registry = Arc::new(registry);
        let state = SessionState::shared(&registry);
        let dispatcher = MotionDispatcher::new(
            Arc::clone(&state),
            Arc::clone(&registry),
            Duration::from_millis(config.debounce_ms),
        )
        .with_manual_during_programs(config.allow_manual_during_sequence);
        let runner = SequenceRunner::new(
            Arc::clone(&state),
            dispatcher.clone(),
            Arc::clone(&registry),
            config.home_duration_ms,
        );

        Ok(Controller {
            state,
            registry,
            sequences: Arc::new(sequences),
            dispatcher,
            runner,
        })
    }

    /// Routes writes to `transport` and marks the link connected.
    pub fn connect(&self, transport: Arc<dyn Transport>) {
        self.dispatcher.attach(transport);
        self.state.lock().link = LinkStatus::Connected;
        info!("link connected");
    }

    /// Enables or leaves simulation. Simulated moves only update positions.
    /// Leaving simulation closes the session the same way `disconnect` does.
    pub fn simulate(&self, enabled: bool) {
        let link = self.state.lock().link;
        match (enabled, link) {
            (true, LinkStatus::Disconnected) => {
                self.state.lock().link = LinkStatus::Simulated;
                info!("simulation on, hardware bypassed");
            }
            (false, LinkStatus::Simulated) => {
                self.close_link();
                info!("simulation off");
            }
            (true, LinkStatus::Connected) => warn!("already connected; simulation not enabled"),
            _ => {}
        }
    }

    /// Closes the session: cancels any running program, drops pending moves,
    /// forgets the transport and resets positions to home.
    pub fn disconnect(&self) {
        if self.close_link() != LinkStatus::Disconnected {
            info!("link disconnected");
        }
    }

    /// Returns the link status it replaced.
    fn close_link(&self) -> LinkStatus {
        self.runner.cancel();
        self.dispatcher.cancel_pending();
        self.dispatcher.detach();

        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.link, LinkStatus::Disconnected);
        state.reset_positions(&self.registry);
        previous
    }

    /// Manual move. Refused with `SequenceActive` while a program runs unless
    /// `allow_manual_during_sequence` is set.
    pub fn move_joint(&self, joint: JointId, angle: Angle, mode: MotionMode, debounce: bool) -> Result<MoveOutcome, ArmError> {
        self.dispatcher.move_manual(joint, angle, mode, debounce)
    }

    pub async fn run_sequence(&self, name: &str) -> Result<SequenceOutcome, ArmError> {
        let sequence = self.sequences.get(name).ok_or_else(|| ArmError::InvalidSequence {
            name: name.to_string(),
            reason: "no sequence with that name".into(),
        })?;
        self.runner.start(&sequence).await
    }

    pub async fn run(&self, sequence: &Sequence) -> Result<SequenceOutcome, ArmError> {
        self.runner.start(sequence).await
    }

    pub async fn go_home(&self) -> Result<(), ArmError> {
        self.runner.go_home().await
    }

    /// Drops pending debounced moves and cancels the running program, which
    /// then returns the arm home.
    pub fn stop(&self) -> bool {
        self.dispatcher.cancel_pending();
        self.runner.cancel()
    }

    pub async fn execute(&self, command: Command) -> Result<CommandReply, ArmError> {
        match command {
            Command::Move { joint, angle } => self
                .move_joint(joint, angle, MotionMode::Instant, false)
                .map(CommandReply::Moved),
            Command::RunSequence { name } => self.run_sequence(&name).await.map(CommandReply::Sequence),
            Command::GoHome => self.go_home().await.map(|_| CommandReply::Homed),
            Command::Stop => Ok(CommandReply::Stopped(self.stop())),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.runner.subscribe()
    }

    pub fn registry(&self) -> &JointRegistry {
        &self.registry
    }

    pub fn sequence(&self, name: &str) -> Option<Arc<Sequence>> {
        self.sequences.get(name)
    }

    pub fn sequence_names(&self) -> Vec<String> {
        self.sequences.names().map(str::to_string).collect()
    }
}
