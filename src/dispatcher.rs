//! Single-joint motion: the only path from a target angle to a transport write.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::error::ArmError;
use crate::protocol::{encode_instant, encode_smooth};
use crate::registry::JointRegistry;
use crate::state::SharedState;
use crate::transport::{Transport, TransportError};
use crate::types::{clamp_duration, clamp_servo_angle, Angle, JointId, LinkStatus, MotionMode, MoveOutcome};

struct PendingMove {
    handle: JoinHandle<()>,
    generation: u64,
    target: Angle,
    mode: MotionMode,
    /// Last angle actually sent before this burst of requests started.
    from: Angle,
}

#[derive(Default)]
struct PendingMoves {
    by_joint: HashMap<JointId, PendingMove>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct MotionDispatcher {
    state: SharedState,
    registry: Arc<JointRegistry>,
    transport: Arc<Mutex<Option<Arc<dyn Transport>>>>,
    pending: Arc<Mutex<PendingMoves>>,
    debounce: Duration,
    /// Let manual moves through while a program holds the arm.
    manual_during_programs: bool,
}

impl MotionDispatcher {
    pub fn new(state: SharedState, registry: Arc<JointRegistry>, debounce: Duration) -> Self {
        MotionDispatcher {
            state,
            registry,
            transport: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(PendingMoves::default())),
            debounce,
            manual_during_programs: false,
        }
    }

    pub fn with_manual_during_programs(mut self, allow: bool) -> Self {
        self.manual_during_programs = allow;
        self
    }

    pub(crate) fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock() = Some(transport);
    }

    pub(crate) fn detach(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().take()
    }

    /// Moves one joint on behalf of a running program.
    ///
    /// The clamped target is recorded in the session before anything is
    /// written, and stays recorded if the write fails. With `debounce` the
    /// write is parked for the debounce window; a newer request for the same
    /// joint replaces it.
    pub fn move_joint(&self, joint: JointId, target: Angle, mode: MotionMode, debounce: bool) -> Result<MoveOutcome, ArmError> {
        self.dispatch(joint, target, mode, debounce, false)
    }

    /// Same as [`move_joint`](Self::move_joint), but refused with
    /// `SequenceActive` while a program holds the arm, unless manual moves
    /// during programs are allowed. The check and the position update happen
    /// under one lock.
    pub fn move_manual(&self, joint: JointId, target: Angle, mode: MotionMode, debounce: bool) -> Result<MoveOutcome, ArmError> {
        self.dispatch(joint, target, mode, debounce, !self.manual_during_programs)
    }

    fn dispatch(
        &self,
        joint: JointId,
        target: Angle,
        mode: MotionMode,
        debounce: bool,
        refuse_if_running: bool,
    ) -> Result<MoveOutcome, ArmError> {
        let clamped = self.registry.clamp(joint, target);
        let (link, recorded) = {
            let mut state = self.state.lock();
            if state.link == LinkStatus::Disconnected {
                return Err(ArmError::NotConnected { operation: "move a joint" });
            }
            if refuse_if_running && state.running {
                warn!("refusing manual move of {} while a program runs", joint);
                return Err(ArmError::SequenceActive { joint });
            }
            let recorded = state.positions.insert(joint, clamped).unwrap_or(clamped);
            (state.link, recorded)
        };

        if link == LinkStatus::Simulated {
            debug!("simulated move {} -> {}", joint, clamped);
            return Ok(MoveOutcome::Simulated);
        }

        if debounce {
            return self.schedule(joint, clamped, recorded, mode);
        }

        // An immediate move supersedes anything still waiting for this joint.
        let from = self.take_pending(joint).unwrap_or(recorded);
        self.send(joint, clamped, from, mode)
    }

    /// Drops parked manual moves when a program claims the arm. Keeps them
    /// when manual moves may interleave with programs.
    pub(crate) fn yield_to_program(&self) {
        if !self.manual_during_programs {
            self.cancel_pending();
        }
    }

    /// Drops every parked debounced move. Returns how many were dropped.
    pub fn cancel_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.by_joint.len();
        for (_, entry) in pending.by_joint.drain() {
            entry.handle.abort();
        }
        if count > 0 {
            debug!("dropped {} pending debounced moves", count);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().by_joint.len()
    }

    fn take_pending(&self, joint: JointId) -> Option<Angle> {
        let entry = self.pending.lock().by_joint.remove(&joint)?;
        entry.handle.abort();
        Some(entry.from)
    }

    fn schedule(&self, joint: JointId, target: Angle, recorded: Angle, mode: MotionMode) -> Result<MoveOutcome, ArmError> {
        let mut pending = self.pending.lock();
        let from = match pending.by_joint.remove(&joint) {
            Some(previous) => {
                previous.handle.abort();
                previous.from
            }
            None => recorded,
        };

        let generation = pending.next_generation;
        pending.next_generation += 1;

        let dispatcher = self.clone();
        let delay = self.debounce;
        let timer = async move {
            tokio::time::sleep(delay).await;
            dispatcher.fire(joint, generation);
        };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime.spawn(timer),
            Err(_) => {
                // No runtime to park the write on; send it now.
                drop(pending);
                return self.send(joint, target, from, mode);
            }
        };

        debug!("debounce {} -> {} in {}ms", joint, target, delay.as_millis());
        pending.by_joint.insert(
            joint,
            PendingMove {
                handle,
                generation,
                target,
                mode,
                from,
            },
        );
        Ok(MoveOutcome::Scheduled)
    }

    fn fire(&self, joint: JointId, generation: u64) {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.by_joint.get(&joint) {
                Some(entry) if entry.generation == generation => pending.by_joint.remove(&joint),
                _ => None,
            }
        };
        let Some(entry) = entry else { return };

        {
            let state = self.state.lock();
            if state.link != LinkStatus::Connected {
                debug!("link changed, dropping debounced move for {}", joint);
                return;
            }
            if state.running && !self.manual_during_programs {
                debug!("program holds the arm, dropping debounced move for {}", joint);
                return;
            }
        }
        if let Err(e) = self.send(joint, entry.target, entry.from, entry.mode) {
            warn!("debounced move failed: {}", e);
        }
    }

    fn send(&self, joint: JointId, target: Angle, from: Angle, mode: MotionMode) -> Result<MoveOutcome, ArmError> {
        let angle = clamp_servo_angle(target);
        let frame = match mode {
            MotionMode::Instant => encode_instant(joint, angle),
            MotionMode::Smooth(duration_ms) => {
                if (angle - from).abs() < 1 {
                    debug!("{} already at {}, skipping smooth move", joint, angle);
                    return Ok(MoveOutcome::Skipped);
                }
                encode_smooth(joint, angle, clamp_duration(duration_ms))
            }
        };

        let transport = self
            .transport
            .lock()
            .clone()
            .ok_or(ArmError::NotConnected { operation: "write a frame" })?;
        if !transport.is_open() {
            return Err(ArmError::TransportWriteFailed {
                joint,
                source: TransportError::Closed,
            });
        }

        debug!("{} -> {}: {}", joint, angle, String::from_utf8_lossy(&frame).trim_end());
        transport.write(&frame).map_err(|source| {
            warn!("write to {} failed: {}", joint, source);
            ArmError::TransportWriteFailed { joint, source }
        })?;
        Ok(MoveOutcome::Sent)
    }
}
