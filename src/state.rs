//! Shared session state.
//!
//! Only the dispatcher writes `positions`; only the sequence runner writes
//! `running`, `cancel_requested` and `active`. Everything else reads a
//! [`SessionSnapshot`].

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::registry::JointRegistry;
use crate::types::{Angle, JointId, LinkStatus};

pub type SharedState = Arc<Mutex<SessionState>>;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) link: LinkStatus,
    pub(crate) positions: BTreeMap<JointId, Angle>,
    pub(crate) running: bool,
    pub(crate) cancel_requested: bool,
    /// Name of the program holding `running`.
    pub(crate) active: Option<String>,
}

impl SessionState {
    pub fn new(registry: &JointRegistry) -> Self {
        SessionState {
            link: LinkStatus::Disconnected,
            positions: registry.home_pose().into_iter().collect(),
            running: false,
            cancel_requested: false,
            active: None,
        }
    }

    pub fn shared(registry: &JointRegistry) -> SharedState {
        Arc::new(Mutex::new(Self::new(registry)))
    }

    pub fn position(&self, joint: JointId) -> Angle {
        // Always populated at construction and never removed.
        self.positions.get(&joint).copied().unwrap_or_default()
    }

    pub(crate) fn reset_positions(&mut self, registry: &JointRegistry) {
        self.positions = registry.home_pose().into_iter().collect();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            link: self.link,
            positions: self.positions.clone(),
            running: self.running,
            cancel_requested: self.cancel_requested,
            active_sequence: self.active.clone(),
        }
    }
}

/// Read-only copy handed to callers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub link: LinkStatus,
    pub positions: BTreeMap<JointId, Angle>,
    pub running: bool,
    pub cancel_requested: bool,
    pub active_sequence: Option<String>,
}

impl SessionSnapshot {
    pub fn position(&self, joint: JointId) -> Angle {
        self.positions.get(&joint).copied().unwrap_or_default()
    }

    pub fn is_home(&self, registry: &JointRegistry) -> bool {
        registry
            .home_pose()
            .into_iter()
            .all(|(joint, home)| self.position(joint) == home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_at_home() {
        let registry = JointRegistry::default();
        let state = SessionState::new(&registry);
        let snap = state.snapshot();
        assert_eq!(snap.link, LinkStatus::Disconnected);
        assert_eq!(snap.positions.len(), 4);
        assert!(snap.is_home(&registry));
        assert!(!snap.running);
        assert!(!snap.cancel_requested);
    }

    #[test]
    fn reset_restores_home_pose() {
        let registry = JointRegistry::default();
        let mut state = SessionState::new(&registry);
        state.positions.insert(JointId::Elbow, 12);
        assert!(!state.snapshot().is_home(&registry));
        state.reset_positions(&registry);
        assert!(state.snapshot().is_home(&registry));
    }
}
