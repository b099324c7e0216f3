//! Externally observable pipeline state

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Status handle shared by the pipeline and its worker roles
pub type SharedStatus = Arc<Mutex<PipelineStatus>>;

/// Lifecycle of one worker role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleState {
    #[default]
    Starting,
    Running,
    Stopped,
    Failed,
}

/// Which worker role a status update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Capture,
    Analysis,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Capture => write!(f, "capture"),
            Role::Analysis => write!(f, "analysis"),
        }
    }
}

/// Pipeline status
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineStatus {
    /// Source sample rate, known once the source is open
    pub sample_rate: Option<u32>,

    /// Capture role state
    pub producer: RoleState,

    /// Analysis role state
    pub consumer: RoleState,

    /// Samples pushed into the exchange
    pub samples_captured: u64,

    /// Non-empty chunks pushed into the exchange
    pub chunks_captured: u64,

    /// Empty reads from the source
    pub underruns: u64,

    /// Columns written to the history
    pub frames_analyzed: u64,

    /// Most recent role failure
    pub last_error: Option<String>,
}

impl PipelineStatus {
    pub fn shared() -> SharedStatus {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn role(&self, role: Role) -> RoleState {
        match role {
            Role::Capture => self.producer,
            Role::Analysis => self.consumer,
        }
    }

    pub fn set_role(&mut self, role: Role, state: RoleState) {
        match role {
            Role::Capture => self.producer = state,
            Role::Analysis => self.consumer = state,
        }
    }

    /// Mark `role` failed and remember why
    pub fn record_failure(&mut self, role: Role, error: String) {
        self.set_role(role, RoleState::Failed);
        self.last_error = Some(format!("{} role failed: {}", role, error));
    }

    /// Both roles have finished, successfully or not
    pub fn is_finished(&self) -> bool {
        let done = |state: RoleState| matches!(state, RoleState::Stopped | RoleState::Failed);
        done(self.producer) && done(self.consumer)
    }
}
