//! Service lifecycle state and exit record.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state of a service owner.
///
/// States are totally ordered by declaration order and only ever move forward:
/// `Uninitialized → Initialized → Starting → Running → Stopping → Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServiceState {
    Uninitialized = 0,
    Initialized = 1,
    Starting = 2,
    Running = 3,
    Stopping = 4,
    Stopped = 5,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceState::Uninitialized,
            1 => ServiceState::Initialized,
            2 => ServiceState::Starting,
            3 => ServiceState::Running,
            4 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Initialized => "initialized",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free holder of a [`ServiceState`].
///
/// Cloning shares the same underlying state.
#[derive(Clone, Debug)]
pub struct StateCell(Arc<AtomicU8>);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ServiceState::Uninitialized as u8)))
    }

    pub fn get(&self) -> ServiceState {
        ServiceState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to`. Staying in the same state is allowed.
    ///
    /// # Panics
    /// Panics when `to` is earlier than the current state: a backward
    /// transition is a wiring bug, not a runtime condition.
    pub fn transition(&self, to: ServiceState) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = ServiceState::from_u8(current);
            if to < from {
                panic!("illegal service state transition: {from} -> {to} (states only move forward)");
            }
            match self.0.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if from != to {
                        tracing::debug!(from = %from, to = %to, "service state transition");
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Why and how the service stopped.
///
/// Built exactly once per shutdown and shared immutably with modules, the
/// shutdown observer and everyone waiting on the exit channel.
#[derive(Clone, Debug)]
pub struct ServiceExit {
    pub reason: String,
    pub error: Option<Arc<anyhow::Error>>,
    pub exit_code: i32,
}

impl ServiceExit {
    /// Build an exit record. `exit_code` defaults to 1 when an error is
    /// present and to 0 otherwise.
    pub fn new(reason: impl Into<String>, error: Option<anyhow::Error>, exit_code: Option<i32>) -> Self {
        let exit_code = exit_code.unwrap_or(if error.is_some() { 1 } else { 0 });
        Self {
            reason: reason.into(),
            error: error.map(Arc::new),
            exit_code,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for ServiceExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{} (exit code {}): {}", self.reason, self.exit_code, err),
            None => write!(f, "{} (exit code {})", self.reason, self.exit_code),
        }
    }
}
