use std::fmt;
use std::time::Duration;

/// Lifecycle of a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session yet, or the last `connect()` failed.
    Idle,
    Connecting,
    Open,
    /// Waiting `delay` before reconnection attempt number `attempt` (1-based).
    Reconnecting { attempt: u32, delay: Duration },
    /// Gave up after `attempts` consecutive failed reconnections.
    Failed { attempts: u32 },
    /// Closed by `disconnect()`.
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// The driver makes no further transitions from these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {}ms)", delay.as_millis())
            }
            Self::Failed { attempts } => write!(f, "failed after {attempts} attempts"),
            Self::Closed => f.write_str("closed"),
        }
    }
}
