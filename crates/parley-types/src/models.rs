use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a direct-message thread by the sorted pair of its participants,
/// so `DmThreadId::new(a, b) == DmThreadId::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[Uuid; 2]", from = "[Uuid; 2]")]
pub struct DmThreadId {
    low: Uuid,
    high: Uuid,
}

impl DmThreadId {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.low, self.high]
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }
}

impl fmt::Display for DmThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

impl From<DmThreadId> for [Uuid; 2] {
    fn from(id: DmThreadId) -> Self {
        id.participants()
    }
}

impl From<[Uuid; 2]> for DmThreadId {
    fn from([a, b]: [Uuid; 2]) -> Self {
        Self::new(a, b)
    }
}

/// Where a message lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversation {
    Channel { channel_id: Uuid },
    Direct { thread: DmThreadId },
}

impl Conversation {
    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::Channel { channel_id } => Some(*channel_id),
            Self::Direct { .. } => None,
        }
    }
}
