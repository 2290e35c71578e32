//! Event sequence identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an event in the global ordering and in its type's ordering.
///
/// The two numbers come from two separately locked counters, so they are
/// each unique and increasing but not updated as one atomic pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSequenceId {
    /// Store-wide counter value.
    pub global_id: i64,
    /// Per-event-type counter value.
    pub event_type_id: i64,
}

impl EventSequenceId {
    /// Create a sequence id.
    pub const fn new(global_id: i64, event_type_id: i64) -> Self {
        Self {
            global_id,
            event_type_id,
        }
    }
}

impl fmt::Display for EventSequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.global_id, self.event_type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(EventSequenceId::new(12, 3).to_string(), "12/3");
    }
}
