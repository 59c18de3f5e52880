//! Full-mesh completion tracking
//!
//! The mesh is complete when we hold a connection to every other occupant
//! the relay reports: `connected + 1 >= room_count`. The tracker remembers
//! the previous verdict and reports only rising edges, so "full-connect"
//! is raised once per completion no matter how often it is re-evaluated.

use tracing::debug;

#[derive(Debug, Default)]
pub struct MeshTracker {
    /// Last relay-reported occupancy, including ourselves
    room_count: Option<u32>,
    /// Verdict of the previous evaluation
    was_complete: bool,
    /// Number of rising edges seen so far
    completions: u64,
    /// Number of room-count reports received
    room_reports: u64,
}

impl MeshTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_room_count(&mut self, count: u32) {
        self.room_count = Some(count);
        self.room_reports += 1;
    }

    pub fn room_count(&self) -> Option<u32> {
        self.room_count
    }

    pub fn is_complete(&self) -> bool {
        self.was_complete
    }

    pub fn completions(&self) -> u64 {
        self.completions
    }

    pub fn room_reports(&self) -> u64 {
        self.room_reports
    }

    /// Re-evaluate against the current connected-peer count
    ///
    /// Returns true only on a false -> true transition.
    pub fn recompute(&mut self, connected: usize) -> bool {
        let complete = match self.room_count {
            Some(count) => connected as u64 + 1 >= u64::from(count),
            None => false,
        };

        let rising = complete && !self.was_complete;
        if complete != self.was_complete {
            debug!(
                connected,
                room_count = ?self.room_count,
                complete,
                "Mesh completion changed"
            );
        }
        self.was_complete = complete;
        if rising {
            self.completions += 1;
        }
        rising
    }
}
