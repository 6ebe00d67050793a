//! Echo suppression
//!
//! Every write toward one side opens a window during which notifications
//! coming back from that side are absorbed into the baseline instead of being
//! diffed. This assumes the round trip finishes inside the window; a slower
//! echo produces one redundant diff that converges to a no-op.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(2);

/// Which side the bridge just wrote to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToLocal,
    ToRemote,
}

/// Per-direction suppression deadlines, owned by one bridge instance
#[derive(Debug, Clone)]
pub struct EchoGuard {
    window: Duration,
    to_local: Option<Instant>,
    to_remote: Option<Instant>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            to_local: None,
            to_remote: None,
        }
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<Instant> {
        match direction {
            Direction::ToLocal => &mut self.to_local,
            Direction::ToRemote => &mut self.to_remote,
        }
    }

    /// Open (or extend) the window for a write performed at `now`
    pub fn arm(&mut self, direction: Direction, now: Instant) {
        let deadline = now + self.window;
        let slot = self.slot(direction);
        if slot.map_or(true, |current| current < deadline) {
            *slot = Some(deadline);
        }
    }

    pub fn is_suppressed(&self, direction: Direction, now: Instant) -> bool {
        self.suppressed_until(direction)
            .is_some_and(|deadline| now < deadline)
    }

    pub fn suppressed_until(&self, direction: Direction) -> Option<Instant> {
        match direction {
            Direction::ToLocal => self.to_local,
            Direction::ToRemote => self.to_remote,
        }
    }

    pub fn clear(&mut self) {
        self.to_local = None;
        self.to_remote = None;
    }
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSION_WINDOW)
    }
}
