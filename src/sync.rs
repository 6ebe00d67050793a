//! Pure reconciliation algorithms
//!
//! Snapshot diffing, identity resolution, field translation, turn ordering
//! and echo suppression. Everything here is synchronous and free of I/O so
//! the bridge runtime can stay a thin effect executor around it.

mod diff;
mod identity;
mod ordering;
mod suppression;
mod translate;

#[cfg(test)]
mod proptests;

pub use diff::diff;
pub use identity::IdentityIndex;
pub use ordering::{resolve_turn, turn_index_of, turn_order};
pub use suppression::{Direction, EchoGuard, DEFAULT_SUPPRESSION_WINDOW};
pub use translate::{
    local_stat_writes, local_writes, new_local_from_remote, remote_from_local, remote_update,
    tie_breaker,
};
