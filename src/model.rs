//! Encounter data model
//!
//! Two shapes of the same encounter live side by side: the local tracker's
//! [`Combatant`] and the shared record's [`RemoteCombatant`]. Nothing in this
//! module performs I/O.

mod character;
mod combatant;
mod record;

pub use character::{CharacterSheet, StatBlock, SummonInstance};
pub use combatant::{
    Combatant, CombatantEdit, CombatantId, LocalWrite, NewCombatant, Target, UNCONSCIOUS,
};
pub use record::{
    CombatantKind, CombatantUpdate, NewRecord, RecordPatch, RecordRef, RecordSummary,
    RemoteCombatant, SharedRecord,
};
