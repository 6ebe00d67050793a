//! External character sheets mirrored into the local tracker

use serde::{Deserialize, Serialize};

/// The subset of a sheet's stats the tracker mirrors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatBlock {
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub max_hp: i32,
    #[serde(default)]
    pub ac: i32,
    #[serde(default)]
    pub initiative: Option<i32>,
}

/// A summoned creature owned by a character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummonInstance {
    pub id: String,
    pub stats: StatBlock,
}

/// Snapshot of one external character document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSheet {
    pub id: String,
    #[serde(default)]
    pub base: StatBlock,
    /// Transformation stats (wild shape, polymorph, ...)
    #[serde(default)]
    pub override_stats: Option<StatBlock>,
    #[serde(default)]
    pub override_active: bool,
    #[serde(default)]
    pub summons: Vec<SummonInstance>,
}
