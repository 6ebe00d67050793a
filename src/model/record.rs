//! Shared record types and field-level patches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Who owns a remote combatant's stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CombatantKind {
    PlayerCharacter,
    #[default]
    Monster,
    Summon,
}

impl CombatantKind {
    /// Player characters and summons take their stats from character sheets,
    /// never from the local tracker.
    pub fn is_sheet_owned(self) -> bool {
        matches!(self, CombatantKind::PlayerCharacter | CombatantKind::Summon)
    }
}

/// Treats an explicit `null` the same as a missing field
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A combatant as stored in the shared record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCombatant {
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: CombatantKind,
    #[serde(default, deserialize_with = "lenient")]
    pub hp: i32,
    #[serde(default, deserialize_with = "lenient")]
    pub max_hp: i32,
    #[serde(default, deserialize_with = "lenient")]
    pub temp_hp: i32,
    #[serde(default, deserialize_with = "lenient")]
    pub ac: i32,
    #[serde(default, deserialize_with = "lenient")]
    pub initiative: i32,
    #[serde(default, deserialize_with = "lenient")]
    pub initiative_modifier: i32,
    #[serde(default, deserialize_with = "lenient")]
    pub is_dead: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub is_hidden_from_players: bool,
    #[serde(default)]
    pub death_round: Option<u32>,
    /// Secondary sort key, fixed when the combatant is first written
    #[serde(default, deserialize_with = "lenient")]
    pub tie_breaker: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summon_instance_id: Option<String>,
    /// Local tracker id this combatant mirrors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_id: Option<String>,
}

impl RemoteCombatant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: CombatantKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            hp: 0,
            max_hp: 0,
            temp_hp: 0,
            ac: 0,
            initiative: 0,
            initiative_modifier: 0,
            is_dead: false,
            is_hidden_from_players: false,
            death_round: None,
            tie_breaker: 0,
            character_id: None,
            summon_instance_id: None,
            bridge_id: None,
        }
    }
}

/// Address of one shared record inside its owning scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub scope: String,
    pub record: String,
}

impl RecordRef {
    pub fn new(scope: impl Into<String>, record: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            record: record.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.record)
    }
}

fn first_round() -> u32 {
    1
}

/// The multi-client encounter document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub combatants: Vec<RemoteCombatant>,
    #[serde(default = "first_round")]
    pub round: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub turn: usize,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SharedRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            combatants: Vec::new(),
            round: 1,
            turn: 0,
            updated_at: Utc::now(),
        }
    }

    /// Clamp values other writers may have left out of range
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.round = self.round.max(1);
        self
    }

    pub fn find(&self, id: &str) -> Option<&RemoteCombatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            round: self.round,
            combatant_count: self.combatants.len(),
        }
    }

    /// Apply a field-level patch the way the document store does
    pub fn apply(&mut self, patch: &RecordPatch) {
        for combatant in &patch.append {
            if self.find(&combatant.id).is_none() {
                self.combatants.push(combatant.clone());
            }
        }
        for update in &patch.update {
            // A concurrent remote delete wins over our update
            if let Some(target) = self.combatants.iter_mut().find(|c| c.id == update.id) {
                update.apply_to(target);
            }
        }
        if let Some(round) = patch.round {
            self.round = round.max(1);
        }
        if let Some(turn) = patch.turn {
            self.turn = turn;
        }
        self.updated_at = Utc::now();
    }
}

/// Listing entry for a scope's active records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub name: String,
    pub round: u32,
    pub combatant_count: usize,
}

/// Fields for a record that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub name: String,
    pub combatants: Vec<RemoteCombatant>,
    pub round: u32,
    pub turn: usize,
}

/// Atomic partial update of a shared record
///
/// Only named fields are written, so concurrent writers touching other
/// combatants or fields are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub append: Vec<RemoteCombatant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<CombatantUpdate>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.round.is_none()
            && self.turn.is_none()
            && self.append.is_empty()
            && self.update.iter().all(CombatantUpdate::is_empty)
    }

    /// The pending update for a combatant, created on first use
    pub fn update_for(&mut self, id: &str) -> &mut CombatantUpdate {
        if let Some(pos) = self.update.iter().position(|u| u.id == id) {
            return &mut self.update[pos];
        }
        self.update.push(CombatantUpdate::new(id));
        let last = self.update.len() - 1;
        &mut self.update[last]
    }

    /// Drop updates that ended up naming no fields
    #[must_use]
    pub fn compacted(mut self) -> Self {
        self.update.retain(|u| !u.is_empty());
        self
    }
}

/// Field-level update of a single remote combatant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hp: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dead: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hidden_from_players: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_id: Option<String>,
}

impl CombatantUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hp.is_none()
            && self.max_hp.is_none()
            && self.ac.is_none()
            && self.initiative.is_none()
            && self.is_dead.is_none()
            && self.is_hidden_from_players.is_none()
            && self.death_round.is_none()
            && self.bridge_id.is_none()
    }

    pub fn apply_to(&self, combatant: &mut RemoteCombatant) {
        if let Some(hp) = self.hp {
            combatant.hp = hp;
        }
        if let Some(max_hp) = self.max_hp {
            combatant.max_hp = max_hp;
        }
        if let Some(ac) = self.ac {
            combatant.ac = ac;
        }
        if let Some(initiative) = self.initiative {
            combatant.initiative = initiative;
        }
        if let Some(is_dead) = self.is_dead {
            combatant.is_dead = is_dead;
        }
        if let Some(hidden) = self.is_hidden_from_players {
            combatant.is_hidden_from_players = hidden;
        }
        if let Some(round) = self.death_round {
            combatant.death_round.get_or_insert(round);
        }
        // Identity is written once and never reassigned
        if let Some(bridge_id) = &self.bridge_id {
            if combatant.bridge_id.is_none() {
                combatant.bridge_id = Some(bridge_id.clone());
            }
        }
    }
}
