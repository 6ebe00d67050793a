//! Local (tracker-side) combatant types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-scoped identity assigned by the local tracker
pub type CombatantId = String;

/// Status tag applied by a kill so the tracker's rules see unconsciousness
pub const UNCONSCIOUS: &str = "Unconscious";

/// A combatant as the local tracker sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    /// Base name without the disambiguating number
    pub name: String,
    /// Set when another combatant already uses the same base name
    #[serde(default)]
    pub number: Option<u32>,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub temp_hp: i32,
    pub ac: i32,
    pub initiative: i32,
    #[serde(default)]
    pub initiative_modifier: i32,
    #[serde(default)]
    pub player: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub statuses: Vec<String>,
}

impl Combatant {
    /// Name shown to users: base name plus number when disambiguated
    pub fn display_name(&self) -> String {
        match self.number {
            Some(n) => format!("{} {n}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn target(&self) -> Target {
        Target::Id(self.id.clone())
    }
}

/// Creation shape accepted by the local tracker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCombatant {
    pub name: String,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub max_hp: i32,
    #[serde(default)]
    pub temp_hp: i32,
    #[serde(default)]
    pub ac: i32,
    #[serde(default)]
    pub initiative: i32,
    #[serde(default)]
    pub initiative_modifier: i32,
    #[serde(default)]
    pub player: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[cfg(test)]
impl NewCombatant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn hp(mut self, hp: i32, max_hp: i32) -> Self {
        self.hp = hp;
        self.max_hp = max_hp;
        self
    }

    pub fn ac(mut self, ac: i32) -> Self {
        self.ac = ac;
        self
    }

    pub fn initiative(mut self, initiative: i32) -> Self {
        self.initiative = initiative;
        self
    }

    pub fn player(mut self) -> Self {
        self.player = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Partial edit of a local combatant, as submitted by the tracker UI
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CombatantEdit {
    pub hp: Option<i32>,
    pub max_hp: Option<i32>,
    pub ac: Option<i32>,
    pub initiative: Option<i32>,
    pub hidden: Option<bool>,
}

impl CombatantEdit {
    pub fn writes(&self) -> Vec<LocalWrite> {
        let mut writes = Vec::new();
        if let Some(hp) = self.hp {
            writes.push(LocalWrite::Hp(hp));
        }
        if let Some(max_hp) = self.max_hp {
            writes.push(LocalWrite::MaxHp(max_hp));
        }
        if let Some(ac) = self.ac {
            writes.push(LocalWrite::Ac(ac));
        }
        if let Some(initiative) = self.initiative {
            writes.push(LocalWrite::Initiative(initiative));
        }
        if let Some(hidden) = self.hidden {
            writes.push(LocalWrite::Hidden(hidden));
        }
        writes
    }
}

/// A single field-level mutation of a local combatant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalWrite {
    Hp(i32),
    MaxHp(i32),
    Ac(i32),
    Initiative(i32),
    Hidden(bool),
    /// HP to zero plus the unconscious tag
    Kill,
}

/// Addressing for local mutations: by tracker id or by display name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Id(CombatantId),
    Name(String),
}

impl Target {
    pub fn matches(&self, combatant: &Combatant) -> bool {
        match self {
            Target::Id(id) => combatant.id == *id,
            Target::Name(name) => combatant.display_name() == *name,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => write!(f, "id:{id}"),
            Target::Name(name) => write!(f, "name:{name}"),
        }
    }
}
