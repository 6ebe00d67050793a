//! Snapshot diffing

use crate::model::{Combatant, RemoteCombatant};
use std::collections::{HashMap, HashSet};

/// A collection element that can be keyed and compared between snapshots
pub trait Tracked {
    fn key(&self) -> &str;

    /// True when every synchronized field is equal
    fn same_tracked_fields(&self, other: &Self) -> bool;
}

impl Tracked for Combatant {
    fn key(&self) -> &str {
        &self.id
    }

    fn same_tracked_fields(&self, other: &Self) -> bool {
        self.hp == other.hp
            && self.max_hp == other.max_hp
            && self.ac == other.ac
            && self.initiative == other.initiative
            && self.hidden == other.hidden
    }
}

impl Tracked for RemoteCombatant {
    fn key(&self) -> &str {
        &self.id
    }

    fn same_tracked_fields(&self, other: &Self) -> bool {
        self.hp == other.hp
            && self.max_hp == other.max_hp
            && self.ac == other.ac
            && self.initiative == other.initiative
            && self.is_dead == other.is_dead
            && self.is_hidden_from_players == other.is_hidden_from_players
    }
}

/// One element present in both snapshots with differing tracked fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<'a, T> {
    pub before: &'a T,
    pub after: &'a T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDiff<'a, T> {
    /// In current-snapshot order
    pub added: Vec<&'a T>,
    /// In previous-snapshot order
    pub removed: Vec<&'a T>,
    pub changed: Vec<Change<'a, T>>,
}

impl<T> SnapshotDiff<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compute added, removed and changed elements between two snapshots
pub fn diff<'a, T: Tracked>(previous: &'a [T], current: &'a [T]) -> SnapshotDiff<'a, T> {
    let before: HashMap<&str, &T> = previous.iter().map(|item| (item.key(), item)).collect();
    let now: HashSet<&str> = current.iter().map(Tracked::key).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    for item in current {
        match before.get(item.key()) {
            None => added.push(item),
            Some(old) if !old.same_tracked_fields(item) => changed.push(Change {
                before: *old,
                after: item,
            }),
            Some(_) => {}
        }
    }

    let removed = previous
        .iter()
        .filter(|item| !now.contains(item.key()))
        .collect();

    SnapshotDiff {
        added,
        removed,
        changed,
    }
}
