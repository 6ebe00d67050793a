//! Character Mirror
//!
//! One-directional flow from external character sheets into the local
//! tracker. The mirror decides *what* to push; the runtime resolves the local
//! combatant and performs the writes. Nothing here touches the shared record.

use crate::capability::{CharacterFeed, FeedSender, Subscription};
use crate::model::{CharacterSheet, LocalWrite, RemoteCombatant, SharedRecord, StatBlock};
use std::collections::{BTreeSet, HashMap};

/// Which part of a sheet supplied the effective stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatSource {
    Base,
    Override,
    Summon,
}

/// Writes destined for the local counterpart of one remote combatant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPush {
    pub remote_id: String,
    pub writes: Vec<LocalWrite>,
    pushed: Pushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pushed {
    stats: StatBlock,
    source: StatSource,
}

/// Summon instance stats, then active override stats, then base stats
pub fn effective_stats(sheet: &CharacterSheet, remote: &RemoteCombatant) -> (StatBlock, StatSource) {
    let summon = remote
        .summon_instance_id
        .as_deref()
        .and_then(|id| sheet.summons.iter().find(|s| s.id == id));
    if let Some(summon) = summon {
        return (summon.stats, StatSource::Summon);
    }
    match sheet.override_stats {
        Some(stats) if sheet.override_active => (stats, StatSource::Override),
        _ => (sheet.base, StatSource::Base),
    }
}

fn full_writes(stats: &StatBlock) -> Vec<LocalWrite> {
    let mut writes = vec![
        LocalWrite::MaxHp(stats.max_hp),
        LocalWrite::Hp(stats.hp),
        LocalWrite::Ac(stats.ac),
    ];
    if let Some(initiative) = stats.initiative {
        writes.push(LocalWrite::Initiative(initiative));
    }
    writes
}

fn incremental_writes(last: &StatBlock, stats: &StatBlock) -> Vec<LocalWrite> {
    let mut writes = Vec::new();
    if last.max_hp != stats.max_hp {
        writes.push(LocalWrite::MaxHp(stats.max_hp));
    }
    if last.hp != stats.hp {
        writes.push(LocalWrite::Hp(stats.hp));
    }
    if last.ac != stats.ac {
        writes.push(LocalWrite::Ac(stats.ac));
    }
    if last.initiative != stats.initiative {
        if let Some(initiative) = stats.initiative {
            writes.push(LocalWrite::Initiative(initiative));
        }
    }
    writes
}

/// Sheet subscriptions plus what was last pushed per (character, remote combatant)
#[derive(Debug, Default)]
pub struct CharacterMirror {
    subscriptions: HashMap<String, Subscription>,
    pushed: HashMap<(String, String), Pushed>,
}

impl CharacterMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct owning characters of sheet-owned combatants in the record
    pub fn character_ids(record: &SharedRecord) -> BTreeSet<String> {
        record
            .combatants
            .iter()
            .filter(|c| c.kind.is_sheet_owned())
            .filter_map(|c| c.character_id.clone())
            .collect()
    }

    pub fn subscribed_ids(&self) -> BTreeSet<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Tear down and rebuild the subscription set when the record's character
    /// set changed. Returns whether a rebuild happened.
    pub fn sync_subscriptions<F>(
        &mut self,
        record: &SharedRecord,
        feed: &F,
        tx: &FeedSender<CharacterSheet>,
    ) -> bool
    where
        F: CharacterFeed + ?Sized,
    {
        let wanted = Self::character_ids(record);
        if wanted == self.subscribed_ids() {
            return false;
        }

        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel();
        }
        self.pushed.retain(|(character, _), _| wanted.contains(character));
        for id in wanted {
            let subscription = feed.subscribe(&id, tx.clone());
            self.subscriptions.insert(id, subscription);
        }
        true
    }

    /// Work out the local writes a new sheet snapshot calls for.
    ///
    /// The first observation of a pair and any change of stat source push
    /// every field; otherwise only fields that moved since the last
    /// confirmed push. Pushes count only once passed to [`Self::confirm`].
    pub fn observe(&mut self, sheet: &CharacterSheet, record: &SharedRecord) -> Vec<MirrorPush> {
        // Late delivery from a subscription already torn down
        if !self.subscriptions.contains_key(&sheet.id) {
            return Vec::new();
        }

        let mut pushes = Vec::new();
        let owned = record.combatants.iter().filter(|c| {
            c.kind.is_sheet_owned() && c.character_id.as_deref() == Some(sheet.id.as_str())
        });
        for remote in owned {
            let (stats, source) = effective_stats(sheet, remote);
            let key = (sheet.id.clone(), remote.id.clone());
            let writes = match self.pushed.get(&key) {
                Some(last) if last.source == source => incremental_writes(&last.stats, &stats),
                _ => full_writes(&stats),
            };
            let pushed = Pushed { stats, source };
            if writes.is_empty() {
                self.pushed.insert(key, pushed);
            } else {
                pushes.push(MirrorPush {
                    remote_id: remote.id.clone(),
                    writes,
                    pushed,
                });
            }
        }
        pushes
    }

    /// Record a push whose writes reached the local tracker
    pub fn confirm(&mut self, character_id: &str, push: &MirrorPush) {
        if self.subscriptions.contains_key(character_id) {
            self.pushed
                .insert((character_id.to_string(), push.remote_id.clone()), push.pushed);
        }
    }

    pub fn clear(&mut self) {
        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel();
        }
        self.pushed.clear();
    }
}
