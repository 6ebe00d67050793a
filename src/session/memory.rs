//! In-process turn tracker
//!
//! A minimal tracker the bridge binary hosts directly: combatants kept in
//! initiative order, numbered duplicate names, a round counter, and one
//! change notification per committed mutation.

use crate::capability::{
    CapabilityError, CapabilityResult, FeedHub, FeedSender, LocalSession, Subscription,
};
use crate::model::{
    Combatant, CombatantEdit, CombatantId, LocalWrite, NewCombatant, Target, UNCONSCIOUS,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Debug)]
struct Tracker {
    combatants: Vec<Combatant>,
    round: u32,
    revision: u64,
}

impl Tracker {
    fn find_mut(&mut self, target: &Target) -> CapabilityResult<&mut Combatant> {
        self.combatants
            .iter_mut()
            .find(|c| target.matches(c))
            .ok_or_else(|| CapabilityError::not_found(format!("No combatant {target}")))
    }

    fn position(&self, target: &Target) -> CapabilityResult<usize> {
        self.combatants
            .iter()
            .position(|c| target.matches(c))
            .ok_or_else(|| CapabilityError::not_found(format!("No combatant {target}")))
    }

    fn sort(&mut self) {
        // Highest initiative first, modifier breaks ties; stable otherwise
        self.combatants.sort_by(|a, b| {
            b.initiative
                .cmp(&a.initiative)
                .then_with(|| b.initiative_modifier.cmp(&a.initiative_modifier))
        });
    }

    fn next_number(&self, base: &str) -> Option<u32> {
        let taken: Vec<u32> = self
            .combatants
            .iter()
            .filter(|c| c.name == base)
            .map(|c| c.number.unwrap_or(1))
            .collect();
        taken.iter().max().map(|max| max + 1)
    }

    fn write(&mut self, target: &Target, write: LocalWrite) -> CapabilityResult<()> {
        let combatant = self.find_mut(target)?;
        match write {
            LocalWrite::Hp(hp) => combatant.hp = hp,
            LocalWrite::MaxHp(max_hp) => combatant.max_hp = max_hp,
            LocalWrite::Ac(ac) => combatant.ac = ac,
            LocalWrite::Initiative(initiative) => {
                combatant.initiative = initiative;
                self.sort();
            }
            LocalWrite::Hidden(hidden) => combatant.hidden = hidden,
            LocalWrite::Kill => {
                combatant.hp = 0;
                if !combatant.statuses.iter().any(|s| s == UNCONSCIOUS) {
                    combatant.statuses.push(UNCONSCIOUS.to_string());
                }
            }
        }
        Ok(())
    }
}

pub struct MemorySession {
    tracker: RwLock<Tracker>,
    changes: FeedHub<()>,
    available: AtomicBool,
}

impl MemorySession {
    pub fn new() -> Self {
        Self {
            tracker: RwLock::new(Tracker {
                combatants: Vec::new(),
                round: 1,
                revision: 0,
            }),
            changes: FeedHub::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Count of committed mutations
    pub fn revision(&self) -> u64 {
        self.read(|t| t.revision)
    }

    pub fn snapshot(&self) -> Vec<Combatant> {
        self.read(|t| t.combatants.clone())
    }

    pub fn find(&self, name: &str) -> Option<Combatant> {
        let target = Target::Name(name.to_string());
        self.read(|t| t.combatants.iter().find(|c| target.matches(c)).cloned())
    }

    /// Apply a UI edit as one batch with a single notification
    pub fn edit(&self, id: &str, edit: &CombatantEdit) -> CapabilityResult<()> {
        let target = Target::Id(id.to_string());
        self.mutate(|t| {
            t.position(&target)?;
            for write in edit.writes() {
                t.write(&target, write)?;
            }
            Ok(())
        })
    }

    /// Move the active marker to the next combatant, starting a new round
    /// when it wraps to the top of the order.
    pub fn advance_turn(&self) -> CapabilityResult<Option<Combatant>> {
        self.mutate(|t| {
            if t.combatants.is_empty() {
                return Ok(None);
            }
            let current = t.combatants.iter().position(|c| c.active);
            let next = match current {
                Some(pos) => {
                    let next = (pos + 1) % t.combatants.len();
                    if next <= pos {
                        t.round += 1;
                    }
                    next
                }
                None => 0,
            };
            for (i, c) in t.combatants.iter_mut().enumerate() {
                c.active = i == next;
            }
            Ok(Some(t.combatants[next].clone()))
        })
    }

    /// Start over with an empty encounter
    pub fn reset(&self) -> CapabilityResult<()> {
        self.mutate(|t| {
            t.combatants.clear();
            t.round = 1;
            Ok(())
        })
    }

    fn read<R>(&self, f: impl FnOnce(&Tracker) -> R) -> R {
        let tracker = self.tracker.read().unwrap_or_else(PoisonError::into_inner);
        f(&tracker)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Tracker) -> CapabilityResult<R>) -> CapabilityResult<R> {
        if !self.is_available() {
            return Err(CapabilityError::unavailable("Local tracker is not available"));
        }
        let result = {
            let mut tracker = self.tracker.write().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut tracker)?;
            tracker.revision += 1;
            result
        };
        // Notify outside the lock so subscribers may read immediately
        self.changes.publish(&());
        Ok(result)
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalSession for MemorySession {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn list_combatants(&self) -> CapabilityResult<Vec<Combatant>> {
        if !self.is_available() {
            return Err(CapabilityError::unavailable("Local tracker is not available"));
        }
        Ok(self.snapshot())
    }

    async fn current_round(&self) -> CapabilityResult<u32> {
        Ok(self.read(|t| t.round))
    }

    async fn set_hp(&self, target: &Target, hp: i32) -> CapabilityResult<()> {
        self.mutate(|t| t.write(target, LocalWrite::Hp(hp)))
    }

    async fn set_max_hp(&self, target: &Target, max_hp: i32) -> CapabilityResult<()> {
        self.mutate(|t| t.write(target, LocalWrite::MaxHp(max_hp)))
    }

    async fn set_ac(&self, target: &Target, ac: i32) -> CapabilityResult<()> {
        self.mutate(|t| t.write(target, LocalWrite::Ac(ac)))
    }

    async fn set_initiative(&self, target: &Target, initiative: i32) -> CapabilityResult<()> {
        self.mutate(|t| t.write(target, LocalWrite::Initiative(initiative)))
    }

    async fn set_hidden(&self, target: &Target, hidden: bool) -> CapabilityResult<()> {
        self.mutate(|t| t.write(target, LocalWrite::Hidden(hidden)))
    }

    async fn set_active(&self, target: &Target) -> CapabilityResult<()> {
        self.mutate(|t| {
            let pos = t.position(target)?;
            for (i, c) in t.combatants.iter_mut().enumerate() {
                c.active = i == pos;
            }
            Ok(())
        })
    }

    async fn kill(&self, target: &Target) -> CapabilityResult<()> {
        self.mutate(|t| t.write(target, LocalWrite::Kill))
    }

    async fn add(&self, combatant: NewCombatant) -> CapabilityResult<CombatantId> {
        self.mutate(|t| {
            let id = uuid::Uuid::new_v4().to_string();
            let number = t.next_number(&combatant.name);
            t.combatants.push(Combatant {
                id: id.clone(),
                name: combatant.name,
                number,
                hp: combatant.hp,
                max_hp: combatant.max_hp,
                temp_hp: combatant.temp_hp,
                ac: combatant.ac,
                initiative: combatant.initiative,
                initiative_modifier: combatant.initiative_modifier,
                player: combatant.player,
                active: false,
                hidden: combatant.hidden,
                statuses: Vec::new(),
            });
            t.sort();
            Ok(id)
        })
    }

    async fn remove(&self, target: &Target) -> CapabilityResult<()> {
        self.mutate(|t| {
            let pos = t.position(target)?;
            t.combatants.remove(pos);
            Ok(())
        })
    }

    fn subscribe(&self, tx: FeedSender<()>) -> Subscription {
        self.changes.subscribe(tx)
    }
}
