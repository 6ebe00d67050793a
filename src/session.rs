//! Local Session Adapter
//!
//! Wraps the [`LocalSession`] capability with the read/mutate/notify
//! vocabulary the bridge speaks: batched field writes, duplicate-safe
//! inserts, and a combined snapshot of combatants and round.

mod memory;

pub use memory::MemorySession;

use crate::capability::{CapabilityResult, FeedSender, LocalSession, Subscription};
use crate::model::{Combatant, CombatantId, LocalWrite, NewCombatant, Target};
use std::sync::Arc;

/// Everything the bridge baselines from the local side in one read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalSnapshot {
    pub combatants: Vec<Combatant>,
    pub round: u32,
}

impl LocalSnapshot {
    pub fn active(&self) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.active)
    }

    pub fn get(&self, id: &str) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }
}

/// Outcome of a duplicate-safe insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    Inserted(CombatantId),
    /// A combatant with the same display name was already present
    Existing(CombatantId),
}

impl Insert {
    pub fn id(&self) -> &CombatantId {
        match self {
            Insert::Inserted(id) | Insert::Existing(id) => id,
        }
    }
}

pub struct SessionAdapter<L: LocalSession> {
    session: Arc<L>,
}

impl<L: LocalSession> Clone for SessionAdapter<L> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<L: LocalSession> SessionAdapter<L> {
    pub fn new(session: Arc<L>) -> Self {
        Self { session }
    }

    pub fn is_available(&self) -> bool {
        self.session.is_available()
    }

    pub async fn snapshot(&self) -> CapabilityResult<LocalSnapshot> {
        let combatants = self.session.list_combatants().await?;
        let round = self.session.current_round().await?;
        Ok(LocalSnapshot { combatants, round })
    }

    pub async fn combatants(&self) -> CapabilityResult<Vec<Combatant>> {
        self.session.list_combatants().await
    }

    pub async fn apply(&self, target: &Target, write: LocalWrite) -> CapabilityResult<()> {
        match write {
            LocalWrite::Hp(hp) => self.session.set_hp(target, hp).await,
            LocalWrite::MaxHp(max_hp) => self.session.set_max_hp(target, max_hp).await,
            LocalWrite::Ac(ac) => self.session.set_ac(target, ac).await,
            LocalWrite::Initiative(initiative) => {
                self.session.set_initiative(target, initiative).await
            }
            LocalWrite::Hidden(hidden) => self.session.set_hidden(target, hidden).await,
            LocalWrite::Kill => self.session.kill(target).await,
        }
    }

    /// Apply writes in order, stopping at the first failure
    pub async fn apply_all(&self, target: &Target, writes: &[LocalWrite]) -> CapabilityResult<()> {
        for write in writes {
            self.apply(target, *write).await?;
        }
        Ok(())
    }

    /// Insert unless a combatant with the same display name already exists
    pub async fn insert_unique(&self, combatant: NewCombatant) -> CapabilityResult<Insert> {
        let existing = self.session.list_combatants().await?;
        if let Some(found) = existing.iter().find(|c| c.display_name() == combatant.name) {
            return Ok(Insert::Existing(found.id.clone()));
        }
        let id = self.session.add(combatant).await?;
        Ok(Insert::Inserted(id))
    }

    pub async fn activate(&self, target: &Target) -> CapabilityResult<()> {
        self.session.set_active(target).await
    }

    pub async fn remove(&self, target: &Target) -> CapabilityResult<()> {
        self.session.remove(target).await
    }

    pub fn subscribe(&self, tx: FeedSender<()>) -> Subscription {
        self.session.subscribe(tx)
    }
}
