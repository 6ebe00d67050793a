//! Capabilities the bridge consumes
//!
//! The local tracker, the shared-record store, the character sheet feed and
//! the credential exchange are external collaborators. These traits are the
//! versioned contract the bridge depends on; any probing of a concrete
//! implementation's internals belongs in the adapter implementing them.

mod error;
mod subscription;

pub use error::{CapabilityError, CapabilityErrorKind};
pub use subscription::{FeedHub, Subscription};

use crate::model::{
    CharacterSheet, Combatant, CombatantId, NewCombatant, NewRecord, RecordPatch, RecordRef,
    RecordSummary, SharedRecord, Target,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Sender half a capability delivers feed events into
pub type FeedSender<T> = mpsc::UnboundedSender<T>;

/// Change feed event for a shared record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    Updated(SharedRecord),
    Deleted,
}

/// Session credential obtained from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(pub String);

/// The interactive local turn tracker
#[async_trait]
pub trait LocalSession: Send + Sync {
    fn is_available(&self) -> bool;

    /// Combatants in tracker order
    async fn list_combatants(&self) -> CapabilityResult<Vec<Combatant>>;

    async fn current_round(&self) -> CapabilityResult<u32>;

    async fn set_hp(&self, target: &Target, hp: i32) -> CapabilityResult<()>;

    async fn set_max_hp(&self, target: &Target, max_hp: i32) -> CapabilityResult<()>;

    async fn set_ac(&self, target: &Target, ac: i32) -> CapabilityResult<()>;

    async fn set_initiative(&self, target: &Target, initiative: i32) -> CapabilityResult<()>;

    async fn set_hidden(&self, target: &Target, hidden: bool) -> CapabilityResult<()>;

    async fn set_active(&self, target: &Target) -> CapabilityResult<()>;

    /// HP to zero plus an incapacitation status
    async fn kill(&self, target: &Target) -> CapabilityResult<()>;

    async fn add(&self, combatant: NewCombatant) -> CapabilityResult<CombatantId>;

    async fn remove(&self, target: &Target) -> CapabilityResult<()>;

    /// Deliver `()` after every committed mutation batch
    fn subscribe(&self, tx: FeedSender<()>) -> Subscription;
}

/// The multi-client shared record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_summaries(&self, scope: &str) -> CapabilityResult<Vec<RecordSummary>>;

    async fn create(&self, scope: &str, record: NewRecord) -> CapabilityResult<String>;

    async fn read(&self, target: &RecordRef) -> CapabilityResult<SharedRecord>;

    fn subscribe(&self, target: &RecordRef, tx: FeedSender<RecordEvent>) -> Subscription;

    /// Atomic, field-level update
    async fn patch(&self, target: &RecordRef, patch: RecordPatch) -> CapabilityResult<()>;
}

/// External per-character stat documents
pub trait CharacterFeed: Send + Sync {
    fn subscribe(&self, character_id: &str, tx: FeedSender<CharacterSheet>) -> Subscription;
}

/// Opaque token to session credential, performed once at startup
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, token: &str) -> CapabilityResult<Credential>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: LocalSession + ?Sized> LocalSession for Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    async fn list_combatants(&self) -> CapabilityResult<Vec<Combatant>> {
        (**self).list_combatants().await
    }

    async fn current_round(&self) -> CapabilityResult<u32> {
        (**self).current_round().await
    }

    async fn set_hp(&self, target: &Target, hp: i32) -> CapabilityResult<()> {
        (**self).set_hp(target, hp).await
    }

    async fn set_max_hp(&self, target: &Target, max_hp: i32) -> CapabilityResult<()> {
        (**self).set_max_hp(target, max_hp).await
    }

    async fn set_ac(&self, target: &Target, ac: i32) -> CapabilityResult<()> {
        (**self).set_ac(target, ac).await
    }

    async fn set_initiative(&self, target: &Target, initiative: i32) -> CapabilityResult<()> {
        (**self).set_initiative(target, initiative).await
    }

    async fn set_hidden(&self, target: &Target, hidden: bool) -> CapabilityResult<()> {
        (**self).set_hidden(target, hidden).await
    }

    async fn set_active(&self, target: &Target) -> CapabilityResult<()> {
        (**self).set_active(target).await
    }

    async fn kill(&self, target: &Target) -> CapabilityResult<()> {
        (**self).kill(target).await
    }

    async fn add(&self, combatant: NewCombatant) -> CapabilityResult<CombatantId> {
        (**self).add(combatant).await
    }

    async fn remove(&self, target: &Target) -> CapabilityResult<()> {
        (**self).remove(target).await
    }

    fn subscribe(&self, tx: FeedSender<()>) -> Subscription {
        (**self).subscribe(tx)
    }
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn fetch_summaries(&self, scope: &str) -> CapabilityResult<Vec<RecordSummary>> {
        (**self).fetch_summaries(scope).await
    }

    async fn create(&self, scope: &str, record: NewRecord) -> CapabilityResult<String> {
        (**self).create(scope, record).await
    }

    async fn read(&self, target: &RecordRef) -> CapabilityResult<SharedRecord> {
        (**self).read(target).await
    }

    fn subscribe(&self, target: &RecordRef, tx: FeedSender<RecordEvent>) -> Subscription {
        (**self).subscribe(target, tx)
    }

    async fn patch(&self, target: &RecordRef, patch: RecordPatch) -> CapabilityResult<()> {
        (**self).patch(target, patch).await
    }
}

impl<T: CharacterFeed + ?Sized> CharacterFeed for Arc<T> {
    fn subscribe(&self, character_id: &str, tx: FeedSender<CharacterSheet>) -> Subscription {
        (**self).subscribe(character_id, tx)
    }
}

#[async_trait]
impl<T: CredentialExchange + ?Sized> CredentialExchange for Arc<T> {
    async fn exchange(&self, token: &str) -> CapabilityResult<Credential> {
        (**self).exchange(token).await
    }
}
