//! In-memory collaborators and a test harness for the bridge runtime

use super::{spawn, BridgeHandle};
use crate::capability::{
    CapabilityError, CapabilityResult, CharacterFeed, FeedHub, FeedSender, RecordEvent,
    RecordStore, Subscription,
};
use crate::model::{
    CharacterSheet, NewRecord, RecordPatch, RecordRef, RecordSummary, SharedRecord,
};
use crate::session::MemorySession;
use crate::sync::{Direction, DEFAULT_SUPPRESSION_WINDOW};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// Record store
// ============================================================================

#[derive(Default)]
struct StoreState {
    records: HashMap<RecordRef, SharedRecord>,
    hubs: HashMap<RecordRef, FeedHub<RecordEvent>>,
    patches: Vec<(RecordRef, RecordPatch)>,
    failing_patches: usize,
    created: usize,
}

impl StoreState {
    fn publish(&mut self, target: &RecordRef, event: &RecordEvent) {
        if let Some(hub) = self.hubs.get(target) {
            hub.publish(event);
        }
    }
}

/// Shared record store that delivers change events synchronously
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<StoreState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, target: &RecordRef, record: SharedRecord) {
        self.lock().records.insert(target.clone(), record);
    }

    pub fn record(&self, target: &RecordRef) -> Option<SharedRecord> {
        self.lock().records.get(target).cloned()
    }

    /// Patches written through the `RecordStore` capability, in order
    pub fn patches(&self) -> Vec<RecordPatch> {
        self.lock().patches.iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn patch_count(&self) -> usize {
        self.lock().patches.len()
    }

    pub fn fail_next_patch(&self) {
        self.lock().failing_patches += 1;
    }

    /// Another client edits the record
    pub fn edit(&self, target: &RecordRef, f: impl FnOnce(&mut SharedRecord)) {
        let mut state = self.lock();
        let Some(record) = state.records.get_mut(target) else {
            panic!("No record {target}");
        };
        f(record);
        record.updated_at = Utc::now();
        let event = RecordEvent::Updated(record.clone());
        state.publish(target, &event);
    }

    /// Another client deletes the record
    pub fn delete(&self, target: &RecordRef) {
        let mut state = self.lock();
        state.records.remove(target);
        state.publish(target, &RecordEvent::Deleted);
    }

    pub fn subscriber_count(&self, target: &RecordRef) -> usize {
        self.lock().hubs.get(target).map_or(0, FeedHub::live_count)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_summaries(&self, scope: &str) -> CapabilityResult<Vec<RecordSummary>> {
        let state = self.lock();
        let mut summaries: Vec<RecordSummary> = state
            .records
            .iter()
            .filter(|(target, _)| target.scope == scope)
            .map(|(_, record)| record.summary())
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn create(&self, scope: &str, record: NewRecord) -> CapabilityResult<String> {
        let mut state = self.lock();
        state.created += 1;
        let id = format!("rec-{}", state.created);
        let shared = SharedRecord {
            id: id.clone(),
            name: record.name,
            combatants: record.combatants,
            round: record.round,
            turn: record.turn,
            updated_at: Utc::now(),
        };
        state.records.insert(RecordRef::new(scope, &id), shared);
        Ok(id)
    }

    async fn read(&self, target: &RecordRef) -> CapabilityResult<SharedRecord> {
        self.record(target)
            .ok_or_else(|| CapabilityError::not_found(format!("No record {target}")))
    }

    fn subscribe(&self, target: &RecordRef, tx: FeedSender<RecordEvent>) -> Subscription {
        self.lock()
            .hubs
            .entry(target.clone())
            .or_default()
            .subscribe(tx)
    }

    async fn patch(&self, target: &RecordRef, patch: RecordPatch) -> CapabilityResult<()> {
        let mut state = self.lock();
        if state.failing_patches > 0 {
            state.failing_patches -= 1;
            return Err(CapabilityError::network("Injected patch failure"));
        }
        let Some(record) = state.records.get_mut(target) else {
            return Err(CapabilityError::not_found(format!("No record {target}")));
        };
        record.apply(&patch);
        let event = RecordEvent::Updated(record.clone());
        state.patches.push((target.clone(), patch));
        state.publish(target, &event);
        Ok(())
    }
}

// ============================================================================
// Character feed
// ============================================================================

/// Character sheets that replay the current snapshot on subscribe
#[derive(Default)]
pub struct MemoryCharacterFeed {
    sheets: Mutex<HashMap<String, CharacterSheet>>,
    hubs: Mutex<HashMap<String, FeedHub<CharacterSheet>>>,
}

impl MemoryCharacterFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, sheet: CharacterSheet) {
        if let Some(hub) = self
            .hubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sheet.id)
        {
            hub.publish(&sheet);
        }
        self.sheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sheet.id.clone(), sheet);
    }

    /// Characters with at least one live subscription
    pub fn subscribed_ids(&self) -> BTreeSet<String> {
        self.hubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, hub)| hub.live_count() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl CharacterFeed for MemoryCharacterFeed {
    fn subscribe(&self, character_id: &str, tx: FeedSender<CharacterSheet>) -> Subscription {
        let current = self
            .sheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(character_id)
            .cloned();
        if let Some(sheet) = current {
            let _ = tx.send(sheet);
        }
        self.hubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(character_id.to_string())
            .or_default()
            .subscribe(tx)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A running bridge wired to in-memory collaborators
pub struct TestBridge {
    pub session: Arc<MemorySession>,
    pub store: Arc<MemoryRecordStore>,
    pub sheets: Arc<MemoryCharacterFeed>,
    pub handle: BridgeHandle,
    pub window: Duration,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestBridge {
    pub fn new() -> Self {
        let session = Arc::new(MemorySession::new());
        let store = Arc::new(MemoryRecordStore::new());
        let sheets = Arc::new(MemoryCharacterFeed::new());
        let window = DEFAULT_SUPPRESSION_WINDOW;
        let (handle, task) = spawn(session.clone(), store.clone(), sheets.clone(), window);
        Self {
            session,
            store,
            sheets,
            handle,
            window,
            _runtime_handle: task,
        }
    }

    /// Wait until every queued notification has been handled.
    ///
    /// The runtime prefers feed events over commands, so a command round
    /// trip only completes once the feeds are drained.
    pub async fn settle(&self) {
        self.handle
            .suppressed_until(Direction::ToLocal)
            .await
            .expect("bridge runtime stopped");
    }

    /// Settle, then let both suppression windows lapse
    pub async fn quiet(&self) {
        self.settle().await;
        tokio::time::advance(self.window + Duration::from_millis(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeError;
    use crate::capability::LocalSession;
    use crate::model::{
        Combatant, CombatantEdit, CombatantKind, NewCombatant, RemoteCombatant, StatBlock,
        SummonInstance, UNCONSCIOUS,
    };

    fn target() -> RecordRef {
        RecordRef::new("caravan-1", "ambush")
    }

    fn monster(id: &str, name: &str, initiative: i32, tie_breaker: i64) -> RemoteCombatant {
        let mut remote = RemoteCombatant::new(id, name, CombatantKind::Monster);
        remote.hp = 10;
        remote.max_hp = 10;
        remote.ac = 12;
        remote.initiative = initiative;
        remote.tie_breaker = tie_breaker;
        remote
    }

    fn seed(bridge: &TestBridge, combatants: Vec<RemoteCombatant>) {
        let mut record = SharedRecord::new("ambush", "Ambush at the Ford");
        record.combatants = combatants;
        bridge.store.insert(&target(), record);
    }

    fn local(bridge: &TestBridge, name: &str) -> Combatant {
        bridge
            .session
            .find(name)
            .unwrap_or_else(|| panic!("no local combatant {name}"))
    }

    fn remote(bridge: &TestBridge, id: &str) -> RemoteCombatant {
        bridge
            .store
            .record(&target())
            .and_then(|r| r.find(id).cloned())
            .unwrap_or_else(|| panic!("no remote combatant {id}"))
    }

    fn remote_named(bridge: &TestBridge, name: &str) -> RemoteCombatant {
        bridge
            .store
            .record(&target())
            .and_then(|r| r.combatants.iter().find(|c| c.name == name).cloned())
            .unwrap_or_else(|| panic!("no remote combatant named {name}"))
    }

    async fn connected(combatants: Vec<RemoteCombatant>) -> TestBridge {
        let bridge = TestBridge::new();
        seed(&bridge, combatants);
        bridge.handle.connect(target()).await.unwrap();
        bridge.quiet().await;
        bridge
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connect_fails_fast_without_a_local_tracker() {
        let bridge = TestBridge::new();
        seed(&bridge, vec![]);
        bridge.session.set_available(false);

        let err = bridge.handle.connect(target()).await.unwrap_err();
        assert_eq!(err, BridgeError::SessionUnavailable);
        bridge.settle().await;
        assert!(!bridge.handle.status().connected);
        assert_eq!(bridge.store.subscriber_count(&target()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_unknown_record_is_not_found() {
        let bridge = TestBridge::new();
        let err = bridge.handle.connect(target()).await.unwrap_err();
        assert_eq!(err, BridgeError::RecordNotFound("caravan-1/ambush".to_string()));
        assert!(!bridge.handle.status().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_pulls_remote_combatants_and_assigns_identity_once() {
        let bridge = connected(vec![
            monster("r-ogre", "Ogre", 12, 0),
            monster("r-wolf", "Wolf", 15, 0),
        ])
        .await;

        let status = bridge.handle.status();
        assert!(status.connected);
        assert_eq!(status.record_name.as_deref(), Some("Ambush at the Ford"));
        assert_eq!(status.combatant_count, 2);
        assert_eq!(status.round, Some(1));

        let ogre = local(&bridge, "Ogre");
        let wolf = local(&bridge, "Wolf");
        assert_eq!(remote(&bridge, "r-ogre").bridge_id, Some(ogre.id.clone()));
        assert_eq!(remote(&bridge, "r-wolf").bridge_id, Some(wolf.id));
        // Turn 0 is the highest initiative
        assert!(local(&bridge, "Wolf").active);
        assert!(!ogre.active);

        let writes = bridge.store.patch_count();
        bridge.session.set_hp(&ogre.target(), 4).await.unwrap();
        bridge.settle().await;
        assert_eq!(bridge.store.patch_count(), writes + 1);
        assert!(bridge
            .store
            .patches()
            .iter()
            .skip(writes)
            .all(|p| p.update.iter().all(|u| u.bridge_id.is_none())));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_replaces_the_previous_connection() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let other = RecordRef::new("caravan-1", "camp");
        bridge.store.insert(&other, SharedRecord::new("camp", "Night Camp"));

        let status = bridge.handle.connect(other.clone()).await.unwrap();
        assert_eq!(status.record_id.as_deref(), Some("camp"));
        assert_eq!(bridge.store.subscriber_count(&target()), 0);
        assert_eq!(bridge.store.subscriber_count(&other), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_every_feed_and_is_repeatable() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        bridge.handle.disconnect().await.unwrap();
        bridge.handle.disconnect().await.unwrap();

        assert!(!bridge.handle.status().connected);
        assert_eq!(bridge.store.subscriber_count(&target()), 0);

        let writes = bridge.store.patch_count();
        let ogre = local(&bridge, "Ogre");
        bridge.session.set_hp(&ogre.target(), 1).await.unwrap();
        bridge.store.edit(&target(), |r| r.combatants[0].ac = 20);
        bridge.settle().await;

        assert_eq!(bridge.store.patch_count(), writes);
        assert_eq!(local(&bridge, "Ogre").ac, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_record_disconnects_with_a_notice() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        bridge.store.delete(&target());
        bridge.settle().await;

        let status = bridge.handle.status();
        assert!(!status.connected);
        assert!(status.notice.unwrap().contains("deleted"));
        assert_eq!(bridge.store.subscriber_count(&target()), 0);
    }

    // ------------------------------------------------------------------
    // Record management
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn create_record_seeds_every_local_combatant() {
        let bridge = TestBridge::new();
        let fighter = bridge
            .session
            .add(NewCombatant::new("Fighter").player().hp(44, 44))
            .await
            .unwrap();
        let goblin = bridge
            .session
            .add(NewCombatant::new("Goblin").hp(7, 7).ac(13).initiative(14).hidden())
            .await
            .unwrap();

        let id = bridge.handle.create_record("caravan-1", "Road Ambush").await.unwrap();
        let record = bridge.store.record(&RecordRef::new("caravan-1", &id)).unwrap();

        assert_eq!((record.round, record.turn), (1, 0));
        assert_eq!(record.combatants.len(), 2);
        let bridged: BTreeSet<_> = record
            .combatants
            .iter()
            .filter_map(|c| c.bridge_id.clone())
            .collect();
        assert_eq!(bridged, BTreeSet::from([fighter, goblin]));
        let pc = record.combatants.iter().find(|c| c.name == "Fighter").unwrap();
        assert_eq!(pc.kind, CombatantKind::PlayerCharacter);
        let monster = record.combatants.iter().find(|c| c.name == "Goblin").unwrap();
        assert_eq!((monster.ac, monster.is_hidden_from_players), (13, true));

        let summaries = bridge.handle.fetch_active_records("caravan-1").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].combatant_count, 2);
        assert!(bridge.handle.fetch_active_records("other").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn merge_appends_only_unmatched_non_players() {
        let bridge = TestBridge::new();
        let ogre = bridge.session.add(NewCombatant::new("Ogre")).await.unwrap();
        bridge.session.add(NewCombatant::new("Bandit")).await.unwrap();
        bridge.session.add(NewCombatant::new("Cleric").player()).await.unwrap();

        let mut known = monster("r-ogre", "Ogre", 10, 0);
        known.bridge_id = Some(ogre);
        let mut summon = RemoteCombatant::new("r-bear", "Spirit Bear", CombatantKind::Summon);
        summon.character_id = Some("pc-9".to_string());
        seed(&bridge, vec![known, summon]);

        assert_eq!(bridge.handle.merge_record(target()).await.unwrap(), 1);
        let record = bridge.store.record(&target()).unwrap();
        let names: BTreeSet<_> = record.combatants.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, BTreeSet::from(["Ogre", "Spirit Bear", "Bandit"]));

        assert_eq!(bridge.handle.merge_record(target()).await.unwrap(), 0);
    }

    // ------------------------------------------------------------------
    // Local -> remote
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn unchanged_local_state_writes_nothing() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let writes = bridge.store.patch_count();
        let ogre = local(&bridge, "Ogre");

        bridge.session.set_hp(&ogre.target(), ogre.hp).await.unwrap();
        bridge.settle().await;
        bridge.session.set_ac(&ogre.target(), ogre.ac).await.unwrap();
        bridge.settle().await;

        assert_eq!(bridge.store.patch_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn local_edit_becomes_a_field_level_patch() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let ogre = local(&bridge, "Ogre");
        bridge
            .session
            .edit(
                &ogre.id,
                &CombatantEdit {
                    hp: Some(6),
                    ac: Some(14),
                    ..CombatantEdit::default()
                },
            )
            .unwrap();
        bridge.settle().await;

        let last = bridge.store.patches().pop().unwrap();
        assert_eq!(last.update.len(), 1);
        let update = &last.update[0];
        assert_eq!((update.hp, update.ac), (Some(6), Some(14)));
        assert!(update.initiative.is_none() && update.max_hp.is_none());
        assert!(last.turn.is_none() && last.round.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn local_add_is_appended_with_identity() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let id = bridge
            .session
            .add(NewCombatant::new("Orc").hp(15, 15).initiative(9))
            .await
            .unwrap();
        bridge.settle().await;

        let orc = remote_named(&bridge, "Orc");
        assert_eq!(orc.bridge_id, Some(id));
        assert_eq!(orc.kind, CombatantKind::Monster);
        assert_eq!((orc.hp, orc.initiative), (15, 9));
    }

    #[tokio::test(start_paused = true)]
    async fn local_removal_is_not_propagated() {
        let bridge = connected(vec![
            monster("r-ogre", "Ogre", 12, 0),
            monster("r-wolf", "Wolf", 15, 0),
        ])
        .await;
        let writes = bridge.store.patch_count();
        let ogre = local(&bridge, "Ogre");

        bridge.session.remove(&ogre.target()).await.unwrap();
        bridge.settle().await;

        assert_eq!(bridge.store.patch_count(), writes);
        assert_eq!(remote(&bridge, "r-ogre").name, "Ogre");
        assert!(bridge.handle.status().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn monster_dropping_to_zero_dies_in_the_current_round() {
        let bridge = TestBridge::new();
        let mut record = SharedRecord::new("ambush", "Ambush");
        record.round = 3;
        record.combatants = vec![monster("r-ogre", "Ogre", 12, 0)];
        bridge.store.insert(&target(), record);
        bridge.handle.connect(target()).await.unwrap();
        bridge.quiet().await;

        let ogre = local(&bridge, "Ogre");
        bridge.session.set_hp(&ogre.target(), 0).await.unwrap();
        bridge.settle().await;

        let ogre = remote(&bridge, "r-ogre");
        assert!(ogre.is_dead);
        assert_eq!(ogre.death_round, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn new_active_combatant_writes_the_turn_index() {
        // Equal initiative: the higher tie-breaker goes first
        let bridge = connected(vec![
            monster("r-a", "A", 18, 5),
            monster("r-b", "B", 18, 12),
            monster("r-c", "C", 3, 0),
        ])
        .await;
        assert!(local(&bridge, "B").active);

        let a = local(&bridge, "A");
        bridge.session.set_active(&a.target()).await.unwrap();
        bridge.settle().await;
        assert_eq!(bridge.store.record(&target()).unwrap().turn, 1);

        let c = local(&bridge, "C");
        bridge.session.set_active(&c.target()).await.unwrap();
        bridge.settle().await;
        assert_eq!(bridge.store.record(&target()).unwrap().turn, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrapping_the_local_turn_advances_the_remote_round() {
        let bridge = connected(vec![
            monster("r-a", "A", 18, 0),
            monster("r-b", "B", 10, 0),
        ])
        .await;
        // A is active after connect; B, then wrap back to A
        bridge.session.advance_turn().unwrap();
        bridge.settle().await;
        assert_eq!(bridge.store.record(&target()).unwrap().turn, 1);

        bridge.session.advance_turn().unwrap();
        bridge.settle().await;
        let record = bridge.store.record(&target()).unwrap();
        assert_eq!((record.turn, record.round), (0, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_monster_is_revealed_when_it_becomes_active_locally() {
        let mut lurker = monster("r-lurker", "Lurker", 5, 0);
        lurker.is_hidden_from_players = true;
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0), lurker]).await;
        assert!(local(&bridge, "Lurker").hidden);

        bridge.session.advance_turn().unwrap();
        bridge.settle().await;

        assert!(!local(&bridge, "Lurker").hidden);
        let lurker = remote(&bridge, "r-lurker");
        assert!(!lurker.is_hidden_from_players);
        assert_eq!(bridge.store.record(&target()).unwrap().turn, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_retried_by_the_next_cycle() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let ogre = local(&bridge, "Ogre");

        bridge.store.fail_next_patch();
        bridge.session.set_hp(&ogre.target(), 5).await.unwrap();
        bridge.settle().await;
        assert_eq!(remote(&bridge, "r-ogre").hp, 10);

        bridge.session.set_ac(&ogre.target(), 16).await.unwrap();
        bridge.settle().await;
        let ogre = remote(&bridge, "r-ogre");
        assert_eq!((ogre.hp, ogre.ac), (5, 16));
    }

    async fn connected_without_identity() -> TestBridge {
        let bridge = TestBridge::new();
        seed(&bridge, vec![monster("r-ogre", "Ogre", 12, 0)]);
        bridge.store.fail_next_patch();
        bridge.handle.connect(target()).await.unwrap();
        bridge.quiet().await;
        assert_eq!(remote(&bridge, "r-ogre").bridge_id, None);
        bridge
    }

    #[tokio::test(start_paused = true)]
    async fn lost_identity_is_written_by_the_next_remote_cycle() {
        let bridge = connected_without_identity().await;
        let ogre = local(&bridge, "Ogre");

        bridge.store.edit(&target(), |r| r.combatants[0].ac = 15);
        bridge.settle().await;

        assert_eq!(local(&bridge, "Ogre").ac, 15);
        assert_eq!(remote(&bridge, "r-ogre").bridge_id.as_deref(), Some(ogre.id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_identity_is_written_by_the_next_local_cycle() {
        let bridge = connected_without_identity().await;
        let ogre = local(&bridge, "Ogre");

        bridge.session.set_hp(&ogre.target(), 4).await.unwrap();
        bridge.settle().await;

        let remote_ogre = remote(&bridge, "r-ogre");
        assert_eq!(remote_ogre.hp, 4);
        assert_eq!(remote_ogre.bridge_id.as_deref(), Some(ogre.id.as_str()));

        // Written once: later cycles leave it alone
        let writes = bridge.store.patch_count();
        bridge.quiet().await;
        bridge.session.set_hp(&ogre.target(), 3).await.unwrap();
        bridge.settle().await;
        let last = bridge.store.patches().pop().unwrap();
        assert_eq!(bridge.store.patch_count(), writes + 1);
        assert!(last.update.iter().all(|u| u.bridge_id.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn new_encounter_locally_pauses_instead_of_wiping() {
        let bridge = connected(vec![
            monster("r-ogre", "Ogre", 12, 0),
            monster("r-wolf", "Wolf", 15, 0),
        ])
        .await;
        let writes = bridge.store.patch_count();

        bridge.session.reset().unwrap();
        bridge.session.add(NewCombatant::new("Dragon")).await.unwrap();
        bridge.settle().await;

        assert_eq!(bridge.store.patch_count(), writes);
        assert_eq!(bridge.store.record(&target()).unwrap().combatants.len(), 2);
        let status = bridge.handle.status();
        assert!(status.connected && status.paused);
        assert!(status.notice.is_some());

        // Remote changes are not pulled into the new encounter either
        bridge
            .store
            .edit(&target(), |r| r.combatants.push(monster("r-imp", "Imp", 1, 0)));
        bridge.settle().await;
        assert!(bridge.session.find("Imp").is_none());
    }

    // ------------------------------------------------------------------
    // Remote -> local
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn remote_edit_reaches_local_without_a_reverse_write() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let writes = bridge.store.patch_count();

        bridge.store.edit(&target(), |r| {
            r.combatants[0].hp = 3;
            r.combatants[0].is_hidden_from_players = true;
        });
        bridge.settle().await;

        let ogre = local(&bridge, "Ogre");
        assert_eq!(ogre.hp, 3);
        assert!(ogre.hidden);
        assert_eq!(bridge.store.patch_count(), writes);
        assert!(bridge
            .handle
            .suppressed_until(Direction::ToLocal)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_edit_inside_the_window_after_a_local_push_is_absorbed() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let ogre = local(&bridge, "Ogre");
        bridge.session.set_hp(&ogre.target(), 5).await.unwrap();
        bridge.settle().await;
        assert_eq!(remote(&bridge, "r-ogre").hp, 5);

        // Lands while our own patch is still echoing back
        bridge.store.edit(&target(), |r| r.combatants[0].ac = 20);
        bridge.settle().await;
        assert_eq!(local(&bridge, "Ogre").ac, 12);
        assert!(bridge
            .handle
            .suppressed_until(Direction::ToRemote)
            .await
            .unwrap()
            .is_some());

        bridge.quiet().await;
        bridge.store.edit(&target(), |r| r.combatants[0].ac = 21);
        bridge.settle().await;
        assert_eq!(local(&bridge, "Ogre").ac, 21);
    }

    #[tokio::test(start_paused = true)]
    async fn local_edit_inside_the_window_after_a_remote_apply_is_absorbed() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        bridge.store.edit(&target(), |r| r.combatants[0].hp = 3);
        bridge.settle().await;
        let ogre = local(&bridge, "Ogre");
        assert_eq!(ogre.hp, 3);
        let writes = bridge.store.patch_count();

        bridge.session.set_ac(&ogre.target(), 17).await.unwrap();
        bridge.settle().await;
        assert_eq!(bridge.store.patch_count(), writes);
        assert_eq!(remote(&bridge, "r-ogre").ac, 12);

        bridge.quiet().await;
        bridge.session.set_ac(&ogre.target(), 19).await.unwrap();
        bridge.settle().await;
        assert_eq!(remote(&bridge, "r-ogre").ac, 19);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_death_kills_locally() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        bridge.store.edit(&target(), |r| {
            r.combatants[0].is_dead = true;
            r.combatants[0].hp = 0;
            r.combatants[0].death_round = Some(1);
        });
        bridge.settle().await;

        let ogre = local(&bridge, "Ogre");
        assert_eq!(ogre.hp, 0);
        assert!(ogre.statuses.iter().any(|s| s == UNCONSCIOUS));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_add_never_duplicates_an_existing_name() {
        let bridge = TestBridge::new();
        bridge
            .session
            .add(NewCombatant::new("Goblin").hp(7, 7))
            .await
            .unwrap();
        seed(&bridge, vec![monster("r-ogre", "Ogre", 12, 0)]);
        bridge.handle.connect(target()).await.unwrap();
        bridge.quiet().await;

        bridge
            .store
            .edit(&target(), |r| r.combatants.push(monster("r-gob", "Goblin", 8, 0)));
        bridge.settle().await;

        let goblins = bridge
            .session
            .snapshot()
            .into_iter()
            .filter(|c| c.name == "Goblin")
            .count();
        assert_eq!(goblins, 1);
        assert_eq!(
            remote(&bridge, "r-gob").bridge_id,
            Some(local(&bridge, "Goblin").id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_add_is_inserted_and_bridged() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        let mut imp = monster("r-imp", "Imp", 4, 0);
        imp.is_dead = true;
        bridge.store.edit(&target(), |r| r.combatants.push(imp));
        bridge.settle().await;

        let local_imp = local(&bridge, "Imp");
        assert!(local_imp.statuses.iter().any(|s| s == UNCONSCIOUS));
        assert_eq!(remote(&bridge, "r-imp").bridge_id, Some(local_imp.id));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_removal_removes_locally() {
        let bridge = connected(vec![
            monster("r-ogre", "Ogre", 12, 0),
            monster("r-wolf", "Wolf", 15, 0),
        ])
        .await;
        bridge.store.edit(&target(), |r| r.combatants.retain(|c| c.id != "r-ogre"));
        bridge.settle().await;

        assert!(bridge.session.find("Ogre").is_none());
        assert!(bridge.session.find("Wolf").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_turn_index_wraps_over_living_combatants() {
        let bridge = connected(vec![
            monster("r-a", "A", 20, 0),
            monster("r-b", "B", 15, 0),
            monster("r-c", "C", 10, 0),
        ])
        .await;
        bridge.store.edit(&target(), |r| r.turn = 5);
        bridge.settle().await;
        assert!(local(&bridge, "C").active);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_survives_the_last_combatant_dying() {
        let bridge = connected(vec![
            monster("r-a", "A", 20, 0),
            monster("r-b", "B", 15, 0),
            monster("r-c", "C", 10, 0),
        ])
        .await;
        bridge.store.edit(&target(), |r| r.turn = 2);
        bridge.quiet().await;
        assert!(local(&bridge, "C").active);

        bridge.store.edit(&target(), |r| {
            let c = r.combatants.iter_mut().find(|c| c.id == "r-c").unwrap();
            c.is_dead = true;
            r.turn = 2;
            r.round = 2;
        });
        bridge.settle().await;
        // Two living combatants: 2 % 2 = 0
        assert!(local(&bridge, "A").active);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_monster_is_revealed_when_the_remote_turn_reaches_it() {
        let mut lurker = monster("r-lurker", "Lurker", 5, 0);
        lurker.is_hidden_from_players = true;
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0), lurker]).await;

        bridge.store.edit(&target(), |r| r.turn = 1);
        bridge.settle().await;

        let local_lurker = local(&bridge, "Lurker");
        assert!(local_lurker.active);
        assert!(!local_lurker.hidden);
        assert!(!remote(&bridge, "r-lurker").is_hidden_from_players);
    }

    #[tokio::test(start_paused = true)]
    async fn player_stats_flow_one_way_from_the_record() {
        let mut rogue = RemoteCombatant::new("r-rogue", "Rogue", CombatantKind::PlayerCharacter);
        rogue.hp = 27;
        rogue.max_hp = 27;
        rogue.ac = 15;
        let bridge = connected(vec![rogue]).await;
        let local_rogue = local(&bridge, "Rogue");
        assert!(local_rogue.player);

        bridge.store.edit(&target(), |r| r.combatants[0].hp = 20);
        bridge.quiet().await;
        assert_eq!(local(&bridge, "Rogue").hp, 20);

        let writes = bridge.store.patch_count();
        bridge.session.set_hp(&local_rogue.target(), 1).await.unwrap();
        bridge.settle().await;
        assert_eq!(bridge.store.patch_count(), writes);
        assert_eq!(remote(&bridge, "r-rogue").hp, 20);
    }

    // ------------------------------------------------------------------
    // Character mirror
    // ------------------------------------------------------------------

    fn druid_sheet(hp: i32) -> CharacterSheet {
        CharacterSheet {
            id: "pc-druid".to_string(),
            base: StatBlock {
                hp,
                max_hp: 38,
                ac: 16,
                initiative: Some(14),
            },
            override_stats: Some(StatBlock {
                hp: 34,
                max_hp: 34,
                ac: 11,
                initiative: None,
            }),
            override_active: false,
            summons: vec![SummonInstance {
                id: "wolf-1".to_string(),
                stats: StatBlock {
                    hp: 11,
                    max_hp: 11,
                    ac: 13,
                    initiative: None,
                },
            }],
        }
    }

    fn druid_and_wolf() -> Vec<RemoteCombatant> {
        let mut druid = RemoteCombatant::new("r-druid", "Druid", CombatantKind::PlayerCharacter);
        druid.character_id = Some("pc-druid".to_string());
        druid.max_hp = 38;
        let mut wolf = RemoteCombatant::new("r-wolf", "Wolf", CombatantKind::Summon);
        wolf.character_id = Some("pc-druid".to_string());
        wolf.summon_instance_id = Some("wolf-1".to_string());
        vec![druid, wolf, monster("r-ogre", "Ogre", 12, 0)]
    }

    #[tokio::test(start_paused = true)]
    async fn character_sheets_mirror_into_the_local_tracker_only() {
        let bridge = TestBridge::new();
        bridge.sheets.publish(druid_sheet(30));
        seed(&bridge, druid_and_wolf());
        bridge.handle.connect(target()).await.unwrap();
        bridge.quiet().await;

        assert_eq!(
            bridge.sheets.subscribed_ids(),
            BTreeSet::from(["pc-druid".to_string()])
        );
        let druid = local(&bridge, "Druid");
        assert_eq!((druid.hp, druid.max_hp, druid.ac, druid.initiative), (30, 38, 16, 14));
        let wolf = local(&bridge, "Wolf");
        assert_eq!((wolf.hp, wolf.ac), (11, 13));

        let writes = bridge.store.patch_count();
        bridge.sheets.publish(druid_sheet(21));
        bridge.quiet().await;
        assert_eq!(local(&bridge, "Druid").hp, 21);

        let mut shaped = druid_sheet(21);
        shaped.override_active = true;
        bridge.sheets.publish(shaped);
        bridge.quiet().await;
        let druid = local(&bridge, "Druid");
        assert_eq!((druid.hp, druid.max_hp, druid.ac), (34, 34, 11));
        assert_eq!(local(&bridge, "Wolf").ac, 13);

        assert_eq!(bridge.store.patch_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn sheet_without_a_local_counterpart_is_pushed_in_full_later() {
        let bridge = connected(druid_and_wolf()).await;
        let druid = local(&bridge, "Druid");
        bridge.session.remove(&druid.target()).await.unwrap();
        bridge.quiet().await;

        // First sheet finds no local druid to write to
        bridge.sheets.publish(druid_sheet(30));
        bridge.quiet().await;
        assert!(bridge.session.find("Druid").is_none());
        assert_eq!(local(&bridge, "Wolf").ac, 13);

        bridge
            .session
            .add(NewCombatant::new("Druid").player().hp(1, 1).ac(10))
            .await
            .unwrap();
        bridge.quiet().await;
        bridge.sheets.publish(druid_sheet(24));
        bridge.quiet().await;

        let druid = local(&bridge, "Druid");
        assert_eq!((druid.hp, druid.max_hp, druid.ac, druid.initiative), (24, 38, 16, 14));
    }

    #[tokio::test(start_paused = true)]
    async fn sheet_subscriptions_follow_the_record() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        assert!(bridge.sheets.subscribed_ids().is_empty());

        bridge.store.edit(&target(), |r| r.combatants.extend(druid_and_wolf()));
        bridge.settle().await;
        assert_eq!(
            bridge.sheets.subscribed_ids(),
            BTreeSet::from(["pc-druid".to_string()])
        );

        bridge.handle.disconnect().await.unwrap();
        assert!(bridge.sheets.subscribed_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_stream_reports_transitions() {
        let bridge = TestBridge::new();
        seed(&bridge, vec![monster("r-ogre", "Ogre", 12, 0)]);
        let mut status = bridge.handle.watch_status();
        assert!(!status.borrow_and_update().connected);

        bridge.handle.connect(target()).await.unwrap();
        status.changed().await.unwrap();
        assert!(status.borrow_and_update().connected);

        assert_eq!(
            bridge.session.list_combatants().await.unwrap().len(),
            bridge.handle.status().combatant_count
        );
        bridge.handle.disconnect().await.unwrap();
        status.changed().await.unwrap();
        assert!(!status.borrow().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn suppression_window_lapses() {
        let bridge = connected(vec![monster("r-ogre", "Ogre", 12, 0)]).await;
        bridge.store.edit(&target(), |r| r.combatants[0].ac = 18);
        bridge.settle().await;

        let deadline = bridge
            .handle
            .suppressed_until(Direction::ToLocal)
            .await
            .unwrap()
            .unwrap();
        assert!(deadline > tokio::time::Instant::now());

        tokio::time::advance(bridge.window + Duration::from_millis(1)).await;
        let ogre = local(&bridge, "Ogre");
        bridge.session.set_hp(&ogre.target(), 8).await.unwrap();
        bridge.settle().await;
        assert_eq!(remote(&bridge, "r-ogre").hp, 8);
    }
}
