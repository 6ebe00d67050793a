//! Bridge runtime: the single task that owns the connection
//!
//! Commands from [`BridgeHandle`](super::BridgeHandle) and the three feeds
//! (local notifications, record events, character sheets) are consumed by one
//! `select!` loop, so exactly one handler runs at a time and every handler
//! sees the suppression deadlines armed by the previous one.

use super::mirror::CharacterMirror;
use super::{BridgeError, Command, StatusInfo};
use crate::capability::{CharacterFeed, LocalSession, RecordEvent, RecordStore, Subscription};
use crate::model::{
    CharacterSheet, Combatant, CombatantId, LocalWrite, NewRecord, RecordPatch, RecordRef,
    RecordSummary, RemoteCombatant, SharedRecord, Target,
};
use crate::session::{Insert, LocalSnapshot, SessionAdapter};
use crate::sync::{
    diff, local_stat_writes, local_writes, new_local_from_remote, remote_from_local,
    remote_update, resolve_turn, tie_breaker, turn_index_of, Direction, EchoGuard, IdentityIndex,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

fn new_remote_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn roll_tie_breaker(initiative_modifier: i32) -> i64 {
    tie_breaker(initiative_modifier, rand::random::<u16>())
}

/// Identity is written once, only where none exists. Runs every cycle so a
/// failed write-back is retried.
fn backfill_bridge_ids(index: &IdentityIndex, remotes: &[RemoteCombatant], patch: &mut RecordPatch) {
    for remote in remotes.iter().filter(|r| r.bridge_id.is_none()) {
        if let Some(local_id) = index.local_for(&remote.id) {
            patch.update_for(&remote.id).bridge_id = Some(local_id.clone());
        }
    }
}

fn find_local<'a>(locals: &'a [Combatant], id: &str) -> Option<&'a Combatant> {
    locals.iter().find(|c| c.id == id)
}

/// Everything that exists only between `connect` and `disconnect`
struct Connection {
    epoch: u64,
    target: RecordRef,
    /// Last-known remote snapshot
    record: SharedRecord,
    /// Last-known local snapshot
    baseline: Vec<Combatant>,
    local_round: u32,
    active_local: Option<CombatantId>,
    /// Set when the local tracker was switched to a different encounter
    paused: bool,
    local_rx: mpsc::UnboundedReceiver<()>,
    remote_rx: mpsc::UnboundedReceiver<RecordEvent>,
    sheet_rx: mpsc::UnboundedReceiver<CharacterSheet>,
    sheet_tx: mpsc::UnboundedSender<CharacterSheet>,
    local_sub: Subscription,
    remote_sub: Subscription,
    mirror: CharacterMirror,
}

/// Local-to-remote work derived from one local notification
struct LocalPush {
    patch: RecordPatch,
    /// Local combatant to un-hide because it just became active
    reveal: Option<CombatantId>,
}

impl Connection {
    fn absorb_local(&mut self, snapshot: LocalSnapshot) {
        self.active_local = snapshot.active().map(|c| c.id.clone());
        self.local_round = snapshot.round;
        self.baseline = snapshot.combatants;
    }

    /// Every previously tracked combatant is gone at once
    fn is_new_encounter(&self, snapshot: &LocalSnapshot) -> bool {
        !self.baseline.is_empty()
            && self
                .baseline
                .iter()
                .all(|tracked| snapshot.get(&tracked.id).is_none())
    }

    fn plan_local_push(&self, snapshot: &LocalSnapshot) -> LocalPush {
        let record = &self.record;
        let index = IdentityIndex::build(&snapshot.combatants, &record.combatants);
        let changes = diff(&self.baseline, &snapshot.combatants);
        let mut patch = RecordPatch::default();

        backfill_bridge_ids(&index, &record.combatants, &mut patch);

        for local in &changes.added {
            if index.remote_for(&local.id).and_then(|id| record.find(id)).is_some() {
                continue;
            }
            let remote = remote_from_local(
                local,
                new_remote_id(),
                roll_tie_breaker(local.initiative_modifier),
                record.round,
            );
            tracing::info!(
                epoch = self.epoch,
                combatant = %remote.name,
                remote_id = %remote.id,
                "Appending local combatant to shared record"
            );
            patch.append.push(remote);
        }

        for local in &changes.removed {
            tracing::info!(
                epoch = self.epoch,
                combatant = %local.display_name(),
                "Local removal is not propagated to the shared record"
            );
        }

        for change in &changes.changed {
            let Some(remote) = index
                .remote_for(&change.after.id)
                .and_then(|id| record.find(id))
            else {
                tracing::debug!(
                    epoch = self.epoch,
                    combatant = %change.after.display_name(),
                    "No remote counterpart for local change"
                );
                continue;
            };
            if remote.kind.is_sheet_owned() {
                continue;
            }
            let update = remote_update(change.after, remote, record.round);
            if !update.is_empty() {
                patch.update.push(update);
            }
        }

        let mut reveal = None;
        let newly_active = snapshot
            .active()
            .filter(|c| self.active_local.as_deref() != Some(c.id.as_str()));
        if let Some(active) = newly_active {
            // Resolve against the record as it will look once the patch lands
            let mut projected = record.clone();
            projected.apply(&patch);
            let projected_index = IdentityIndex::build(&snapshot.combatants, &projected.combatants);
            let remote = projected_index
                .remote_for(&active.id)
                .and_then(|id| projected.find(id));
            if let Some(remote) = remote {
                let current = resolve_turn(&projected.combatants, projected.turn).map(|c| c.id.as_str());
                if current != Some(remote.id.as_str()) {
                    if let Some(position) = turn_index_of(&projected.combatants, &remote.id) {
                        patch.turn = Some(position);
                    }
                }
                if !active.player && !remote.kind.is_sheet_owned() {
                    if active.hidden {
                        reveal = Some(active.id.clone());
                    }
                    if active.hidden || remote.is_hidden_from_players {
                        patch.update_for(&remote.id).is_hidden_from_players = Some(false);
                    }
                }
            }
        }

        if snapshot.round > self.local_round {
            let advanced = snapshot.round - self.local_round;
            patch.round = Some(record.round.saturating_add(advanced));
        }

        LocalPush {
            patch: patch.compacted(),
            reveal,
        }
    }
}

enum FeedEvent {
    Local,
    Remote(RecordEvent),
    Sheet(CharacterSheet),
}

/// Next event from the live connection's feeds; pends forever while disconnected
async fn next_feed_event(connection: &mut Option<Connection>) -> FeedEvent {
    let Some(connection) = connection.as_mut() else {
        return std::future::pending().await;
    };
    tokio::select! {
        biased;
        Some(event) = connection.remote_rx.recv() => FeedEvent::Remote(event),
        Some(()) = connection.local_rx.recv() => FeedEvent::Local,
        Some(sheet) = connection.sheet_rx.recv() => FeedEvent::Sheet(sheet),
        else => std::future::pending().await,
    }
}

/// Reconciliation engine between one local tracker and one shared record
pub struct BridgeRuntime<L, R, F>
where
    L: LocalSession + 'static,
    R: RecordStore + 'static,
    F: CharacterFeed + 'static,
{
    session: SessionAdapter<L>,
    store: Arc<R>,
    feed: Arc<F>,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<StatusInfo>,
    guard: EchoGuard,
    connection: Option<Connection>,
    tearing_down: bool,
    epoch: u64,
    notice: Option<String>,
}

impl<L, R, F> BridgeRuntime<L, R, F>
where
    L: LocalSession + 'static,
    R: RecordStore + 'static,
    F: CharacterFeed + 'static,
{
    pub fn new(
        session: Arc<L>,
        store: Arc<R>,
        feed: Arc<F>,
        suppression_window: Duration,
        commands: mpsc::Receiver<Command>,
        status_tx: watch::Sender<StatusInfo>,
    ) -> Self {
        Self {
            session: SessionAdapter::new(session),
            store,
            feed,
            commands,
            status_tx,
            guard: EchoGuard::new(suppression_window),
            connection: None,
            tearing_down: false,
            epoch: 0,
            notice: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Starting bridge runtime");

        loop {
            tokio::select! {
                // Feeds first: a command reply then implies every queued
                // notification has been handled
                biased;
                event = next_feed_event(&mut self.connection) => {
                    match event {
                        FeedEvent::Local => self.handle_local().await,
                        FeedEvent::Remote(event) => self.handle_remote(event).await,
                        FeedEvent::Sheet(sheet) => self.handle_sheet(sheet).await,
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
            self.publish_status();
        }

        self.teardown();
        self.publish_status();
        tracing::info!("Bridge runtime stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { target, reply } => {
                let result = self.connect(target).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.notice = None;
                self.teardown();
                let _ = reply.send(());
            }
            Command::CreateRecord { scope, name, reply } => {
                let _ = reply.send(self.create_record(&scope, name).await);
            }
            Command::MergeRecord { target, reply } => {
                let _ = reply.send(self.merge_record(&target).await);
            }
            Command::FetchRecords { scope, reply } => {
                let _ = reply.send(self.fetch_records(&scope).await);
            }
            Command::SuppressedUntil { direction, reply } => {
                let _ = reply.send(self.guard.suppressed_until(direction));
            }
        }
    }

    fn is_live(&self) -> bool {
        !self.tearing_down && self.connection.is_some()
    }

    fn status(&self) -> StatusInfo {
        match &self.connection {
            Some(conn) => StatusInfo {
                connected: true,
                scope: Some(conn.target.scope.clone()),
                record_id: Some(conn.target.record.clone()),
                record_name: Some(conn.record.name.clone()),
                combatant_count: conn.record.combatants.len(),
                round: Some(conn.record.round),
                turn: Some(conn.record.turn),
                paused: conn.paused,
                notice: self.notice.clone(),
            },
            None => StatusInfo {
                notice: self.notice.clone(),
                ..StatusInfo::default()
            },
        }
    }

    fn publish_status(&self) {
        let next = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    async fn connect(&mut self, target: RecordRef) -> Result<StatusInfo, BridgeError> {
        if self.connection.is_some() {
            tracing::info!(record = %target, "Already connected; disconnecting first");
            self.teardown();
        }
        if !self.session.is_available() {
            return Err(BridgeError::SessionUnavailable);
        }

        // Subscribe before reading so nothing between the read and the
        // subscription is missed; early events diff to no-ops.
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let local_sub = self.session.subscribe(local_tx);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let remote_sub = self.store.subscribe(&target, remote_tx);

        let record = self
            .store
            .read(&target)
            .await
            .map_err(|e| BridgeError::from_record(e, &target))?
            .normalized();
        let snapshot = self
            .session
            .snapshot()
            .await
            .map_err(BridgeError::from_session)?;

        self.epoch += 1;
        self.notice = None;
        self.guard.clear();

        let (sheet_tx, sheet_rx) = mpsc::unbounded_channel();
        let previous = SharedRecord {
            combatants: Vec::new(),
            ..record.clone()
        };
        tracing::info!(
            record = %target,
            epoch = self.epoch,
            remote_combatants = record.combatants.len(),
            local_combatants = snapshot.combatants.len(),
            "Connected to shared record"
        );
        self.connection = Some(Connection {
            epoch: self.epoch,
            target,
            record: previous.clone(),
            active_local: snapshot.active().map(|c| c.id.clone()),
            local_round: snapshot.round,
            baseline: snapshot.combatants,
            paused: false,
            local_rx,
            remote_rx,
            sheet_rx,
            sheet_tx,
            local_sub,
            remote_sub,
            mirror: CharacterMirror::new(),
        });

        // The initial read is applied as if every remote combatant were new
        self.apply_remote(previous, record, true).await;
        Ok(self.status())
    }

    /// Deterministic teardown; a no-op when already disconnected
    fn teardown(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        self.tearing_down = true;
        conn.remote_sub.cancel();
        conn.mirror.clear();
        conn.local_sub.cancel();

        if let Some(conn) = self.connection.take() {
            tracing::info!(record = %conn.target, epoch = conn.epoch, "Disconnected from shared record");
        }
        self.guard.clear();
        self.tearing_down = false;
    }

    // ------------------------------------------------------------------
    // Record management
    // ------------------------------------------------------------------

    async fn create_record(&mut self, scope: &str, name: String) -> Result<String, BridgeError> {
        let locals = self
            .session
            .combatants()
            .await
            .map_err(BridgeError::from_session)?;
        let combatants: Vec<RemoteCombatant> = locals
            .iter()
            .map(|c| remote_from_local(c, new_remote_id(), roll_tie_breaker(c.initiative_modifier), 1))
            .collect();
        let count = combatants.len();

        let record_id = self
            .store
            .create(
                scope,
                NewRecord {
                    name,
                    combatants,
                    round: 1,
                    turn: 0,
                },
            )
            .await?;
        tracing::info!(scope, record_id = %record_id, combatants = count, "Created shared record");
        Ok(record_id)
    }

    async fn merge_record(&mut self, target: &RecordRef) -> Result<usize, BridgeError> {
        let record = self
            .store
            .read(target)
            .await
            .map_err(|e| BridgeError::from_record(e, target))?;
        let locals = self
            .session
            .combatants()
            .await
            .map_err(BridgeError::from_session)?;

        let present: HashSet<&str> = record
            .combatants
            .iter()
            .filter_map(|c| c.bridge_id.as_deref())
            .collect();
        let append: Vec<RemoteCombatant> = locals
            .iter()
            .filter(|c| !c.player && !present.contains(c.id.as_str()))
            .map(|c| {
                remote_from_local(
                    c,
                    new_remote_id(),
                    roll_tie_breaker(c.initiative_modifier),
                    record.round,
                )
            })
            .collect();
        let count = append.len();
        if count == 0 {
            tracing::info!(record = %target, "Nothing to merge into shared record");
            return Ok(0);
        }

        let patch = RecordPatch {
            append,
            ..RecordPatch::default()
        };
        if self.connection.as_ref().is_some_and(|c| c.target == *target) {
            self.guard.arm(Direction::ToRemote, Instant::now());
        }
        self.store.patch(target, patch).await?;
        tracing::info!(record = %target, appended = count, "Merged local combatants into shared record");
        Ok(count)
    }

    async fn fetch_records(&mut self, scope: &str) -> Result<Vec<RecordSummary>, BridgeError> {
        Ok(self.store.fetch_summaries(scope).await?)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Patch the connected record. Failures are logged and left for the next
    /// cycle to retry, since the snapshots stay divergent.
    async fn write_remote(&mut self, patch: &RecordPatch) -> bool {
        if !self.is_live() {
            return false;
        }
        let Some(conn) = self.connection.as_ref() else {
            return false;
        };
        let target = conn.target.clone();
        let epoch = conn.epoch;

        self.guard.arm(Direction::ToRemote, Instant::now());
        match self.store.patch(&target, patch.clone()).await {
            Ok(()) => {
                tracing::debug!(
                    record = %target,
                    epoch,
                    appended = patch.append.len(),
                    updated = patch.update.len(),
                    "Patched shared record"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    record = %target,
                    epoch,
                    transient = e.kind.is_transient(),
                    error = %e,
                    "Failed to patch shared record"
                );
                false
            }
        }
    }

    /// Returns whether every write reached the local tracker
    async fn write_local(&mut self, local_id: &str, writes: &[LocalWrite]) -> bool {
        if writes.is_empty() {
            return true;
        }
        if !self.is_live() {
            return false;
        }
        self.guard.arm(Direction::ToLocal, Instant::now());
        let target = Target::Id(local_id.to_string());
        match self.session.apply_all(&target, writes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(combatant = %target, error = %e, "Failed to update local combatant");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Local -> remote
    // ------------------------------------------------------------------

    async fn handle_local(&mut self) {
        if !self.is_live() {
            return;
        }
        if let Some(conn) = self.connection.as_mut() {
            // Notifications coalesce: one snapshot covers every queued batch
            while conn.local_rx.try_recv().is_ok() {}
        }

        let snapshot = match self.session.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read local tracker");
                return;
            }
        };
        let suppressed = self.guard.is_suppressed(Direction::ToLocal, Instant::now());
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.paused {
            return;
        }
        if suppressed {
            tracing::debug!(epoch = conn.epoch, direction = ?Direction::ToLocal, "Absorbing local echo");
            conn.absorb_local(snapshot);
            return;
        }
        if conn.is_new_encounter(&snapshot) {
            tracing::warn!(
                epoch = conn.epoch,
                tracked = conn.baseline.len(),
                "Local tracker switched to a new encounter; syncing paused until reconnect"
            );
            conn.paused = true;
            self.notice =
                Some("Local tracker switched to a new encounter; reconnect to resume syncing".to_string());
            return;
        }

        let push = conn.plan_local_push(&snapshot);
        if let Some(local_id) = &push.reveal {
            self.write_local(local_id, &[LocalWrite::Hidden(false)]).await;
        }
        let written = push.patch.is_empty() || self.write_remote(&push.patch).await;

        // Keep the old baseline on failure so the next cycle re-diffs
        if written {
            if let Some(conn) = self.connection.as_mut() {
                conn.absorb_local(snapshot);
                conn.record.apply(&push.patch);
            }
        }
    }

    // ------------------------------------------------------------------
    // Remote -> local
    // ------------------------------------------------------------------

    async fn handle_remote(&mut self, event: RecordEvent) {
        if !self.is_live() {
            return;
        }
        let record = match event {
            RecordEvent::Updated(record) => record.normalized(),
            RecordEvent::Deleted => {
                let name = self
                    .connection
                    .as_ref()
                    .map(|c| c.record.name.clone())
                    .unwrap_or_default();
                tracing::warn!(record_name = %name, "Shared record was deleted; disconnecting");
                self.teardown();
                self.notice = Some(format!("Shared record '{name}' was deleted; bridge disconnected"));
                return;
            }
        };

        let suppressed = self.guard.is_suppressed(Direction::ToRemote, Instant::now());
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if suppressed || conn.paused {
            if suppressed {
                tracing::debug!(epoch = conn.epoch, direction = ?Direction::ToRemote, "Absorbing remote echo");
            }
            conn.record = record;
            self.sync_mirror();
            return;
        }

        let previous = conn.record.clone();
        self.apply_remote(previous, record, false).await;
    }

    /// Carry the difference between two remote snapshots into the local tracker
    async fn apply_remote(&mut self, previous: SharedRecord, current: SharedRecord, first_load: bool) {
        let locals = match self.session.combatants().await {
            Ok(locals) => locals,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read local tracker; remote change not applied");
                return;
            }
        };
        let index = IdentityIndex::build(
            &locals,
            previous.combatants.iter().chain(&current.combatants),
        );
        let changes = diff(&previous.combatants, &current.combatants);
        tracing::debug!(
            matched = index.len(),
            added = changes.added.len(),
            removed = changes.removed.len(),
            changed = changes.changed.len(),
            "Applying remote change"
        );
        let mut patch = RecordPatch::default();
        let mut inserted: HashMap<String, CombatantId> = HashMap::new();
        backfill_bridge_ids(&index, &current.combatants, &mut patch);

        for remote in &changes.added {
            let Some(local_id) = index.local_for(&remote.id) else {
                self.insert_remote(remote, &mut patch, &mut inserted).await;
                continue;
            };
            if remote.kind.is_sheet_owned() {
                if let Some(local) = find_local(&locals, local_id) {
                    self.write_local(local_id, &local_stat_writes(remote, local)).await;
                }
            }
        }

        for remote in &changes.removed {
            match index.local_for(&remote.id) {
                Some(local_id) => {
                    self.guard.arm(Direction::ToLocal, Instant::now());
                    match self.session.remove(&Target::Id(local_id.clone())).await {
                        Ok(()) => tracing::info!(
                            combatant = %remote.name,
                            remote_id = %remote.id,
                            "Removed combatant deleted from shared record"
                        ),
                        Err(e) => tracing::warn!(
                            combatant = %remote.name,
                            error = %e,
                            "Failed to remove local combatant"
                        ),
                    }
                }
                None => tracing::debug!(remote_id = %remote.id, "Removed remote combatant had no local counterpart"),
            }
        }

        for change in &changes.changed {
            let after = change.after;
            let Some(local) = index.local_for(&after.id).and_then(|id| find_local(&locals, id)) else {
                tracing::debug!(remote_id = %after.id, "No local counterpart for remote change");
                continue;
            };
            let writes = if after.kind.is_sheet_owned() {
                local_stat_writes(after, local)
            } else if after.is_dead && !change.before.is_dead {
                // A kill, so the tracker's own rules see unconsciousness
                let mut writes = vec![LocalWrite::Kill];
                writes.extend(
                    local_writes(after, local)
                        .into_iter()
                        .filter(|w| !matches!(w, LocalWrite::Hp(_))),
                );
                writes
            } else {
                local_writes(after, local)
            };
            self.write_local(&local.id, &writes).await;
        }

        let mut active_local = None;
        let turn_moved =
            first_load || current.turn != previous.turn || current.round != previous.round;
        if let Some(remote) = resolve_turn(&current.combatants, current.turn).filter(|_| turn_moved) {
            let local_id = index
                .local_for(&remote.id)
                .or_else(|| inserted.get(&remote.id))
                .cloned();
            match local_id {
                Some(local_id) => {
                    let local = find_local(&locals, &local_id);
                    if !local.is_some_and(|c| c.active) {
                        self.guard.arm(Direction::ToLocal, Instant::now());
                        if let Err(e) = self.session.activate(&Target::Id(local_id.clone())).await {
                            tracing::warn!(combatant = %remote.name, error = %e, "Failed to set active combatant");
                        }
                    }
                    let player = local.map_or(remote.kind.is_sheet_owned(), |c| c.player);
                    if !player && !remote.kind.is_sheet_owned() {
                        let hidden = local.map_or(remote.is_hidden_from_players, |c| c.hidden);
                        if hidden {
                            self.write_local(&local_id, &[LocalWrite::Hidden(false)]).await;
                        }
                        if remote.is_hidden_from_players {
                            patch.update_for(&remote.id).is_hidden_from_players = Some(false);
                        }
                    }
                    active_local = Some(local_id);
                }
                None => tracing::debug!(remote_id = %remote.id, "Active remote combatant has no local counterpart"),
            }
        }

        let patch = patch.compacted();
        let written = patch.is_empty() || self.write_remote(&patch).await;
        if let Some(conn) = self.connection.as_mut() {
            conn.record = current;
            if written {
                conn.record.apply(&patch);
            }
            if active_local.is_some() {
                conn.active_local = active_local;
            }
        }
        self.sync_mirror();
    }

    async fn insert_remote(
        &mut self,
        remote: &RemoteCombatant,
        patch: &mut RecordPatch,
        inserted: &mut HashMap<String, CombatantId>,
    ) {
        self.guard.arm(Direction::ToLocal, Instant::now());
        match self.session.insert_unique(new_local_from_remote(remote)).await {
            Ok(Insert::Inserted(local_id)) => {
                tracing::info!(
                    combatant = %remote.name,
                    remote_id = %remote.id,
                    local_id = %local_id,
                    "Added remote combatant to local tracker"
                );
                if remote.bridge_id.is_none() {
                    patch.update_for(&remote.id).bridge_id = Some(local_id.clone());
                }
                if remote.is_dead {
                    self.write_local(&local_id, &[LocalWrite::Kill]).await;
                }
                inserted.insert(remote.id.clone(), local_id);
            }
            Ok(Insert::Existing(local_id)) => tracing::debug!(
                combatant = %remote.name,
                local_id = %local_id,
                "Local combatant with the same name already exists; not adding twice"
            ),
            Err(e) => tracing::warn!(
                combatant = %remote.name,
                error = %e,
                "Failed to add remote combatant to local tracker"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Character sheets -> local
    // ------------------------------------------------------------------

    fn sync_mirror(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn
            .mirror
            .sync_subscriptions(&conn.record, self.feed.as_ref(), &conn.sheet_tx)
        {
            tracing::info!(
                epoch = conn.epoch,
                characters = conn.mirror.subscribed_ids().len(),
                "Rebuilt character sheet subscriptions"
            );
        }
    }

    async fn handle_sheet(&mut self, sheet: CharacterSheet) {
        if !self.is_live() {
            return;
        }
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.paused {
            return;
        }
        let pushes = conn.mirror.observe(&sheet, &conn.record);
        if pushes.is_empty() {
            return;
        }
        let remotes = conn.record.combatants.clone();

        let locals = match self.session.combatants().await {
            Ok(locals) => locals,
            Err(e) => {
                tracing::warn!(character = %sheet.id, error = %e, "Failed to read local tracker for sheet update");
                return;
            }
        };
        let index = IdentityIndex::build(&locals, &remotes);
        for push in pushes {
            match index.local_for(&push.remote_id) {
                Some(local_id) => {
                    tracing::debug!(
                        character = %sheet.id,
                        local_id = %local_id,
                        fields = push.writes.len(),
                        "Mirroring character sheet"
                    );
                    if self.write_local(local_id, &push.writes).await {
                        if let Some(conn) = self.connection.as_mut() {
                            conn.mirror.confirm(&sheet.id, &push);
                        }
                    }
                }
                None => tracing::debug!(
                    character = %sheet.id,
                    remote_id = %push.remote_id,
                    "No local counterpart for mirrored combatant"
                ),
            }
        }
    }
}
