//! Identity resolution between remote and local combatants

use crate::model::{Combatant, CombatantId, RemoteCombatant};
use std::collections::{HashMap, HashSet};

/// Disposable cross-reference, rebuilt from the bridge identity field every cycle
///
/// Exact bridge-identity matches are claimed first; display-name matches only
/// fill in for remote combatants whose identity is missing or stale, and never
/// take a local combatant already claimed by identity.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    remote_to_local: HashMap<String, CombatantId>,
    local_to_remote: HashMap<CombatantId, String>,
}

impl IdentityIndex {
    pub fn build<'a>(
        locals: &[Combatant],
        remotes: impl IntoIterator<Item = &'a RemoteCombatant>,
    ) -> Self {
        let remotes: Vec<&RemoteCombatant> = remotes.into_iter().collect();
        let local_ids: HashSet<&str> = locals.iter().map(|c| c.id.as_str()).collect();
        let mut index = Self::default();

        for remote in &remotes {
            if let Some(bridge_id) = remote.bridge_id.as_deref() {
                if local_ids.contains(bridge_id) {
                    index.link(&remote.id, bridge_id);
                }
            }
        }

        let mut by_name: HashMap<String, &str> = HashMap::new();
        for local in locals {
            if !index.local_to_remote.contains_key(&local.id) {
                by_name.entry(local.display_name()).or_insert(&local.id);
            }
        }
        for remote in &remotes {
            if index.remote_to_local.contains_key(&remote.id) {
                continue;
            }
            if let Some(local_id) = by_name.remove(remote.name.as_str()) {
                index.link(&remote.id, local_id);
            }
        }

        index
    }

    fn link(&mut self, remote_id: &str, local_id: &str) {
        self.remote_to_local
            .insert(remote_id.to_string(), local_id.to_string());
        self.local_to_remote
            .insert(local_id.to_string(), remote_id.to_string());
    }

    pub fn local_for(&self, remote_id: &str) -> Option<&CombatantId> {
        self.remote_to_local.get(remote_id)
    }

    pub fn remote_for(&self, local_id: &str) -> Option<&str> {
        self.local_to_remote.get(local_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.remote_to_local.len()
    }
}
