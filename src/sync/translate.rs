//! Field translation between the local and remote combatant shapes

use crate::model::{
    Combatant, CombatantKind, CombatantUpdate, LocalWrite, NewCombatant, RemoteCombatant,
};

/// Secondary sort key fixed once per combatant: initiative modifier first,
/// then a roll to separate equal modifiers.
pub fn tie_breaker(initiative_modifier: i32, roll: u16) -> i64 {
    i64::from(initiative_modifier) * 1000 + i64::from(roll % 1000)
}

/// A non-player local combatant at or below zero HP counts as dead remotely.
/// Combatants without max HP have no tracked HP at all.
fn is_down(local: &Combatant) -> bool {
    !local.player && local.max_hp > 0 && local.hp <= 0
}

/// Build the remote shape for a local combatant, bridged back to its local id
pub fn remote_from_local(
    local: &Combatant,
    remote_id: impl Into<String>,
    tie_breaker: i64,
    round: u32,
) -> RemoteCombatant {
    let kind = if local.player {
        CombatantKind::PlayerCharacter
    } else {
        CombatantKind::Monster
    };
    let is_dead = is_down(local);
    RemoteCombatant {
        id: remote_id.into(),
        name: local.display_name(),
        kind,
        hp: local.hp,
        max_hp: local.max_hp,
        temp_hp: local.temp_hp,
        ac: local.ac,
        initiative: local.initiative,
        initiative_modifier: local.initiative_modifier,
        is_dead,
        is_hidden_from_players: local.hidden,
        death_round: is_dead.then_some(round),
        tie_breaker,
        character_id: None,
        summon_instance_id: None,
        bridge_id: Some(local.id.clone()),
    }
}

/// Creation shape for inserting a remote-origin combatant locally
pub fn new_local_from_remote(remote: &RemoteCombatant) -> NewCombatant {
    NewCombatant {
        name: remote.name.clone(),
        hp: remote.hp,
        max_hp: remote.max_hp,
        temp_hp: remote.temp_hp,
        ac: remote.ac,
        initiative: remote.initiative,
        initiative_modifier: remote.initiative_modifier,
        player: remote.kind.is_sheet_owned(),
        hidden: remote.is_hidden_from_players,
    }
}

/// Stat writes that bring a local combatant in line with the remote one
pub fn local_stat_writes(remote: &RemoteCombatant, local: &Combatant) -> Vec<LocalWrite> {
    let mut writes = Vec::new();
    if remote.hp != local.hp {
        writes.push(LocalWrite::Hp(remote.hp));
    }
    if remote.max_hp != local.max_hp {
        writes.push(LocalWrite::MaxHp(remote.max_hp));
    }
    if remote.ac != local.ac {
        writes.push(LocalWrite::Ac(remote.ac));
    }
    if remote.initiative != local.initiative {
        writes.push(LocalWrite::Initiative(remote.initiative));
    }
    writes
}

/// All writes for a remote-origin change, including visibility
pub fn local_writes(remote: &RemoteCombatant, local: &Combatant) -> Vec<LocalWrite> {
    let mut writes = local_stat_writes(remote, local);
    if remote.is_hidden_from_players != local.hidden {
        writes.push(LocalWrite::Hidden(remote.is_hidden_from_players));
    }
    writes
}

/// Field-level update carrying a local-origin change to the remote record.
/// Only fields that actually differ from the remote are named.
pub fn remote_update(local: &Combatant, remote: &RemoteCombatant, round: u32) -> CombatantUpdate {
    let mut update = CombatantUpdate::new(&remote.id);
    if local.hp != remote.hp {
        update.hp = Some(local.hp);
    }
    if local.max_hp != remote.max_hp {
        update.max_hp = Some(local.max_hp);
    }
    if local.ac != remote.ac {
        update.ac = Some(local.ac);
    }
    if local.initiative != remote.initiative {
        update.initiative = Some(local.initiative);
    }
    if local.hidden != remote.is_hidden_from_players {
        update.is_hidden_from_players = Some(local.hidden);
    }

    let down = is_down(local);
    if down && !remote.is_dead {
        update.is_dead = Some(true);
        if remote.death_round.is_none() {
            update.death_round = Some(round);
        }
    } else if !down && remote.is_dead && local.hp > 0 {
        update.is_dead = Some(false);
    }
    update
}
