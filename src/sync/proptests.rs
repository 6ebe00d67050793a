//! Property-based tests for the reconciliation algorithms

use super::*;
use crate::model::{Combatant, CombatantKind, RecordPatch, RemoteCombatant, SharedRecord};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_remote(index: usize) -> impl Strategy<Value = RemoteCombatant> {
    (0i32..25, -2000i64..2000, any::<bool>(), 0i32..60).prop_map(
        move |(initiative, tie_breaker, is_dead, hp)| {
            let mut c = RemoteCombatant::new(format!("r{index}"), format!("Monster {index}"), CombatantKind::Monster);
            c.initiative = initiative;
            c.tie_breaker = tie_breaker;
            c.is_dead = is_dead;
            c.hp = hp;
            c.max_hp = 60;
            c
        },
    )
}

fn arb_roster() -> impl Strategy<Value = Vec<RemoteCombatant>> {
    (0usize..12).prop_flat_map(|len| (0..len).map(arb_remote).collect::<Vec<_>>())
}

fn arb_local(index: usize) -> impl Strategy<Value = Combatant> {
    (0i32..60, 0i32..25, any::<bool>()).prop_map(move |(hp, initiative, hidden)| Combatant {
        id: format!("l{index}"),
        name: format!("Monster {index}"),
        number: None,
        hp,
        max_hp: 60,
        temp_hp: 0,
        ac: 13,
        initiative,
        initiative_modifier: 0,
        player: false,
        active: false,
        hidden,
        statuses: vec![],
    })
}

fn arb_locals() -> impl Strategy<Value = Vec<Combatant>> {
    (0usize..10).prop_flat_map(|len| (0..len).map(arb_local).collect::<Vec<_>>())
}

// ============================================================================
// Ordering
// ============================================================================

proptest! {
    #[test]
    fn order_is_sorted_and_excludes_dead(roster in arb_roster()) {
        let order = turn_order(&roster);
        prop_assert!(order.iter().all(|c| !c.is_dead));
        prop_assert_eq!(order.len(), roster.iter().filter(|c| !c.is_dead).count());
        for pair in order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            prop_assert!(
                a.initiative > b.initiative
                    || (a.initiative == b.initiative && a.tie_breaker >= b.tie_breaker)
            );
        }
    }

    #[test]
    fn order_ignores_storage_order(roster in arb_roster()) {
        let mut reversed = roster.clone();
        reversed.reverse();
        let forward: Vec<&str> = turn_order(&roster).iter().map(|c| c.id.as_str()).collect();
        let backward: Vec<&str> = turn_order(&reversed).iter().map(|c| c.id.as_str()).collect();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn any_turn_index_resolves_without_panicking(roster in arb_roster(), turn in any::<usize>()) {
        let living = roster.iter().filter(|c| !c.is_dead).count();
        match resolve_turn(&roster, turn) {
            Some(c) => {
                prop_assert!(!c.is_dead);
                prop_assert_eq!(turn_index_of(&roster, &c.id), Some(turn % living));
            }
            None => prop_assert_eq!(living, 0),
        }
    }
}

// ============================================================================
// Diff & Identity
// ============================================================================

proptest! {
    #[test]
    fn diffing_a_snapshot_against_itself_is_empty(roster in arb_roster(), locals in arb_locals()) {
        prop_assert!(diff(&roster, &roster).is_empty());
        prop_assert!(diff(&locals, &locals).is_empty());
    }

    #[test]
    fn diff_partitions_keys(before in arb_roster(), after in arb_roster()) {
        let d = diff(&before, &after);
        let shared = after.iter().filter(|c| before.iter().any(|b| b.id == c.id)).count();
        prop_assert_eq!(d.added.len() + shared, after.len());
        prop_assert_eq!(d.removed.len() + shared, before.len());
        prop_assert!(d.changed.len() <= shared);
    }

    #[test]
    fn exact_identity_always_wins(locals in arb_locals()) {
        // Remotes bridged to locals in reverse, with swapped names
        let remotes: Vec<RemoteCombatant> = locals
            .iter()
            .rev()
            .enumerate()
            .map(|(i, local)| {
                let mut r = RemoteCombatant::new(format!("r{i}"), format!("Monster {i}"), CombatantKind::Monster);
                r.bridge_id = Some(local.id.clone());
                r
            })
            .collect();
        let index = IdentityIndex::build(&locals, &remotes);
        for remote in &remotes {
            prop_assert_eq!(index.local_for(&remote.id), remote.bridge_id.as_ref());
        }
    }

    #[test]
    fn pushing_local_state_twice_writes_nothing_the_second_time(locals in arb_locals()) {
        let mut record = SharedRecord::new("rec", "Encounter");
        record.combatants = locals
            .iter()
            .enumerate()
            .map(|(i, l)| remote_from_local(l, format!("r{i}"), 0, 1))
            .collect();

        let mut patch = RecordPatch::default();
        for (local, remote) in locals.iter().zip(&record.combatants) {
            patch.update.push(remote_update(local, remote, record.round));
        }
        prop_assert!(patch.is_empty());

        for remote in &record.combatants {
            let local = locals.iter().find(|l| Some(&l.id) == remote.bridge_id.as_ref()).unwrap();
            prop_assert!(local_writes(remote, local).is_empty());
        }
    }

    #[test]
    fn applying_an_update_converges(local in arb_local(0), remote in arb_remote(0)) {
        let mut record = SharedRecord::new("rec", "Encounter");
        record.combatants.push(remote);
        let update = remote_update(&local, &record.combatants[0], record.round);
        let patch = RecordPatch { update: vec![update], ..RecordPatch::default() };
        record.apply(&patch);
        let second = remote_update(&local, &record.combatants[0], record.round);
        prop_assert!(second.is_empty(), "second update not empty: {second:?}");
    }
}
