//! Turn order over the shared record

use crate::model::RemoteCombatant;
use std::cmp::Ordering;

fn by_turn_order(a: &RemoteCombatant, b: &RemoteCombatant) -> Ordering {
    b.initiative
        .cmp(&a.initiative)
        .then_with(|| b.tie_breaker.cmp(&a.tie_breaker))
        // Fully deterministic regardless of storage order
        .then_with(|| a.id.cmp(&b.id))
}

/// Living combatants, highest initiative first, ties by tie-breaker descending
pub fn turn_order(combatants: &[RemoteCombatant]) -> Vec<&RemoteCombatant> {
    let mut order: Vec<&RemoteCombatant> = combatants.iter().filter(|c| !c.is_dead).collect();
    order.sort_by(|a, b| by_turn_order(a, b));
    order
}

/// The combatant whose turn it is; the index wraps modulo the living count.
/// `None` when nobody is alive.
pub fn resolve_turn(combatants: &[RemoteCombatant], turn: usize) -> Option<&RemoteCombatant> {
    let order = turn_order(combatants);
    if order.is_empty() {
        return None;
    }
    Some(order[turn % order.len()])
}

/// Position of a combatant in the turn order, if it is alive
pub fn turn_index_of(combatants: &[RemoteCombatant], remote_id: &str) -> Option<usize> {
    turn_order(combatants)
        .iter()
        .position(|c| c.id == remote_id)
}
