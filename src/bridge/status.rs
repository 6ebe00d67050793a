//! Read-only projection of the connection for display

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusInfo {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_name: Option<String>,
    pub combatant_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<usize>,
    /// Syncing is on hold until the bridge is reconnected
    pub paused: bool,
    /// Last user-visible notice, e.g. why the bridge disconnected itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}
