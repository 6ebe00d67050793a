//! API request and response types

use crate::model::{Combatant, RecordSummary};
use serde::{Deserialize, Serialize};

/// Query for listing a scope's records
#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub scope: String,
}

/// Request to create a new shared record
#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub scope: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<RecordSummary>,
}

#[derive(Debug, Serialize)]
pub struct CreateRecordResponse {
    pub record_id: String,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub appended: usize,
}

#[derive(Debug, Serialize)]
pub struct CombatantListResponse {
    pub combatants: Vec<Combatant>,
    pub round: u32,
}

#[derive(Debug, Serialize)]
pub struct CombatantResponse {
    pub id: String,
}

/// Response after advancing the tracker's turn
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Combatant>,
    pub round: u32,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
