//! Remote document service client
//!
//! Implements the shared-record, character-sheet and credential capabilities
//! over a JSON HTTP API whose change feeds are server-sent event streams.

mod http;

pub use http::HttpRecordStore;
