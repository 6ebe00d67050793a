//! Bridge Orchestrator
//!
//! Keeps one local tracker and one shared record consistent in both
//! directions. A single [`BridgeRuntime`] task owns all connection state;
//! callers talk to it through the cloneable [`BridgeHandle`].

mod error;
mod mirror;
mod runtime;
mod status;

#[cfg(test)]
pub mod testing;

pub use error::BridgeError;
pub use runtime::BridgeRuntime;
pub use status::StatusInfo;

use crate::capability::{CharacterFeed, LocalSession, RecordStore};
use crate::model::{RecordRef, RecordSummary};
use crate::sync::Direction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

type Reply<T> = oneshot::Sender<Result<T, BridgeError>>;

/// Requests handled by the runtime task, one at a time
#[derive(Debug)]
pub enum Command {
    Connect {
        target: RecordRef,
        reply: Reply<StatusInfo>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    CreateRecord {
        scope: String,
        name: String,
        reply: Reply<String>,
    },
    MergeRecord {
        target: RecordRef,
        reply: Reply<usize>,
    },
    FetchRecords {
        scope: String,
        reply: Reply<Vec<RecordSummary>>,
    },
    SuppressedUntil {
        direction: Direction,
        reply: oneshot::Sender<Option<Instant>>,
    },
}

/// Caller-side handle to a running bridge
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusInfo>,
}

impl BridgeHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| BridgeError::Stopped)?;
        rx.await.map_err(|_| BridgeError::Stopped)
    }

    /// Bind to a shared record, replacing any existing connection
    pub async fn connect(&self, target: RecordRef) -> Result<StatusInfo, BridgeError> {
        self.request(|reply| Command::Connect { target, reply })
            .await?
    }

    /// Always safe, including when already disconnected
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Persist a new record seeded from every local combatant
    pub async fn create_record(
        &self,
        scope: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<String, BridgeError> {
        let (scope, name) = (scope.into(), name.into());
        self.request(|reply| Command::CreateRecord { scope, name, reply })
            .await?
    }

    /// Append local non-player combatants the record does not know yet.
    /// Returns how many were appended.
    pub async fn merge_record(&self, target: RecordRef) -> Result<usize, BridgeError> {
        self.request(|reply| Command::MergeRecord { target, reply })
            .await?
    }

    pub async fn fetch_active_records(
        &self,
        scope: impl Into<String>,
    ) -> Result<Vec<RecordSummary>, BridgeError> {
        let scope = scope.into();
        self.request(|reply| Command::FetchRecords { scope, reply })
            .await?
    }

    /// Current suppression deadline for writes toward `direction`
    pub async fn suppressed_until(&self, direction: Direction) -> Result<Option<Instant>, BridgeError> {
        self.request(|reply| Command::SuppressedUntil { direction, reply })
            .await
    }

    /// Latest published status; never waits on the runtime
    pub fn status(&self) -> StatusInfo {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusInfo> {
        self.status.clone()
    }
}

/// Start a bridge runtime on the current tokio runtime
pub fn spawn<L, R, F>(
    session: Arc<L>,
    store: Arc<R>,
    feed: Arc<F>,
    suppression_window: Duration,
) -> (BridgeHandle, tokio::task::JoinHandle<()>)
where
    L: LocalSession + 'static,
    R: RecordStore + 'static,
    F: CharacterFeed + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    let (status_tx, status_rx) = watch::channel(StatusInfo::default());
    let runtime = BridgeRuntime::new(
        session,
        store,
        feed,
        suppression_window,
        command_rx,
        status_tx,
    );
    let task = tokio::spawn(runtime.run());
    (
        BridgeHandle {
            commands: command_tx,
            status: status_rx,
        },
        task,
    )
}
