//! Server-Sent Events for status changes

use crate::bridge::StatusInfo;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Current status first, then one event per published change
pub fn status_stream(
    status_rx: watch::Receiver<StatusInfo>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = WatchStream::new(status_rx).map(|status| Ok(status_event(&status)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn status_event(status: &StatusInfo) -> Event {
    let data = serde_json::to_string(status).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("status").data(data)
}
