//! HTTP implementation of the remote capabilities

use crate::capability::{
    CapabilityError, CapabilityResult, CharacterFeed, Credential, CredentialExchange, FeedSender,
    RecordEvent, RecordStore, Subscription,
};
use crate::model::{CharacterSheet, NewRecord, RecordPatch, RecordRef, RecordSummary, SharedRecord};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use reqwest_eventsource::{retry, Error as EventSourceError, Event, EventSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STREAM_RETRY_DELAY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    credential: String,
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

/// What a decoded stream frame means for the subscriber
enum StreamStep<T> {
    Deliver(T),
    /// Deliver, then end the subscription
    Last(T),
    Skip,
}

/// Client for the remote document service
pub struct HttpRecordStore {
    client: Client,
    /// No overall timeout: event streams stay open indefinitely
    stream_client: Client,
    base_url: String,
    credential: Option<Arc<Credential>>,
}

impl HttpRecordStore {
    pub fn new(base_url: &str, timeout: Duration) -> CapabilityResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CapabilityError::unavailable(format!("Failed to create HTTP client: {e}")))?;
        let stream_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CapabilityError::unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: None,
        })
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(Arc::new(credential));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn record_url(&self, target: &RecordRef) -> String {
        self.url(&format!("/scopes/{}/records/{}", target.scope, target.record))
    }

    fn authorize(request: RequestBuilder, credential: Option<&Credential>) -> RequestBuilder {
        match credential {
            Some(Credential(token)) => request.bearer_auth(token),
            None => request,
        }
    }

    fn classify_error(status: StatusCode, body: &str) -> CapabilityError {
        match status.as_u16() {
            401 | 403 => CapabilityError::auth(format!("Authentication failed: {body}")),
            404 => CapabilityError::not_found(format!("Not found: {body}")),
            409 | 422 => CapabilityError::rejected(format!("Write rejected: {body}")),
            500..=599 => CapabilityError::network(format!("Server error: {body}")),
            _ => CapabilityError::invalid_response(format!("HTTP {status}: {body}")),
        }
    }

    fn classify_transport(e: &reqwest::Error) -> CapabilityError {
        if e.is_timeout() {
            CapabilityError::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            CapabilityError::network(format!("Connection failed: {e}"))
        } else {
            CapabilityError::network(format!("Request failed: {e}"))
        }
    }

    /// Send a request and return the raw body of a successful response
    async fn send(&self, request: RequestBuilder) -> CapabilityResult<String> {
        let response = Self::authorize(request, self.credential.as_deref())
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> CapabilityResult<T> {
        let body = self.send(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            CapabilityError::invalid_response(format!("Failed to parse response: {e} - body: {body}"))
        })
    }

    /// Follow an event stream on a background task until cancelled
    fn spawn_stream<T, F>(&self, url: String, tx: FeedSender<T>, on_missing: Option<T>, decode: F) -> Subscription
    where
        T: Send + 'static,
        F: Fn(&str, &str) -> StreamStep<T> + Send + Sync + 'static,
    {
        let subscription = Subscription::new(CancellationToken::new());
        let token = subscription.token();
        let request = Self::authorize(self.stream_client.get(&url), self.credential.as_deref());

        let mut source = match EventSource::new(request) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(url = %url, error = ?e, "Failed to open event stream");
                return subscription;
            }
        };
        source.set_retry_policy(Box::new(retry::Constant::new(STREAM_RETRY_DELAY, None)));

        tokio::spawn(async move {
            let mut on_missing = on_missing;
            loop {
                let next = tokio::select! {
                    () = token.cancelled() => break,
                    next = source.next() => next,
                };
                match next {
                    None => break,
                    Some(Ok(Event::Open)) => tracing::debug!(url = %url, "Event stream open"),
                    Some(Ok(Event::Message(message))) => match decode(&message.event, &message.data) {
                        StreamStep::Deliver(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        StreamStep::Last(event) => {
                            let _ = tx.send(event);
                            break;
                        }
                        StreamStep::Skip => {}
                    },
                    Some(Err(EventSourceError::InvalidStatusCode(status, _))) if status == StatusCode::NOT_FOUND => {
                        tracing::warn!(url = %url, "Event stream target no longer exists");
                        if let Some(event) = on_missing.take() {
                            let _ = tx.send(event);
                        }
                        break;
                    }
                    Some(Err(EventSourceError::InvalidStatusCode(status, response))) => {
                        let body = response.text().await.unwrap_or_default();
                        let error = Self::classify_error(status, &body);
                        tracing::warn!(url = %url, error = %error, "Event stream refused");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "Event stream dropped, reconnecting");
                    }
                }
            }
            source.close();
        });

        subscription
    }
}

fn decode_json<T: DeserializeOwned>(event: &str, data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(event = %event, error = %e, "Skipping malformed stream event");
            None
        }
    }
}

fn decode_record_event(event: &str, data: &str) -> StreamStep<RecordEvent> {
    match event {
        "updated" => decode_json::<SharedRecord>(event, data).map_or(StreamStep::Skip, |record| {
            StreamStep::Deliver(RecordEvent::Updated(record.normalized()))
        }),
        "deleted" => StreamStep::Last(RecordEvent::Deleted),
        _ => StreamStep::Skip,
    }
}

fn decode_sheet_event(event: &str, data: &str) -> StreamStep<CharacterSheet> {
    match event {
        "updated" => decode_json::<CharacterSheet>(event, data).map_or(StreamStep::Skip, StreamStep::Deliver),
        _ => StreamStep::Skip,
    }
}

#[async_trait]
impl CredentialExchange for HttpRecordStore {
    async fn exchange(&self, token: &str) -> CapabilityResult<Credential> {
        let request = self
            .client
            .post(self.url("/auth/exchange"))
            .json(&ExchangeRequest { token });
        let response: ExchangeResponse = self.send_json(request).await?;
        if response.credential.is_empty() {
            return Err(CapabilityError::auth("Backend returned an empty credential"));
        }
        Ok(Credential(response.credential))
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn fetch_summaries(&self, scope: &str) -> CapabilityResult<Vec<RecordSummary>> {
        let request = self.client.get(self.url(&format!("/scopes/{scope}/records")));
        self.send_json(request).await
    }

    async fn create(&self, scope: &str, record: NewRecord) -> CapabilityResult<String> {
        let request = self
            .client
            .post(self.url(&format!("/scopes/{scope}/records")))
            .json(&record);
        let created: CreatedResponse = self.send_json(request).await?;
        Ok(created.id)
    }

    async fn read(&self, target: &RecordRef) -> CapabilityResult<SharedRecord> {
        let request = self.client.get(self.record_url(target));
        let record: SharedRecord = self.send_json(request).await?;
        Ok(record.normalized())
    }

    fn subscribe(&self, target: &RecordRef, tx: FeedSender<RecordEvent>) -> Subscription {
        let url = format!("{}/events", self.record_url(target));
        self.spawn_stream(url, tx, Some(RecordEvent::Deleted), decode_record_event)
    }

    async fn patch(&self, target: &RecordRef, patch: RecordPatch) -> CapabilityResult<()> {
        let request = self.client.patch(self.record_url(target)).json(&patch);
        self.send(request).await.map(|_| ())
    }
}

impl CharacterFeed for HttpRecordStore {
    fn subscribe(&self, character_id: &str, tx: FeedSender<CharacterSheet>) -> Subscription {
        let url = self.url(&format!("/characters/{character_id}/events"));
        self.spawn_stream(url, tx, None, decode_sheet_event)
    }
}
