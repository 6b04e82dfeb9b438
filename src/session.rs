//! Background network tasks and the events they report back with.
//!
//! Spawned tasks never touch application state; they perform the I/O and
//! send a `NetEvent` over an unbounded channel that the event loop drains.

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::client::{ApiClient, ContextsResponse};
use crate::stream;

/// Progress of one query turn, in arrival order: zero or more `Fragment`s,
/// then exactly one of `Completed` or `Failed`. Fragments carry the full
/// accumulated text so far, never deltas.
#[derive(Debug)]
pub enum SessionEvent {
    Fragment(String),
    Completed(String),
    Failed(String),
}

/// Everything the backend tasks can report to the event loop. Session
/// events are stamped with the turn that produced them: aborting a task
/// stops future reads, but events already queued on the channel survive,
/// and the stamp lets the receiver drop those stragglers.
#[derive(Debug)]
pub enum NetEvent {
    Contexts(Result<ContextsResponse>),
    ContextSet {
        context: String,
        result: Result<()>,
    },
    Commands(Result<Vec<String>>),
    ResetDone(Result<()>),
    Session { turn: u64, event: SessionEvent },
}

/// Spawn one query turn. The returned handle is the cancellation point:
/// aborting it stops the body read at the current await.
pub fn spawn_query(
    client: ApiClient,
    query: String,
    turn: u64,
    tx: UnboundedSender<NetEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = match drive_query(&client, &query, turn, &tx).await {
            Ok(text) => SessionEvent::Completed(text),
            Err(err) => SessionEvent::Failed(err.to_string()),
        };
        let _ = tx.send(NetEvent::Session { turn, event });
    })
}

async fn drive_query(
    client: &ApiClient,
    query: &str,
    turn: u64,
    tx: &UnboundedSender<NetEvent>,
) -> Result<String> {
    let response = client.query(query).await?;
    stream::consume(response.bytes_stream(), |text| {
        let _ = tx.send(NetEvent::Session {
            turn,
            event: SessionEvent::Fragment(text.to_string()),
        });
    })
    .await
}

pub fn spawn_fetch_contexts(client: ApiClient, tx: UnboundedSender<NetEvent>) {
    tokio::spawn(async move {
        let _ = tx.send(NetEvent::Contexts(client.contexts().await));
    });
}

pub fn spawn_set_context(client: ApiClient, context: String, tx: UnboundedSender<NetEvent>) {
    tokio::spawn(async move {
        let result = client.set_context(&context).await;
        let _ = tx.send(NetEvent::ContextSet { context, result });
    });
}

pub fn spawn_fetch_commands(client: ApiClient, tx: UnboundedSender<NetEvent>) {
    tokio::spawn(async move {
        let _ = tx.send(NetEvent::Commands(client.available_commands().await));
    });
}

pub fn spawn_reset(client: ApiClient, tx: UnboundedSender<NetEvent>) {
    tokio::spawn(async move {
        let _ = tx.send(NetEvent::ResetDone(client.reset_conversation().await));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect_session_events(mut rx: mpsc::UnboundedReceiver<NetEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                NetEvent::Session { turn, event } => {
                    assert_eq!(turn, 1);
                    let terminal =
                        matches!(event, SessionEvent::Completed(_) | SessionEvent::Failed(_));
                    events.push(event);
                    if terminal {
                        break;
                    }
                }
                _ => {}
            }
        }
        events
    }

    #[tokio::test]
    async fn query_turn_emits_fragments_then_completed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"response\":\"po\"}\n{\"response\":\"d1\"}\n",
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_query(ApiClient::new(&server.uri()), "list pods".to_string(), 1, tx)
            .await
            .unwrap();
        let events = collect_session_events(rx).await;

        match events.last() {
            Some(SessionEvent::Completed(text)) => assert_eq!(text, "pod1"),
            other => panic!("expected Completed, got {other:?}"),
        }
        let fragments: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Fragment(text) => Some(text),
                _ => None,
            })
            .collect();
        assert!(!fragments.is_empty());
        assert_eq!(fragments.last().map(|s| s.as_str()), Some("pod1"));
    }

    #[tokio::test]
    async fn http_error_status_emits_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_query(ApiClient::new(&server.uri()), "list pods".to_string(), 1, tx)
            .await
            .unwrap();
        let events = collect_session_events(rx).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Failed(message) => assert!(message.contains("500")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_record_is_annotated_not_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"response\":\"partial\"}\n{\"error\":\"command timed out\"}\n",
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_query(ApiClient::new(&server.uri()), "slow".to_string(), 1, tx)
            .await
            .unwrap();
        let events = collect_session_events(rx).await;

        match events.last() {
            Some(SessionEvent::Completed(text)) => {
                assert_eq!(text, "partial\n**Error:** command timed out");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
