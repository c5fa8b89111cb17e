//! The reconnecting client against a live server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use relay_client::{
    InMemoryHistory, ReconnectConfig, RelayClient, StreamMetadata, StreamObserver,
    StreamTransport,
};
use relay_types::{ChatMessage, StreamRequest};
use tokio_util::sync::CancellationToken;

use common::{ScriptedGenerator, TestServer};

#[derive(Default)]
struct Collect {
    text: String,
    reconnects: u32,
}

impl StreamObserver for Collect {
    fn on_text_delta(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn on_reconnect(&mut self, _attempt: u32, _run_id: &str) {
        self.reconnects += 1;
    }
}

fn client_for(server: &TestServer) -> Result<RelayClient> {
    Ok(RelayClient::builder().base_url(server.base_url()).build()?)
}

#[tokio::test]
async fn test_client_streams_durable_run() -> Result<()> {
    let server =
        TestServer::start(ScriptedGenerator::five_chunks().with_delay(Duration::ZERO)).await?;
    let history = Arc::new(InMemoryHistory::new());
    let client = client_for(&server)?
        .reconnecting(ReconnectConfig::default())
        .with_history(history.clone());

    let mut observer = Collect::default();
    let outcome = client
        .stream(
            &StreamRequest::new("go"),
            &mut observer,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(outcome.text, "chunk-1chunk-2chunk-3chunk-4chunk-5");
    assert_eq!(observer.text, outcome.text);
    assert_eq!(outcome.reconnects, 0);
    let run_id = outcome.run_id.expect("durable run");
    assert_eq!(outcome.last_event_id, Some(format!("{run_id}:5")));
    assert_eq!(
        history.messages(),
        [ChatMessage::user("go"), ChatMessage::assistant(outcome.text)]
    );

    Ok(())
}

#[tokio::test]
async fn test_client_resumes_interrupted_run() -> Result<()> {
    let server = TestServer::start(
        ScriptedGenerator::five_chunks().with_delay(Duration::from_millis(100)),
    )
    .await?;
    let client = client_for(&server)?;

    // Start a run and abandon it after the first event.
    let opened = client
        .transport()
        .open(
            &StreamRequest::new("go"),
            &StreamMetadata::default(),
            &CancellationToken::new(),
        )
        .await?;
    let run_id = opened.run_id.clone().expect("durable run");
    let mut events = opened.events;
    let first = futures::StreamExt::next(&mut events)
        .await
        .expect("stream ended early")?;
    drop(events);

    // A transport that starts from that point behaves like a reconnect.
    let resume = StreamMetadata {
        run_id: Some(run_id.clone()),
        last_event_id: first.id.clone(),
    };
    let resumed = client
        .transport()
        .open(&StreamRequest::new("go"), &resume, &CancellationToken::new())
        .await?;
    assert_eq!(resumed.run_id.as_deref(), Some(run_id.as_str()));

    let rest: Vec<_> = futures::TryStreamExt::try_collect::<Vec<_>>(resumed.events).await?;
    assert_eq!(rest.len(), 5);
    assert_eq!(rest[0].id, Some(format!("{run_id}:1")));
    assert!(rest.last().unwrap().event.is_terminal());

    Ok(())
}

#[tokio::test]
async fn test_client_reports_queue_stats() -> Result<()> {
    let server = TestServer::start(ScriptedGenerator::five_chunks()).await?;
    let stats = client_for(&server)?.queue_stats().await?;
    assert_eq!(stats.active, 0);
    assert_eq!(stats.max_concurrent, 5);
    Ok(())
}
