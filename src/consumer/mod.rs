#[cfg(feature = "kafka")]
pub mod kafka;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::destination::Destination;
use crate::graph::{DeliveryResult, GraphClient, GraphError, PostedMessage, Rejection};
use crate::message::MessageRequest;

/// How long one poll waits for a message before reporting idle.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// A message taken off the stream.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Result of one bounded-wait poll.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
#[derive(Debug)]
pub enum Polled {
    Record(StreamRecord),
    /// The broker reported an error instead of a message.
    Error(String),
    /// Nothing arrived within the wait.
    Idle,
    /// The source has no more messages.
    Closed,
}

/// A subscribable stream of messages, polled with a bounded wait.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
#[async_trait]
pub trait MessageSource: Send {
    async fn subscribe(&mut self, topics: &[&str]) -> Result<()>;

    async fn poll(&mut self, timeout: Duration) -> Polled;

    /// Release the underlying consumer.
    async fn close(&mut self) {}
}

#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid message payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Message is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Message arrived on unexpected topic {0}")]
    UnknownTopic(String),

    #[error("Teams access token is not configured")]
    MissingToken,

    #[error("Graph rejected message ({}): {}", .0.status, .0.message)]
    Rejected(Rejection),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Payload shape shared by the channel and chat topics.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamPayload {
    team_id: Option<String>,
    channel_id: Option<String>,
    chat_id: Option<String>,
    title: Option<String>,
    text: Option<String>,
    image: Option<String>,
}

#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
fn required(value: Option<String>, field: &'static str) -> Result<String, IngestError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(IngestError::MissingField(field))
}

/// Counters reported when the loop stops.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Reads messages off the channel and chat topics and posts them to Teams.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub struct StreamIngress {
    config: Arc<Config>,
    graph: GraphClient,
}

#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
impl StreamIngress {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let graph = GraphClient::new(&config.teams).context("Failed to create Graph client")?;
        Ok(Self { config, graph })
    }

    /// Poll `source` until `shutdown` resolves or the source closes. Every
    /// message is fully handled before the next poll, and no failure from a
    /// single message stops the loop.
    pub async fn run<S, F>(&self, source: &mut S, shutdown: F) -> Result<ConsumeStats>
    where
        S: MessageSource + ?Sized,
        F: Future<Output = ()>,
    {
        let mut stats = ConsumeStats::default();

        let topics = self.config.kafka.topics();
        if topics.is_empty() {
            info!("No topic provided, stream ingress not started");
            return Ok(stats);
        }
        if self.config.teams.access_token().is_none() {
            warn!("TEAMS_ACCESS_TOKEN is not set; messages will fail until it is configured");
        }

        source
            .subscribe(&topics)
            .await
            .with_context(|| format!("Failed to subscribe to {:?}", topics))?;
        info!("Subscribed to topics: {:?}", topics);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Interrupted, stopping stream ingress");
                    break;
                }
                polled = source.poll(POLL_TIMEOUT) => match polled {
                    Polled::Idle => continue,
                    Polled::Closed => {
                        info!("Message source closed");
                        break;
                    }
                    Polled::Error(e) => {
                        error!("Error when consuming message: {}", e);
                    }
                    Polled::Record(record) => match self.handle(&record).await {
                        Ok(posted) => {
                            debug!("Delivered message {} ({})", posted.id, posted.url);
                            stats.delivered += 1;
                        }
                        Err(e) => {
                            error!(
                                "Error processing message from topic {}: {} (payload: {})",
                                record.topic,
                                e,
                                String::from_utf8_lossy(&record.payload)
                            );
                            stats.failed += 1;
                        }
                    },
                },
            }
        }

        source.close().await;
        info!(
            "Stream ingress stopped: {} delivered, {} failed",
            stats.delivered, stats.failed
        );
        Ok(stats)
    }

    async fn handle(&self, record: &StreamRecord) -> Result<PostedMessage, IngestError> {
        info!(
            "Message on {}: {}",
            record.topic,
            String::from_utf8_lossy(&record.payload)
        );

        let (destination, request) = self.route(record)?;
        let token = self
            .config
            .teams
            .access_token()
            .ok_or(IngestError::MissingToken)?;

        match self.graph.send(token, &destination, &request).await? {
            DeliveryResult::Posted(posted) => Ok(posted),
            DeliveryResult::Rejected(rejection) => Err(IngestError::Rejected(rejection)),
        }
    }

    /// Decode the payload and pick the destination from the topic it came in on.
    fn route(&self, record: &StreamRecord) -> Result<(Destination, MessageRequest), IngestError> {
        let payload: StreamPayload = serde_json::from_slice(&record.payload)?;
        let kafka = &self.config.kafka;
        let topic = Some(record.topic.as_str());

        let destination = if topic == kafka.channel_topic() {
            Destination::channel(
                required(payload.team_id, "teamId")?,
                required(payload.channel_id, "channelId")?,
            )
        } else if topic == kafka.chat_topic() {
            Destination::chat(required(payload.chat_id, "chatId")?)
        } else {
            return Err(IngestError::UnknownTopic(record.topic.clone()));
        };

        let request = MessageRequest::new(payload.title, payload.text, payload.image);
        Ok((destination, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KafkaConfig, TeamsConfig};
    use crate::testing::GraphStub;
    use axum::http::StatusCode;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// In-memory source fed through a channel. Dropping the sender closes it.
    struct ChannelSource {
        rx: mpsc::UnboundedReceiver<Polled>,
        subscribed: Vec<String>,
        closed: bool,
    }

    impl ChannelSource {
        fn new() -> (mpsc::UnboundedSender<Polled>, Self) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Self {
                rx,
                subscribed: Vec::new(),
                closed: false,
            };
            (tx, source)
        }
    }

    #[async_trait]
    impl MessageSource for ChannelSource {
        async fn subscribe(&mut self, topics: &[&str]) -> Result<()> {
            self.subscribed = topics.iter().map(|t| t.to_string()).collect();
            Ok(())
        }

        async fn poll(&mut self, timeout: Duration) -> Polled {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(polled)) => polled,
                Ok(None) => Polled::Closed,
                Err(_) => Polled::Idle,
            }
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn record(topic: &str, payload: &str) -> Polled {
        Polled::Record(StreamRecord {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        })
    }

    fn ingress_for(
        base_url: &str,
        channel_topic: Option<&str>,
        chat_topic: Option<&str>,
    ) -> StreamIngress {
        let config = Config {
            teams: TeamsConfig {
                access_token: Some("tok".into()),
                base_url: base_url.to_string(),
                ..Default::default()
            },
            kafka: KafkaConfig {
                channel_topic: channel_topic.map(String::from),
                chat_topic: chat_topic.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        };
        StreamIngress::new(Arc::new(config)).unwrap()
    }

    fn never() -> impl Future<Output = ()> {
        std::future::pending()
    }

    async fn created_stub() -> GraphStub {
        GraphStub::start(
            StatusCode::CREATED,
            json!({"id": "m1", "webUrl": "http://x/m1"}),
        )
        .await
    }

    #[tokio::test]
    async fn test_channel_payload_is_delivered() {
        let stub = created_stub().await;
        let ingress = ingress_for(&stub.base_url, Some("channels"), Some("chats"));
        let (tx, mut source) = ChannelSource::new();

        tx.send(record("channels", r#"{"teamId":"T1","channelId":"C1","text":"hi"}"#))
            .unwrap();
        drop(tx);

        let stats = ingress.run(&mut source, never()).await.unwrap();

        assert_eq!(stats, ConsumeStats { delivered: 1, failed: 0 });
        assert_eq!(source.subscribed, vec!["channels", "chats"]);
        assert!(source.closed);

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/teams/T1/channels/C1/messages");
        assert_eq!(requests[0].body["body"]["content"], "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_chat_payload_is_delivered() {
        let stub = created_stub().await;
        let ingress = ingress_for(&stub.base_url, None, Some("chats"));
        let (tx, mut source) = ChannelSource::new();

        tx.send(record("chats", r#"{"chatId":"CH1","title":"T","image":"http://i"}"#))
            .unwrap();
        drop(tx);

        let stats = ingress.run(&mut source, never()).await.unwrap();

        assert_eq!(stats.delivered, 1);
        assert_eq!(source.subscribed, vec!["chats"]);
        let requests = stub.requests();
        assert_eq!(requests[0].path, "/chats/CH1/messages");
        assert_eq!(
            requests[0].body["body"]["content"],
            "<h1>T</h1><img src='http://i'/>"
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let stub = created_stub().await;
        let ingress = ingress_for(&stub.base_url, Some("channels"), None);
        let (tx, mut source) = ChannelSource::new();

        tx.send(record("channels", "{not json")).unwrap();
        drop(tx);

        let stats = ingress.run(&mut source, never()).await.unwrap();

        assert_eq!(stats, ConsumeStats { delivered: 0, failed: 1 });
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_loop_continues_after_failures() {
        let stub = created_stub().await;
        let ingress = ingress_for(&stub.base_url, Some("channels"), Some("chats"));
        let (tx, mut source) = ChannelSource::new();

        tx.send(record("channels", "{not json")).unwrap();
        tx.send(Polled::Error("broker went away".into())).unwrap();
        tx.send(record("channels", r#"{"teamId":"T1","text":"no channel"}"#))
            .unwrap();
        tx.send(record("chats", r#"{"text":"no chat id"}"#)).unwrap();
        tx.send(record("other", r#"{"chatId":"CH1"}"#)).unwrap();
        tx.send(record("chats", r#"{"chatId":"CH1","text":"still here"}"#))
            .unwrap();
        drop(tx);

        let stats = ingress.run(&mut source, never()).await.unwrap();

        assert_eq!(stats, ConsumeStats { delivered: 1, failed: 4 });
        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body["body"]["content"], "<p>still here</p>");
    }

    #[tokio::test]
    async fn test_rejection_is_counted_as_failure() {
        let stub = GraphStub::start(
            StatusCode::NOT_FOUND,
            json!({"error": {"message": "not found"}}),
        )
        .await;
        let ingress = ingress_for(&stub.base_url, None, Some("chats"));
        let (tx, mut source) = ChannelSource::new();

        tx.send(record("chats", r#"{"chatId":"missing","text":"hi"}"#))
            .unwrap();
        tx.send(record("chats", r#"{"chatId":"missing","text":"again"}"#))
            .unwrap();
        drop(tx);

        let stats = ingress.run(&mut source, never()).await.unwrap();

        assert_eq!(stats, ConsumeStats { delivered: 0, failed: 2 });
        assert_eq!(stub.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_no_topics_does_not_subscribe() {
        let stub = created_stub().await;
        let ingress = ingress_for(&stub.base_url, None, None);
        let (_tx, mut source) = ChannelSource::new();

        let stats = ingress.run(&mut source, never()).await.unwrap();

        assert_eq!(stats, ConsumeStats::default());
        assert!(source.subscribed.is_empty());
        assert!(!source.closed);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let stub = created_stub().await;
        let ingress = ingress_for(&stub.base_url, Some("channels"), None);
        // Sender kept alive so the source only ever reports idle.
        let (_tx, mut source) = ChannelSource::new();

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let stats = ingress.run(&mut source, shutdown).await.unwrap();

        assert_eq!(stats, ConsumeStats::default());
        assert!(source.closed);
    }

    #[test]
    fn test_route_requires_routing_ids() {
        let ingress = ingress_for("http://localhost/", Some("channels"), Some("chats"));
        let missing = |topic: &str, payload: &str| {
            let record = StreamRecord {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            };
            match ingress.route(&record) {
                Err(IngestError::MissingField(field)) => field,
                other => panic!("expected missing field, got {:?}", other),
            }
        };

        assert_eq!(missing("channels", r#"{"channelId":"C1"}"#), "teamId");
        assert_eq!(missing("channels", r#"{"teamId":"T1","channelId":""}"#), "channelId");
        assert_eq!(missing("chats", r#"{"teamId":"T1"}"#), "chatId");
    }
}
