use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::info;

use super::{MessageSource, Polled, StreamRecord};
use crate::config::KafkaConfig;

/// Kafka-backed message source. Offsets are committed by librdkafka's
/// default auto-commit.
pub struct KafkaSource {
    consumer: Option<StreamConsumer>,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let mut client = ClientConfig::new();
        for (key, value) in config.client_properties() {
            client.set(key, value);
        }

        let consumer: StreamConsumer = client
            .create()
            .context("Failed to create Kafka consumer")?;

        Ok(Self {
            consumer: Some(consumer),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn subscribe(&mut self, topics: &[&str]) -> Result<()> {
        let consumer = self
            .consumer
            .as_ref()
            .context("Kafka consumer already closed")?;
        consumer
            .subscribe(topics)
            .context("Kafka subscribe failed")?;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Polled {
        let Some(consumer) = self.consumer.as_ref() else {
            return Polled::Closed;
        };

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => Polled::Idle,
            Ok(Err(e)) => Polled::Error(e.to_string()),
            Ok(Ok(message)) => Polled::Record(StreamRecord {
                topic: message.topic().to_string(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
        }
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!("Kafka consumer closed");
        }
    }
}
