//! JetStream implementation of the message bus.
//!
//! The topic exchange is a stream over the pipeline subjects; each durable
//! queue is a durable pull consumer filtered on one consumed subject. Every
//! worker opens its own message stream on that consumer, so deliveries are
//! shared between workers rather than duplicated.
//!
//! Workers pull one message per batch. A larger batch would start the ack
//! timer of messages still waiting behind the one being handled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer, AckKind};
use futures::StreamExt;
use tracing::info;

use zguby_core::{AppError, BusConfig, Delivery, MessageBus, Subscription};

/// Messages a worker stream requests per pull.
const PULL_BATCH: usize = 1;

fn bus_error(e: impl std::fmt::Display) -> AppError {
    AppError::BusError(e.to_string())
}

/// Durable pull consumer settings for one queue.
fn consumer_config(durable_name: &str, subject: &str, ack_wait: Duration) -> consumer::pull::Config {
    consumer::pull::Config {
        durable_name: Some(durable_name.to_string()),
        filter_subject: subject.to_string(),
        ack_policy: consumer::AckPolicy::Explicit,
        ack_wait,
        ..Default::default()
    }
}

fn bound<'a, T>(queues: &'a HashMap<String, T>, subject: &str) -> Result<&'a T, AppError> {
    queues
        .get(subject)
        .ok_or_else(|| AppError::ConfigError(format!("no queue is bound to {subject}")))
}

/// Connection to the JetStream stream carrying pipeline events.
#[derive(Clone)]
pub struct NatsBus {
    jetstream: jetstream::Context,
    consumers: Arc<HashMap<String, consumer::Consumer<consumer::pull::Config>>>,
    requeue_delay: Duration,
}

impl NatsBus {
    /// Connects, then declares the stream and one durable consumer per
    /// consumed subject.
    ///
    /// Declaration is idempotent: existing definitions are reused.
    pub async fn connect(config: &BusConfig, requeue_delay: Duration) -> Result<Self, AppError> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(bus_error)?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: config.subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(bus_error)?;

        let mut consumers = HashMap::new();
        for (durable_name, subject) in config.queues() {
            let consumer = stream
                .get_or_create_consumer(
                    durable_name,
                    consumer_config(durable_name, subject, config.ack_wait),
                )
                .await
                .map_err(bus_error)?;

            info!(
                consumer = durable_name,
                subject,
                ack_wait_secs = config.ack_wait.as_secs(),
                "Declared durable consumer"
            );
            consumers.insert(subject.to_string(), consumer);
        }

        info!(url = %config.url, stream = %config.stream, "Connected to message bus");

        Ok(Self {
            jetstream,
            consumers: Arc::new(consumers),
            requeue_delay,
        })
    }
}

impl MessageBus for NatsBus {
    type Subscription = NatsSubscription;

    async fn subscribe(&self, subject: &str) -> Result<NatsSubscription, AppError> {
        let messages = bound(&self.consumers, subject)?
            .stream()
            .max_messages_per_batch(PULL_BATCH)
            .messages()
            .await
            .map_err(bus_error)?;
        Ok(NatsSubscription {
            messages,
            requeue_delay: self.requeue_delay,
        })
    }

    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), AppError> {
        // The second await waits for the stream to persist the message.
        self.jetstream
            .publish(routing_key.to_string(), payload.into())
            .await
            .map_err(bus_error)?
            .await
            .map_err(bus_error)?;
        Ok(())
    }
}

pub struct NatsSubscription {
    messages: consumer::pull::Stream,
    requeue_delay: Duration,
}

impl Subscription for NatsSubscription {
    type Delivery = NatsDelivery;

    async fn next_delivery(&mut self) -> Option<Result<NatsDelivery, AppError>> {
        let next = self.messages.next().await?;
        Some(
            next.map(|message| NatsDelivery::new(message, self.requeue_delay))
                .map_err(bus_error),
        )
    }
}

pub struct NatsDelivery {
    message: jetstream::Message,
    attempt: u32,
    requeue_delay: Duration,
}

impl NatsDelivery {
    fn new(message: jetstream::Message, requeue_delay: Duration) -> Self {
        let attempt = message
            .info()
            .ok()
            .and_then(|info| u32::try_from(info.delivered).ok())
            .unwrap_or(1)
            .max(1);
        Self {
            message,
            attempt,
            requeue_delay,
        }
    }
}

impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn in_progress(&self) -> Result<(), AppError> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(bus_error)
    }

    async fn ack(self) -> Result<(), AppError> {
        self.message.ack().await.map_err(bus_error)
    }

    async fn requeue(self) -> Result<(), AppError> {
        self.message
            .ack_with(AckKind::Nak(Some(self.requeue_delay)))
            .await
            .map_err(bus_error)
    }

    async fn dead_letter(self) -> Result<(), AppError> {
        self.message.ack_with(AckKind::Term).await.map_err(bus_error)
    }
}
