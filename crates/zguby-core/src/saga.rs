//! Publication saga: consumes `item.vectorized`, publishes the item on the
//! portal, and emits `item.published`. A second set of workers forwards
//! gateway datasets from `dataset.publish` and emits `dataset.published`.
//!
//! # Flow per delivery
//!
//! ```text
//! Received ──parse/format──► Formatted ──ledger has record──────────────► Published
//!    │                           │                                           ▲
//!    │                           └──token + dataset──► Submitting ──submit───┘
//!    │                           │                        │   ledger, emit
//!    ▼                           ▼                        ▼
//!  Failed(class) ◄───────────────┴────────────────────────┘
//!    ├─ Permanent ─────────────────────────► DeadLettered  (ack)
//!    ├─ Retryable, attempt < max ──────────► Requeued      (nack + requeue)
//!    ├─ Retryable, attempt >= max ─────────► DeadLettered  (terminate)
//!    └─ Fatal ─────────────────────────────► Halted        (left unacknowledged)
//! ```
//!
//! The inbound message is acknowledged only after the portal confirmed the
//! submission and the completion event was accepted by the bus. A crash in
//! between causes a redelivery, never a silent loss. While a delivery is in
//! flight the worker sends progress heartbeats so the bus does not redeliver
//! it to a sibling during a slow login or submission.
//!
//! Datasets have no ledger to guard a redelivery, so a failed
//! `dataset.published` emit is logged and the request is still acknowledged.
//!
//! # Duplicate submissions
//!
//! Before submitting, the saga asks the ledger for a publication record; if
//! one exists the portal is not called again. The ledger write is
//! best-effort, so a crash after the portal confirmed but before the ledger
//! recorded can still produce a second submission on redelivery. Every
//! request carries the stable `lost-item-<id>` idempotency key (header and
//! custom field) so a portal that honours it collapses the duplicate; one
//! that does not will hold two resources for the item.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{BusConfig, SagaConfig};
use crate::credentials::{Credential, CredentialManager};
use crate::dataset::DatasetResolver;
use crate::error::ErrorClass;
use crate::formatter::ItemFormatter;
use crate::health::HealthHandle;
use crate::models::{
    DatasetPublishEvent, DatasetPublishedEvent, Item, ItemPublishedEvent, PublicationRecord,
    DATASET_PUBLISH, DATASET_PUBLISHED, ITEM_PUBLISHED, ITEM_VECTORIZED,
};
use crate::progress::{AtomicSagaStats, SagaEvent, SagaReporter, SagaStats, TracingReporter};
use crate::traits::{Delivery, MessageBus, PortalApi, PublicationLedger, Subscription};
use crate::AppError;

/// Shortest heartbeat period accepted by the worker.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// States a single delivery moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Received,
    Formatted,
    Submitting,
    Published,
    Failed(ErrorClass),
    Requeued,
    DeadLettered,
    Halted,
}

impl SagaState {
    pub fn can_transition_to(self, next: SagaState) -> bool {
        use SagaState::*;

        matches!(
            (self, next),
            (Received, Formatted)
                | (Received, Failed(_))
                | (Formatted, Submitting)
                | (Formatted, Published)
                | (Formatted, Failed(_))
                | (Submitting, Published)
                | (Submitting, Failed(_))
                | (Failed(ErrorClass::Retryable), Requeued)
                | (Failed(ErrorClass::Retryable), DeadLettered)
                | (Failed(ErrorClass::Permanent), DeadLettered)
                | (Failed(ErrorClass::Fatal), Halted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaState::Published | SagaState::Requeued | SagaState::DeadLettered | SagaState::Halted
        )
    }
}

/// What to do with a delivery after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Permanent failure: acknowledge and drop.
    Discard,
    Requeue,
    /// Retries exhausted: terminate the message.
    DeadLetter,
    /// Stop consuming; leave the message unacknowledged.
    Halt,
}

/// Maps an error class and the delivery count to a [`Disposition`].
pub fn disposition(class: ErrorClass, attempt: u32, max_attempts: u32) -> Disposition {
    match class {
        ErrorClass::Permanent => Disposition::Discard,
        ErrorClass::Retryable if attempt >= max_attempts => Disposition::DeadLetter,
        ErrorClass::Retryable => Disposition::Requeue,
        ErrorClass::Fatal => Disposition::Halt,
    }
}

/// Final result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Published(PublicationRecord),
    /// The ledger already held a record; the completion event was re-emitted.
    AlreadyPublished(PublicationRecord),
    /// A gateway dataset was accepted by the portal.
    DatasetPublished(DatasetPublishedEvent),
    Requeued { attempt: u32 },
    DeadLettered { attempt: u32, class: ErrorClass },
}

/// Subjects the saga consumes from and announces on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaRoutes {
    pub item_consume: String,
    pub item_publish: String,
    pub dataset_consume: String,
    pub dataset_publish: String,
}

impl Default for SagaRoutes {
    fn default() -> Self {
        Self {
            item_consume: ITEM_VECTORIZED.to_string(),
            item_publish: ITEM_PUBLISHED.to_string(),
            dataset_consume: DATASET_PUBLISH.to_string(),
            dataset_publish: DATASET_PUBLISHED.to_string(),
        }
    }
}

impl From<&BusConfig> for SagaRoutes {
    fn from(config: &BusConfig) -> Self {
        Self {
            item_consume: config.consume_key.clone(),
            item_publish: config.publish_key.clone(),
            dataset_consume: config.dataset_consume_key.clone(),
            dataset_publish: config.dataset_publish_key.clone(),
        }
    }
}

/// Which queue a worker drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    Items,
    Datasets,
}

struct StateMachine {
    state: SagaState,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: SagaState::Received,
        }
    }

    fn advance(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal saga transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(from = ?self.state, to = ?next, "saga transition");
        self.state = next;
    }
}

/// The publication saga and its consumer loop.
pub struct PublishSaga<P, L, B, R = TracingReporter>
where
    P: PortalApi,
    L: PublicationLedger,
    B: MessageBus,
    R: SagaReporter,
{
    portal: P,
    ledger: L,
    bus: B,
    credentials: CredentialManager<P>,
    datasets: DatasetResolver<P>,
    formatter: ItemFormatter,
    config: SagaConfig,
    routes: SagaRoutes,
    health: HealthHandle,
    reporter: R,
    stats: AtomicSagaStats,
}

impl<P, L, B> PublishSaga<P, L, B, TracingReporter>
where
    P: PortalApi,
    L: PublicationLedger,
    B: MessageBus,
{
    pub fn new(
        portal: P,
        ledger: L,
        bus: B,
        credentials: CredentialManager<P>,
        datasets: DatasetResolver<P>,
        formatter: ItemFormatter,
        config: SagaConfig,
    ) -> Self {
        Self {
            portal,
            ledger,
            bus,
            credentials,
            datasets,
            formatter,
            config,
            routes: SagaRoutes::default(),
            health: HealthHandle::new(),
            reporter: TracingReporter,
            stats: AtomicSagaStats::new(),
        }
    }
}

impl<P, L, B, R> PublishSaga<P, L, B, R>
where
    P: PortalApi,
    L: PublicationLedger,
    B: MessageBus,
    R: SagaReporter,
{
    pub fn with_reporter<R2: SagaReporter>(self, reporter: R2) -> PublishSaga<P, L, B, R2> {
        PublishSaga {
            portal: self.portal,
            ledger: self.ledger,
            bus: self.bus,
            credentials: self.credentials,
            datasets: self.datasets,
            formatter: self.formatter,
            config: self.config,
            routes: self.routes,
            health: self.health,
            reporter,
            stats: self.stats,
        }
    }

    pub fn with_health(mut self, health: HealthHandle) -> Self {
        self.health = health;
        self
    }

    pub fn with_routes(mut self, routes: SagaRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn health(&self) -> &HealthHandle {
        &self.health
    }

    pub fn stats(&self) -> SagaStats {
        self.stats.to_stats()
    }

    /// Acquires the first token and resolves the target dataset.
    ///
    /// Called once before consuming; every error here is fatal.
    pub async fn start(&self) -> Result<String, AppError> {
        self.credentials.get_token().await?;
        self.datasets.resolve(&self.credentials).await
    }

    /// Runs `config.workers` item workers and `config.dataset_workers`
    /// dataset workers until `shutdown` is cancelled or a fatal error halts
    /// consumption.
    ///
    /// In-flight deliveries always run to completion; cancellation only
    /// stops workers from taking the next one.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that halted the consumer. The health handle is
    /// switched to `Halted` before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<SagaStats, AppError> {
        let dataset_id = match self.start().await {
            Ok(id) => id,
            Err(e) => {
                self.health.set_halted(e.to_string());
                return Err(e);
            }
        };

        let workers = self.config.workers.max(1);
        let dataset_workers = self.config.dataset_workers;
        let mut subscriptions = Vec::with_capacity(workers + dataset_workers);
        let queues = std::iter::repeat((Queue::Items, self.routes.item_consume.as_str()))
            .take(workers)
            .chain(
                std::iter::repeat((Queue::Datasets, self.routes.dataset_consume.as_str()))
                    .take(dataset_workers),
            );
        for (queue, subject) in queues {
            match self.bus.subscribe(subject).await {
                Ok(subscription) => subscriptions.push((queue, subscription)),
                Err(e) => {
                    self.health.set_halted(e.to_string());
                    return Err(e);
                }
            }
        }

        self.reporter.report(SagaEvent::Started {
            dataset_id: &dataset_id,
            workers,
            dataset_workers,
        });
        self.health.set_ready();

        // Cancelling `stop` halts sibling workers without touching `shutdown`.
        let stop_token = shutdown.child_token();
        let stop = &stop_token;
        let results = futures::future::join_all(subscriptions.into_iter().enumerate().map(
            |(worker, (queue, subscription))| self.worker(worker, queue, subscription, stop),
        ))
        .await;

        let stats = self.stats();
        if let Some(e) = results.into_iter().find_map(Result::err) {
            return Err(e);
        }

        self.health.set_stopped();
        self.reporter.report(SagaEvent::Stopped { stats: &stats });
        Ok(stats)
    }

    async fn worker(
        &self,
        worker: usize,
        queue: Queue,
        mut subscription: B::Subscription,
        stop: &CancellationToken,
    ) -> Result<(), AppError> {
        self.reporter.report(SagaEvent::WorkerStarted { worker });

        let max_receive_errors = self.config.max_receive_errors.max(1);
        let mut receive_errors = 0u32;

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = subscription.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => {
                    receive_errors = 0;
                    delivery
                }
                Some(Err(e)) => {
                    receive_errors += 1;
                    let reason = e.to_string();
                    self.reporter.report(SagaEvent::ReceiveFailed {
                        worker,
                        consecutive: receive_errors,
                        max_consecutive: max_receive_errors,
                        error: &reason,
                    });
                    if receive_errors >= max_receive_errors {
                        let e = AppError::BusError(format!(
                            "{receive_errors} consecutive receive errors, last: {reason}"
                        ));
                        self.halt(worker, &e, stop);
                        return Err(e);
                    }

                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(self.config.receive_delay(receive_errors)) => {}
                    }
                    continue;
                }
                None => {
                    let e = AppError::BusError("subscription closed by the bus".to_string());
                    self.halt(worker, &e, stop);
                    return Err(e);
                }
            };

            let handled = match queue {
                Queue::Items => self.handle(worker, delivery).await,
                Queue::Datasets => self.handle_dataset(worker, delivery).await,
            };
            if let Err(e) = handled {
                self.halt(worker, &e, stop);
                return Err(e);
            }
        }

        self.reporter.report(SagaEvent::WorkerStopped { worker });
        Ok(())
    }

    fn halt(&self, worker: usize, error: &AppError, stop: &CancellationToken) {
        let reason = error.to_string();
        self.reporter.report(SagaEvent::Halted {
            worker,
            error: &reason,
        });
        self.health.set_halted(reason);
        stop.cancel();
    }

    /// Drives one `item.vectorized` delivery to a terminal state and settles
    /// it on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal failures; the delivery is then left
    /// unacknowledged.
    pub async fn handle<D: Delivery>(
        &self,
        worker: usize,
        delivery: D,
    ) -> Result<SagaOutcome, AppError> {
        let attempt = delivery.attempt();
        self.reporter
            .report(SagaEvent::MessageReceived { worker, attempt });

        let mut machine = StateMachine::new();

        let item = match Item::from_payload(delivery.payload()) {
            Ok(item) => item,
            Err(e) => return self.settle_failure(delivery, &mut machine, None, e).await,
        };

        let published = self
            .with_heartbeat(&delivery, self.publish(&item, &mut machine))
            .await;

        match published {
            Ok((record, duplicate)) => {
                if duplicate {
                    self.stats.record_duplicate();
                    self.reporter
                        .report(SagaEvent::DuplicateSkipped { item_id: &item.id });
                } else {
                    self.stats.record_published();
                    self.reporter.report(SagaEvent::ItemPublished {
                        item_id: &item.id,
                        dataset_id: &record.dataset_id,
                        resource_id: record.resource_id.as_deref().unwrap_or_default(),
                        attempt,
                    });
                }

                if let Err(e) = delivery.ack().await {
                    // Redelivery will hit the ledger record.
                    warn!(item_id = %item.id, error = %e, "Failed to ack published item");
                }

                Ok(if duplicate {
                    SagaOutcome::AlreadyPublished(record)
                } else {
                    SagaOutcome::Published(record)
                })
            }
            Err(e) => {
                self.settle_failure(delivery, &mut machine, Some(&item.id), e)
                    .await
            }
        }
    }

    /// Drives one `dataset.publish` delivery to a terminal state and settles
    /// it on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal failures; the delivery is then left
    /// unacknowledged.
    pub async fn handle_dataset<D: Delivery>(
        &self,
        worker: usize,
        delivery: D,
    ) -> Result<SagaOutcome, AppError> {
        let attempt = delivery.attempt();
        self.reporter
            .report(SagaEvent::MessageReceived { worker, attempt });

        let mut machine = StateMachine::new();

        let event = match DatasetPublishEvent::from_payload(delivery.payload()) {
            Ok(event) => event,
            Err(e) => return self.settle_failure(delivery, &mut machine, None, e).await,
        };

        let published = self
            .with_heartbeat(&delivery, self.publish_dataset(&event, &mut machine))
            .await;

        match published {
            Ok(published) => {
                self.stats.record_dataset_published();
                self.reporter.report(SagaEvent::DatasetPublished {
                    dataset_id: &published.dataset_id,
                    dane_gov_id: &published.dane_gov_id,
                    attempt,
                });

                if let Err(e) = delivery.ack().await {
                    warn!(dataset_id = %event.dataset_id, error = %e, "Failed to ack published dataset");
                }

                Ok(SagaOutcome::DatasetPublished(published))
            }
            Err(e) => {
                self.settle_failure(delivery, &mut machine, Some(&event.dataset_id), e)
                    .await
            }
        }
    }

    /// Runs `work` while telling the bus every `heartbeat_interval` that the
    /// delivery is still being handled.
    async fn with_heartbeat<D, F>(&self, delivery: &D, work: F) -> F::Output
    where
        D: Delivery,
        F: Future,
    {
        let period = self.config.heartbeat_interval.max(MIN_HEARTBEAT);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                out = &mut work => return out,
                _ = ticker.tick() => {
                    if let Err(e) = delivery.in_progress().await {
                        debug!(error = %e, "Failed to extend delivery deadline");
                    }
                }
            }
        }
    }

    /// Formats, submits, records and announces one item.
    ///
    /// Returns the publication record and whether it was already published.
    async fn publish(
        &self,
        item: &Item,
        machine: &mut StateMachine,
    ) -> Result<(PublicationRecord, bool), AppError> {
        let request = self.formatter.format(item)?;
        let resource_request = request.resource_request().ok_or_else(|| {
            AppError::FormatError(format!("item {} produced no resource", item.id))
        })?;
        machine.advance(SagaState::Formatted);

        let token = self.credentials.get_token().await?;
        let dataset_id = self.datasets.resolve(&self.credentials).await?;

        if let Some(record) = self.existing_publication(&item.id).await {
            self.emit_completion(&record).await?;
            machine.advance(SagaState::Published);
            return Ok((record, true));
        }

        machine.advance(SagaState::Submitting);
        debug!(
            item_id = %item.id,
            dataset_id = %dataset_id,
            idempotency_key = %request.idempotency_key,
            "Submitting resource"
        );

        let portal = &self.portal;
        let target = dataset_id.as_str();
        let key = request.idempotency_key.as_str();
        let body = &resource_request;
        let resource = self
            .authorized(token, move |token: String| async move {
                portal.submit_resource(&token, target, key, body).await
            })
            .await?;

        let record = PublicationRecord {
            item_id: item.id.clone(),
            dataset_id,
            resource_id: Some(resource.id),
            resource_url: resource.url,
            published_at: Utc::now(),
        };

        self.record_publication(&record).await;
        self.emit_completion(&record).await?;
        machine.advance(SagaState::Published);
        Ok((record, false))
    }

    /// Submits one gateway dataset and announces it.
    async fn publish_dataset(
        &self,
        event: &DatasetPublishEvent,
        machine: &mut StateMachine,
    ) -> Result<DatasetPublishedEvent, AppError> {
        let request = event.to_submission()?;
        machine.advance(SagaState::Formatted);

        let token = self.credentials.get_token().await?;

        machine.advance(SagaState::Submitting);
        let idempotency_key = event.idempotency_key();
        debug!(
            dataset_id = %event.dataset_id,
            idempotency_key = %idempotency_key,
            "Submitting dataset"
        );

        let portal = &self.portal;
        let key = idempotency_key.as_str();
        let body = &request;
        let submitted = self
            .authorized(token, move |token: String| async move {
                portal.submit_dataset(&token, key, body).await
            })
            .await?;

        let published = DatasetPublishedEvent::new(&event.dataset_id, submitted, Utc::now());
        machine.advance(SagaState::Published);
        self.announce_dataset(&published).await;
        Ok(published)
    }

    /// Calls the portal with the current token; a 401 triggers exactly one
    /// refresh and one retry.
    async fn authorized<T, F, Fut>(&self, token: Credential, call: F) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        match call(token.token().to_string()).await {
            Err(AppError::Unauthorized) => {
                info!("Portal rejected token, refreshing before retry");
                let fresh = self.credentials.refresh(&token).await?;
                call(fresh.token().to_string()).await
            }
            other => other,
        }
    }

    async fn existing_publication(&self, item_id: &str) -> Option<PublicationRecord> {
        match self.ledger.find_publication(item_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(item_id, error = %e, "Ledger lookup failed, submitting anyway");
                None
            }
        }
    }

    async fn record_publication(&self, record: &PublicationRecord) {
        match self.ledger.mark_published(record).await {
            Ok(true) => debug!(item_id = %record.item_id, "Ledger marked item published"),
            Ok(false) => debug!(
                item_id = %record.item_id,
                "Ledger already had the item published or does not know it"
            ),
            Err(e) => {
                let error = e.to_string();
                self.reporter.report(SagaEvent::LedgerWriteFailed {
                    item_id: &record.item_id,
                    error: &error,
                });
            }
        }
    }

    async fn emit_completion(&self, record: &PublicationRecord) -> Result<(), AppError> {
        let payload = serde_json::to_vec(&ItemPublishedEvent::from(record))?;
        self.bus.publish(&self.routes.item_publish, payload).await
    }

    /// Best-effort `dataset.published`; the portal already holds the dataset.
    async fn announce_dataset(&self, published: &DatasetPublishedEvent) {
        let sent = match serde_json::to_vec(published) {
            Ok(payload) => self.bus.publish(&self.routes.dataset_publish, payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            let error = e.to_string();
            self.reporter.report(SagaEvent::AnnouncementFailed {
                routing_key: &self.routes.dataset_publish,
                id: &published.dataset_id,
                error: &error,
            });
        }
    }

    async fn settle_failure<D: Delivery>(
        &self,
        delivery: D,
        machine: &mut StateMachine,
        message_id: Option<&str>,
        error: AppError,
    ) -> Result<SagaOutcome, AppError> {
        let class = error.class();
        let attempt = delivery.attempt();
        let max_attempts = self.config.max_attempts;
        machine.advance(SagaState::Failed(class));

        match disposition(class, attempt, max_attempts) {
            Disposition::Halt => {
                machine.advance(SagaState::Halted);
                error!(?message_id, attempt, error = %error, "Fatal error, leaving message unacknowledged");
                Err(error)
            }
            Disposition::Requeue => {
                machine.advance(SagaState::Requeued);
                let reason = error.to_string();
                self.stats.record_requeued();
                self.reporter.report(SagaEvent::Requeued {
                    message_id,
                    attempt,
                    max_attempts,
                    error: &reason,
                });
                if let Err(e) = delivery.requeue().await {
                    warn!(?message_id, error = %e, "Failed to requeue message");
                }
                Ok(SagaOutcome::Requeued { attempt })
            }
            Disposition::Discard | Disposition::DeadLetter => {
                machine.advance(SagaState::DeadLettered);
                let reason = error.to_string();
                self.stats.record_dead_lettered();
                self.reporter.report(SagaEvent::DeadLettered {
                    message_id,
                    attempt,
                    error: &reason,
                });
                let settled = if class == ErrorClass::Permanent {
                    delivery.ack().await
                } else {
                    delivery.dead_letter().await
                };
                if let Err(e) = settled {
                    warn!(?message_id, error = %e, "Failed to settle dead-lettered message");
                }
                Ok(SagaOutcome::DeadLettered { attempt, class })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SagaState::*;
        assert!(Received.can_transition_to(Formatted));
        assert!(Formatted.can_transition_to(Submitting));
        assert!(Submitting.can_transition_to(Published));
        assert!(Formatted.can_transition_to(Published));
        assert!(Published.is_terminal());
    }

    #[test]
    fn test_failure_transitions() {
        use SagaState::*;
        assert!(Received.can_transition_to(Failed(ErrorClass::Permanent)));
        assert!(Submitting.can_transition_to(Failed(ErrorClass::Retryable)));
        assert!(Failed(ErrorClass::Retryable).can_transition_to(Requeued));
        assert!(Failed(ErrorClass::Retryable).can_transition_to(DeadLettered));
        assert!(Failed(ErrorClass::Permanent).can_transition_to(DeadLettered));
        assert!(Failed(ErrorClass::Fatal).can_transition_to(Halted));
    }

    #[test]
    fn test_illegal_transitions() {
        use SagaState::*;
        assert!(!Received.can_transition_to(Submitting));
        assert!(!Received.can_transition_to(Published));
        assert!(!Published.can_transition_to(Failed(ErrorClass::Retryable)));
        assert!(!Failed(ErrorClass::Permanent).can_transition_to(Requeued));
        assert!(!Failed(ErrorClass::Fatal).can_transition_to(Requeued));
        assert!(!Requeued.can_transition_to(Received));
        assert!(!Formatted.is_terminal());
    }

    #[test]
    fn test_disposition_bounds_retries() {
        assert_eq!(disposition(ErrorClass::Retryable, 1, 3), Disposition::Requeue);
        assert_eq!(disposition(ErrorClass::Retryable, 2, 3), Disposition::Requeue);
        assert_eq!(disposition(ErrorClass::Retryable, 3, 3), Disposition::DeadLetter);
        assert_eq!(disposition(ErrorClass::Retryable, 7, 3), Disposition::DeadLetter);
    }

    #[test]
    fn test_routes_follow_bus_config() {
        let mut bus = BusConfig::default();
        bus.dataset_publish_key = "staging.dataset.published".to_string();

        let routes = SagaRoutes::from(&bus);
        assert_eq!(routes.item_consume, "item.vectorized");
        assert_eq!(routes.item_publish, "item.published");
        assert_eq!(routes.dataset_consume, "dataset.publish");
        assert_eq!(routes.dataset_publish, "staging.dataset.published");
        assert_eq!(SagaRoutes::from(&BusConfig::default()), SagaRoutes::default());
    }

    #[test]
    fn test_disposition_ignores_attempts_for_other_classes() {
        assert_eq!(disposition(ErrorClass::Permanent, 1, 3), Disposition::Discard);
        assert_eq!(disposition(ErrorClass::Fatal, 1, 3), Disposition::Halt);
        assert_eq!(disposition(ErrorClass::Fatal, 9, 3), Disposition::Halt);
    }
}
