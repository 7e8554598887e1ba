//! Trait definitions for external collaborators.
//!
//! The saga talks to three things it does not own: the open-data portal,
//! the intake ledger, and the message bus. Each sits behind a trait so the
//! core logic can be driven by in-memory mocks in tests and by the
//! `zguby-client` / `zguby-db` implementations in production.
//!
//! # Example
//!
//! ```ignore
//! use zguby_core::traits::{PortalApi, PublicationLedger};
//!
//! async fn already_published<L: PublicationLedger>(ledger: &L, id: &str) -> bool {
//!     matches!(ledger.find_publication(id).await, Ok(Some(_)))
//! }
//! ```

use std::future::Future;

use crate::credentials::{Credential, LoginCredentials};
use crate::models::{
    DatasetRequest, DatasetSubmissionRequest, PublicationRecord, ResourceRequest,
    SubmittedDataset, SubmittedResource,
};
use crate::AppError;

/// Client for the open-data portal API.
///
/// Non-success statuses must be reported through [`AppError::from_status`]
/// so that a 401 surfaces as [`AppError::Unauthorized`].
pub trait PortalApi: Send + Sync + Clone {
    /// `POST /auth/login`.
    ///
    /// # Arguments
    ///
    /// * `credentials` - Account email and password
    ///
    /// # Returns
    ///
    /// The bearer token, with its expiry when the portal reports one.
    fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> impl Future<Output = Result<Credential, AppError>> + Send;

    /// `POST /api/datasets` for the publisher's own dataset.
    ///
    /// # Arguments
    ///
    /// * `token` - Bearer token
    /// * `request` - Dataset metadata
    ///
    /// # Returns
    ///
    /// The id of the new dataset.
    fn create_dataset(
        &self,
        token: &str,
        request: &DatasetRequest,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// `POST /api/datasets/{dataset_id}/resources`.
    ///
    /// # Arguments
    ///
    /// * `token` - Bearer token
    /// * `dataset_id` - Dataset receiving the resource
    /// * `idempotency_key` - Stable per-item key, forwarded so the portal can
    ///   collapse duplicate submissions where it supports that.
    /// * `request` - The formatted resource
    fn submit_resource(
        &self,
        token: &str,
        dataset_id: &str,
        idempotency_key: &str,
        request: &ResourceRequest,
    ) -> impl Future<Output = Result<SubmittedResource, AppError>> + Send;

    /// `POST /api/datasets` with a `dataset-submission` from the gateway.
    ///
    /// # Arguments
    ///
    /// * `token` - Bearer token
    /// * `idempotency_key` - Stable per-dataset key
    /// * `request` - The submission body
    fn submit_dataset(
        &self,
        token: &str,
        idempotency_key: &str,
        request: &DatasetSubmissionRequest,
    ) -> impl Future<Output = Result<SubmittedDataset, AppError>> + Send;
}

/// Bookkeeping owned by the intake service.
///
/// Writes are best-effort from the saga's point of view: failures are logged,
/// never turned into message failures.
pub trait PublicationLedger: Send + Sync + Clone {
    /// Returns the publication record if the item is already published.
    ///
    /// # Arguments
    ///
    /// * `item_id` - Intake id of the item
    fn find_publication(
        &self,
        item_id: &str,
    ) -> impl Future<Output = Result<Option<PublicationRecord>, AppError>> + Send;

    /// Sets `published = true` together with the resource reference.
    ///
    /// # Arguments
    ///
    /// * `record` - The confirmed submission
    ///
    /// # Returns
    ///
    /// `true` only for the call that performed the transition.
    fn mark_published(
        &self,
        record: &PublicationRecord,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Durable topic bus carrying the pipeline events.
pub trait MessageBus: Send + Sync + Clone {
    type Subscription: Subscription;

    /// Opens one consumer stream on the durable queue bound to `subject`.
    ///
    /// Each worker routine owns its own subscription.
    ///
    /// # Arguments
    ///
    /// * `subject` - Routing key the queue is bound to, e.g. `item.vectorized`
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` when no queue is bound to `subject`.
    fn subscribe(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<Self::Subscription, AppError>> + Send;

    /// Publishes a persistent message and waits for the bus to confirm it.
    ///
    /// # Arguments
    ///
    /// * `routing_key` - Subject of the message
    /// * `payload` - JSON body
    fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A stream of deliveries from the durable queue.
pub trait Subscription: Send {
    type Delivery: Delivery;

    /// Waits for the next delivery. `None` means the stream has ended.
    fn next_delivery(
        &mut self,
    ) -> impl Future<Output = Option<Result<Self::Delivery, AppError>>> + Send;
}

/// One delivery of a message, settled exactly once.
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// 1-based delivery count of this message, including this delivery.
    fn attempt(&self) -> u32;

    /// Resets the bus redelivery timer while the message is being handled.
    fn in_progress(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Positive acknowledgement: the message is done.
    fn ack(self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Negative acknowledgement with redelivery.
    fn requeue(self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Terminal disposal: the message is never redelivered.
    fn dead_letter(self) -> impl Future<Output = Result<(), AppError>> + Send;
}
