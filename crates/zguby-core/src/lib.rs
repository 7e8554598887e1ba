//! Zguby Core - publication saga, domain types, and configuration.
//!
//! Takes found items announced on `item.vectorized`, publishes each as an
//! image resource on the open-data portal, and announces the result on
//! `item.published`. External systems are reached through the traits in
//! [`traits`]; `zguby-client` and `zguby-db` provide the production
//! implementations.

pub mod config;
pub mod credentials;
pub mod dataset;
pub mod error;
pub mod formatter;
pub mod health;
pub mod models;
pub mod progress;
pub mod saga;
pub mod traits;

pub use config::{
    AuthConfig, BusConfig, DatasetSpec, DatasetTarget, DbConfig, HttpConfig, SagaConfig,
};
pub use credentials::{Credential, CredentialManager, LoginCredentials};
pub use dataset::DatasetResolver;
pub use error::{AppError, ErrorClass};
pub use formatter::{CategoryMap, Classification, ItemFormatter};
pub use health::{HealthHandle, HealthStatus};
pub use models::{
    DatasetPublishEvent, DatasetPublishedEvent, Item, ItemPublishedEvent, ProcessingFlags,
    PublicationRecord, PublicationRequest, DATASET_PUBLISH, DATASET_PUBLISHED, ITEM_PUBLISHED,
    ITEM_VECTORIZED,
};
pub use progress::{SagaEvent, SagaReporter, SagaStats, SilentReporter, TracingReporter};
pub use saga::{PublishSaga, SagaOutcome, SagaRoutes, SagaState};
pub use traits::{Delivery, MessageBus, PortalApi, PublicationLedger, Subscription};
