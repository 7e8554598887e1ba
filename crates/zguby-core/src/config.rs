use std::time::Duration;

use crate::models::{
    DatasetAttributes, DatasetRequest, JsonApiData, DATASET_PUBLISH, DATASET_PUBLISHED,
    ITEM_CREATED, ITEM_PUBLISHED, ITEM_VECTORIZED,
};

/// Database connection pool configuration.
pub struct DbConfig {
    /// Upper bound of pooled connections
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for portal calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout, connect included
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "zguby-publisher/0.1".to_string(),
        }
    }
}

/// Login and token lifetime policy.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Consecutive login failures tolerated before giving up with `AuthError`.
    pub max_login_attempts: u32,
    /// Wait after the first failed login; doubled after each further failure.
    pub retry_base_delay: Duration,
    /// Lifetime assumed for tokens whose login response carries no expiry.
    pub token_ttl: Option<Duration>,
    /// Tokens are refreshed this long before they expire.
    pub expiry_margin: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            token_ttl: None,
            expiry_margin: Duration::from_secs(30),
        }
    }
}

impl AuthConfig {
    /// Longest time one full round of failing logins can take.
    pub fn login_budget(&self, http: &HttpConfig) -> Duration {
        let attempts = self.max_login_attempts.max(1);
        let backoff = self
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempts - 1).saturating_sub(1));
        http.timeout.saturating_mul(attempts).saturating_add(backoff)
    }
}

/// Slack added to [`handling_budget`] for ledger and bus round trips.
pub const HANDLING_SLACK: Duration = Duration::from_secs(30);

/// Worst-case time to handle one delivery.
///
/// Covers a login on a stale token, a submission rejected with 401, the
/// refresh, and the resubmission. The bus must not redeliver a message
/// before this much time has passed.
pub fn handling_budget(http: &HttpConfig, auth: &AuthConfig) -> Duration {
    let logins = auth.login_budget(http).saturating_mul(2);
    let submissions = http.timeout.saturating_mul(2);
    logins
        .saturating_add(submissions)
        .saturating_add(HANDLING_SLACK)
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Number of worker routines draining `item.vectorized`.
    pub workers: usize,
    /// Number of worker routines draining `dataset.publish`; 0 disables them.
    pub dataset_workers: usize,
    /// Deliveries allowed per message before a retryable failure is dead-lettered.
    pub max_attempts: u32,
    /// Delay the bus applies before redelivering a requeued message.
    pub requeue_delay: Duration,
    /// How often an in-flight delivery tells the bus it is still being worked on.
    pub heartbeat_interval: Duration,
    /// Consecutive receive errors tolerated before the consumer halts.
    pub max_receive_errors: u32,
    /// Wait after the first receive error; doubled after each further one.
    pub receive_backoff: Duration,
}

/// Longest wait between two receive attempts.
pub const MAX_RECEIVE_BACKOFF: Duration = Duration::from_secs(30);

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            dataset_workers: 1,
            max_attempts: 3,
            requeue_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            max_receive_errors: 10,
            receive_backoff: Duration::from_millis(500),
        }
    }
}

impl SagaConfig {
    /// Backoff before the next receive after `consecutive` failures.
    pub fn receive_delay(&self, consecutive: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive.saturating_sub(1));
        self.receive_backoff
            .saturating_mul(factor)
            .min(MAX_RECEIVE_BACKOFF)
    }
}

/// Message bus topology.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// NATS server URL
    pub url: String,
    /// JetStream stream carrying every pipeline subject
    pub stream: String,
    /// Subjects bound to the stream
    pub subjects: Vec<String>,
    /// Durable consumer of `consume_key`
    pub durable_name: String,
    /// Subject the item saga consumes
    pub consume_key: String,
    /// Subject of the item completion event
    pub publish_key: String,
    /// Durable consumer of `dataset_consume_key`
    pub dataset_durable_name: String,
    /// Subject of dataset publication requests
    pub dataset_consume_key: String,
    /// Subject of the dataset completion event
    pub dataset_publish_key: String,
    /// Time the server waits for a settlement before redelivering.
    ///
    /// Keep it above [`handling_budget`]; in-flight deliveries also send
    /// progress heartbeats.
    pub ack_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "LOST_FOUND_EVENTS".to_string(),
            subjects: [
                ITEM_CREATED,
                ITEM_VECTORIZED,
                ITEM_PUBLISHED,
                DATASET_PUBLISH,
                DATASET_PUBLISHED,
            ]
            .map(String::from)
            .to_vec(),
            durable_name: "publisher".to_string(),
            consume_key: ITEM_VECTORIZED.to_string(),
            publish_key: ITEM_PUBLISHED.to_string(),
            dataset_durable_name: "publisher-datasets".to_string(),
            dataset_consume_key: DATASET_PUBLISH.to_string(),
            dataset_publish_key: DATASET_PUBLISHED.to_string(),
            ack_wait: handling_budget(&HttpConfig::default(), &AuthConfig::default()),
        }
    }
}

impl BusConfig {
    /// `(durable name, subject)` of every queue the publisher consumes.
    pub fn queues(&self) -> [(&str, &str); 2] {
        [
            (self.durable_name.as_str(), self.consume_key.as_str()),
            (
                self.dataset_durable_name.as_str(),
                self.dataset_consume_key.as_str(),
            ),
        ]
    }
}

/// Metadata of the dataset created when auto-create is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub title: String,
    /// Dataset description
    pub notes: String,
    /// Portal category
    pub category: String,
    pub tags: Vec<String>,
    /// Portal organization owning the dataset
    pub organization_id: Option<String>,
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self {
            title: "Rzeczy znalezione".to_string(),
            notes: "Rejestr rzeczy znalezionych przekazanych do biura rzeczy znalezionych."
                .to_string(),
            category: "society".to_string(),
            tags: vec!["rzeczy znalezione".to_string(), "lost and found".to_string()],
            organization_id: None,
        }
    }
}

impl DatasetSpec {
    pub fn to_request(&self) -> DatasetRequest {
        DatasetRequest {
            data: JsonApiData {
                kind: "dataset".to_string(),
                attributes: DatasetAttributes {
                    title: self.title.clone(),
                    notes: self.notes.clone(),
                    category: self.category.clone(),
                    status: "published".to_string(),
                    visibility: "public".to_string(),
                    update_frequency: "onDemand".to_string(),
                    tags: self.tags.clone(),
                    license: "cc-zero".to_string(),
                    organization_id: self.organization_id.clone(),
                },
            },
        }
    }
}

/// Where publications go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetTarget {
    /// An existing dataset id
    Static(String),
    /// Create the dataset once at startup
    AutoCreate(DatasetSpec),
    /// Neither was configured; startup fails
    Unconfigured,
}

impl DatasetTarget {
    /// Static id wins over auto-create; neither yields `Unconfigured`.
    pub fn from_settings(dataset_id: Option<&str>, auto_create: Option<DatasetSpec>) -> Self {
        match (dataset_id.map(str::trim).filter(|id| !id.is_empty()), auto_create) {
            (Some(id), _) => DatasetTarget::Static(id.to_string()),
            (None, Some(spec)) => DatasetTarget::AutoCreate(spec),
            (None, None) => DatasetTarget::Unconfigured,
        }
    }
}
