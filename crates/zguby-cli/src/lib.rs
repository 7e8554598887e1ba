//! Zguby CLI - configuration and health endpoint of the `zguby` binary.

pub mod health;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use zguby_core::config::handling_budget;
use zguby_core::{AuthConfig, BusConfig, DatasetSpec, DatasetTarget, HttpConfig, SagaConfig};

/// Shortest progress heartbeat sent for an in-flight delivery.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Publishes found items to the open-data portal.
#[derive(Parser, Debug)]
#[command(name = "zguby", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume item.vectorized and dataset.publish and publish on the portal
    Run(RunArgs),
    /// Print the publication request for an event file without any network call
    Preview {
        /// Path to an item.vectorized message body
        #[arg(long)]
        file: PathBuf,
        /// TOML category table replacing the built-in one
        #[arg(long, env = "CATEGORY_MAP")]
        category_map: Option<PathBuf>,
    },
    /// Show the ledger flags and publication record of an item
    Status {
        item_id: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Base URL of the portal API, including any path prefix
    #[arg(long, env = "DANE_GOV_API_URL", default_value = "http://localhost:8000")]
    pub portal_url: String,

    #[arg(long, env = "DANE_GOV_EMAIL")]
    pub email: String,

    #[arg(long, env = "DANE_GOV_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Existing dataset receiving the resources
    #[arg(long, env = "DATASET_ID")]
    pub dataset_id: Option<String>,

    /// Create the dataset on startup when no DATASET_ID is set
    #[arg(long, env = "AUTO_CREATE_DATASET")]
    pub auto_create_dataset: bool,

    #[arg(
        long,
        env = "PUBLISHER_NAME",
        default_value = "Urząd Miasta - System Rzeczy Znalezionych"
    )]
    pub publisher_name: String,

    /// Portal organization owning an auto-created dataset
    #[arg(long, env = "PUBLISHER_ID")]
    pub publisher_id: Option<String>,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// TOML category table replacing the built-in one
    #[arg(long, env = "CATEGORY_MAP")]
    pub category_map: Option<PathBuf>,

    #[arg(long, env = "PUBLISHER_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Workers forwarding gateway datasets; 0 leaves dataset.publish unconsumed
    #[arg(long, env = "DATASET_WORKERS", default_value_t = 1)]
    pub dataset_workers: usize,

    /// Deliveries per message before a retryable failure is dead-lettered
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "REQUEUE_DELAY_SECS", default_value_t = 5)]
    pub requeue_delay_secs: u64,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Token lifetime assumed when the login response carries none
    #[arg(long, env = "TOKEN_TTL_SECS")]
    pub token_ttl_secs: Option<u64>,

    /// Seconds the bus waits for a settlement before redelivering; defaults
    /// to the worst-case handling time of one message
    #[arg(long, env = "ACK_WAIT_SECS")]
    pub ack_wait_secs: Option<u64>,

    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    pub health_addr: SocketAddr,
}

impl RunArgs {
    pub fn dataset_target(&self) -> DatasetTarget {
        let auto_create = self.auto_create_dataset.then(|| DatasetSpec {
            title: format!("Rzeczy znalezione - {}", self.publisher_name),
            organization_id: self.publisher_id.clone(),
            ..DatasetSpec::default()
        });
        DatasetTarget::from_settings(self.dataset_id.as_deref(), auto_create)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            workers: self.workers.max(1),
            dataset_workers: self.dataset_workers,
            max_attempts: self.max_attempts.max(1),
            requeue_delay: Duration::from_secs(self.requeue_delay_secs),
            heartbeat_interval: (self.ack_wait() / 4).max(MIN_HEARTBEAT),
            ..SagaConfig::default()
        }
    }

    /// Worst-case time to handle one delivery with the configured timeouts.
    pub fn handling_budget(&self) -> Duration {
        handling_budget(&self.http_config(), &self.auth_config())
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.handling_budget())
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            url: self.nats_url.clone(),
            ack_wait: self.ack_wait(),
            ..BusConfig::default()
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            ..HttpConfig::default()
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            token_ttl: self.token_ttl_secs.map(Duration::from_secs),
            ..AuthConfig::default()
        }
    }
}
