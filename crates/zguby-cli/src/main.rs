use std::path::Path;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use zguby_cli::{health, Command, Config, RunArgs};
use zguby_client::{NatsBus, PortalClient};
use zguby_core::{
    CategoryMap, CredentialManager, DatasetResolver, DatasetTarget, DbConfig, HealthHandle, Item,
    ItemFormatter, LoginCredentials, PublicationLedger, PublishSaga, SagaRoutes,
};
use zguby_db::LedgerRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    match config.command {
        Command::Run(args) => run(args).await,
        Command::Preview { file, category_map } => preview(&file, category_map.as_deref()),
        Command::Status {
            item_id,
            database_url,
        } => status(&database_url, &item_id).await,
    }
}

fn load_categories(path: Option<&Path>) -> anyhow::Result<CategoryMap> {
    match path {
        Some(path) => {
            let categories = CategoryMap::load(path)?;
            info!(path = %path.display(), entries = categories.len(), "Loaded category map");
            Ok(categories)
        }
        None => Ok(CategoryMap::builtin()),
    }
}

async fn connect_db(database_url: &str) -> anyhow::Result<LedgerRepository> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(DbConfig::default().max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(LedgerRepository::new(pool))
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let formatter = ItemFormatter::new(load_categories(args.category_map.as_deref())?);

    let target = args.dataset_target();
    if target == DatasetTarget::Unconfigured {
        anyhow::bail!("Set DATASET_ID or enable AUTO_CREATE_DATASET");
    }

    let ledger = connect_db(&args.database_url).await?;
    ledger
        .ensure_schema()
        .await
        .context("Failed to prepare ledger columns")?;

    let saga_config = args.saga_config();
    let bus_config = args.bus_config();
    let budget = args.handling_budget();
    if bus_config.ack_wait < budget {
        warn!(
            ack_wait_secs = bus_config.ack_wait.as_secs(),
            budget_secs = budget.as_secs(),
            "ACK_WAIT_SECS is below the worst-case handling time, relying on progress heartbeats"
        );
    }
    let bus = NatsBus::connect(&bus_config, saga_config.requeue_delay)
        .await
        .context("Failed to connect to message bus")?;

    let portal =
        PortalClient::new(&args.portal_url, &args.http_config()).context("Invalid portal URL")?;
    let credentials = CredentialManager::new(
        portal.clone(),
        LoginCredentials::new(args.email.as_str(), args.password.as_str()),
        args.auth_config(),
    );
    let datasets = DatasetResolver::new(portal.clone(), target);

    let health = HealthHandle::new();
    let saga = PublishSaga::new(
        portal,
        ledger,
        bus,
        credentials,
        datasets,
        formatter,
        saga_config,
    )
    .with_health(health.clone())
    .with_routes(SagaRoutes::from(&bus_config));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    let health_server = tokio::spawn(health::serve(
        args.health_addr,
        health,
        shutdown.clone(),
    ));

    info!(portal = %args.portal_url, "Starting publisher");
    let result = saga.run(shutdown.clone()).await;

    if let Err(e) = &result {
        // Keep answering 503 so the supervisor sees the halt.
        error!(error = %e, "Publisher halted, waiting for shutdown signal");
        shutdown.cancelled().await;
    }
    shutdown.cancel();

    match health_server.await {
        Ok(Err(e)) => warn!(error = %e, "Health endpoint failed"),
        Err(e) => warn!(error = %e, "Health endpoint task panicked"),
        Ok(Ok(())) => {}
    }

    let stats = result.context("Publisher halted")?;
    info!(
        published = stats.published,
        datasets_published = stats.datasets_published,
        duplicates = stats.duplicates,
        requeued = stats.requeued,
        dead_lettered = stats.dead_lettered,
        "Publisher exited cleanly"
    );
    Ok(())
}

fn preview(file: &Path, category_map: Option<&Path>) -> anyhow::Result<()> {
    let formatter = ItemFormatter::new(load_categories(category_map)?);

    let payload = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let item = Item::from_payload(&payload)?;

    let classification = formatter.categories().classify(&item.category);
    if !classification.is_mapped() {
        warn!(category = %item.category, "Category not in table, using fallback");
    }

    let request = formatter.format(&item)?;
    println!("{}", serde_json::to_string_pretty(&request)?);
    if let Some(resource) = request.resource_request() {
        println!("{}", serde_json::to_string_pretty(&resource)?);
    }
    Ok(())
}

async fn status(database_url: &str, item_id: &str) -> anyhow::Result<()> {
    let ledger = connect_db(database_url).await?;

    let Some(flags) = ledger.processing_flags(item_id).await? else {
        println!("\nItem {} not found in ledger\n", item_id);
        return Ok(());
    };

    println!("\nItem {}\n", item_id);
    println!("  Embedded:              {}", mark(flags.embedded));
    println!("  Indexed:               {}", mark(flags.indexed));
    println!("  Published:             {}", mark(flags.published));

    if let Some(record) = ledger.find_publication(item_id).await? {
        println!("  Dataset:               {}", record.dataset_id);
        if let Some(resource_id) = &record.resource_id {
            println!("  Resource:              {}", resource_id);
        }
        if let Some(url) = &record.resource_url {
            println!("  URL:                   {}", url);
        }
        println!("  Published at:          {}", record.published_at);
    }
    println!();

    Ok(())
}

fn mark(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, finishing in-flight messages");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark() {
        assert_eq!(mark(true), "yes");
        assert_eq!(mark(false), "no");
    }

    #[test]
    fn test_builtin_categories_without_path() {
        let categories = load_categories(None).unwrap();
        assert!(categories.classify("Elektronika").is_mapped());
    }

    #[test]
    fn test_missing_category_file_fails() {
        let result = load_categories(Some(Path::new("/nonexistent/categories.toml")));
        assert!(result.is_err());
    }
}
