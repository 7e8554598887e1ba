use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;

use zguby_core::models::{ProcessingFlags, PublicationRecord};
use zguby_core::{AppError, PublicationLedger};

/// Columns owned by the publisher on the intake table. Each statement is
/// idempotent so startup can run it against any schema version.
const ENSURE_SCHEMA: &str = r#"
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS processed_by_clip BOOLEAN DEFAULT FALSE;
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS processed_by_qdrant BOOLEAN DEFAULT FALSE;
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS published_on_dane_gov BOOLEAN DEFAULT FALSE;
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS dane_gov_dataset_id TEXT;
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS dane_gov_resource_id TEXT;
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS dane_gov_url TEXT;
ALTER TABLE lost_items ADD COLUMN IF NOT EXISTS published_at TIMESTAMPTZ;
"#;

/// Ledger over the intake service's `lost_items` table.
///
/// The table itself belongs to the intake service; this repository only
/// reads the processing flags and writes the publication columns.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use zguby_db::LedgerRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/zguby")
///     .await?;
///
/// let ledger = LedgerRepository::new(pool);
/// ledger.ensure_schema().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LedgerRepository {
    pool: Pool<Postgres>,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Adds the flag and publication columns if they are missing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DatabaseError` if `lost_items` does not exist or
    /// the statements fail.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::raw_sql(ENSURE_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        debug!("Ledger columns present");
        Ok(())
    }

    /// Reads the three pipeline flags of an item.
    ///
    /// Returns `None` when the item is unknown to the ledger.
    pub async fn processing_flags(
        &self,
        item_id: &str,
    ) -> Result<Option<ProcessingFlags>, AppError> {
        let row: Option<FlagsRow> = sqlx::query_as(
            r#"
            SELECT
                processed_by_clip,
                processed_by_qdrant,
                published_on_dane_gov
            FROM lost_items
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(row.map(FlagsRow::into_flags))
    }
}

impl PublicationLedger for LedgerRepository {
    async fn find_publication(
        &self,
        item_id: &str,
    ) -> Result<Option<PublicationRecord>, AppError> {
        let row: Option<PublicationRow> = sqlx::query_as(
            r#"
            SELECT
                id,
                COALESCE(dane_gov_dataset_id, '') AS dataset_id,
                dane_gov_resource_id AS resource_id,
                dane_gov_url AS resource_url,
                COALESCE(published_at, NOW()) AS published_at
            FROM lost_items
            WHERE id = $1 AND published_on_dane_gov IS TRUE
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(row.map(PublicationRow::into_record))
    }

    /// The `published_on_dane_gov IS NOT TRUE` guard makes this a one-way
    /// transition: a second call leaves the first record untouched.
    async fn mark_published(&self, record: &PublicationRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE lost_items
            SET published_on_dane_gov = TRUE,
                dane_gov_dataset_id = $2,
                dane_gov_resource_id = $3,
                dane_gov_url = $4,
                published_at = $5
            WHERE id = $1 AND published_on_dane_gov IS NOT TRUE
            "#,
        )
        .bind(&record.item_id)
        .bind(&record.dataset_id)
        .bind(&record.resource_id)
        .bind(&record.resource_url)
        .bind(record.published_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct FlagsRow {
    processed_by_clip: Option<bool>,
    processed_by_qdrant: Option<bool>,
    published_on_dane_gov: Option<bool>,
}

impl FlagsRow {
    /// NULL flags predate the column default and count as unset.
    fn into_flags(self) -> ProcessingFlags {
        ProcessingFlags {
            embedded: self.processed_by_clip.unwrap_or(false),
            indexed: self.processed_by_qdrant.unwrap_or(false),
            published: self.published_on_dane_gov.unwrap_or(false),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PublicationRow {
    id: String,
    dataset_id: String,
    resource_id: Option<String>,
    resource_url: Option<String>,
    published_at: DateTime<Utc>,
}

impl PublicationRow {
    fn into_record(self) -> PublicationRecord {
        PublicationRecord {
            item_id: self.id,
            dataset_id: self.dataset_id,
            resource_id: self.resource_id,
            resource_url: self.resource_url,
            published_at: self.published_at,
        }
    }
}
