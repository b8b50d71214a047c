//! Registry table access: the five operations the sync engine needs, backed by Postgres or memory.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use vreg_core::JobVariant;

pub const CRATE_NAME: &str = "vreg-storage";

pub const DEFAULT_TABLE: &str = "job_variants";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid registry table name {0:?}")]
    InvalidTableName(String),
    #[error("duplicate registry row for job {job_name} variant {variant_name}")]
    DuplicateRow {
        job_name: String,
        variant_name: String,
    },
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// The remote registry table as the sync engine sees it.
///
/// Every call is a single bounded request; implementations do not retry.
/// Write operations return the number of rows affected.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Full-table read ordered by job name, then variant name.
    async fn load_rows(&self) -> Result<Vec<JobVariant>, StoreError>;

    async fn insert_rows(&self, rows: &[JobVariant]) -> Result<u64, StoreError>;

    /// Sets the value of the (job, variant) row.
    async fn update_value(&self, row: &JobVariant) -> Result<u64, StoreError>;

    /// Deletes the row matching job, variant and value.
    async fn delete_row(&self, row: &JobVariant) -> Result<u64, StoreError>;

    /// Deletes every row for a job.
    async fn delete_job(&self, job_name: &str) -> Result<u64, StoreError>;
}

/// Validated, optionally schema-qualified table identifier that is safe to splice into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTable(String);

impl RegistryTable {
    pub fn parse(name: &str) -> Result<Self, StoreError> {
        let parts = name.split('.').collect::<Vec<_>>();
        let valid = parts.len() <= 2
            && parts.iter().all(|part| {
                let mut chars = part.chars();
                matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::InvalidTableName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RegistryTable {
    fn default() -> Self {
        Self(DEFAULT_TABLE.to_string())
    }
}

impl fmt::Display for RegistryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PgRegistryStore {
    pool: PgPool,
    table: RegistryTable,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool, table: RegistryTable) -> Self {
        Self { pool, table }
    }

    pub async fn connect(database_url: &str, table: RegistryTable) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, table))
    }

    pub fn table(&self) -> &RegistryTable {
        &self.table
    }

    /// Creates the registry table if missing. The primary key doubles as the job lookup index.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                job_name      TEXT NOT NULL,
                variant_name  TEXT NOT NULL,
                variant_value TEXT NOT NULL,
                PRIMARY KEY (job_name, variant_name)
            )
            "#,
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn load_rows(&self) -> Result<Vec<JobVariant>, StoreError> {
        let sql = format!(
            r#"
            SELECT job_name, variant_name, variant_value
              FROM {}
             ORDER BY job_name, variant_name
            "#,
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(JobVariant {
                job_name: row.try_get("job_name")?,
                variant_name: row.try_get("variant_name")?,
                variant_value: row.try_get("variant_value")?,
            });
        }
        Ok(out)
    }

    async fn insert_rows(&self, rows: &[JobVariant]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (job_name, variant_name, variant_value) ",
            self.table
        ));
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.job_name.clone())
                .push_bind(row.variant_name.clone())
                .push_bind(row.variant_value.clone());
        });
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn update_value(&self, row: &JobVariant) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET variant_value = $1 WHERE job_name = $2 AND variant_name = $3",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(&row.variant_value)
            .bind(&row.job_name)
            .bind(&row.variant_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_row(&self, row: &JobVariant) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE job_name = $1 AND variant_name = $2 AND variant_value = $3",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(&row.job_name)
            .bind(&row.variant_name)
            .bind(&row.variant_value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_job(&self, job_name: &str) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {} WHERE job_name = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(job_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// In-process registry keyed by (job, variant). Used for tests and local dry runs.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    rows: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = JobVariant>) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| ((r.job_name, r.variant_name), r.variant_value))
            .collect();
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub async fn snapshot(&self) -> Vec<JobVariant> {
        self.rows
            .lock()
            .await
            .iter()
            .map(|((job, variant), value)| JobVariant::new(job, variant, value))
            .collect()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load_rows(&self) -> Result<Vec<JobVariant>, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn insert_rows(&self, rows: &[JobVariant]) -> Result<u64, StoreError> {
        let mut table = self.rows.lock().await;
        // A batch either lands whole or not at all, like a multi-row INSERT.
        let mut seen = std::collections::BTreeSet::new();
        for row in rows {
            let key = (row.job_name.clone(), row.variant_name.clone());
            if table.contains_key(&key) || !seen.insert(key) {
                return Err(StoreError::DuplicateRow {
                    job_name: row.job_name.clone(),
                    variant_name: row.variant_name.clone(),
                });
            }
        }
        for row in rows {
            table.insert(
                (row.job_name.clone(), row.variant_name.clone()),
                row.variant_value.clone(),
            );
        }
        debug!(rows = rows.len(), "memory registry insert");
        Ok(rows.len() as u64)
    }

    async fn update_value(&self, row: &JobVariant) -> Result<u64, StoreError> {
        let mut table = self.rows.lock().await;
        match table.get_mut(&(row.job_name.clone(), row.variant_name.clone())) {
            Some(value) => {
                *value = row.variant_value.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_row(&self, row: &JobVariant) -> Result<u64, StoreError> {
        let mut table = self.rows.lock().await;
        let key = (row.job_name.clone(), row.variant_name.clone());
        if table.get(&key) == Some(&row.variant_value) {
            table.remove(&key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn delete_job(&self, job_name: &str) -> Result<u64, StoreError> {
        let mut table = self.rows.lock().await;
        let before = table.len();
        table.retain(|(job, _), _| job != job_name);
        Ok((before - table.len()) as u64)
    }
}
