//! PostgreSQL-backed store.

use super::{Store, StoreError, StoreResult};
use crate::models::{Agency, Backup, MonthlyRecord, PackageRecord};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;
use tracing::{debug, info};

const MONTHLY_COLUMNS: &str =
    "agency_id, year, month, package_url, package_hash, package_size";

/// Connection parameters for [`PostgresStore`].
#[derive(Debug, Clone)]
pub struct PostgresParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

/// Store backed by the disclosure PostgreSQL database.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using individual parameters.
    pub async fn connect(params: &PostgresParams) -> StoreResult<Self> {
        info!(
            host = %params.host,
            port = params.port,
            database = %params.database,
            user = %params.user,
            "Connecting to PostgreSQL"
        );

        let opts = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);

        let pool = PgPoolOptions::new()
            .max_connections(params.max_connections)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn monthly_from_row(row: &PgRow) -> StoreResult<MonthlyRecord> {
    let month: i32 = row.try_get("month")?;
    let month = u32::try_from(month)
        .map_err(|_| StoreError::Decode(format!("negative month {}", month)))?;

    let url: Option<String> = row.try_get("package_url")?;
    let package = match url {
        Some(url) => Some(Backup {
            url,
            hash: row
                .try_get::<Option<String>, _>("package_hash")?
                .unwrap_or_default(),
            size: row
                .try_get::<Option<i64>, _>("package_size")?
                .unwrap_or_default(),
        }),
        None => None,
    };

    Ok(MonthlyRecord {
        agency_id: row.try_get("agency_id")?,
        year: row.try_get("year")?,
        month,
        package,
    })
}

fn agency_from_row(row: &PgRow) -> StoreResult<Agency> {
    Ok(Agency {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        agency_type: row.try_get("type")?,
        entity: row.try_get("entity")?,
        uf: row.try_get("uf")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_monthly_info(
        &self,
        agency_ids: &[String],
        year: i32,
    ) -> StoreResult<HashMap<String, Vec<MonthlyRecord>>> {
        let sql = format!(
            "SELECT {} FROM monthly_info \
             WHERE agency_id = ANY($1) AND year = $2 AND current \
             ORDER BY agency_id, year, month",
            MONTHLY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(agency_ids)
            .bind(year)
            .fetch_all(&self.pool)
            .await?;
        debug!("Fetched {} monthly rows for {} agencies", rows.len(), agency_ids.len());

        let mut by_agency: HashMap<String, Vec<MonthlyRecord>> = HashMap::new();
        for row in &rows {
            let record = monthly_from_row(row)?;
            by_agency
                .entry(record.agency_id.clone())
                .or_default()
                .push(record);
        }
        Ok(by_agency)
    }

    async fn get_agency_history(&self, agency_id: &str) -> StoreResult<Vec<MonthlyRecord>> {
        let sql = format!(
            "SELECT {} FROM monthly_info \
             WHERE agency_id = $1 AND current \
             ORDER BY year, month",
            MONTHLY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(agency_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(monthly_from_row).collect()
    }

    async fn get_all_agencies(&self) -> StoreResult<Vec<Agency>> {
        let rows = sqlx::query("SELECT id, name, type, entity, uf FROM agencies ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(agency_from_row).collect()
    }

    async fn get_agency(&self, id: &str) -> StoreResult<Agency> {
        let row = sqlx::query("SELECT id, name, type, entity, uf FROM agencies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("agency {}", id)))?;
        agency_from_row(&row)
    }

    async fn get_ope(&self, group: &str, year: i32) -> StoreResult<Vec<Agency>> {
        let rows = sqlx::query(
            "SELECT a.id, a.name, a.type, a.entity, a.uf \
             FROM agencies a JOIN agency_groups g ON g.agency_id = a.id \
             WHERE g.group_id = $1 AND g.year = $2 \
             ORDER BY a.id",
        )
        .bind(group)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(agency_from_row).collect()
    }

    async fn store_package(&self, record: &PackageRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO packages (agency_id, year, group_id, url, hash, size, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.agency_id.as_deref())
        .bind(record.year)
        .bind(record.group.as_deref())
        .bind(&record.package.url)
        .bind(&record.package.hash)
        .bind(record.package.size)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
