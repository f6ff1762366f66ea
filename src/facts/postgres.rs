use super::{CatalogSnapshot, ExistingIndex, ParamType, ParameterInfo};
use crate::config::DbConfig;
use snafu::{ResultExt, Snafu};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, Row};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
pub enum CatalogError {
    #[snafu(display("Failed to connect to database: {}", source))]
    ConnectionError { source: sqlx::Error },

    #[snafu(display("Failed to execute query: {}", query))]
    QueryError { query: String, source: sqlx::Error },
}

type Result<T, E = CatalogError> = std::result::Result<T, E>;

const TABLES_QUERY: &str = r#"
    SELECT
        c.relname::text AS table_name,
        array_agg(a.attname::text ORDER BY a.attnum) AS columns
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname = current_schema()
    GROUP BY c.relname
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        idx.relname::text AS index_name,
        c.relname::text AS table_name,
        am.amname::text AS access_method,
        array_agg(a.attname::text ORDER BY arr.ord) AS columns
    FROM pg_index i
    JOIN pg_class c ON c.oid = i.indrelid
    JOIN pg_class idx ON idx.oid = i.indexrelid
    JOIN pg_am am ON am.oid = idx.relam
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS arr(attnum, ord)
        ON arr.attnum > 0
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = arr.attnum
    WHERE n.nspname = current_schema()
    GROUP BY idx.relname, c.relname, am.amname
    ORDER BY c.relname, idx.relname
"#;

const SETTINGS_QUERY: &str = r#"
    SELECT
        name,
        setting,
        unit,
        vartype,
        min_val,
        max_val,
        enumvals,
        context,
        boot_val
    FROM pg_settings
    ORDER BY name
"#;

/// Live source of catalog facts.
pub struct PgCatalog {
    pool: Pool<Postgres>,
}

impl PgCatalog {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        info!(
            "Connecting to PostgreSQL at {}:{}",
            config.host, config.port
        );

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&config.connection_string())
            .await
            .context(ConnectionSnafu)?;

        info!("Successfully connected to database: {}", config.database);

        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Runs `ANALYZE` so planner statistics are current before the snapshot.
    pub async fn refresh_stats(&self) -> Result<()> {
        let query = "ANALYZE";
        sqlx::query(query)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query })?;
        Ok(())
    }

    pub async fn fetch_snapshot(&self) -> Result<CatalogSnapshot> {
        let snapshot = CatalogSnapshot {
            tables: self.fetch_tables().await?,
            indexes: self.fetch_indexes().await?,
            parameters: self.fetch_parameters().await?,
        };

        debug!(
            "Fetched {} tables, {} indexes, {} parameters",
            snapshot.tables.len(),
            snapshot.indexes.len(),
            snapshot.parameters.len()
        );
        Ok(snapshot)
    }

    async fn fetch_tables(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let rows = sqlx::query(TABLES_QUERY)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu {
                query: TABLES_QUERY,
            })?;

        let mut tables = BTreeMap::new();
        for row in rows {
            let table: String = row.get("table_name");
            let columns: Vec<String> = row.get("columns");
            tables.insert(table, columns);
        }
        Ok(tables)
    }

    async fn fetch_indexes(&self) -> Result<Vec<ExistingIndex>> {
        let rows = sqlx::query(INDEXES_QUERY)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu {
                query: INDEXES_QUERY,
            })?;

        let indexes = rows
            .into_iter()
            .map(|row| ExistingIndex {
                name: row.get("index_name"),
                table: row.get("table_name"),
                columns: row.get("columns"),
                access_method: row.get("access_method"),
            })
            .collect();
        Ok(indexes)
    }

    async fn fetch_parameters(&self) -> Result<BTreeMap<String, ParameterInfo>> {
        let rows = sqlx::query(SETTINGS_QUERY)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu {
                query: SETTINGS_QUERY,
            })?;

        let mut params = BTreeMap::new();
        for row in rows {
            let name: String = row.get("name");
            let vartype: String = row.get("vartype");
            let Some(vartype) = ParamType::from_vartype(&vartype) else {
                warn!("Skipping parameter {name} with unknown type {vartype}");
                continue;
            };
            let min_val: Option<String> = row.get("min_val");
            let max_val: Option<String> = row.get("max_val");
            let enumvals: Option<Vec<String>> = row.get("enumvals");

            let param = ParameterInfo {
                name: name.clone(),
                vartype,
                current_value: row.get("setting"),
                unit: row.get("unit"),
                min_val: min_val.and_then(|v| v.parse().ok()),
                max_val: max_val.and_then(|v| v.parse().ok()),
                enumvals: enumvals.unwrap_or_default(),
                default_value: row.get("boot_val"),
                context: row.get("context"),
            };
            params.insert(name, param);
        }
        Ok(params)
    }
}
