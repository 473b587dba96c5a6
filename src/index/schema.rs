use crate::error::{Result, SearchError};
use crate::index::Metric;
use rusqlite::{params, Connection, OptionalExtension};

pub const SCHEMA_VERSION: i32 = 1;

/// Identity of an index: fixed when the database is first created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexIdentity {
    pub dimension: usize,
    pub metric: Metric,
    pub model: String,
}

pub struct Schema;

impl Schema {
    /// Initialize database schema, or verify it matches `identity` if it already exists
    pub fn initialize(conn: &Connection, identity: &IndexIdentity) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        match Self::get_identity(conn)? {
            Some(existing) => Self::verify(&existing, identity)?,
            None => {
                conn.execute(
                    "INSERT INTO index_meta (key, value) VALUES ('dimension', ?1), ('metric', ?2), ('model', ?3)",
                    params![
                        identity.dimension.to_string(),
                        identity.metric.as_db_str(),
                        identity.model
                    ],
                )?;
            }
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS items (
                id          INTEGER PRIMARY KEY,
                item_id     TEXT NOT NULL UNIQUE,
                brand       TEXT NOT NULL,
                price       TEXT NOT NULL,
                product_url TEXT NOT NULL,
                image_url   TEXT NOT NULL,
                review      TEXT NOT NULL,
                nid         TEXT,
                seller_id   TEXT,
                updated_at  TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_brand ON items(brand COLLATE NOCASE)",
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS embeddings USING vec0(
                    item_rowid INTEGER PRIMARY KEY,
                    embedding FLOAT[{}] distance_metric=cosine
                )",
                identity.dimension
            ),
            [],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('schema_version', ?)",
            [SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    /// Whether the database holds index metadata at all
    pub fn exists(conn: &Connection) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'index_meta'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Read the stored identity, if the index was created before
    pub fn get_identity(conn: &Connection) -> Result<Option<IndexIdentity>> {
        let get = |key: &str| -> Result<Option<String>> {
            Ok(conn
                .query_row("SELECT value FROM index_meta WHERE key = ?", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        };

        let (Some(dimension), Some(metric), Some(model)) =
            (get("dimension")?, get("metric")?, get("model")?)
        else {
            return Ok(None);
        };

        let dimension = dimension
            .parse()
            .map_err(|_| SearchError::Config(format!("Corrupt stored dimension: {}", dimension)))?;
        let metric = Metric::from_db_str(&metric)
            .ok_or_else(|| SearchError::Config(format!("Unknown stored metric: {}", metric)))?;

        Ok(Some(IndexIdentity {
            dimension,
            metric,
            model,
        }))
    }

    fn verify(existing: &IndexIdentity, requested: &IndexIdentity) -> Result<()> {
        if existing.dimension != requested.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: existing.dimension,
                actual: requested.dimension,
            });
        }
        if existing.metric != requested.metric {
            return Err(SearchError::Config(format!(
                "Index was created with metric '{}', not '{}'",
                existing.metric, requested.metric
            )));
        }
        if existing.model != requested.model {
            return Err(SearchError::Config(format!(
                "Index was built with embedder '{}', not '{}'; re-ingest into a new database to switch models",
                existing.model, requested.model
            )));
        }
        Ok(())
    }

    /// Get current schema version
    pub fn get_version(conn: &Connection) -> Result<i32> {
        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}
