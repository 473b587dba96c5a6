use crate::error::{Result, SearchError};
use crate::index::schema::{IndexIdentity, Schema};
use crate::index::{
    check_dimension, check_finite, check_top_k, ItemMetadata, Metric, Neighbor, VectorIndex,
};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Once;
use tracing::{debug, info};

/// Largest `k` sqlite-vec accepts for a KNN query
const MAX_KNN: usize = 4096;

static REGISTER_VEC: Once = Once::new();

/// Register sqlite-vec for all connections opened afterwards
pub fn register_sqlite_vec() {
    REGISTER_VEC.call_once(|| unsafe {
        use rusqlite::ffi::sqlite3_auto_extension;
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    });
}

/// Summary of a persisted index
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub entries: usize,
    pub dimension: usize,
    pub metric: Metric,
    pub model: String,
    pub schema_version: i32,
    pub last_updated: Option<String>,
}

/// Persistent index backed by SQLite and a sqlite-vec `vec0` table.
///
/// Metadata lives in `items`, vectors in `embeddings` keyed by the item rowid.
/// A single connection behind a mutex serializes upserts against queries, so a
/// query never pairs a vector with metadata from a different upsert.
pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
    identity: IndexIdentity,
}

impl SqliteVecIndex {
    /// Open (or create) an index database
    pub fn open<P: AsRef<Path>>(
        db_path: P,
        dimension: usize,
        metric: Metric,
        model: &str,
    ) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open(db_path.as_ref()).map_err(|e| {
            SearchError::BackendUnavailable(format!(
                "Failed to open index database {}: {}",
                db_path.as_ref().display(),
                e
            ))
        })?;
        Self::with_connection(conn, dimension, metric, model)
    }

    /// Open an index created earlier, taking dimension, metric and model from
    /// the database instead of from an embedder
    pub fn open_existing<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.is_file() {
            return Err(SearchError::Config(format!(
                "No index database at {}",
                path.display()
            )));
        }

        register_sqlite_vec();
        let conn = Connection::open(path).map_err(|e| {
            SearchError::BackendUnavailable(format!(
                "Failed to open index database {}: {}",
                path.display(),
                e
            ))
        })?;

        let identity = if Schema::exists(&conn)? {
            Schema::get_identity(&conn)?
        } else {
            None
        };
        let identity = identity.ok_or_else(|| {
            SearchError::Config(format!("{} is not a product index", path.display()))
        })?;
        Self::with_connection(conn, identity.dimension, identity.metric, &identity.model)
    }

    /// In-memory index, mostly for tests
    pub fn open_in_memory(dimension: usize, metric: Metric, model: &str) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open_in_memory()
            .map_err(|e| SearchError::BackendUnavailable(e.to_string()))?;
        Self::with_connection(conn, dimension, metric, model)
    }

    fn with_connection(
        conn: Connection,
        dimension: usize,
        metric: Metric,
        model: &str,
    ) -> Result<Self> {
        if metric != Metric::Cosine {
            return Err(SearchError::Config(format!(
                "sqlite-vec backend supports the cosine metric only, got '{}'",
                metric
            )));
        }
        if dimension == 0 {
            return Err(SearchError::Config(
                "Index dimension must be positive".to_string(),
            ));
        }

        let identity = IndexIdentity {
            dimension,
            metric,
            model: model.to_string(),
        };
        Schema::initialize(&conn, &identity)?;
        info!(dimension, %metric, model, "Opened sqlite-vec index");

        Ok(Self {
            conn: Mutex::new(conn),
            identity,
        })
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock();
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        let last_updated: Option<String> = conn
            .query_row("SELECT MAX(updated_at) FROM items", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(IndexStats {
            entries: entries as usize,
            dimension: self.identity.dimension,
            metric: self.identity.metric,
            model: self.identity.model.clone(),
            schema_version: Schema::get_version(&conn)?,
            last_updated,
        })
    }

    fn read_item(conn: &Connection, rowid: i64) -> Result<Option<(String, ItemMetadata)>> {
        Ok(conn
            .query_row(
                "SELECT item_id, brand, price, product_url, image_url, review, nid, seller_id
                 FROM items WHERE id = ?",
                [rowid],
                |row| {
                    Ok((
                        row.get(0)?,
                        ItemMetadata {
                            brand: row.get(1)?,
                            price: row.get(2)?,
                            product_url: row.get(3)?,
                            image_url: row.get(4)?,
                            review: row.get(5)?,
                            nid: row.get(6)?,
                            seller_id: row.get(7)?,
                        },
                    ))
                },
            )
            .optional()?)
    }
}

impl VectorIndex for SqliteVecIndex {
    fn dimension(&self) -> usize {
        self.identity.dimension
    }

    fn metric(&self) -> Metric {
        self.identity.metric
    }

    fn upsert(&self, id: &str, vector: &[f32], metadata: &ItemMetadata) -> Result<()> {
        check_dimension(self.identity.dimension, vector)?;
        check_finite(vector)?;

        // sqlite-vec accepts vectors as JSON arrays
        let embedding_json = serde_json::to_string(vector).map_err(|e| {
            SearchError::InvalidArgument(format!("Failed to serialize embedding: {}", e))
        })?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO items (item_id, brand, price, product_url, image_url, review, nid, seller_id, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(item_id) DO UPDATE SET
                brand = excluded.brand,
                price = excluded.price,
                product_url = excluded.product_url,
                image_url = excluded.image_url,
                review = excluded.review,
                nid = excluded.nid,
                seller_id = excluded.seller_id,
                updated_at = excluded.updated_at",
            params![
                id,
                metadata.brand,
                metadata.price,
                metadata.product_url,
                metadata.image_url,
                metadata.review,
                metadata.nid,
                metadata.seller_id,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let rowid: i64 =
            tx.query_row("SELECT id FROM items WHERE item_id = ?", [id], |row| row.get(0))?;

        // vec0 tables have no upsert; replace the row explicitly
        tx.execute("DELETE FROM embeddings WHERE item_rowid = ?", [rowid])?;
        tx.execute(
            "INSERT INTO embeddings (item_rowid, embedding) VALUES (?, ?)",
            params![rowid, embedding_json],
        )?;

        tx.commit()?;
        debug!(id, rowid, "Upserted index entry");
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        check_top_k(top_k)?;
        check_dimension(self.identity.dimension, vector)?;

        let embedding_json = serde_json::to_string(vector).map_err(|e| {
            SearchError::InvalidArgument(format!("Failed to serialize query embedding: {}", e))
        })?;
        let k = top_k.min(MAX_KNN);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT item_rowid, distance
                 FROM embeddings
                 WHERE embedding MATCH ?
                 ORDER BY distance
                 LIMIT ?",
        )?;

        let hits: Vec<(i64, f64)> = stmt
            .query_map(params![embedding_json, k as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut neighbors = Vec::with_capacity(hits.len());
        for (rowid, distance) in hits {
            // Cosine distance is 1 - cosine similarity
            let score = (1.0 - distance) as f32;
            if let Some((id, metadata)) = Self::read_item(&conn, rowid)? {
                neighbors.push(Neighbor {
                    id,
                    score,
                    metadata,
                });
            }
        }

        Ok(neighbors)
    }

    fn get(&self, id: &str) -> Result<Option<ItemMetadata>> {
        let conn = self.conn.lock();
        let rowid: Option<i64> = conn
            .query_row("SELECT id FROM items WHERE item_id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match rowid {
            Some(rowid) => Ok(Self::read_item(&conn, rowid)?.map(|(_, meta)| meta)),
            None => Ok(None),
        }
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BruteForceIndex;

    fn meta(brand: &str, price: &str) -> ItemMetadata {
        ItemMetadata {
            brand: brand.to_string(),
            price: price.to_string(),
            product_url: format!("https://shop.example/p/{}", brand),
            image_url: format!("images/{}.jpg", brand),
            review: "4.5".to_string(),
            nid: Some("1".to_string()),
            seller_id: Some("s1".to_string()),
        }
    }

    fn unit(v: [f32; 3]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    #[test]
    fn test_empty_index_query() {
        let index = SqliteVecIndex::open_in_memory(3, Metric::Cosine, "test").unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_query_matches_reference_ranking() {
        let index = SqliteVecIndex::open_in_memory(3, Metric::Cosine, "test").unwrap();
        let reference = BruteForceIndex::new(3, Metric::Cosine);

        let vectors = [
            ("a", unit([1.0, 0.0, 0.0])),
            ("b", unit([0.8, 0.2, 0.0])),
            ("c", unit([0.0, 1.0, 0.0])),
            ("d", unit([0.1, 0.1, 0.9])),
            ("e", unit([0.5, 0.5, 0.1])),
        ];
        for (id, v) in &vectors {
            index.upsert(id, v, &meta(id, "$10")).unwrap();
            reference.upsert(id, v, &meta(id, "$10")).unwrap();
        }

        let query = unit([0.9, 0.3, 0.0]);
        let got = index.query(&query, 3).unwrap();
        let expected = reference.query(&query, 3).unwrap();

        let got_ids: Vec<&str> = got.iter().map(|n| n.id.as_str()).collect();
        let expected_ids: Vec<&str> = expected.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(got_ids, expected_ids);
        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g.score - e.score).abs() < 1e-4);
        }
        for pair in got.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_upsert_replaces_vector_and_metadata() {
        let index = SqliteVecIndex::open_in_memory(3, Metric::Cosine, "test").unwrap();
        index
            .upsert("x", &unit([1.0, 0.0, 0.0]), &meta("Old", "$1"))
            .unwrap();
        index
            .upsert("y", &unit([0.0, 1.0, 0.0]), &meta("Other", "$2"))
            .unwrap();

        index
            .upsert("x", &unit([0.0, 0.0, 1.0]), &meta("New", "$3"))
            .unwrap();
        assert_eq!(index.len().unwrap(), 2);

        let hits = index.query(&unit([0.0, 0.0, 1.0]), 1).unwrap();
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[0].metadata, meta("New", "$3"));
        assert_eq!(index.get("x").unwrap(), Some(meta("New", "$3")));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let index = SqliteVecIndex::open_in_memory(3, Metric::Cosine, "test").unwrap();
        let v = unit([0.3, 0.3, 0.3]);
        index.upsert("x", &v, &meta("A", "$1")).unwrap();
        let before = index.query(&v, 5).unwrap();
        index.upsert("x", &v, &meta("A", "$1")).unwrap();
        let after = index.query(&v, 5).unwrap();

        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].id, after[0].id);
        assert_eq!(before[0].metadata, after[0].metadata);
    }

    #[test]
    fn test_dimension_mismatch_and_bad_top_k() {
        let index = SqliteVecIndex::open_in_memory(3, Metric::Cosine, "test").unwrap();
        assert!(matches!(
            index.upsert("x", &[1.0, 0.0], &meta("A", "$1")),
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0, 0.0], 1),
            Err(SearchError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 0),
            Err(SearchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rejects_inner_product_metric() {
        assert!(matches!(
            SqliteVecIndex::open_in_memory(3, Metric::InnerProduct, "test"),
            Err(SearchError::Config(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_entries_and_checks_identity() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");

        {
            let index = SqliteVecIndex::open(&db, 3, Metric::Cosine, "clip").unwrap();
            index
                .upsert("x", &unit([1.0, 0.0, 0.0]), &meta("A", "$1"))
                .unwrap();
        }

        let index = SqliteVecIndex::open(&db, 3, Metric::Cosine, "clip").unwrap();
        assert_eq!(index.len().unwrap(), 1);
        let stats = index.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.model, "clip");
        assert!(stats.last_updated.is_some());
        drop(index);

        assert!(matches!(
            SqliteVecIndex::open(&db, 4, Metric::Cosine, "clip"),
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
        assert!(matches!(
            SqliteVecIndex::open(&db, 3, Metric::Cosine, "rgb-histogram"),
            Err(SearchError::Config(_))
        ));
    }

    #[test]
    fn test_open_existing_uses_stored_identity() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");

        assert!(matches!(
            SqliteVecIndex::open_existing(&db),
            Err(SearchError::Config(_))
        ));
        assert!(!db.exists());

        {
            let index = SqliteVecIndex::open(&db, 3, Metric::Cosine, "clip").unwrap();
            index
                .upsert("x", &unit([0.0, 1.0, 0.0]), &meta("A", "$1"))
                .unwrap();
        }

        let index = SqliteVecIndex::open_existing(&db).unwrap();
        assert_eq!(index.dimension(), 3);
        let stats = index.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.model, "clip");
        assert_eq!(stats.metric, Metric::Cosine);
    }

    #[test]
    fn test_open_existing_rejects_foreign_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("other.db");
        Connection::open(&db)
            .unwrap()
            .execute("CREATE TABLE notes (body TEXT)", [])
            .unwrap();

        assert!(matches!(
            SqliteVecIndex::open_existing(&db),
            Err(SearchError::Config(_))
        ));
    }
}
