use crate::error::Result;
use crate::index::{
    check_dimension, check_finite, check_top_k, ItemMetadata, Metric, Neighbor, VectorIndex,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct StoredEntry {
    vector: Vec<f32>,
    metadata: ItemMetadata,
}

/// Exact nearest-neighbor index over resident vectors.
///
/// Every query scores all entries, so ranking is exact and deterministic
/// (ties are broken by id). Approximate backends are checked against it.
pub struct BruteForceIndex {
    dimension: usize,
    metric: Metric,
    entries: RwLock<HashMap<String, Arc<StoredEntry>>>,
}

impl BruteForceIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl VectorIndex for BruteForceIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn upsert(&self, id: &str, vector: &[f32], metadata: &ItemMetadata) -> Result<()> {
        check_dimension(self.dimension, vector)?;
        check_finite(vector)?;

        let entry = Arc::new(StoredEntry {
            vector: vector.to_vec(),
            metadata: metadata.clone(),
        });
        self.entries.write().insert(id.to_string(), entry);
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        check_top_k(top_k)?;
        check_dimension(self.dimension, vector)?;

        let mut scored: Vec<(f32, String, Arc<StoredEntry>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(id, entry)| {
                    (
                        self.metric.score(vector, &entry.vector),
                        id.clone(),
                        Arc::clone(entry),
                    )
                })
                .collect()
        };

        let by_rank = |a: &(f32, String, Arc<StoredEntry>), b: &(f32, String, Arc<StoredEntry>)| {
            b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
        };

        if scored.len() > top_k {
            scored.select_nth_unstable_by(top_k - 1, by_rank);
            scored.truncate(top_k);
        }
        scored.sort_by(by_rank);

        Ok(scored
            .into_iter()
            .map(|(score, id, entry)| Neighbor {
                id,
                score,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    fn get(&self, id: &str) -> Result<Option<ItemMetadata>> {
        Ok(self.entries.read().get(id).map(|e| e.metadata.clone()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }
}
