//! Catalog ingestion: one index upsert per catalog row, keyed by image reference.

pub mod catalog;

pub use catalog::{CatalogReader, CatalogRow};

use crate::embedding::preprocess::decode_image;
use crate::embedding::{ImageEmbedder, ImageVector};
use crate::error::{Result, SearchError};
use crate::index::{IndexEntry, ItemMetadata, VectorIndex};
use crate::source::ImageSource;
use image::DynamicImage;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Data rows read
    pub rows: usize,
    /// Rows written to the index
    pub upserted: usize,
    /// Rows skipped (malformed, missing image, undecodable, embedding failure)
    pub skipped: usize,
}

#[derive(Default)]
struct Batch {
    entries: Vec<(String, ItemMetadata)>,
    images: Vec<DynamicImage>,
}

impl Batch {
    fn len(&self) -> usize {
        self.images.len()
    }
}

pub struct Ingestor {
    source: Arc<dyn ImageSource>,
    embedder: Arc<dyn ImageEmbedder>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    delimiter: char,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn ImageSource>,
        embedder: Arc<dyn ImageEmbedder>,
        index: Arc<dyn VectorIndex>,
        batch_size: usize,
        delimiter: char,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }
        Ok(Self {
            source,
            embedder,
            index,
            batch_size: batch_size.max(1),
            delimiter,
        })
    }

    /// Ingest a catalog file
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn ingest_file<P: AsRef<Path>>(&self, path: P) -> Result<IngestReport> {
        let file = std::fs::File::open(path.as_ref())?;
        self.ingest_reader(file)
    }

    /// Ingest catalog rows from any reader.
    ///
    /// Row-level failures are logged and counted; index failures abort the run.
    pub fn ingest_reader<R: Read>(&self, reader: R) -> Result<IngestReport> {
        let mut catalog = CatalogReader::new(reader, self.delimiter)?;
        let mut report = IngestReport::default();
        let mut batch = Batch::default();

        for (line, row) in catalog.rows() {
            report.rows += 1;

            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(line, error = %e, "Skipping malformed catalog row");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.load(&row) {
                Ok((key, image)) => {
                    batch.entries.push((key.clone(), row.to_metadata(&key)));
                    batch.images.push(image);
                }
                Err(e) => {
                    warn!(line, nid = %row.nid, image = %row.image_url, error = %e, "Skipping row");
                    report.skipped += 1;
                    continue;
                }
            }

            if batch.len() >= self.batch_size {
                self.flush(&mut batch, &mut report)?;
                info!(
                    rows = report.rows,
                    upserted = report.upserted,
                    skipped = report.skipped,
                    "Ingestion progress"
                );
            }
        }
        self.flush(&mut batch, &mut report)?;

        info!(
            rows = report.rows,
            upserted = report.upserted,
            skipped = report.skipped,
            "Ingestion completed"
        );
        Ok(report)
    }

    fn load(&self, row: &CatalogRow) -> Result<(String, DynamicImage)> {
        let key = row
            .image_key()
            .ok_or_else(|| SearchError::InvalidArgument("Row has no imageUrl".to_string()))?;
        let bytes = self.source.fetch(&key)?;
        let image = decode_image(&bytes)?;
        Ok((key, image))
    }

    fn embed(&self, images: &[DynamicImage]) -> Vec<Option<ImageVector>> {
        match self.embedder.embed_batch(images) {
            Ok(vectors) if vectors.len() == images.len() => {
                return vectors.into_iter().map(Some).collect();
            }
            Ok(vectors) => warn!(
                expected = images.len(),
                got = vectors.len(),
                "Batch embedding returned the wrong count, embedding one by one"
            ),
            Err(e) => warn!(error = %e, "Batch embedding failed, embedding one by one"),
        }

        images
            .iter()
            .map(|image| match self.embedder.embed_image(image) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!(error = %e, "Skipping image that failed to embed");
                    None
                }
            })
            .collect()
    }

    fn flush(&self, batch: &mut Batch, report: &mut IngestReport) -> Result<()> {
        if batch.images.is_empty() {
            return Ok(());
        }
        debug!(images = batch.len(), "Embedding batch");

        let vectors = self.embed(&batch.images);
        for ((key, metadata), vector) in batch.entries.drain(..).zip(vectors) {
            match vector {
                Some(vector) => {
                    let entry = IndexEntry {
                        id: key,
                        vector,
                        metadata,
                    };
                    self.index.upsert_entry(&entry)?;
                    report.upserted += 1;
                }
                None => report.skipped += 1,
            }
        }
        batch.images.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HistogramEmbedder;
    use crate::index::{BruteForceIndex, Metric};
    use crate::source::HttpImageSource;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::path::PathBuf;
    use std::time::Duration;

    fn write_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(color)))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    fn ingestor(
        embedder: Arc<dyn ImageEmbedder>,
        index: Arc<BruteForceIndex>,
        batch_size: usize,
    ) -> Ingestor {
        let source = Arc::new(HttpImageSource::new(Duration::from_secs(1)).unwrap());
        Ingestor::new(source, embedder, index, batch_size, ';').unwrap()
    }

    fn catalog(dir: &Path) -> String {
        let red = write_png(dir, "red.png", [220, 20, 20]);
        let blue = write_png(dir, "blue.png", [20, 20, 220]);
        let corrupt = dir.join("corrupt.png");
        std::fs::write(&corrupt, b"<html>404</html>").unwrap();
        let missing = dir.join("missing.png");

        format!(
            "Nid;SellerId;Brandname;review;price;imageUrl;productUrl\n\
             1;10;Nike;4.5;$10.00;{};https://shop/1\n\
             2;11;Puma;3.9;$20.00;{};https://shop/2\n\
             3;12;Puma;4.1;$30.00;{};https://shop/3\n\
             4;13;Puma;4.1;$40.00;{};https://shop/4\n\
             5;14;Puma;4.1;$50.00;;https://shop/5\n\
             6;15;Puma\n",
            red.display(),
            blue.display(),
            missing.display(),
            corrupt.display(),
        )
    }

    #[test]
    fn test_ingest_skips_bad_rows_and_keeps_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        let csv = catalog(dir.path());
        let embedder = Arc::new(HistogramEmbedder::new(4).unwrap());
        let index = Arc::new(BruteForceIndex::new(64, Metric::Cosine));

        let report = ingestor(embedder.clone(), index.clone(), 16)
            .ingest_reader(csv.as_bytes())
            .unwrap();
        assert_eq!(
            report,
            IngestReport {
                rows: 6,
                upserted: 2,
                skipped: 4
            }
        );
        assert_eq!(index.len().unwrap(), 2);

        let red_key = dir.path().join("red.png").display().to_string();
        let meta = index.get(&red_key).unwrap().unwrap();
        assert_eq!(meta.brand, "Nike");
        assert_eq!(meta.price, "$10.00");
        assert_eq!(meta.image_url, red_key);
        assert_eq!(meta.nid.as_deref(), Some("1"));

        let query = embedder
            .embed_bytes(&std::fs::read(dir.path().join("red.png")).unwrap())
            .unwrap();
        let hits = index.query(&query, 1).unwrap();
        assert_eq!(hits[0].id, red_key);
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let csv = catalog(dir.path());
        let index = Arc::new(BruteForceIndex::new(64, Metric::Cosine));
        let ingestor = ingestor(Arc::new(HistogramEmbedder::new(4).unwrap()), index.clone(), 1);

        ingestor.ingest_reader(csv.as_bytes()).unwrap();
        let before = index.query(&vec![1.0; 64], 10).unwrap();
        ingestor.ingest_reader(csv.as_bytes()).unwrap();
        let after = index.query(&vec![1.0; 64], 10).unwrap();

        assert_eq!(index.len().unwrap(), 2);
        assert_eq!(before, after);
    }

    /// Batch inference always fails; single-image inference works
    struct NoBatchEmbedder(HistogramEmbedder);

    impl ImageEmbedder for NoBatchEmbedder {
        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn model_name(&self) -> &str {
            self.0.model_name()
        }

        fn embed_image(&self, image: &DynamicImage) -> Result<ImageVector> {
            self.0.embed_image(image)
        }

        fn embed_batch(&self, _images: &[DynamicImage]) -> Result<Vec<ImageVector>> {
            Err(SearchError::Model("out of memory".to_string()))
        }
    }

    #[test]
    fn test_batch_failure_falls_back_to_single_images() {
        let dir = tempfile::tempdir().unwrap();
        let csv = catalog(dir.path());
        let index = Arc::new(BruteForceIndex::new(64, Metric::Cosine));

        let report = ingestor(
            Arc::new(NoBatchEmbedder(HistogramEmbedder::new(4).unwrap())),
            index.clone(),
            8,
        )
        .ingest_reader(csv.as_bytes())
        .unwrap();
        assert_eq!(report.upserted, 2);
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected_up_front() {
        let source = Arc::new(HttpImageSource::new(Duration::from_secs(1)).unwrap());
        let result = Ingestor::new(
            source,
            Arc::new(HistogramEmbedder::new(4).unwrap()),
            Arc::new(BruteForceIndex::new(512, Metric::Cosine)),
            4,
            ';',
        );
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch {
                expected: 512,
                actual: 64
            })
        ));
    }

    #[test]
    fn test_missing_catalog_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(BruteForceIndex::new(64, Metric::Cosine));
        let ingestor = ingestor(Arc::new(HistogramEmbedder::new(4).unwrap()), index, 4);
        assert!(matches!(
            ingestor.ingest_file(dir.path().join("nope.csv")),
            Err(SearchError::Io(_))
        ));
    }
}
