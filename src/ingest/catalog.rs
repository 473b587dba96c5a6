use crate::error::{Result, SearchError};
use crate::index::ItemMetadata;
use crate::source::{clean_url, is_remote};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// One catalog line: `Nid;SellerId;Brandname;review;price;imageUrl;productUrl`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogRow {
    #[serde(rename = "Nid", default)]
    pub nid: String,
    #[serde(rename = "SellerId", default)]
    pub seller_id: String,
    #[serde(rename = "Brandname", default)]
    pub brand: String,
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub price: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(rename = "productUrl", default)]
    pub product_url: String,
}

impl CatalogRow {
    /// Index key and stored image reference.
    ///
    /// Remote URLs are stored with their scheme repaired so that the stored
    /// reference stays fetchable; local paths are kept as written.
    pub fn image_key(&self) -> Option<String> {
        let trimmed = self.image_url.trim();
        if trimmed.is_empty() {
            None
        } else if is_remote(trimmed) {
            Some(clean_url(trimmed))
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn to_metadata(&self, image_key: &str) -> ItemMetadata {
        let optional = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        ItemMetadata {
            brand: self.brand.trim().to_string(),
            price: self.price.trim().to_string(),
            product_url: self.product_url.trim().to_string(),
            image_url: image_key.to_string(),
            review: self.review.trim().to_string(),
            nid: optional(&self.nid),
            seller_id: optional(&self.seller_id),
        }
    }
}

/// Streaming reader over a delimited catalog with a header line
pub struct CatalogReader<R: Read> {
    inner: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(reader: R, delimiter: char) -> Result<Self> {
        let delimiter = u8::try_from(delimiter).map_err(|_| {
            SearchError::Config(format!("Delimiter {:?} is not a single byte", delimiter))
        })?;
        let inner = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);
        Ok(Self { inner })
    }

    /// Rows paired with their 1-based data line number; malformed rows are `Err`
    pub fn rows(
        &mut self,
    ) -> impl Iterator<Item = (usize, std::result::Result<CatalogRow, csv::Error>)> + '_ {
        self.inner
            .deserialize::<CatalogRow>()
            .enumerate()
            .map(|(i, row)| (i + 1, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Nid;SellerId;Brandname;review;price;imageUrl;productUrl\n";

    #[test]
    fn test_reads_semicolon_catalog() {
        let data = format!(
            "{}101;7;Nike;4.5;$1,299.00;images/a.jpg;https://shop/a\n\
             102;8;Puma;;N/A;https:https://cdn/b.jpg;https://shop/b\n",
            HEADER
        );
        let mut reader = CatalogReader::new(data.as_bytes(), ';').unwrap();
        let rows: Vec<CatalogRow> = reader.rows().map(|(_, r)| r.unwrap()).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].brand, "Nike");
        assert_eq!(rows[0].price, "$1,299.00");
        assert_eq!(rows[0].image_key().as_deref(), Some("images/a.jpg"));
        assert_eq!(rows[1].review, "");
        assert_eq!(rows[1].image_key().as_deref(), Some("https://cdn/b.jpg"));

        let meta = rows[0].to_metadata("images/a.jpg");
        assert_eq!(meta.nid.as_deref(), Some("101"));
        assert_eq!(meta.seller_id.as_deref(), Some("7"));
        assert_eq!(meta.product_url, "https://shop/a");
    }

    #[test]
    fn test_malformed_row_is_reported_in_place() {
        let data = format!("{}1;2;A;5;10;a.jpg;u\n2;3;B\n3;4;C;5;10;c.jpg;u\n", HEADER);
        let mut reader = CatalogReader::new(data.as_bytes(), ';').unwrap();
        let results: Vec<(usize, bool)> = reader.rows().map(|(n, r)| (n, r.is_ok())).collect();
        assert_eq!(results, vec![(1, true), (2, false), (3, true)]);
    }

    #[test]
    fn test_empty_image_url_has_no_key() {
        let row = CatalogRow {
            image_url: "   ".to_string(),
            ..Default::default()
        };
        assert_eq!(row.image_key(), None);
        assert_eq!(row.to_metadata("k").nid, None);
    }

    #[test]
    fn test_non_byte_delimiter_rejected() {
        assert!(matches!(
            CatalogReader::new(&b""[..], '€'),
            Err(SearchError::Config(_))
        ));
    }
}
