use crate::error::{Result, SearchError};
use crate::index::Neighbor;
use tracing::debug;

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

/// Parse a currency-formatted price such as `"$1,299.99"`.
///
/// Leading or trailing currency symbols, surrounding whitespace and thousands
/// separators are ignored. Returns `None` for anything that is not a finite number.
pub fn parse_price(raw: &str) -> Option<f64> {
    let without_symbol =
        raw.trim_matches(|c: char| c.is_whitespace() || CURRENCY_SYMBOLS.contains(&c));
    let cleaned: String = without_symbol.chars().filter(|c| *c != ',').collect();
    let value: f64 = cleaned.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

/// Inclusive price bounds; a missing bound is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self> {
        for bound in [min, max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(SearchError::InvalidArgument(
                    "price bounds must be finite numbers".to_string(),
                ));
            }
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(SearchError::InvalidArgument(format!(
                    "min_price ({}) is greater than max_price ({})",
                    lo, hi
                )));
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min.is_none_or(|lo| price >= lo) && self.max.is_none_or(|hi| price <= hi)
    }
}

/// A candidate that passed filtering, with its parsed price
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCandidate {
    pub neighbor: Neighbor,
    pub price: f64,
}

/// Post-query predicates over candidate metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub price: PriceRange,
    brand: Option<String>,
}

impl MetadataFilter {
    pub fn new(price: PriceRange, brand: Option<&str>) -> Self {
        Self {
            price,
            brand: brand.filter(|b| !b.is_empty()).map(str::to_lowercase),
        }
    }

    /// Brand predicate in its normalized (lower-case) form
    pub fn brand(&self) -> Option<&str> {
        self.brand.as_deref()
    }

    fn brand_matches(&self, brand: &str) -> bool {
        match &self.brand {
            Some(wanted) => brand.to_lowercase() == *wanted,
            None => true,
        }
    }

    /// Keep candidates satisfying every predicate, in their input order.
    ///
    /// Candidates whose price cannot be parsed are dropped even when no price
    /// bound is requested, since the response reports a numeric price.
    pub fn apply(&self, candidates: Vec<Neighbor>) -> Vec<FilteredCandidate> {
        let total = candidates.len();
        let mut unparseable = 0usize;

        let kept: Vec<FilteredCandidate> = candidates
            .into_iter()
            .filter_map(|neighbor| {
                let Some(price) = parse_price(&neighbor.metadata.price) else {
                    unparseable += 1;
                    return None;
                };
                (self.price.contains(price) && self.brand_matches(&neighbor.metadata.brand))
                    .then_some(FilteredCandidate { neighbor, price })
            })
            .collect();

        debug!(
            total,
            kept = kept.len(),
            unparseable,
            "Applied metadata filter"
        );
        kept
    }
}
