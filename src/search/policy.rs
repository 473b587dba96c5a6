use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};

/// How many index candidates to fetch before metadata filtering.
///
/// The index is asked for `max(top_k * multiplier, minimum, top_k)` neighbors;
/// filtering then runs over that pool and the survivors are truncated to `top_k`.
/// A filtered query can only return items inside the pool, so recall of
/// selective brand/price filters grows with both knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OverFetchPolicy {
    /// Candidates fetched per requested result
    pub multiplier: usize,
    /// Lower bound on the candidate pool
    pub minimum: usize,
}

impl Default for OverFetchPolicy {
    fn default() -> Self {
        Self {
            multiplier: 10,
            minimum: 200,
        }
    }
}

impl OverFetchPolicy {
    /// Candidate pool size for a request of `top_k` results
    pub fn candidates(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.multiplier)
            .max(self.minimum)
            .max(top_k)
    }

    pub fn validate(&self) -> Result<()> {
        if self.multiplier == 0 {
            return Err(SearchError::Config(
                "over_fetch.multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool() {
        let policy = OverFetchPolicy::default();
        assert_eq!(policy.candidates(5), 200);
        assert_eq!(policy.candidates(50), 500);
    }

    #[test]
    fn test_pool_never_below_top_k() {
        let policy = OverFetchPolicy {
            multiplier: 1,
            minimum: 0,
        };
        assert_eq!(policy.candidates(7), 7);
        assert_eq!(policy.candidates(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_zero_multiplier_rejected() {
        let policy = OverFetchPolicy {
            multiplier: 0,
            minimum: 10,
        };
        assert!(matches!(policy.validate(), Err(SearchError::Config(_))));
        assert!(OverFetchPolicy::default().validate().is_ok());
    }
}
