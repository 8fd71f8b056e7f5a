//! Store key layout for a bucket.

/// The two store entries holding one bucket's state.
///
/// Both keys share the `{key}` hash tag so they land on the same slot of a
/// clustered store, which a multi-key script requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKeys {
    /// Entry holding the remaining token count
    pub tokens: String,
    /// Entry holding the timestamp of the last transaction
    pub timestamp: String,
}

impl BucketKeys {
    /// Derive the store keys for a limiter key.
    pub fn new(key: &str) -> Self {
        Self {
            tokens: format!("{{{}}}.tokens", key),
            timestamp: format!("{{{}}}.ts", key),
        }
    }
}

impl std::fmt::Display for BucketKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.tokens, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_keys_layout() {
        let keys = BucketKeys::new("api:user:42");
        assert_eq!(keys.tokens, "{api:user:42}.tokens");
        assert_eq!(keys.timestamp, "{api:user:42}.ts");
    }

    #[test]
    fn test_different_keys_do_not_collide() {
        assert_ne!(BucketKeys::new("a"), BucketKeys::new("b"));
    }
}
