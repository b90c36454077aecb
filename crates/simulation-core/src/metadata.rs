use std::collections::HashMap;
use std::sync::RwLock;

use types::TokenMetadata;

/// Process-wide token/asset metadata cache with first-write-wins semantics.
/// Duplicate lookups racing on a miss are idempotent; whichever insert lands
/// first is the one every later reader sees.
#[derive(Debug, Default)]
pub struct MetadataCache {
    inner: RwLock<HashMap<String, TokenMetadata>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TokenMetadata> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Inserts unless the key is already present; returns the cached value
    /// either way.
    pub fn insert_if_absent(&self, key: &str, metadata: TokenMetadata) -> TokenMetadata {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.entry(key.to_string()).or_insert(metadata).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_wins() {
        let cache = MetadataCache::new();
        let first = TokenMetadata {
            symbol: "USDC".into(),
            decimals: 6,
        };
        let second = TokenMetadata {
            symbol: "OTHER".into(),
            decimals: 18,
        };

        assert_eq!(cache.insert_if_absent("0xabc", first.clone()), first);
        assert_eq!(cache.insert_if_absent("0xabc", second), first);
        assert_eq!(cache.get("0xabc"), Some(first));
        assert_eq!(cache.get("0xmissing"), None);
    }
}
