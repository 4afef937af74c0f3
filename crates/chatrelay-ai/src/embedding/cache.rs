use std::collections::HashMap;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// In-memory cache for embeddings to avoid redundant API calls
pub struct EmbeddingCache {
    cache: RwLock<HashMap<String, Vec<f32>>>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn cache_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(text, model);
        self.cache.read().get(&key).cloned()
    }

    pub fn put(&self, text: &str, model: &str, embedding: Vec<f32>) {
        let key = Self::cache_key(text, model);
        let mut cache = self.cache.write();
        if cache.len() >= self.max_entries && !cache.contains_key(&key) {
            let keys_to_remove: Vec<_> = cache
                .keys()
                .take((self.max_entries / 2).max(1))
                .cloned()
                .collect();
            for k in keys_to_remove {
                cache.remove(&k);
            }
        }
        cache.insert(key, embedding);
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_by_model_and_text() {
        let cache = EmbeddingCache::new(10);
        cache.put("hello", "text-embedding-3-small", vec![0.1, 0.2]);

        assert_eq!(cache.get("hello", "text-embedding-3-small"), Some(vec![0.1, 0.2]));
        assert_eq!(cache.get("hello", "text-embedding-3-large"), None);
        assert_eq!(cache.get("hello!", "text-embedding-3-small"), None);
    }

    #[test]
    fn test_eviction_keeps_cache_bounded() {
        let cache = EmbeddingCache::new(4);
        for i in 0..10 {
            cache.put(&format!("text-{}", i), "m", vec![i as f32]);
        }
        assert!(cache.len() <= 4);
        assert_eq!(cache.get("text-9", "m"), Some(vec![9.0]));
    }
}
