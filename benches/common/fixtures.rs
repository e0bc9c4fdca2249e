use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchPost {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub views: u32,
}

impl BenchPost {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            title: format!("Post {}", id),
            author: format!("author{}@example.com", id % 100),
            views: (id % 1000) as u32,
        }
    }

    pub fn value(id: u64) -> Value {
        serde_json::to_value(Self::new(id)).unwrap()
    }
}

/// Generate test keys for different workload patterns
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Generate sequential keys (for pre-population)
    pub fn sequential(&self) -> Vec<String> {
        (0..self.num_keys).map(|i| format!("post_{}", i)).collect()
    }

    /// Generate random keys with uniform distribution
    #[allow(dead_code)]
    pub fn uniform_random(&self, count: usize) -> Vec<String> {
        let mut rng = rand::rng();
        (0..count)
            .map(|_| format!("post_{}", rng.random_range(0..self.num_keys)))
            .collect()
    }

    /// Generate keys with a skewed distribution: 80% of requests go to 20% of keys
    pub fn zipf_random(&self, count: usize) -> Vec<String> {
        let mut rng = rand::rng();
        let hot = (self.num_keys / 5).max(1);

        (0..count)
            .map(|_| {
                let key_id = if rng.random_bool(0.8) {
                    rng.random_range(0..hot)
                } else {
                    rng.random_range(hot..self.num_keys.max(hot + 1))
                };
                format!("post_{}", key_id)
            })
            .collect()
    }

    /// Generate keys where roughly `hit_ratio` of them were pre-populated
    /// by [`sequential`](Self::sequential) and the rest never were.
    pub fn mixed(&self, hit_ratio: f64, count: usize) -> Vec<String> {
        let mut rng = rand::rng();

        (0..count)
            .map(|_| {
                if rng.random_bool(hit_ratio) {
                    format!("post_{}", rng.random_range(0..self.num_keys))
                } else {
                    format!("absent_{}", rng.random_range(0..self.num_keys))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], "post_0");

        let uniform = key_gen.uniform_random(50);
        assert_eq!(uniform.len(), 50);

        let zipf = key_gen.zipf_random(100);
        assert!(zipf.iter().all(|k| k.starts_with("post_")));

        let mixed = key_gen.mixed(1.0, 10);
        assert!(mixed.iter().all(|k| k.starts_with("post_")));
    }
}
