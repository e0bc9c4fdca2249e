use std::env;

use redis_object_cache::CacheConfig;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Redis host (from REDIS_HOST env var, defaults to 127.0.0.1)
    pub redis_host: String,

    /// Redis port (from REDIS_PORT env var, defaults to 6379)
    pub redis_port: u16,

    /// Number of distinct keys per group (from BENCH_KEYS env var, defaults to 10000)
    pub num_keys: usize,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 100)
    pub sample_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            redis_port: env::var("REDIS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6379),
            num_keys: env::var("BENCH_KEYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
            sample_size: env::var("BENCH_SAMPLE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  Redis: {}:{}", config.redis_host, config.redis_port);
        eprintln!("  Keys: {}", config.num_keys);
        eprintln!("  Sample Size: {}", config.sample_size);
        config
    }

    /// Cache configuration pointing at the benchmark Redis, database 15.
    ///
    /// The database is treated as shared, so flushes only remove keys under
    /// `prefix`.
    pub fn cache_config(&self, prefix: &str) -> CacheConfig {
        CacheConfig {
            host: self.redis_host.clone(),
            port: self.redis_port,
            database: 15,
            dedicated_database: Some(false),
            prefix: prefix.to_string(),
            connect_timeout: 0.5,
            ..CacheConfig::default()
        }
    }
}
