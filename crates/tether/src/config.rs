//! Catalog configuration.

use serde::Deserialize;

/// Sizes of the catalog's string caches.
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// ```
/// use tether::CatalogConfig;
///
/// let config = CatalogConfig::default();
/// assert_eq!(config.cache_capacity, 1024);
/// assert_eq!(config.cache_shards, 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Total entries per cache across all shards; `0` disables eviction.
    pub cache_capacity: usize,
    /// Number of independently locked shards per cache.
    pub cache_shards: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            cache_shards: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: CatalogConfig = serde_json::from_str(r#"{"cache_capacity": 64}"#).unwrap();
        assert_eq!(
            config,
            CatalogConfig {
                cache_capacity: 64,
                cache_shards: 16,
            }
        );
        let config: CatalogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CatalogConfig::default());
    }

    #[test]
    fn unbounded_capacity_is_accepted() {
        let config: CatalogConfig =
            serde_json::from_str(r#"{"cache_capacity": 0, "cache_shards": 1}"#).unwrap();
        assert_eq!(config.cache_capacity, 0);
        assert_eq!(config.cache_shards, 1);
    }
}
