//! On-disk snapshot of the aggregated range set.
//!
//! The snapshot is only read when a full fetch fails, so a stale cache beats
//! no ranges at all. Writes go through a temporary file and a rename so a
//! crash mid-write never leaves a truncated `ranges.json` behind.

use std::path::Path;

use log::debug;

use super::aggregator::AggregatedSet;
use crate::config::{CACHE_FILE_NAME, CACHE_TMP_FILE_NAME};
use crate::errors::Result;

/// Serializes the aggregated set into `<cache_dir>/ranges.json` atomically.
pub async fn persist(set: &AggregatedSet, cache_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(cache_dir).await?;
    let payload = serde_json::to_vec_pretty(set)?;
    let tmp = cache_dir.join(CACHE_TMP_FILE_NAME);
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, cache_dir.join(CACHE_FILE_NAME)).await?;
    debug!(
        "persisted {} range entries to {}",
        set.entries.len(),
        cache_dir.display()
    );
    Ok(())
}

/// Reads the cached aggregated set back.
pub async fn load(cache_dir: &Path) -> Result<AggregatedSet> {
    let data = tokio::fs::read(cache_dir.join(CACHE_FILE_NAME)).await?;
    let set: AggregatedSet = serde_json::from_slice(&data)?;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::aggregator::{Aggregator, RangeMetadata, RangeRecord};
    use chrono::Utc;

    fn sample_set() -> AggregatedSet {
        let agg = Aggregator::new();
        agg.add(vec![RangeRecord {
            network: "1.1.1.0/24".parse().unwrap(),
            metadata: RangeMetadata {
                source: "cloudflare".into(),
                endpoint: "https://www.cloudflare.com/ips-v4".into(),
                retrieved_at: Utc::now(),
                credibility: 1.0,
            },
        }]);
        agg.result()
    }

    #[tokio::test]
    async fn roundtrip_through_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let set = sample_set();
        persist(&set, dir.path()).await.unwrap();

        // the tmp file must not survive the rename
        assert!(!dir.path().join(CACHE_TMP_FILE_NAME).exists());
        assert!(dir.path().join(CACHE_FILE_NAME).exists());

        let loaded = load(dir.path()).await.unwrap();
        assert_eq!(loaded, set);
    }

    #[tokio::test]
    async fn load_fails_when_no_cache_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn persist_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        persist(&sample_set(), &nested).await.unwrap();
        assert!(nested.join(CACHE_FILE_NAME).exists());
    }
}
