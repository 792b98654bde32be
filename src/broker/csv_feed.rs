//! CSV-backed bar feed
//!
//! Serves bar history from per-symbol CSV files in a data directory. This
//! is the feed used by forward mode and paper-live runs; a real market-data
//! client implements the same trait.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::broker::{BarFeed, FeedError};
use crate::persistence::CsvPersistence;
use crate::types::Bar;

pub struct CsvBarFeed {
    data_dir: PathBuf,
}

impl CsvBarFeed {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl BarFeed for CsvBarFeed {
    async fn fetch_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, FeedError> {
        let path = self.data_dir.join(format!("{}.csv", symbol.to_lowercase()));
        if !path.exists() {
            return Err(FeedError::NoData(symbol.to_string()));
        }
        let bars = CsvPersistence::load_bars(&path)
            .map_err(|e| FeedError::Unavailable(format!("{e:#}")))?;
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_fetch_returns_most_recent_bars() {
        let dir = std::env::temp_dir().join(format!("swingbot_feed_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let mut rows = String::from("ts,open,high,low,close,volume\n");
        for i in 0..10 {
            rows.push_str(&format!("{i},100,101,99,100.5,1000\n"));
        }
        fs::write(dir.join("aapl.csv"), rows).unwrap();

        let feed = CsvBarFeed::new(&dir);
        let bars = feed.fetch_bars("AAPL", 4).await.unwrap();
        assert_eq!(bars.len(), 4);
        assert_eq!(bars[0].ts, 6);
        assert_eq!(bars[3].ts, 9);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_no_data() {
        let dir = std::env::temp_dir().join(format!("swingbot_feed_missing_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let feed = CsvBarFeed::new(&dir);
        assert!(matches!(
            feed.fetch_bars("ZZZ", 10).await,
            Err(FeedError::NoData(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
