//! CSV Persistence Module
//!
//! Handles bar-history input, closed-trade export, and the live-state
//! snapshot used for restart recovery. Trade rows append to one CSV per
//! run directory; the header is written when the file is created.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::engine::EngineState;
use crate::types::{Bar, TradeRecord};

/// File-system persistence rooted at one data directory
pub struct CsvPersistence {
    data_dir: PathBuf,
    csv_enabled: bool,
    state_file: String,
}

impl CsvPersistence {
    pub fn new(data_dir: impl Into<PathBuf>, csv_enabled: bool, state_file: &str) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        Ok(Self {
            data_dir,
            csv_enabled,
            state_file: state_file.to_string(),
        })
    }

    /// Load a bar series from a CSV file with columns
    /// `ts,open,high,low,close,volume`. Rows are sorted by timestamp;
    /// ordering violations beyond that are the engine's concern.
    pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("Failed to open bar file {}", path.display()))?;
        let mut bars = Vec::new();
        for row in reader.deserialize() {
            let bar: Bar = row.context("Malformed bar row")?;
            bars.push(bar);
        }
        bars.sort_by_key(|b| b.ts);
        Ok(bars)
    }

    /// Bar file for a symbol inside the data directory
    pub fn bar_file(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", symbol.to_lowercase()))
    }

    /// Append one closed trade to trades.csv, creating the file with a
    /// header on first write. A no-op when CSV output is disabled.
    pub fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        if !self.csv_enabled {
            return Ok(());
        }
        let path = self.data_dir.join("trades.csv");
        let new_file = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(new_file).from_writer(file);
        writer.serialize(record).context("Failed to write trade row")?;
        writer.flush().context("Failed to flush trade row")?;
        Ok(())
    }

    /// Read back all exported trades (reporting, tests)
    pub fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        let path = self.data_dir.join("trades.csv");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut trades = Vec::new();
        for row in reader.deserialize() {
            trades.push(row.context("Malformed trade row")?);
        }
        Ok(trades)
    }

    /// Persist the engine snapshot as JSON for restart recovery
    pub fn save_state(&self, state: &EngineState) -> Result<()> {
        let path = self.data_dir.join(&self.state_file);
        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        tracing::info!(path = %path.display(), "engine state saved");
        Ok(())
    }

    /// Load a previously saved snapshot, None when no snapshot exists
    pub fn load_state(&self) -> Result<Option<EngineState>> {
        let path = self.data_dir.join(&self.state_file);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state = serde_json::from_str(&json).context("Failed to parse state file")?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CapitalLedger;
    use crate::position::PositionBook;
    use crate::types::ExitReason;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swingbot_test_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn record(symbol: &str, pl: f64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.to_string(),
            entry_price: 100.0,
            exit_price: 100.0 + pl / 2.0,
            size: 2.0,
            stop_price_at_exit: 98.0,
            exit_reason: ExitReason::StopLoss,
            pl_absolute: pl,
            pl_percent: pl / 2.0,
            entry_ts: 1,
            exit_ts: 2,
        }
    }

    #[test]
    fn test_trade_append_and_reload() {
        let dir = temp_dir("trades");
        let persistence = CsvPersistence::new(&dir, true, "state.json").unwrap();
        persistence.append_trade(&record("AAPL", -4.0)).unwrap();
        persistence.append_trade(&record("MSFT", 6.0)).unwrap();

        let trades = persistence.load_trades().unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].symbol, "AAPL");
        assert_eq!(trades[1].pl_absolute, 6.0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_disabled_csv_writes_nothing() {
        let dir = temp_dir("disabled");
        let persistence = CsvPersistence::new(&dir, false, "state.json").unwrap();
        persistence.append_trade(&record("AAPL", 1.0)).unwrap();
        assert!(persistence.load_trades().unwrap().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bar_csv_round_trip_sorted() {
        let dir = temp_dir("bars");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("aapl.csv");
        fs::write(
            &path,
            "ts,open,high,low,close,volume\n\
             2,101.0,102.0,100.0,101.5,900\n\
             1,100.0,101.0,99.0,100.5,1000\n",
        )
        .unwrap();
        let bars = CsvPersistence::load_bars(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].ts, 1);
        assert_eq!(bars[1].close, 101.5);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_state_snapshot_round_trip() {
        let dir = temp_dir("state");
        let persistence = CsvPersistence::new(&dir, true, "state.json").unwrap();
        assert!(persistence.load_state().unwrap().is_none());

        let state = EngineState {
            ledger: CapitalLedger::new(5000.0),
            book: PositionBook::new(),
            saved_at: 99,
        };
        persistence.save_state(&state).unwrap();
        let loaded = persistence.load_state().unwrap().unwrap();
        assert_eq!(loaded.saved_at, 99);
        assert_eq!(loaded.ledger.capital(), 5000.0);
        let _ = fs::remove_dir_all(&dir);
    }
}
