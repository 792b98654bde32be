//! Configuration management for SwingBot
//!
//! Loads from config files + environment variables via .env. One
//! configuration structure is consumed by all three execution contexts
//! (backtest, forward, live) so the rule set cannot drift between them.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub indicators: IndicatorConfig,
    pub entry: EntryConfig,
    pub risk: RiskConfig,
    pub trailing: TrailingConfig,
    pub execution: ExecutionConfig,
    pub persistence: PersistenceConfig,
}

/// Execution mode selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Forward,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Bot version tag for logging and CSV
    pub tag: String,
    /// Execution mode: "backtest", "forward" or "live"
    pub mode: String,
    /// Symbols to trade
    pub symbols: Vec<String>,
    /// Starting capital for the ledger
    pub initial_capital: f64,
    /// Seconds between live/forward evaluation cycles
    pub poll_interval_secs: u64,
}

impl BotConfig {
    pub fn run_mode(&self) -> Result<RunMode> {
        match self.mode.to_lowercase().as_str() {
            "backtest" => Ok(RunMode::Backtest),
            "forward" => Ok(RunMode::Forward),
            "live" => Ok(RunMode::Live),
            other => bail!("Unknown bot.mode '{}' (expected backtest|forward|live)", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    /// Fast moving average window
    pub ma_fast: usize,
    /// Slow moving average window
    pub ma_slow: usize,
    /// RSI period
    pub rsi_period: usize,
    /// MACD fast span
    pub macd_fast: usize,
    /// MACD slow span
    pub macd_slow: usize,
    /// MACD signal span
    pub macd_signal: usize,
    /// ATR period
    pub atr_period: usize,
    /// Maximum bars of history kept per symbol
    pub max_history: usize,
}

impl IndicatorConfig {
    /// Bars required before entries may be evaluated
    pub fn min_lookback(&self) -> usize {
        self.ma_fast
            .max(self.ma_slow)
            .max(self.rsi_period + 1)
            .max(self.macd_slow)
            .max(self.atr_period + 1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    /// Pullback tolerance around the fast MA (e.g. 0.02 = 2%)
    pub fast_tolerance: f64,
    /// Pullback tolerance around the slow MA (e.g. 0.03 = 3%)
    pub slow_tolerance: f64,
    /// Bar-over-bar change floor for the momentum vote (e.g. -0.02)
    pub momentum_floor: f64,
    /// RSI oversold threshold for the momentum vote
    pub rsi_oversold: f64,
    /// Votes required out of the three entry conditions
    pub votes_required: u8,
    /// Initial stop distance below entry (e.g. 0.02 = 2%)
    pub fixed_stop_pct: f64,
    /// Take-profit as a risk-reward multiple; 0 disables take-profit
    pub take_profit_rr: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Fraction of capital risked per trade (e.g. 0.02 = 2%)
    pub risk_fraction: f64,
    /// Maximum position value as a fraction of capital
    pub max_position_fraction: f64,
    /// Never deploy more than this fraction of capital into one position
    pub capital_buffer: f64,
    /// Risk-per-unit below this fraction of entry price is degenerate
    pub min_risk_pct: f64,
    /// Degenerate risk-per-unit is clamped to this fraction of entry price
    pub default_risk_pct: f64,
    /// Minimum tradable size in units; smaller computed sizes mean "no trade"
    pub min_size: f64,
    /// New entries are blocked while ledger drawdown exceeds this
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrailingConfig {
    /// Gain from entry that arms the breakeven stop (e.g. 0.03)
    pub breakeven_trigger: f64,
    /// Gain from entry that arms the first peak lock (e.g. 0.05)
    pub lock_trigger: f64,
    /// Stop as a fraction of peak once the first lock arms (e.g. 0.97)
    pub lock_pct: f64,
    /// Gain from entry that arms the second peak lock (e.g. 0.10)
    pub runner_trigger: f64,
    /// Stop as a fraction of peak once the second lock arms (e.g. 0.95)
    pub runner_pct: f64,
    /// Which MA the trend exit compares against: "fast" or "slow"
    pub trend_exit_ma: String,
}

impl TrailingConfig {
    pub fn trend_exit_uses_fast(&self) -> bool {
        self.trend_exit_ma == "fast"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum fill-status polls per order
    pub fill_poll_attempts: usize,
    /// Delay between fill-status polls in milliseconds
    pub fill_poll_delay_ms: u64,
    /// Maximum bar-feed / broker call attempts
    pub fetch_retries: usize,
    /// Fixed backoff between retries in milliseconds
    pub retry_delay_ms: u64,
    /// Seconds between status-report snapshots in live mode
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory for CSV input/output and state snapshots
    pub data_dir: String,
    /// Enable CSV trade logging
    pub csv_enabled: bool,
    /// File name of the live-state snapshot inside data_dir
    pub state_file: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Bot defaults
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.mode", "backtest")?
            .set_default("bot.symbols", vec!["AAPL", "MSFT", "NVDA", "GOOGL", "META"])?
            .set_default("bot.initial_capital", 10_000.0)?
            .set_default("bot.poll_interval_secs", 60)?
            // Indicator defaults
            .set_default("indicators.ma_fast", 20)?
            .set_default("indicators.ma_slow", 50)?
            .set_default("indicators.rsi_period", 14)?
            .set_default("indicators.macd_fast", 12)?
            .set_default("indicators.macd_slow", 26)?
            .set_default("indicators.macd_signal", 9)?
            .set_default("indicators.atr_period", 14)?
            .set_default("indicators.max_history", 500)?
            // Entry defaults
            .set_default("entry.fast_tolerance", 0.02)?
            .set_default("entry.slow_tolerance", 0.03)?
            .set_default("entry.momentum_floor", -0.02)?
            .set_default("entry.rsi_oversold", 40.0)?
            .set_default("entry.votes_required", 2)?
            .set_default("entry.fixed_stop_pct", 0.02)?
            .set_default("entry.take_profit_rr", 0.0)?
            // Risk defaults
            .set_default("risk.risk_fraction", 0.02)?
            .set_default("risk.max_position_fraction", 0.20)?
            .set_default("risk.capital_buffer", 0.95)?
            .set_default("risk.min_risk_pct", 0.01)?
            .set_default("risk.default_risk_pct", 0.02)?
            .set_default("risk.min_size", 0.01)?
            .set_default("risk.max_drawdown_pct", 0.10)?
            // Trailing defaults
            .set_default("trailing.breakeven_trigger", 0.03)?
            .set_default("trailing.lock_trigger", 0.05)?
            .set_default("trailing.lock_pct", 0.97)?
            .set_default("trailing.runner_trigger", 0.10)?
            .set_default("trailing.runner_pct", 0.95)?
            .set_default("trailing.trend_exit_ma", "slow")?
            // Execution defaults
            .set_default("execution.fill_poll_attempts", 3)?
            .set_default("execution.fill_poll_delay_ms", 1000)?
            .set_default("execution.fetch_retries", 3)?
            .set_default("execution.retry_delay_ms", 5000)?
            .set_default("execution.status_interval_secs", 30)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            .set_default("persistence.state_file", "live_state.json")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (SWINGBOT_*)
            .add_source(Environment::with_prefix("SWINGBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations that cannot produce a sane run. This is the
    /// only place a bad parameter is allowed to abort before trading begins.
    pub fn validate(&self) -> Result<()> {
        self.bot.run_mode()?;
        if self.bot.symbols.is_empty() {
            bail!("bot.symbols must not be empty");
        }
        if self.bot.initial_capital <= 0.0 {
            bail!("bot.initial_capital must be positive");
        }
        if !(0.0..1.0).contains(&self.risk.risk_fraction) || self.risk.risk_fraction == 0.0 {
            bail!("risk.risk_fraction must be in (0, 1)");
        }
        if self.risk.max_position_fraction <= 0.0 || self.risk.max_position_fraction > 1.0 {
            bail!("risk.max_position_fraction must be in (0, 1]");
        }
        if self.entry.fixed_stop_pct <= 0.0 || self.entry.fixed_stop_pct >= 1.0 {
            bail!("entry.fixed_stop_pct must be in (0, 1)");
        }
        if self.entry.votes_required == 0 || self.entry.votes_required > 3 {
            bail!("entry.votes_required must be 1..=3");
        }
        if self.indicators.ma_fast >= self.indicators.ma_slow {
            bail!("indicators.ma_fast must be shorter than indicators.ma_slow");
        }
        if self.indicators.max_history < self.indicators.min_lookback() {
            bail!(
                "indicators.max_history {} is below the required lookback {}",
                self.indicators.max_history,
                self.indicators.min_lookback()
            );
        }
        match self.trailing.trend_exit_ma.as_str() {
            "fast" | "slow" => {}
            other => bail!("trailing.trend_exit_ma '{}' (expected fast|slow)", other),
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} mode={} symbols={:?} capital={:.2} risk={:.3}",
            self.bot.tag,
            self.bot.mode,
            self.bot.symbols,
            self.bot.initial_capital,
            self.risk.risk_fraction
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::base_config;
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_min_lookback_covers_slowest_indicator() {
        let cfg = base_config();
        assert_eq!(cfg.indicators.min_lookback(), 50);
    }

    #[test]
    fn test_bad_mode_rejected() {
        let mut cfg = base_config();
        cfg.bot.mode = "paper".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_ma_windows_rejected() {
        let mut cfg = base_config();
        cfg.indicators.ma_fast = 50;
        cfg.indicators.ma_slow = 20;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_risk_fraction_rejected() {
        let mut cfg = base_config();
        cfg.risk.risk_fraction = 0.0;
        assert!(cfg.validate().is_err());
    }
}
