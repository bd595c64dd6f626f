// src/config.rs

use crate::error::EngineError;
use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub mfi_period: usize,
    pub mfi_oversold: f64,
    pub mfi_overbought: f64,
    pub adx_period: usize,
    pub adx_strong_trend: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub ma_short: usize,
    pub ma_long: usize,
    pub ma_trend: usize,
    pub stoch_period: usize,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    pub atr_period: usize,
    pub volume_avg_period: usize,
    pub volume_surge_ratio: f64,
    /// Shortest window a market is evaluated on at all.
    pub min_candles: usize,
    pub htf_ma_period: usize,
    pub fast_rsi_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            mfi_period: 14,
            mfi_oversold: 20.0,
            mfi_overbought: 80.0,
            adx_period: 14,
            adx_strong_trend: 25.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std_dev: 2.0,
            ma_short: 20,
            ma_long: 50,
            ma_trend: 100,
            stoch_period: 14,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            atr_period: 14,
            volume_avg_period: 20,
            volume_surge_ratio: 2.0,
            min_candles: 50,
            htf_ma_period: 20,
            fast_rsi_period: 14,
        }
    }
}

/// Base indicator weights. The default table sums to 100.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct WeightTable {
    pub rsi: f64,
    pub mfi: f64,
    pub adx: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub ma: f64,
    pub stochastic: f64,
    pub volume: f64,
    pub obv: f64,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            rsi: 12.0,
            mfi: 13.0,
            adx: 10.0,
            macd: 18.0,
            bollinger: 17.0,
            ma: 10.0,
            stochastic: 10.0,
            volume: 10.0,
            obv: 0.0,
        }
    }
}

impl WeightTable {
    pub fn total(&self) -> f64 {
        self.rsi
            + self.mfi
            + self.adx
            + self.macd
            + self.bollinger
            + self.ma
            + self.stochastic
            + self.volume
            + self.obv
    }

    fn entries(&self) -> [(&'static str, f64); 9] {
        [
            ("rsi", self.rsi),
            ("mfi", self.mfi),
            ("adx", self.adx),
            ("macd", self.macd),
            ("bollinger", self.bollinger),
            ("ma", self.ma),
            ("stochastic", self.stochastic),
            ("volume", self.volume),
            ("obv", self.obv),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub dynamic_weights: bool,
    pub trending_adx: f64,
    pub ranging_adx: f64,
    pub htf_trend_bonus: f64,
    /// Entry threshold handed to the risk guard.
    pub min_score: f64,
    pub alert_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            dynamic_weights: true,
            trending_adx: 25.0,
            ranging_adx: 20.0,
            htf_trend_bonus: 5.0,
            min_score: 70.0,
            alert_threshold: 75.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub trading_enabled: bool,
    pub max_positions: usize,
    pub max_total_invest: Decimal,
    pub daily_loss_limit: Decimal,
    pub cooldown_minutes: i64,
    pub reentry_cooldown_minutes: i64,
    pub spike_fresh_minutes: i64,
    pub min_order_value: Decimal,
    /// Offset of the local trading day from UTC (daily P&L rollover).
    pub utc_offset_hours: i32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            max_positions: 3,
            max_total_invest: Decimal::from(300_000),
            daily_loss_limit: Decimal::from(30_000),
            cooldown_minutes: 60,
            reentry_cooldown_minutes: 10,
            spike_fresh_minutes: 5,
            min_order_value: Decimal::from(5_000),
            utc_offset_hours: 9,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlippagePolicy {
    Reject,
    Shrink,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SizingConfig {
    pub base_invest: Decimal,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub base_score: f64,
    pub max_score: f64,
    pub book_depth_levels: usize,
    pub max_depth_fraction: f64,
    pub slippage_policy: SlippagePolicy,
    pub max_exit_chunks: usize,
    pub exit_chunk_pause_ms: u64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_invest: Decimal::from(100_000),
            min_multiplier: 0.5,
            max_multiplier: 1.5,
            base_score: 70.0,
            max_score: 90.0,
            book_depth_levels: 5,
            max_depth_fraction: 0.3,
            slippage_policy: SlippagePolicy::Reject,
            max_exit_chunks: 5,
            exit_chunk_pause_ms: 1_500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    Atr,
    Percent,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct PartialStage {
    pub trigger_percent: f64,
    /// Fraction of the quantity still held when the stage fires.
    pub sell_ratio: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExitConfig {
    pub stop_mode: StopMode,
    pub stop_loss_percent: f64,
    pub atr_stop_multiplier: f64,
    pub take_profit_percent: Option<f64>,
    pub break_even_trigger: f64,
    pub break_even_offset: f64,
    pub partial_stages: Vec<PartialStage>,
    pub trailing_trigger: f64,
    pub trailing_floor_offset: f64,
    pub trailing_percent: f64,
    pub big_profit_threshold: f64,
    pub big_profit_trailing_percent: f64,
    pub overbought_exit: bool,
    pub overbought_min_profit: f64,
    pub overbought_rsi: f64,
    pub overbought_sell_ratio: f64,
    pub max_hold_hours: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_mode: StopMode::Atr,
            stop_loss_percent: 3.0,
            atr_stop_multiplier: 2.0,
            take_profit_percent: None,
            break_even_trigger: 1.5,
            break_even_offset: 0.1,
            partial_stages: vec![
                PartialStage {
                    trigger_percent: 2.0,
                    sell_ratio: 0.3,
                },
                PartialStage {
                    trigger_percent: 5.0,
                    sell_ratio: 0.429,
                },
            ],
            trailing_trigger: 3.0,
            trailing_floor_offset: 0.5,
            trailing_percent: 3.0,
            big_profit_threshold: 10.0,
            big_profit_trailing_percent: 5.0,
            overbought_exit: true,
            overbought_min_profit: 5.0,
            overbought_rsi: 80.0,
            overbought_sell_ratio: 0.5,
            max_hold_hours: 24.0,
        }
    }
}

/// Per-style overrides. Every field left out falls back to the base value.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StyleOverrides {
    pub name: Option<String>,
    pub candle_unit: Option<u32>,
    pub candle_count: Option<usize>,
    pub min_score: Option<f64>,
    pub alert_threshold: Option<f64>,
    pub stop_mode: Option<StopMode>,
    pub stop_loss_percent: Option<f64>,
    pub atr_stop_multiplier: Option<f64>,
    pub trailing_percent: Option<f64>,
    pub max_hold_hours: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub version: u32,
    /// Candle granularity in minutes.
    pub candle_unit: u32,
    pub candle_count: usize,
    pub active_style: Option<String>,
    pub indicators: IndicatorParams,
    pub weights: WeightTable,
    pub scoring: ScoringConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub exits: ExitConfig,
    pub styles: BTreeMap<String, StyleOverrides>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            version: 1,
            candle_unit: 60,
            candle_count: 100,
            active_style: None,
            indicators: IndicatorParams::default(),
            weights: WeightTable::default(),
            scoring: ScoringConfig::default(),
            risk: RiskConfig::default(),
            sizing: SizingConfig::default(),
            exits: ExitConfig::default(),
            styles: BTreeMap::new(),
        }
    }
}

/// Flat, fully-resolved view used for one evaluation. Never written back.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub style: String,
    pub candle_unit: u32,
    pub candle_count: usize,
    pub indicators: IndicatorParams,
    pub weights: WeightTable,
    pub scoring: ScoringConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub exits: ExitConfig,
}

impl StrategyConfig {
    /// Layered resolution: style override > base value.
    pub fn resolve(&self, style: Option<&str>) -> Result<EffectiveConfig, EngineError> {
        let mut effective = EffectiveConfig {
            style: "base".to_string(),
            candle_unit: self.candle_unit,
            candle_count: self.candle_count,
            indicators: self.indicators.clone(),
            weights: self.weights,
            scoring: self.scoring.clone(),
            risk: self.risk.clone(),
            sizing: self.sizing.clone(),
            exits: self.exits.clone(),
        };

        let Some(key) = style else {
            return Ok(effective);
        };
        let overrides = self.styles.get(key).ok_or_else(|| {
            EngineError::ConfigurationFatal(format!("unknown trading style `{}`", key))
        })?;

        effective.style = overrides.name.clone().unwrap_or_else(|| key.to_string());
        if let Some(v) = overrides.candle_unit {
            effective.candle_unit = v;
        }
        if let Some(v) = overrides.candle_count {
            effective.candle_count = v;
        }
        if let Some(v) = overrides.min_score {
            effective.scoring.min_score = v;
        }
        if let Some(v) = overrides.alert_threshold {
            effective.scoring.alert_threshold = v;
        }
        if let Some(v) = overrides.stop_mode {
            effective.exits.stop_mode = v;
        }
        if let Some(v) = overrides.stop_loss_percent {
            effective.exits.stop_loss_percent = v;
        }
        if let Some(v) = overrides.atr_stop_multiplier {
            effective.exits.atr_stop_multiplier = v;
        }
        if let Some(v) = overrides.trailing_percent {
            effective.exits.trailing_percent = v;
        }
        if let Some(v) = overrides.max_hold_hours {
            effective.exits.max_hold_hours = v;
        }
        Ok(effective)
    }

    pub fn resolve_active(&self) -> Result<EffectiveConfig, EngineError> {
        self.resolve(self.active_style.as_deref())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub scan_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub monitor_pause_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub spike_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 180,
            monitor_interval_secs: 30,
            batch_size: 3,
            batch_pause_ms: 500,
            monitor_pause_ms: 200,
            request_timeout_ms: 5_000,
            retry_attempts: 3,
            retry_backoff_ms: 1_000,
            spike_channel_capacity: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub watch_markets: Vec<String>,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
    #[serde(default)]
    pub tui: bool,
    #[serde(default = "default_true")]
    pub use_volume_stream: bool,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

fn default_storage_dir() -> String {
    "data".to_string()
}

fn default_paper_balance() -> Decimal {
    Decimal::from(1_000_000)
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn new() -> Result<Self, EngineError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings"))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> Result<Self, EngineError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fatal = |msg: String| -> Result<(), EngineError> {
            Err(EngineError::ConfigurationFatal(msg))
        };

        if self.watch_markets.is_empty() {
            return fatal("watch_markets must not be empty".into());
        }

        let strategy = &self.strategy;
        if let Some((name, w)) = strategy.weights.entries().iter().find(|(_, w)| *w < 0.0) {
            return fatal(format!("weight `{}` is negative ({})", name, w));
        }
        if strategy.weights.total() <= 0.0 {
            return fatal("weight table sums to zero".into());
        }

        let exits = &strategy.exits;
        let first_partial = exits
            .partial_stages
            .first()
            .map(|s| s.trigger_percent)
            .unwrap_or(exits.trailing_trigger);
        if !(exits.break_even_trigger <= first_partial && first_partial <= exits.trailing_trigger)
        {
            return fatal(format!(
                "exit thresholds must ascend: break-even {} <= first partial {} <= trailing {}",
                exits.break_even_trigger, first_partial, exits.trailing_trigger
            ));
        }
        if exits
            .partial_stages
            .windows(2)
            .any(|w| w[1].trigger_percent < w[0].trigger_percent)
        {
            return fatal("partial_stages must be ordered by trigger".into());
        }
        let ratio_ok = |r: f64| r > 0.0 && r < 1.0;
        if !exits.partial_stages.iter().all(|s| ratio_ok(s.sell_ratio))
            || !ratio_ok(exits.overbought_sell_ratio)
        {
            return fatal("partial sell ratios must lie in (0, 1)".into());
        }
        if exits.trailing_percent <= 0.0 || exits.big_profit_trailing_percent <= 0.0 {
            return fatal("trailing percents must be positive".into());
        }

        let sizing = &strategy.sizing;
        if sizing.max_score <= sizing.base_score || sizing.max_multiplier < sizing.min_multiplier {
            return fatal("sizing score/multiplier bounds are inverted".into());
        }
        if !(sizing.max_depth_fraction > 0.0 && sizing.max_depth_fraction <= 1.0) {
            return fatal("max_depth_fraction must lie in (0, 1]".into());
        }

        if let Some(style) = strategy.active_style.as_deref() {
            strategy.resolve(Some(style))?;
        }
        Ok(())
    }
}
