// src/error.rs
use thiserror::Error;

/// Failure taxonomy of the decision engine.
///
/// Everything except `ConfigurationFatal` is contained at the market or tick
/// that produced it: the scan moves on to the next market, the monitor leaves
/// the position untouched and re-decides on the next tick.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Candle window too short for evaluation. Skip the market this cycle.
    #[error("insufficient data for {market}: have {have} candles, need {need}")]
    DataInsufficient {
        market: String,
        have: usize,
        need: usize,
    },

    /// Network, timeout or rate-limit failure that survived the retry budget.
    #[error("exchange call `{op}` failed after {attempts} attempts: {reason}")]
    TransientApi {
        op: String,
        attempts: u32,
        reason: String,
    },

    /// The exchange does not list the market. Not retried.
    #[error("unknown market {market}")]
    UnknownMarket { market: String },

    /// Order placement failed. Position state is left as it was.
    #[error("execution failed for {market}: {reason}")]
    Execution { market: String, reason: String },

    /// Startup-only: invalid or missing configuration.
    #[error("configuration error: {0}")]
    ConfigurationFatal(String),

    /// Persisted state that cannot be reconciled with live data.
    #[error("state corruption for {market}: {reason}")]
    StateCorruption { market: String, reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::ConfigurationFatal(_))
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigurationFatal(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
