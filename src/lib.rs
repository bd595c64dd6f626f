//! Signal-scoring and position-management engine for spot crypto markets.

pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod indicators;
pub mod risk;
pub mod storage;
pub mod strategies;
pub mod tui;
pub mod types;
pub mod utils;

pub use error::{EngineError, EngineResult};
