pub mod messages;
pub mod paper;
pub mod stream;
pub mod traits;
pub mod upbit;

pub use paper::PaperExecution;
pub use stream::{SpikeRules, UpbitTradeStream, VolumeSpikeDetector};
pub use traits::{CandleSource, ExecutionClient, MarketData, MarketNotFound, StreamClient};
pub use upbit::UpbitClient;
