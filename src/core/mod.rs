pub mod engine;
pub mod lifecycle;
pub mod position;
pub mod retry;

pub use engine::{EnginePorts, TradingEngine};
pub use lifecycle::{ExitAction, PartialTrigger, PositionLifecycleManager};
pub use position::{ExitReason, Phase, Position};
pub use retry::{retry_with_backoff, RetryPolicy};
