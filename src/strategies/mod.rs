pub mod regime;
pub mod scorer;
pub mod traits;

pub use scorer::SignalScorer;
pub use traits::Strategy;
