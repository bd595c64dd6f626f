pub mod guard;
pub mod sizer;

pub use guard::{Admission, Denial, EntryRequest, PortfolioState, RiskGuard};
pub use sizer::{EntrySize, ExitPlan, OrderSizer};
