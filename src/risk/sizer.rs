//! Order sizing: score-proportional allocation and order-book depth bounds.

use crate::config::{SizingConfig, SlippagePolicy};
use crate::types::{BookLevel, OrderBook};
use crate::utils::precision::{decimal_from_f64, floor_volume};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum EntrySize {
    Accept(Decimal),
    /// Cut down to the depth bound.
    Shrunk { amount: Decimal, requested: Decimal },
    Rejected { amount: Decimal, depth: Decimal },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    /// Quantities to sell in sequence; they sum to the position quantity.
    pub chunks: Vec<Decimal>,
    pub pause: Duration,
}

pub struct OrderSizer {
    cfg: SizingConfig,
    min_order_value: Decimal,
}

fn depth(levels: &[BookLevel], n: usize) -> Decimal {
    levels.iter().take(n).map(BookLevel::notional).sum()
}

impl OrderSizer {
    pub fn new(cfg: SizingConfig, min_order_value: Decimal) -> Self {
        Self {
            cfg,
            min_order_value,
        }
    }

    /// Linear interpolation of the base amount between the multipliers at
    /// `base_score` and `max_score`, floored at the minimum order value and
    /// rounded down to whole quote units.
    pub fn score_sized_amount(&self, score: f64) -> Decimal {
        let cfg = &self.cfg;
        let span = cfg.max_score - cfg.base_score;
        let t = if span > 0.0 {
            ((score - cfg.base_score) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let mult = cfg.min_multiplier + t * (cfg.max_multiplier - cfg.min_multiplier);
        let amount = (cfg.base_invest * decimal_from_f64(mult)).floor();
        amount.max(self.min_order_value)
    }

    fn depth_bound(&self, levels: &[BookLevel]) -> Decimal {
        depth(levels, self.cfg.book_depth_levels) * decimal_from_f64(self.cfg.max_depth_fraction)
    }

    /// Checks an entry amount against the top ask levels.
    pub fn fit_to_book(&self, amount: Decimal, book: &OrderBook) -> EntrySize {
        if book.asks.is_empty() {
            warn!(market = %book.market, "empty order book, depth check skipped");
            return EntrySize::Accept(amount);
        }
        let bound = self.depth_bound(&book.asks);
        if amount <= bound {
            return EntrySize::Accept(amount);
        }
        let total_depth = depth(&book.asks, self.cfg.book_depth_levels);
        match self.cfg.slippage_policy {
            SlippagePolicy::Shrink if bound.floor() >= self.min_order_value => EntrySize::Shrunk {
                amount: bound.floor(),
                requested: amount,
            },
            _ => EntrySize::Rejected {
                amount,
                depth: total_depth,
            },
        }
    }

    /// Splits an exit into equal chunks when the bid side is thin relative to
    /// the position notional. The last chunk carries the rounding remainder.
    pub fn plan_exit(&self, quantity: Decimal, price: Decimal, book: &OrderBook) -> ExitPlan {
        let pause = Duration::from_millis(self.cfg.exit_chunk_pause_ms);
        let single = ExitPlan {
            chunks: vec![quantity],
            pause,
        };
        if book.bids.is_empty() || quantity <= Decimal::ZERO {
            return single;
        }
        let bound = self.depth_bound(&book.bids);
        let notional = quantity * price;
        if notional <= bound || bound <= Decimal::ZERO {
            return single;
        }

        let ratio = notional / depth(&book.bids, self.cfg.book_depth_levels);
        let needed = (ratio / decimal_from_f64(self.cfg.max_depth_fraction)).ceil();
        let mut count = needed
            .to_usize()
            .unwrap_or(self.cfg.max_exit_chunks)
            .clamp(1, self.cfg.max_exit_chunks.max(1));

        // every chunk must still be a valid order
        while count > 1 && (quantity / Decimal::from(count as u64)) * price < self.min_order_value {
            count -= 1;
        }

        let slice = floor_volume(quantity / Decimal::from(count as u64));
        let mut chunks = vec![slice; count - 1];
        chunks.push(quantity - slice * Decimal::from((count - 1) as u64));
        ExitPlan { chunks, pause }
    }
}
