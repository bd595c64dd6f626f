// src/core/engine.rs
use crate::config::{AppConfig, EffectiveConfig};
use crate::connectors::traits::{CandleSource, ExecutionClient, MarketData};
use crate::core::lifecycle::{ExitAction, PositionLifecycleManager};
use crate::core::position::Position;
use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::error::{EngineError, EngineResult};
use crate::indicators::{self, compute_snapshot, higher_timeframe_trend, IndicatorSnapshot};
use crate::risk::{EntryRequest, EntrySize, OrderSizer, PortfolioState, RiskGuard};
use crate::storage::{PersistenceStore, StatsPeriod, TradeStats};
use crate::strategies::Strategy;
use crate::types::{OrderBook, Signal, TradeKind, TradeRecord, UiEvent, VolumeSpikeEvent};
use crate::utils::precision::decimal_from_f64;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Minute unit for the fast overbought oscillator.
const FAST_RSI_UNIT: u32 = 1;

/// The exchange-facing collaborators of the engine.
#[derive(Clone)]
pub struct EnginePorts {
    pub candles: Arc<dyn CandleSource>,
    pub market_data: Arc<dyn MarketData>,
    pub execution: Arc<dyn ExecutionClient>,
    pub store: Arc<dyn PersistenceStore>,
}

enum Wakeup {
    Scan,
    Monitor,
    Spike(VolumeSpikeEvent),
    SpikesClosed,
    Shutdown,
}

async fn next_spike(rx: &mut Option<mpsc::Receiver<VolumeSpikeEvent>>) -> Option<VolumeSpikeEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Single owner of the portfolio. Scans, monitoring ticks and spike events
/// are handled one at a time on the engine task.
pub struct TradingEngine<S> {
    config: AppConfig,
    effective: EffectiveConfig,
    ports: EnginePorts,
    strategy: S,
    guard: RiskGuard,
    sizer: OrderSizer,
    lifecycle: PositionLifecycleManager,
    retry: RetryPolicy,
    state: PortfolioState,
    /// Loaded positions that failed validation. Persisted untouched, never traded.
    quarantined: Vec<Position>,
    last_prices: HashMap<String, Decimal>,
    spike_receiver: Option<mpsc::Receiver<VolumeSpikeEvent>>,
    ui_sender: mpsc::Sender<UiEvent>,
}

impl<S> TradingEngine<S>
where
    S: Strategy,
{
    pub fn new(
        config: AppConfig,
        ports: EnginePorts,
        strategy: S,
        ui_sender: mpsc::Sender<UiEvent>,
    ) -> EngineResult<Self> {
        let effective = config.strategy.resolve_active()?;
        let min_order = effective.risk.min_order_value;
        Ok(Self {
            guard: RiskGuard::new(effective.risk.clone(), effective.scoring.min_score),
            sizer: OrderSizer::new(effective.sizing.clone(), min_order),
            lifecycle: PositionLifecycleManager::new(effective.exits.clone(), min_order),
            retry: RetryPolicy::from_scheduler(&config.scheduler),
            state: PortfolioState::new(Utc::now(), effective.risk.utc_offset_hours),
            quarantined: Vec::new(),
            last_prices: HashMap::new(),
            spike_receiver: None,
            config,
            effective,
            ports,
            strategy,
            ui_sender,
        })
    }

    pub fn with_spikes(mut self, receiver: mpsc::Receiver<VolumeSpikeEvent>) -> Self {
        self.spike_receiver = Some(receiver);
        self
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.state.positions.values()
    }

    fn send_ui_event(&self, event: UiEvent) {
        match self.ui_sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("UI channel closed");
            }
        }
    }

    // --- Persistence ---

    /// Restores open positions, today's realised P&L and the cooldown marks.
    /// Positions that fail validation or whose market is no longer listed are
    /// quarantined. A ticker outage does not quarantine: the position is
    /// restored and the monitor retries on its next tick.
    pub async fn load_state(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.state.roll_day(now);
        let store = &self.ports.store;
        let loaded = retry_with_backoff(&self.retry, "load_positions", move || store.load_open_positions())
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        for mut pos in loaded {
            if let Err(e) = pos.validate() {
                warn!("{}; excluded from monitoring", e);
                self.quarantined.push(pos);
                continue;
            }
            match self.fetch_ticker_price(&pos.market).await {
                Ok(price) => {
                    self.last_prices.insert(pos.market.clone(), price);
                }
                Err(EngineError::UnknownMarket { market }) => {
                    let err = EngineError::StateCorruption {
                        market,
                        reason: "market no longer listed".into(),
                    };
                    warn!("{}; excluded from monitoring", err);
                    self.quarantined.push(pos);
                    continue;
                }
                Err(e) => {
                    warn!(market = %pos.market, "no live price at startup, monitoring anyway: {}", e);
                }
            }
            self.lifecycle.restore(&mut pos);
            info!(market = %pos.market, qty = %pos.quantity, stop = %pos.stop_loss_price, phase = pos.phase().as_str(), "restored position");
            self.state.record_entry(pos);
        }

        match self.ports.store.load_trades().await {
            Ok(ledger) => self.state.restore_marks(&ledger),
            Err(e) => warn!("trade ledger unreadable, cooldowns start empty: {}", e),
        }

        let day = self.state.trading_day;
        let store = &self.ports.store;
        self.state.daily_pnl = retry_with_backoff(&self.retry, "load_daily_pnl", move || store.load_daily_pnl(day))
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        info!(
            positions = self.state.positions.len(),
            quarantined = self.quarantined.len(),
            daily_pnl = %self.state.daily_pnl,
            "state loaded"
        );
        Ok(())
    }

    async fn save_positions(&self) {
        let snapshot: Vec<Position> = self
            .state
            .positions
            .values()
            .chain(self.quarantined.iter())
            .cloned()
            .collect();
        let store = &self.ports.store;
        let snapshot = &snapshot;
        if let Err(e) =
            retry_with_backoff(&self.retry, "save_positions", move || store.save_open_positions(snapshot)).await
        {
            error!("Failed to save positions: {}", e);
            self.send_ui_event(UiEvent::Log(format!("persistence failure: {}", e)));
        }
    }

    /// A retried append may land twice; the store drops the duplicate line on read.
    async fn save_trade(&self, record: &TradeRecord) {
        let store = &self.ports.store;
        if let Err(e) = retry_with_backoff(&self.retry, "append_trade", move || store.append_trade(record)).await {
            error!("Failed to append trade: {}", e);
            self.send_ui_event(UiEvent::Log(format!("persistence failure: {}", e)));
        }
    }

    async fn save_daily_pnl(&self) {
        let store = &self.ports.store;
        let (day, pnl) = (self.state.trading_day, self.state.daily_pnl);
        if let Err(e) =
            retry_with_backoff(&self.retry, "save_daily_pnl", move || store.save_daily_pnl(day, pnl)).await
        {
            error!("Failed to save daily P&L: {}", e);
        }
    }

    async fn log_stats(&self, now: DateTime<Utc>) {
        let records = match self.ports.store.load_trades().await {
            Ok(records) => records,
            Err(e) => {
                warn!("trade ledger unreadable: {}", e);
                return;
            }
        };
        let offset = self.effective.risk.utc_offset_hours;
        for period in [StatsPeriod::Today, StatsPeriod::Week, StatsPeriod::Month, StatsPeriod::All] {
            let stats = TradeStats::from_records(&records, period.since(now, offset));
            info!(
                ?period,
                trades = stats.trades,
                win_rate = stats.win_rate,
                total_pnl = %stats.total_pnl,
                avg_pnl_percent = stats.avg_pnl_percent,
                "trade stats"
            );
        }
    }

    // --- Market data ---

    async fn fetch_ticker_price(&self, market: &str) -> EngineResult<Decimal> {
        let md = &self.ports.market_data;
        let ticker = retry_with_backoff(&self.retry, "ticker", move || md.get_ticker(market)).await?;
        Ok(ticker.price)
    }

    async fn fetch_book(&self, market: &str) -> OrderBook {
        let md = &self.ports.market_data;
        let depth = self.effective.sizing.book_depth_levels;
        match retry_with_backoff(&self.retry, "orderbook", move || md.get_book(market, depth)).await {
            Ok(book) => book,
            Err(e) => {
                warn!(%market, "order book unavailable: {}", e);
                OrderBook {
                    market: market.to_string(),
                    ..OrderBook::default()
                }
            }
        }
    }

    /// Candles, indicators, daily trend filter and score for one market.
    async fn evaluate(&self, market: &str) -> EngineResult<(IndicatorSnapshot, Signal)> {
        let src = &self.ports.candles;
        let (unit, count) = (self.effective.candle_unit, self.effective.candle_count);
        let candles =
            retry_with_backoff(&self.retry, "candles", move || src.get_candles(market, unit, count)).await?;
        let params = &self.effective.indicators;
        let snapshot = compute_snapshot(market, &candles, params)?;

        let htf_count = params.htf_ma_period + 1;
        let htf = match retry_with_backoff(&self.retry, "daily_candles", move || {
            src.get_daily_candles(market, htf_count)
        })
        .await
        {
            Ok(daily) => {
                let closes: Vec<f64> = daily.iter().map(|c| c.close).collect();
                higher_timeframe_trend(&closes, params.htf_ma_period)
            }
            Err(e) => {
                debug!(%market, "daily candles unavailable, trend filter open: {}", e);
                higher_timeframe_trend(&[], params.htf_ma_period)
            }
        };

        let signal = self.strategy.evaluate(&snapshot, htf);
        Ok((snapshot, signal))
    }

    // --- Scan ---

    /// One pass over the watch list in fixed-size batches.
    pub async fn scan_once(&mut self, now: DateTime<Utc>) {
        self.state.roll_day(now);
        let markets = self.config.watch_markets.clone();
        let batch_size = self.config.scheduler.batch_size.max(1);
        let pause = Duration::from_millis(self.config.scheduler.batch_pause_ms);

        for (i, batch) in markets.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            let results = join_all(batch.iter().map(|m| self.evaluate(m))).await;
            for (market, result) in batch.iter().zip(results) {
                match result {
                    Ok((snapshot, signal)) => self.consider_entry(&snapshot, signal, now).await,
                    Err(e @ EngineError::DataInsufficient { .. }) => debug!("{}", e),
                    Err(e) => warn!(%market, "scan skipped: {}", e),
                }
            }
        }
    }

    /// Evaluates a spiking market right away instead of waiting for the scan.
    pub async fn handle_spike(&mut self, spike: VolumeSpikeEvent, now: DateTime<Utc>) {
        self.state.roll_day(now);
        self.state.record_spike(&spike.market, spike.at);
        self.send_ui_event(UiEvent::Log(format!(
            "volume spike {} x{:.1}",
            spike.market, spike.ratio
        )));
        match self.evaluate(&spike.market).await {
            Ok((snapshot, signal)) => self.consider_entry(&snapshot, signal, now).await,
            Err(e) => warn!(market = %spike.market, "spike evaluation failed: {}", e),
        }
    }

    async fn consider_entry(&mut self, snapshot: &IndicatorSnapshot, signal: Signal, now: DateTime<Utc>) {
        let market = signal.market.clone();
        let score = signal.score;
        if score >= self.effective.scoring.alert_threshold {
            info!(%market, score, tier = ?signal.tier, "signal");
        }
        self.send_ui_event(UiEvent::Signal(signal));
        if score < self.effective.scoring.min_score {
            return;
        }

        let proposed = self.sizer.score_sized_amount(score);
        let exec = &self.ports.execution;
        let available_capital = match retry_with_backoff(&self.retry, "balance", move || exec.quote_balance()).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(%market, "balance unavailable: {}", e);
                return;
            }
        };

        let request = EntryRequest {
            market: &market,
            score,
            proposed,
            available_capital,
            now,
        };
        let admission = match self.guard.admit(&self.state, &request) {
            Ok(a) => a,
            Err(denial) => {
                debug!(%market, "entry denied: {}", denial);
                self.send_ui_event(UiEvent::Denied {
                    market,
                    reason: denial.to_string(),
                });
                return;
            }
        };

        let amount = proposed.min(admission.available).floor();
        let book = self.fetch_book(&market).await;
        let amount = match self.sizer.fit_to_book(amount, &book) {
            EntrySize::Accept(a) => a,
            EntrySize::Shrunk { amount, requested } => {
                info!(%market, %requested, %amount, "entry shrunk to book depth");
                amount
            }
            EntrySize::Rejected { amount, depth } => {
                info!(%market, %amount, %depth, "entry rejected, book too thin");
                self.send_ui_event(UiEvent::Denied {
                    market,
                    reason: "insufficient book depth".into(),
                });
                return;
            }
        };

        let order = match self.ports.execution.buy_market(&market, amount).await {
            Ok(order) if !order.filled_qty.is_zero() => order,
            Ok(order) => {
                error!(%market, order_id = %order.id, "buy returned no fill");
                return;
            }
            Err(e) => {
                let err = EngineError::Execution {
                    market: market.clone(),
                    reason: format!("{:#}", e),
                };
                error!("{}", err);
                self.send_ui_event(UiEvent::Log(err.to_string()));
                return;
            }
        };

        let fill = order
            .avg_price
            .unwrap_or_else(|| decimal_from_f64(snapshot.close));
        let invested = fill * order.filled_qty;
        let atr = snapshot.atr.map(|a| a.atr);
        let position = self
            .lifecycle
            .open(&market, fill, order.filled_qty, invested, score, atr, now);
        info!(
            %market, price = %fill, qty = %position.quantity, stop = %position.stop_loss_price, score,
            "position opened"
        );

        let record = TradeRecord {
            kind: TradeKind::Buy,
            market: market.clone(),
            entry_price: fill,
            exit_price: None,
            quantity: order.filled_qty,
            amount: invested,
            pnl: Decimal::ZERO,
            pnl_percent: 0.0,
            reason: format!("score {:.0}", score),
            order_id: order.id,
            timestamp: now,
        };
        self.state.record_entry(position);
        self.last_prices.insert(market, fill);
        self.save_trade(&record).await;
        self.save_positions().await;
        self.send_ui_event(UiEvent::Entered(record));
    }

    // --- Monitor ---

    /// One lifecycle tick for every open position.
    pub async fn monitor_once(&mut self, now: DateTime<Utc>) {
        if self.state.roll_day(now) {
            self.save_daily_pnl().await;
        }
        let markets: Vec<String> = self.state.positions.keys().cloned().collect();
        let pause = Duration::from_millis(self.config.scheduler.monitor_pause_ms);

        for (i, market) in markets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            if let Err(e) = self.monitor_position(market, now).await {
                warn!(%market, "monitor tick skipped: {}", e);
            }
        }

        let positions = self
            .state
            .positions
            .values()
            .map(|p| p.view(self.last_prices.get(&p.market).copied().unwrap_or(p.entry_price)))
            .collect();
        self.send_ui_event(UiEvent::Portfolio {
            positions,
            daily_pnl: self.state.daily_pnl,
        });
    }

    async fn fast_oscillator(&self, market: &str) -> Option<f64> {
        let src = &self.ports.candles;
        let period = self.effective.indicators.fast_rsi_period;
        let count = (period * 3).max(period + 1);
        match retry_with_backoff(&self.retry, "fast_candles", move || {
            src.get_candles(market, FAST_RSI_UNIT, count)
        })
        .await
        {
            Ok(candles) => {
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                indicators::fast_rsi(&closes, period)
            }
            Err(e) => {
                debug!(%market, "fast oscillator unavailable: {}", e);
                None
            }
        }
    }

    async fn monitor_position(&mut self, market: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let price = self.fetch_ticker_price(market).await?;
        self.last_prices.insert(market.to_string(), price);

        let wants_oscillator = match self.state.positions.get(market) {
            Some(pos) => self.lifecycle.wants_oscillator(pos, price),
            None => return Ok(()),
        };
        let fast_rsi = if wants_oscillator {
            self.fast_oscillator(market).await
        } else {
            None
        };

        let Some(pos) = self.state.positions.get_mut(market) else {
            return Ok(());
        };
        let before = pos.clone();
        let action = self.lifecycle.on_tick(pos, price, fast_rsi, now);
        let quantity = pos.quantity;
        let stops_moved = *pos != before;

        match &action {
            ExitAction::Hold => {
                if stops_moved {
                    self.save_positions().await;
                }
            }
            ExitAction::Partial { quantity: qty, reason, .. } => {
                info!(%market, %price, qty = %qty, reason = %reason, "partial exit");
                self.execute_exit(market, &action, vec![*qty], Duration::ZERO, price, now)
                    .await;
            }
            ExitAction::Close { reason } => {
                info!(%market, %price, reason = %reason, "closing position");
                let book = self.fetch_book(market).await;
                let plan = self.sizer.plan_exit(quantity, price, &book);
                if plan.chunks.len() > 1 {
                    info!(%market, chunks = plan.chunks.len(), "thin bids, exit split");
                }
                self.execute_exit(market, &action, plan.chunks, plan.pause, price, now)
                    .await;
            }
        }
        Ok(())
    }

    /// Sells `chunks` in sequence and settles each fill. A failed order stops
    /// the sequence; whatever was not sold stays open for the next tick.
    async fn execute_exit(
        &mut self,
        market: &str,
        action: &ExitAction,
        chunks: Vec<Decimal>,
        pause: Duration,
        price: Decimal,
        now: DateTime<Utc>,
    ) {
        let mut realized = false;
        for (i, qty) in chunks.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            let order = match self.ports.execution.sell_market(market, qty).await {
                Ok(order) => order,
                Err(e) => {
                    let err = EngineError::Execution {
                        market: market.to_string(),
                        reason: format!("{:#}", e),
                    };
                    error!("{}", err);
                    self.send_ui_event(UiEvent::Log(err.to_string()));
                    break;
                }
            };

            let Some(pos) = self.state.positions.get_mut(market) else {
                break;
            };
            let fill = order.avg_price.unwrap_or(price);
            let Some(record) = self
                .lifecycle
                .settle(pos, action, order.filled_qty, fill, &order.id, now)
            else {
                break;
            };
            info!(
                %market, kind = ?record.kind, qty = %record.quantity, pnl = %record.pnl,
                pnl_percent = record.pnl_percent, reason = %record.reason, "exit filled"
            );
            self.state.record_realized(record.pnl);
            realized = true;
            self.save_trade(&record).await;
            self.send_ui_event(UiEvent::Exited(record));
        }

        let closed = self
            .state
            .positions
            .get(market)
            .map_or(false, |p| p.quantity <= Decimal::ZERO);
        if closed {
            if let Some(pos) = self.state.record_close(market, now) {
                info!(%market, realized = %pos.realized_pnl, "position closed");
            }
            self.last_prices.remove(market);
        }
        self.save_positions().await;
        if realized {
            self.save_daily_pnl().await;
        }
    }

    // --- Loop ---

    /// Drives scans, monitoring ticks and spike events until Ctrl+C.
    /// Call `load_state` first.
    pub async fn run(&mut self) -> EngineResult<()> {
        info!("Engine starting...");
        let mut scan = tokio::time::interval(Duration::from_secs(self.config.scheduler.scan_interval_secs.max(1)));
        let mut monitor =
            tokio::time::interval(Duration::from_secs(self.config.scheduler.monitor_interval_secs.max(1)));
        scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        self.log_stats(Utc::now()).await;
        info!(
            strategy = self.strategy.name(),
            style = %self.effective.style,
            markets = self.config.watch_markets.len(),
            "Engine loop running"
        );
        loop {
            let wakeup = tokio::select! {
                _ = &mut shutdown => Wakeup::Shutdown,
                _ = monitor.tick() => Wakeup::Monitor,
                _ = scan.tick() => Wakeup::Scan,
                spike = next_spike(&mut self.spike_receiver) => match spike {
                    Some(event) => Wakeup::Spike(event),
                    None => Wakeup::SpikesClosed,
                },
            };
            match wakeup {
                Wakeup::Scan => self.scan_once(Utc::now()).await,
                Wakeup::Monitor => self.monitor_once(Utc::now()).await,
                Wakeup::Spike(event) => self.handle_spike(event, Utc::now()).await,
                Wakeup::SpikesClosed => {
                    warn!("spike channel closed, continuing on the scan schedule");
                    self.spike_receiver = None;
                }
                Wakeup::Shutdown => break,
            }
        }

        info!("Shutting down, saving state");
        self.save_positions().await;
        self.save_daily_pnl().await;
        self.log_stats(Utc::now()).await;
        Ok(())
    }
}
