// src/main.rs
use chrono::Utc;
use coin_pilot::config::AppConfig;
use coin_pilot::connectors::{PaperExecution, SpikeRules, StreamClient, UpbitClient, UpbitTradeStream};
use coin_pilot::core::{EnginePorts, TradingEngine};
use coin_pilot::storage::JsonFileStore;
use coin_pilot::strategies::SignalScorer;
use coin_pilot::tui;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// File logs always; stdout only when the terminal panel is off.
fn init_tracing(tui: bool) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "coin_pilot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with((!tui).then(|| fmt::layer().with_target(false)))
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {}", e);
            return Err(e.into());
        }
    };
    let _log_guard = init_tracing(config.tui);
    let effective = config.strategy.resolve_active()?;

    if !config.tui {
        println!("========================================");
        println!("       COIN PILOT - v{}", env!("CARGO_PKG_VERSION"));
        println!("========================================");
        println!("Style:   {}", effective.style);
        println!("Markets: {}", config.watch_markets.join(", "));
        println!("Mode:    PAPER ({} KRW)", config.paper_balance);
        println!("========================================");
    }

    // 2. Initialize Components
    let timeout = Duration::from_millis(config.scheduler.request_timeout_ms);
    let upbit = Arc::new(UpbitClient::new(timeout)?);
    let paper = Arc::new(PaperExecution::new(upbit.clone(), config.paper_balance));
    let store = Arc::new(JsonFileStore::open(&config.storage_dir).await?);
    let ports = EnginePorts {
        candles: upbit.clone(),
        market_data: upbit,
        execution: paper.clone(),
        store,
    };

    // 3. Create Channels
    let (ui_tx, mut ui_rx) = mpsc::channel(256);
    let strategy = SignalScorer::from_config(&effective);
    let mut engine = TradingEngine::new(config.clone(), ports, strategy, ui_tx)?;

    if config.use_volume_stream {
        let (spike_tx, spike_rx) = mpsc::channel(config.scheduler.spike_channel_capacity.max(1));
        let mut stream = UpbitTradeStream::new(SpikeRules::default());
        stream.subscribe_spikes(&config.watch_markets, spike_tx).await?;
        engine = engine.with_spikes(spike_rx);
    }

    // 4. Restore state; restored positions are held by the paper account
    engine.load_state(Utc::now()).await?;
    for pos in engine.positions() {
        paper.credit(&pos.market, pos.quantity).await;
    }

    if config.tui {
        tokio::spawn(async move {
            if let Err(e) = tui::run(ui_rx).await {
                error!("TUI error: {}", e);
            }
        });
    } else {
        tokio::spawn(async move { while ui_rx.recv().await.is_some() {} });
    }

    // 5. Run Engine
    if let Err(e) = engine.run().await {
        error!("Fatal Engine Error: {}", e);
        return Err(e.into());
    }
    info!("bye");
    Ok(())
}
