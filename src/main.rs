// Order-flow hunt - live runner
// Binance spot feed -> order-flow core -> console

use clap::Parser;
use orderflow_hunt::core::{setup_logging, ConfigManager, ConsoleReporter, DisplayMode, RecordBus};
use orderflow_hunt::layer2::{event_channel, process_events, MarketFeed};
use orderflow_hunt::layer3::OrderFlowAggregator;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "orderflow-hunt")]
#[command(about = "Detects sweep -> delta flip -> absorption -> reclaim patterns on one instrument")]
struct Cli {
    /// JSON config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Instrument symbol, e.g. ETHUSDT
    #[arg(short, long)]
    symbol: Option<String>,

    /// TRACE, DEBUG, INFO, WARN or ERROR
    #[arg(long)]
    log_level: Option<String>,

    /// normal, quiet or silent
    #[arg(long)]
    display_mode: Option<DisplayMode>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // File, then environment, then command line
    let mut manager = ConfigManager::new(cli.config.as_deref())?;
    if let Some(symbol) = &cli.symbol {
        manager.set_symbol(symbol);
    }
    if let Some(level) = &cli.log_level {
        manager.set_log_level(level);
    }
    if let Some(mode) = cli.display_mode {
        manager.set_display_mode(mode);
    }

    let config = manager.config().clone();
    setup_logging(
        Some(config.monitoring.log_level.as_str()),
        Some(config.monitoring.json_logs),
    );
    manager.validate()?;
    info!(summary = ?manager.get_summary(), "Starting order-flow hunt");

    let mut aggregator = OrderFlowAggregator::from_config(&config)?;
    let bus = RecordBus::default();
    let reporter = ConsoleReporter::new(config.monitoring.display_mode).attach(&bus);

    let (events_tx, mut events_rx) = event_channel(config.monitoring.queue_warn_depth);
    let feed = MarketFeed::new(&config.feed)?;
    let feed_stats = feed.stats_handle();
    let feed_task = tokio::spawn(feed.run(events_tx));

    info!("Press Ctrl+C to stop");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let processed = process_events(&mut events_rx, &mut aggregator, &bus, shutdown).await;

    if feed_task.is_finished() {
        match feed_task.await {
            Ok(Ok(())) => info!("Market feed finished"),
            Ok(Err(e)) => error!(error = %e, "Market feed failed"),
            Err(e) => error!(error = %e, "Market feed task panicked"),
        }
    } else {
        feed_task.abort();
    }

    for line in aggregator.get_stats().report_lines() {
        info!("{}", line);
    }
    let feed_summary = feed_stats.read().to_string();
    info!(
        events = processed,
        feed = %feed_summary,
        rendered = reporter.rendered(),
        suppressed = reporter.suppressed(),
        "Shutdown complete"
    );
    Ok(())
}
