use binance_rest::BinanceRestClient;
use common::BinanceEnvironment;
use connector_binance::DepthTransport;
use feed_hub::{FeedConfig, FeedHandle, FeedHub, FeedPhase, FeedState};
use metrics::create_metrics;
use model::StreamKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Interval for periodic health status logging.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// How long a feed may sit in `Error` before the runner asks for a reconnect.
const ERROR_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    common::init_logging();

    let environment = BinanceEnvironment::from_env();

    let args = std::env::args().skip(1).collect::<Vec<_>>();

    if args.first().map(String::as_str) == Some("pairs") {
        list_pairs(environment).await;
        return;
    }

    let symbols = if args.is_empty() {
        vec!["BTCUSDT".to_string()]
    } else {
        args
    };

    run_feeds(environment, symbols).await;
}

async fn list_pairs(environment: BinanceEnvironment) {
    let pairs = match BinanceRestClient::new(environment) {
        Ok(client) => client.get_trading_pairs().await,
        Err(e) => Err(e),
    };

    match pairs {
        Ok(pairs) => {
            for pair in &pairs {
                println!("{:<14} {:<8} {}", pair.symbol, pair.base_asset, pair.quote_asset);
            }
            println!("\n{} pairs", pairs.len());
        }
        Err(e) => {
            error!(error = %e, "Failed to load trading pairs");
            eprintln!("Could not load trading pairs: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_feeds(environment: BinanceEnvironment, symbols: Vec<String>) {
    let config = FeedConfig::from_env();
    let metrics = create_metrics();

    info!(
        symbols = ?symbols,
        environment = %environment,
        depth = config.depth_levels,
        "Starting order book feeds"
    );

    let transport = Arc::new(DepthTransport::new(
        environment,
        config.depth_levels,
        metrics.clone(),
    ));
    let hub = Arc::new(FeedHub::new(transport, config, metrics.clone()));

    // Create shutdown signal channel
    let (shutdown_tx, _) = watch::channel(false);

    let mut followers = Vec::new();
    for symbol in &symbols {
        let key = StreamKey::new(symbol);
        if key.is_empty() || !hub.add_symbol(key.clone()) {
            continue;
        }
        let feed = hub.request_feed(key);
        followers.push(tokio::spawn(follow_feed(feed, shutdown_tx.subscribe())));
    }

    // Spawn ctrl_c handler
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating shutdown");
            let _ = shutdown_tx_clone.send(true);
        }
    });

    // Spawn periodic health reporter
    let health_hub = Arc::clone(&hub);
    let mut health_shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = health_hub.metrics().snapshot();
                    info!(
                        status = %snapshot.health_status(),
                        connections = snapshot.open_connections,
                        messages = snapshot.messages_received,
                        failures = snapshot.transport_failures,
                        retries = snapshot.retry_attempts,
                        silent = snapshot.liveness_timeouts,
                        "Health check"
                    );
                }
                _ = health_shutdown_rx.changed() => {
                    if *health_shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    for follower in followers {
        let _ = follower.await;
    }

    info!("Feeds stopped, closing connections");
    hub.clear_all_symbols();
    hub.shutdown();

    // Print final metrics
    println!("\n{}", metrics.snapshot());

    info!("Shutdown complete");
}

/// Print one feed until shutdown. Dropping the handle on exit disposes it.
async fn follow_feed(feed: FeedHandle, mut shutdown_rx: watch::Receiver<bool>) {
    let mut updates = feed.watch();
    let mut last_phase = feed.phase();
    let mut reconnect_at: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();

                if state.phase != last_phase {
                    report_phase(&state);
                    last_phase = state.phase;
                    reconnect_at = (state.phase == FeedPhase::Error)
                        .then(|| Instant::now() + ERROR_RECONNECT_DELAY);
                }
                if state.is_live() {
                    print_top_of_book(&state);
                }
            }
            _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                reconnect_at = None;
                info!(symbol = %feed.key(), "Reconnecting feed after error");
                feed.reconnect();
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

fn report_phase(state: &FeedState) {
    match (&state.phase, &state.failure) {
        (FeedPhase::Error, Some(failure)) => {
            error!(symbol = %state.key, phase = %state.phase, reason = %failure, "Feed failed")
        }
        (FeedPhase::Connecting, Some(failure)) => warn!(
            symbol = %state.key,
            attempt = state.retry_attempt,
            reason = %failure,
            "Feed reconnecting"
        ),
        _ => info!(symbol = %state.key, phase = %state.phase, "Feed phase changed"),
    }
}

fn print_top_of_book(state: &FeedState) {
    let Some(book) = &state.data else {
        return;
    };

    let side = |level: Option<&model::PriceLevel>| match level {
        Some(level) => format!("{} x {}", level.price, level.quantity),
        None => "-".to_string(),
    };

    println!(
        "{} | {} | bid: {} | ask: {}",
        state.key,
        book.last_update_id,
        side(book.best_bid()),
        side(book.best_ask())
    );
}
