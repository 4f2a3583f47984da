use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use whalewatch::adapters::{
    DedupStore, Notifier, NullNotifier, PostgresStore, PushoverNotifier, RankingClient,
    TronGridClient,
};
use whalewatch::config::AppConfig;
use whalewatch::error::{Result, WatchError};
use whalewatch::ingest::{LogSubscriber, TradeStream, TransferPoller};
use whalewatch::pipeline::{KnownActorCache, Pipeline, BROADCAST_CAPACITY};
use whalewatch::services::{ActorRefreshService, UniverseService};

#[derive(Parser)]
#[command(name = "whalewatch", about = "Multi-chain whale transfer and trade monitor")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config).map_err(WatchError::Config)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            init_logging_simple();
            check_config(&config).await
        }
        None => {
            init_logging(&config);
            run(config).await
        }
    }
}

/// Validate the configuration and, when the database is reachable, show the
/// most recent recorded events as a wiring check.
async fn check_config(config: &AppConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {}", error);
        }
        return Err(WatchError::Validation(format!(
            "{} configuration error(s)",
            errors.len()
        )));
    }
    println!("Configuration OK");

    match PostgresStore::new(&config.database.url, 1).await {
        Ok(store) => {
            let recent = store.recent(5).await?;
            println!("Database reachable, {} recent event(s):", recent.len());
            for event in recent {
                println!(
                    "  [{}] {} {} {} notional {}",
                    event.source_chain,
                    event.identifier,
                    event.instrument,
                    event.direction,
                    event.notional,
                );
            }
        }
        Err(e) => {
            eprintln!("database not reachable: {}", e);
        }
    }

    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for error in &errors {
            error!("config error: {}", error);
        }
        return Err(WatchError::Validation(format!(
            "{} configuration error(s)",
            errors.len()
        )));
    }

    info!("Starting whalewatch");

    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    store.migrate().await?;
    let store: Arc<dyn DedupStore> = store;

    let notifier: Arc<dyn Notifier> = if config.pushover.is_configured() {
        info!("Push notifications enabled");
        Arc::new(PushoverNotifier::new(&config.pushover)?)
    } else {
        warn!("Push credentials absent, alerts will be log-only");
        Arc::new(NullNotifier)
    };

    let actors = KnownActorCache::new();
    let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let trade_pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        actors.clone(),
        broadcast_tx.clone(),
        config.stream.whale_threshold_usd,
        rust_decimal::Decimal::ZERO,
        "exchange-trades",
    );
    let tron_pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        actors.clone(),
        broadcast_tx.clone(),
        config.polling.min_amount,
        config.polling.min_amount,
        "tron-treasury",
    );
    let eth_pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        actors.clone(),
        broadcast_tx.clone(),
        config.logs.min_amount,
        config.logs.min_amount,
        "eth-treasury",
    );

    let mut tasks = Vec::new();

    // Known-actor refresh (first tick runs immediately)
    let actor_service = ActorRefreshService::new(
        &config.actors,
        RankingClient::new(&config.actors)?,
        actors.clone(),
    );
    tasks.push(tokio::spawn(actor_service.run(shutdown_rx.clone())));

    // Streaming trade ingester plus universe discovery feeding it
    let subscriptions = Arc::new(RwLock::new(
        config.stream.seed_instruments.iter().cloned().collect(),
    ));
    let (trade_stream, add_tx) =
        TradeStream::new(&config.stream, trade_pipeline, Arc::clone(&subscriptions));
    let universe = UniverseService::new(&config.stream, subscriptions, add_tx);
    tasks.push(tokio::spawn(universe.run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(trade_stream.run(shutdown_rx.clone())));

    // Treasury transfer poller
    let poller = TransferPoller::new(
        &config.polling,
        TronGridClient::new(&config.polling)?,
        tron_pipeline,
    );
    tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));

    // Contract log subscription
    if config.logs.disabled {
        info!("Log subscription ingester disabled by configuration");
    } else {
        let subscriber = LogSubscriber::new(&config.logs, eth_pipeline);
        tasks.push(tokio::spawn(subscriber.run(shutdown_rx.clone())));
    }

    // Drain the live event feed into the log until an external consumer
    // subscribes.
    let mut live_rx = broadcast_tx.subscribe();
    let mut drain_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = live_rx.recv() => match received {
                    Ok(broadcast_event) => {
                        info!(
                            "[{}] {} {} {} notional {}",
                            broadcast_event.topic,
                            broadcast_event.event.source_chain,
                            broadcast_event.event.instrument,
                            broadcast_event.event.direction,
                            broadcast_event.event.notional,
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Live feed drain lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = drain_shutdown.changed() => {
                    if *drain_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }));

    shutdown_signal().await;
    info!("Shutdown signal received, stopping ingesters");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(10), task).await.is_err() {
            warn!("Task did not stop within the shutdown deadline");
        }
    }

    info!("whalewatch stopped");
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},whalewatch=debug,sqlx=warn",
            config.logging.level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
