//! Gateway startup and composition root
//!
//! Loads settings, initialises logging, wires the broker connector and
//! handlers into the two consumer managers, then runs until a termination
//! signal arrives.

use crate::app::cli::Args;
use crate::broker::{redact_url, AmqpConnector, AsyncBridge, Connector, Topology};
use crate::consumer::{
    EventConsumerFactory, EventConsumerManager, RpcConsumerFactory, RpcConsumerManager,
};
use crate::core::config::Settings;
use crate::core::error_handling::{log_error_with_context, ContextualError};
use crate::core::logging::init_from_settings;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::version::long_version;
use crate::handlers::{
    DashboardRpcHandler, DashboardService, DocumentStore, HttpSearchIndexer,
    IndexingEventHandler, MongoDocumentStore,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

const CONNECTION_NAME: &str = "clickstream-gateway";
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Initialize application startup
pub fn startup() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("gateway-runtime")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(run(args));
    // Workers abandoned after a shutdown timeout must not hold the process
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    std::process::exit(exit_code);
}

/// Resolve settings from file, environment and flags, in that order
async fn resolve_settings(args: &Args) -> Result<Settings, crate::core::config::ConfigError> {
    let mut settings = Settings::load(args.config_file.as_deref()).await?;
    settings.apply_process_env();
    args.apply_to(&mut settings);
    Ok(settings)
}

async fn run(args: Args) -> i32 {
    // Logging is not up yet, so report configuration problems on stderr
    let settings = match resolve_settings(&args).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e.user_message().unwrap_or("invalid configuration"));
            return 1;
        }
    };

    if let Err(e) = init_from_settings(&settings.logging) {
        eprintln!("Error: failed to initialise logging: {}", e);
        return 1;
    }

    if let Err(e) = settings.validate() {
        log_error_with_context(&e, "Validating configuration");
        return 1;
    }

    if args.check_config {
        print_settings(&settings);
        return 0;
    }

    log::info!("clickstream-gateway {} starting", long_version());
    match serve(&settings).await {
        Ok(()) => 0,
        Err(code) => code,
    }
}

async fn serve(settings: &Settings) -> Result<(), i32> {
    let broker = &settings.broker;
    let connector: Arc<dyn Connector> = Arc::new(AmqpConnector::new(
        broker.url.clone(),
        broker.heartbeat,
        CONNECTION_NAME,
        AsyncBridge::current(),
    ));
    log::info!("Broker: {}", redact_url(&broker.url));

    let indexer = HttpSearchIndexer::new(
        settings.search.url.clone(),
        settings.search.index_prefix.clone(),
        settings.search.timeout(),
    )
    .map_err(|e| {
        log_error_with_context(&e, "Creating search indexer");
        1
    })?;
    log::info!(
        "Search index: {} (prefix '{}')",
        settings.search.url,
        settings.search.index_prefix
    );

    let store = Arc::new(MongoDocumentStore::connect(&settings.store).await.map_err(|e| {
        log_error_with_context(&e, "Creating document store client");
        1
    })?);
    log::info!(
        "Document store: {} (database '{}')",
        redact_url(&settings.store.url),
        settings.store.database
    );

    let events = EventConsumerManager::new(
        EventConsumerFactory::new(
            Arc::clone(&connector),
            Topology::bound(&broker.exchange, &broker.queue, &broker.routing_key),
        )
        .with_index_types(settings.ingestion.index_types())
        .with_policy(settings.ingestion.policy()),
    )
    .with_connect_retry(broker.connect_retry.clone())
    .with_shutdown_timeout(broker.shutdown_timeout());

    let rpc = RpcConsumerManager::new(RpcConsumerFactory::new(
        Arc::clone(&connector),
        broker.rpc_queue.clone(),
    ))
    .with_connect_retry(broker.connect_retry.clone())
    .with_shutdown_timeout(broker.shutdown_timeout());

    let (coordinator, _shutdown_rx) = ShutdownCoordinator::new();
    coordinator.install_signal_handlers();

    events
        .start(Arc::new(IndexingEventHandler::new(Arc::new(indexer))))
        .await;
    rpc.start(Arc::new(DashboardRpcHandler::new(Arc::new(
        DashboardService::new(store.clone()),
    ))))
    .await;

    watch_until_shutdown(&coordinator, &events, &rpc, &store).await;

    log::info!("Stopping consumers");
    rpc.stop().await;
    events.stop().await;
    store.close().await;
    log::info!("clickstream-gateway stopped");
    Ok(())
}

/// Wait for shutdown, reporting consumers whose worker ended on its own
/// and re-pinging the document store while it is unreachable
async fn watch_until_shutdown(
    coordinator: &ShutdownCoordinator,
    events: &EventConsumerManager,
    rpc: &RpcConsumerManager,
    store: &MongoDocumentStore,
) {
    let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    let mut reported = (false, false);
    let shutdown = coordinator.wait();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                if !reported.0 && events.worker_finished() {
                    log::error!("Event consumer is no longer running (state: {:?})", events.state());
                    reported.0 = true;
                }
                if !reported.1 && rpc.worker_finished() {
                    log::error!("RPC consumer is no longer running (state: {:?})", rpc.state());
                    reported.1 = true;
                }
                if !store.is_connected() {
                    store.ping().await;
                }
            }
        }
    }
}

fn print_settings(settings: &Settings) {
    let broker = &settings.broker;
    println!("Configuration OK");
    println!("  broker.url            = {}", redact_url(&broker.url));
    println!("  broker.exchange       = {}", broker.exchange);
    println!("  broker.queue          = {}", broker.queue);
    println!("  broker.routing_key    = {}", broker.routing_key);
    println!("  broker.rpc_queue      = {}", broker.rpc_queue);
    println!("  broker.heartbeat      = {}", broker.heartbeat);
    println!("  ingestion.index_types = {}", settings.ingestion.index_types.join(", "));
    println!("  search.url            = {}", settings.search.url);
    println!("  search.index_prefix   = {}", settings.search.index_prefix);
    println!("  store.url             = {}", redact_url(&settings.store.url));
    println!("  store.database        = {}", settings.store.database);
    println!("  logging.level         = {}", settings.logging.level);
}
