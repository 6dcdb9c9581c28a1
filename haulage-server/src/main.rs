//! Haulage Dispatch Server
//!
//! Runs the job dispatch engine with its background processors, and accepts
//! payment processor webhooks.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::runtime::RuntimeConfig;
use config::{ConfigLoader, get_database_url};
use haulage_core::clock::{Clock, SystemClock};
use haulage_core::engine::{Engine, EngineParts};
use haulage_core::events::{
    DomainEventReceiver, EventBus, auto_assign_channel, domain_event_channel,
    notification_channel,
};
use haulage_core::oracles::{
    CachedWeather, HaversineGeo, HttpPaymentOracle, HttpWeatherOracle, LogNotifier, Notifier,
    StaticWeather, WeatherOracle, WeatherReport, WebhookNotifier,
};
use haulage_core::pricing::PricingService;
use haulage_core::processors::{
    AutoAssignScheduler, NotificationSender, OfferExpirySweeper, ReconcileLoop,
};
use haulage_core::store::{MemoryStore, PgStore, Store};
use server::{build_router, run_server};
use shutdown::{apply_pricing, spawn_config_reload_handler};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Haulage - job dispatch engine for moving and delivery requests
#[derive(Parser, Debug)]
#[command(name = "haulage-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./haulage-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Keep everything in memory instead of Postgres (development only)
    #[arg(long, default_value = "false")]
    memory_store: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "HAULAGE_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_json);

    tracing::info!("Starting haulage-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let listen_addr = config.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let (store, db_pool) = if args.memory_store {
        tracing::warn!("Using the in-memory store, nothing will be persisted");
        (Arc::new(MemoryStore::new()) as Arc<dyn Store>, None)
    } else {
        let db_pool = connect_database(&config, args.migrate).await?;
        (
            Arc::new(PgStore::new(db_pool.clone())) as Arc<dyn Store>,
            Some(db_pool),
        )
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));

    let weather: Arc<dyn WeatherOracle> = match &config.weather_base_url {
        Some(url) => Arc::new(CachedWeather::new(
            HttpWeatherOracle::new(url.clone()),
            clock.clone(),
        )),
        None => {
            tracing::info!("No weather oracle configured, pricing assumes normal weather");
            Arc::new(StaticWeather(WeatherReport::normal()))
        }
    };
    let pricing = PricingService::new(weather);
    apply_pricing(store.as_ref(), &pricing, config.pricing.clone()).await;

    let notifier: Arc<dyn Notifier> = match &config.notifier {
        Some(target) => Arc::new(WebhookNotifier::new(
            target.url.clone(),
            target.secret.clone(),
        )),
        None => Arc::new(LogNotifier),
    };

    let (notification_tx, notification_rx) = notification_channel();
    let (auto_assign_tx, auto_assign_rx) = auto_assign_channel();
    let (domain_tx, domain_rx) = domain_event_channel();
    let bus = EventBus::new(notification_tx, auto_assign_tx, vec![domain_tx]);

    let engine = Arc::new(Engine::new(EngineParts {
        store: store.clone(),
        pricing: pricing.clone(),
        payments: Arc::new(HttpPaymentOracle::new(
            config.payment_oracle.base_url.clone(),
            config.payment_oracle.secret_key.clone(),
        )),
        geo: Arc::new(HaversineGeo),
        bus,
        settings: config.engine.clone(),
    }));

    // Background processors share one shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut processors = JoinSet::new();
    processors.spawn(
        OfferExpirySweeper::new(engine.clone(), clock.clone()).run(shutdown_rx.clone()),
    );
    processors.spawn(ReconcileLoop::new(engine.clone(), clock.clone()).run(shutdown_rx.clone()));
    processors.spawn(
        AutoAssignScheduler::new(engine.clone(), clock.clone())
            .run(shutdown_rx.clone(), auto_assign_rx),
    );
    processors.spawn(
        NotificationSender::new(notifier, clock.clone(), &config.engine.notifications)
            .run(shutdown_rx.clone(), notification_rx),
    );
    processors.spawn(log_domain_events(shutdown_rx, domain_rx));

    let reload_notify =
        spawn_config_reload_handler(store, pricing, config_loader, listen_addr);

    let router = build_router(AppState::new(engine, clock));

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Stop the reload handler and the processors
    reload_notify.notify_one();
    let _ = shutdown_tx.send(true);
    while let Some(joined) = processors.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Background processor panicked");
        }
    }

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

async fn connect_database(config: &RuntimeConfig, migrate: bool) -> anyhow::Result<PgPool> {
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    Ok(db_pool)
}

/// Audit trail of committed state changes.
async fn log_domain_events(
    mut shutdown_rx: watch::Receiver<bool>,
    mut events: DomainEventReceiver,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            Some(event) = events.recv() => {
                tracing::info!(event = ?event, "Domain event");
            }

            else => break,
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
