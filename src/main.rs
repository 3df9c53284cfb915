use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use carpool_match::config::{LoggingSettings, MatchingConfig, Settings};
use carpool_match::core::{GeoCandidateFinder, MatchingOrchestrator};
use carpool_match::routes::{self, handle_json_payload_error, handle_query_payload_error, matches::AppState};
use carpool_match::services::{
    CacheInvalidationListener, CacheStore, DriverStatsCache, HubCache, LocalCacheStore, PostgresStore,
    RedisInvalidationChannel, RouteCache, TieredCacheStore,
};

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if logging.format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

fn startup_error<E: std::fmt::Display>(context: &str, e: E) -> std::io::Error {
    error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    init_tracing(&settings.logging);
    info!("Starting carpool matching service...");

    // Weights and bounds are checked once, here
    let config = MatchingConfig::from_settings(&settings).map_err(|e| startup_error("Invalid matching configuration", e))?;
    info!("Configuration loaded successfully");

    let postgres = Arc::new(
        PostgresStore::from_settings(
            &settings.database.url,
            settings.database.max_connections,
            settings.database.min_connections,
            settings.database.acquire_timeout_secs,
            settings.database.idle_timeout_secs,
        )
        .await
        .map_err(|e| startup_error("Failed to connect to PostgreSQL", e))?,
    );
    info!("PostgreSQL store initialized");

    // Shared cache; degrade to per-process caching when Redis is down
    let l1_size = settings.cache.l1_cache_size.unwrap_or(10_000);
    let max_ttl = config
        .cache_ttls
        .route
        .max(config.cache_ttls.driver_stats)
        .max(config.cache_ttls.hub);
    let (cache, redis_available): (Arc<dyn CacheStore>, bool) =
        match TieredCacheStore::new(&settings.cache.redis_url, l1_size, max_ttl).await {
            Ok(store) => {
                info!("Tiered cache initialized (L1: {} entries)", l1_size);
                (Arc::new(store), true)
            }
            Err(e) => {
                warn!("Failed to connect to Redis ({}), using in-process cache only", e);
                (Arc::new(LocalCacheStore::new(l1_size, max_ttl)), false)
            }
        };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = if settings.invalidation.enabled && redis_available {
        match RedisInvalidationChannel::new(&settings.cache.redis_url) {
            Ok(channel) => {
                let listener = CacheInvalidationListener::new(
                    cache.clone(),
                    Arc::new(channel),
                    settings.invalidation.topics.clone(),
                    Duration::from_millis(settings.invalidation.resubscribe_delay_ms),
                );
                Some(listener.spawn(shutdown_rx))
            }
            Err(e) => {
                warn!("Cache invalidation disabled: {}", e);
                None
            }
        }
    } else {
        info!("Cache invalidation listener not started");
        None
    };

    let ttls = config.cache_ttls;
    let finder = GeoCandidateFinder::new(
        postgres.clone(),
        RouteCache::new(cache.clone(), ttls.route),
        config.max_candidate_routes,
    );
    let hubs = HubCache::new(cache.clone(), postgres.clone(), ttls.hub, ttls.hub_grid_precision);
    let driver_stats = DriverStatsCache::new(cache.clone(), postgres.clone(), ttls.driver_stats);

    let orchestrator = Arc::new(
        MatchingOrchestrator::new(config, finder, hubs, driver_stats)
            .map_err(|e| startup_error("Failed to build matching pipeline", e))?,
    );

    let app_state = AppState {
        orchestrator,
        cache,
        database: Some(postgres),
        request_timeout: settings.server.request_timeout_ms.map(Duration::from_millis),
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = listener {
        let _ = handle.await;
    }

    result
}
