use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cache;
mod config;
mod domain;
mod lifecycle;
mod messaging;
mod metrics;
mod repository;
mod store;
mod utils;

#[cfg(test)]
mod testing;

use cache::{Cache, RedisCache};
use config::Config;
use domain::{Book, BookFilter, PasswordHash, User, UserField};
use lifecycle::{Lifecycle, LifecycleConfig};
use messaging::{Broker, Event, EventConsumer, EventProducer, KafkaBroker, LoginPayload};
use metrics::Metrics;
use repository::{CachedRepository, EventSource, EventingRepository, Repository};
use store::{Database, PgBookStore, PgUserStore};
use utils::{retry_with_backoff, RetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,library_cache=debug")),
        )
        .init();

    tracing::info!("🚀 Starting library cache service");

    let config = Config::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    let server_metrics = metrics.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new()
            .block_on(metrics::start_metrics_server(server_metrics, metrics_port));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Store ===
    let startup = RetryConfig::startup();
    let database_url = config.database.url();
    let max_connections = config.database.max_connections;
    let database = retry_with_backoff("postgres", &startup, |_| {
        Database::connect(&database_url, max_connections)
    })
    .await?;
    database.ensure_schema().await?;
    let database = Arc::new(database);

    // === 3. Cache (optional) ===
    let cache: Option<Arc<dyn Cache>> = if config.cache_enabled {
        let redis_url = config.redis.url();
        let redis = retry_with_backoff("redis", &startup, |_| RedisCache::connect(&redis_url)).await?;
        Some(Arc::new(redis))
    } else {
        tracing::info!("Cache disabled, reads go straight to the store");
        None
    };

    // === 4. Broker ===
    let broker: Arc<dyn Broker> = Arc::new(KafkaBroker::new(&config.kafka, metrics.clone())?);
    let producer = EventProducer::new(broker.clone(), metrics.clone());

    // === 5. Repositories: events over cache over store ===
    let books = compose(
        Arc::new(PgBookStore::new(database.pool())),
        cache.clone(),
        &config,
        &metrics,
        &producer,
    );
    let users = compose(
        Arc::new(PgUserStore::new(database.pool())),
        cache.clone(),
        &config,
        &metrics,
        &producer,
    );

    // === 6. Consumer ===
    let mut consumer = EventConsumer::new(broker.clone(), metrics.clone());
    messaging::handlers::register_logging_handlers(&mut consumer);

    let mut lifecycle = Lifecycle::new(
        Arc::new(consumer),
        broker,
        cache,
        database,
        LifecycleConfig {
            shutdown_timeout: config.shutdown_timeout,
            max_restarts: config.consumer_max_restarts,
            ..LifecycleConfig::default()
        },
    );
    lifecycle.start();

    if config.run_demo {
        if let Err(e) = run_demo(books.as_ref(), users.as_ref(), &producer).await {
            tracing::error!(error = %e, "Demo failed");
        }
    }

    tracing::info!("✅ Service ready, press Ctrl+C to stop");
    let supervised = lifecycle
        .supervise(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await;
    if let Err(e) = &supervised {
        tracing::error!(error = %e, "Consumer stopped with error");
    }

    lifecycle.shutdown().await;
    supervised?;

    Ok(())
}

fn compose<E: EventSource>(
    store: Arc<dyn Repository<E>>,
    cache: Option<Arc<dyn Cache>>,
    config: &Config,
    metrics: &Arc<Metrics>,
    producer: &EventProducer,
) -> Arc<dyn Repository<E>> {
    let inner: Arc<dyn Repository<E>> = match cache {
        Some(cache) => Arc::new(CachedRepository::new(
            store,
            cache,
            config.cache_ttl,
            metrics.clone(),
        )),
        None => store,
    };

    Arc::new(EventingRepository::new(inner, producer.clone()))
}

async fn run_demo(
    books: &dyn Repository<Book>,
    users: &dyn Repository<User>,
    producer: &EventProducer,
) -> anyhow::Result<()> {
    tracing::info!("📝 Running demo");

    let mut book = books
        .create(Book::new("sci-fi", "Dune", "Frank Herbert", 1965))
        .await?;
    tracing::info!(id = %book.id, "✅ Book created");

    let fetched = books.get_by_id(book.id).await?;
    tracing::info!(name = %fetched.name, "Book fetched");

    book.year = 1966;
    let book = books.update(book).await?;
    tracing::info!(id = %book.id, year = book.year, "✅ Book updated");

    let by_author = books.list(&BookFilter::by_author("Frank Herbert")).await?;
    tracing::info!(count = by_author.len(), "Books by author listed");

    books.delete(book.id).await?;
    tracing::info!(id = %book.id, "✅ Book deleted");

    let user = users
        .create(User::new(
            "demo",
            "demo@example.com",
            PasswordHash::new("$2a$10$demo.hash.only"),
        ))
        .await?;
    let found = users.get_by_field(UserField::Username, "demo").await?;
    tracing::info!(id = %found.id, "✅ User created and found by username");

    producer
        .publish(Event::UserLoggedIn(LoginPayload {
            user_id: user.id,
            username: user.username.clone(),
            timestamp: chrono::Utc::now(),
        }))
        .await?;

    users.delete(user.id).await?;
    tracing::info!("🎉 Demo complete");

    Ok(())
}
