use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use inbox_relay_service::{
    auth::JwtVerifier,
    bus::{provision_exchanges, spawn_consumers, KafkaEventBus},
    config::Config,
    handlers, logging, metrics,
    redis_client::RedisClient,
    registry::RedisSocketRegistry,
    services::{provider_from_config, FanoutRouter, PresenceCoordinator, SessionManager},
    state::AppState,
    websocket::ConnectionManager,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    tracing::info!(
        env = %config.app.env,
        instance_id = %config.app.instance_id,
        queue_mode = ?config.kafka.queue_mode,
        "starting inbox relay service"
    );

    let redis = RedisClient::from_url(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;
    let registry = Arc::new(RedisSocketRegistry::new(
        redis,
        config.redis.presence_ttl_secs,
    ));

    let exchanges = vec![
        config.kafka.events_exchange.clone(),
        config.kafka.notifications_exchange.clone(),
    ];
    provision_exchanges(&config.kafka, &exchanges)
        .await
        .context("failed to provision exchanges")?;

    let bus = Arc::new(KafkaEventBus::new(&config.kafka)?);
    let verifier = Arc::new(JwtVerifier::from_config(&config.jwt)?);
    let unread = provider_from_config(&config.unread)?;

    let connections = ConnectionManager::new();
    let presence = PresenceCoordinator::new(
        registry,
        bus.clone(),
        config.kafka.notifications_exchange.clone(),
    );
    let sessions = SessionManager::new(
        connections.clone(),
        verifier,
        presence,
        bus.clone(),
        unread,
        config.kafka.notifications_exchange.clone(),
    );

    let router = Arc::new(FanoutRouter::new(connections));
    let subscriptions = router.subscription_table(&config.kafka.notifications_exchange);
    let consumers = spawn_consumers(&config.kafka, &config.app.instance_id, &subscriptions)
        .context("failed to start bus consumers")?;
    tracing::info!(queues = consumers.len(), "bus consumers running");

    let state = AppState::new(sessions, config.clone());
    let frontend_url = config.app.frontend_url.clone();
    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allowed_methods(vec!["GET", "POST"])
            .allow_any_header()
            .max_age(3600);
        let cors = if frontend_url == "*" {
            cors.allow_any_origin()
        } else {
            cors.allowed_origin(&frontend_url).supports_credentials()
        };

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .configure(handlers::register_routes)
    })
    .bind(&addr)?
    .run()
    .await?;

    tracing::info!("HTTP server stopped, shutting down bus consumers");
    for consumer in consumers {
        consumer.abort();
    }
    if let Err(e) = bus.flush() {
        tracing::warn!(error = %e, "failed to flush pending publishes");
    }

    Ok(())
}
