/**
 * WATERBNB KERNEL - Point d'entrée du serveur d'accès aux piscines
 *
 * RÔLE : Orchestration des modules : config, stores, registre, MQTT, HTTP.
 * Arrêt propre sur Ctrl-C : la boucle MQTT et le serveur HTTP suivent le même token.
 */

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use waterbnb_kernel::access::AccessController;
use waterbnb_kernel::config::load_config;
use waterbnb_kernel::dispatch::CommandDispatcher;
use waterbnb_kernel::health::HealthTracker;
use waterbnb_kernel::http::{build_router, AppState};
use waterbnb_kernel::mqtt::{create_mqtt_client, spawn_mqtt_listener, ListenerParams};
use waterbnb_kernel::registry::OccupancyRegistry;
use waterbnb_kernel::store::JsonFileStore;
use waterbnb_kernel::telemetry::TelemetryIngest;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    let store = Arc::new(
        JsonFileStore::open(&cfg.store.data_dir, &cfg.store.users_file)
            .context("failed to open data store")?,
    );

    // registre vide au démarrage, rempli uniquement par la télémétrie
    let registry = OccupancyRegistry::new();
    let health_tracker = HealthTracker::new();
    let shutdown = CancellationToken::new();

    // une seule connexion broker pour la télémétrie et les commandes
    let (mqtt_client, eventloop) = create_mqtt_client(&cfg.mqtt);
    let ingest = TelemetryIngest::new(registry.clone(), store.clone());
    let listener_task = spawn_mqtt_listener(
        ListenerParams {
            client: mqtt_client.clone(),
            eventloop,
            status_topic: cfg.mqtt.status_topic.clone(),
            backoff: cfg.mqtt.reconnect_backoff(),
            health: health_tracker.clone(),
            shutdown: shutdown.clone(),
        },
        ingest,
    );

    let dispatcher = CommandDispatcher::new(Arc::new(mqtt_client), cfg.mqtt.command_topic.clone())
        .with_supersede_reverts(cfg.access.supersede_pending_reverts);
    let access = AccessController::new(registry.clone(), store.clone(), store.clone(), dispatcher)
        .with_revert_delay(cfg.access.revert_delay());

    let app_state = AppState {
        registry,
        access: Arc::new(access),
        users: store,
        health_tracker,
        stale_after: time::Duration::seconds(cfg.registry.stale_after_secs),
    };
    let app = build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    tracing::info!(addr = %cfg.http.bind, broker = %cfg.mqtt.host, "waterbnb kernel listening");

    let http_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
                _ = http_shutdown.cancelled() => {}
            }
            http_shutdown.cancel();
        })
        .await
        .context("http server failed")?;

    shutdown.cancel();
    if let Err(e) = listener_task.await {
        tracing::warn!(error = %e, "mqtt listener task ended abnormally");
    }
    Ok(())
}
