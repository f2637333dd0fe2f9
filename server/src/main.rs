use std::sync::Arc;

use tokio::net::TcpListener;

use relay_server::config::{generate_config_template, Config};
use relay_server::dm::dispatcher::spawn_dispatcher;
use relay_server::dm::store::{MessageStore, SqliteMessageStore};
use relay_server::ws::registry::ConnectionRegistry;
use relay_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("Relay server v{} starting", env!("CARGO_PKG_VERSION"));

    let keepalive = config.keepalive_settings()?;
    let queue_capacity = config.queue_capacity()?;
    tracing::info!(
        ping_interval = ?keepalive.ping_interval,
        read_timeout = ?keepalive.read_timeout,
        auth_timeout = ?keepalive.auth_timeout,
        queue_capacity = queue_capacity,
        "Keepalive configured"
    );

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;
    let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(db));
    let registry = Arc::new(ConnectionRegistry::new());

    // Single consumer: every message is persisted before any delivery attempt
    let (inbound_tx, _dispatcher) = spawn_dispatcher(
        store.clone(),
        registry.clone(),
        keepalive.write_timeout,
        queue_capacity,
    );

    let app_state = state::AppState {
        store,
        registry,
        inbound_tx,
        keepalive,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
