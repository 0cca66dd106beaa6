//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::catalog::CatalogFile;
use api::config::{Config, LogFormat};
use checkout::{
    Catalog, HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway, PaymentVerifier,
    SystemClock,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{CheckoutStore, InMemoryCheckoutStore, PostgresCheckoutStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (json, pretty) = match config.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

/// Wires the services around `store` and serves until shutdown.
async fn serve<S: CheckoutStore + Clone + 'static>(
    config: Config,
    store: S,
    catalog_file: CatalogFile,
    seed_stock: bool,
    metrics_handle: PrometheusHandle,
) {
    if seed_stock {
        let seeded = catalog_file
            .seed_stock(&store)
            .await
            .expect("failed to seed stock");
        tracing::info!(seeded, "starting stock loaded");
    }

    let verifier =
        PaymentVerifier::new(config.signing_secret()).expect("HMAC accepts keys of any length");

    let gateway: Arc<dyn PaymentGateway> = match &config.gateway {
        Some(gateway) => {
            tracing::info!(base_url = %gateway.base_url, "using hosted payment gateway");
            Arc::new(
                HttpPaymentGateway::new(
                    gateway.base_url.as_str(),
                    gateway.key_id.as_str(),
                    gateway.key_secret.as_str(),
                    config.gateway_timeout,
                )
                .expect("failed to build gateway client"),
            )
        }
        None => {
            tracing::warn!("GATEWAY_BASE_URL not set, using the in-memory sandbox gateway");
            Arc::new(InMemoryPaymentGateway::new(verifier.clone()))
        }
    };

    let catalog: Arc<dyn Catalog> = Arc::new(catalog_file.catalog());
    let state = Arc::new(AppState::new(
        store,
        catalog,
        gateway,
        verifier,
        Arc::new(SystemClock),
        config.checkout(),
    ));

    // Background sweeper for reservations whose hold elapsed
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Arc::new(state.reconciler(config.reconcile_interval));
    let sweeper = tokio::spawn(reconciler.run(shutdown_rx));

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "reconciler task panicked");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load the catalog snapshot
    let catalog_file = match &config.catalog_path {
        Some(path) => {
            tracing::info!(%path, "loading catalog");
            CatalogFile::load(path).expect("failed to load catalog")
        }
        None => {
            tracing::info!("CATALOG_PATH not set, using the demo catalog");
            CatalogFile::demo()
        }
    };

    // 4. Pick the store and serve. Demo stock never lands in a real database.
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresCheckoutStore::connect(&url, 10)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL checkout store");

            let seed_stock = config.catalog_path.is_some();
            serve(config, store, catalog_file, seed_stock, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory checkout store");
            serve(
                config,
                InMemoryCheckoutStore::new(),
                catalog_file,
                true,
                metrics_handle,
            )
            .await;
        }
    }
}
