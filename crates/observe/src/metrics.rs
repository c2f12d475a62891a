use {
    prometheus::{Encoder, Registry, TextEncoder},
    prometheus_metric_storage::StorageRegistry,
    std::{net::SocketAddr, sync::OnceLock},
};

static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();

/// Configures the global metrics registry. Must be called before any
/// `MetricStorage` struct is instantiated; `prefix` is prepended to every
/// metric name.
pub fn setup_registry(prefix: Option<String>) {
    let registry = Registry::new_custom(prefix, None).unwrap();
    REGISTRY
        .set(StorageRegistry::new(registry))
        .expect("metrics registry initialized twice");
}

pub fn get_storage_registry() -> &'static StorageRegistry {
    REGISTRY.get_or_init(StorageRegistry::default)
}

pub fn get_registry() -> &'static Registry {
    get_storage_registry().registry()
}

fn encode(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .expect("could not encode metrics");
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Serves `/metrics` (and a trivial `/liveness` probe) forever.
pub async fn serve_metrics(address: SocketAddr) -> anyhow::Result<()> {
    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(|| async { encode(get_registry()) }))
        .route("/liveness", axum::routing::get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}
