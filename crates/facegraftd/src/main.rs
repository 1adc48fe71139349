use anyhow::{Context, Result};
use facegraft_core::ModelRegistry;
use facegraft_models::{Catalog, HttpFetcher, ModelCache, Provisioner};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        output_dir = %config.output_dir.display(),
        workers = config.batch_workers,
        "facegraftd starting"
    );

    let catalog = match &config.catalog_file {
        Some(path) => Catalog::from_file(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => Catalog::default(),
    };
    let fetcher = HttpFetcher::new(
        Duration::from_secs(config.download_timeout_secs),
        config.max_download_bytes,
    );
    let provisioner = Provisioner::new(ModelCache::new(&config.model_dir), Arc::new(fetcher));
    let registry = Arc::new(ModelRegistry::onnx(catalog, provisioner));

    if config.disable_swap {
        registry.disable_swap("disabled via FACEGRAFT_DISABLE_SWAP");
    }

    // Downloads and session setup block; keep them off the async runtime.
    let warm = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || warm.warm_up())
        .await
        .context("model warm-up task panicked")?
        .context("face detection model unavailable")?;

    let engine = engine::spawn_engine(Arc::clone(&registry), &config)?;
    let service = dbus_interface::FacegraftService::new(engine);

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(
        bus = dbus_interface::BUS_NAME,
        degraded = registry.is_degraded(),
        "facegraftd ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegraftd shutting down");

    Ok(())
}
