use std::sync::Arc;

use clap::Parser;

use scan_mux::modules;
use scan_mux::proxy::{self, Backend};
use scan_mux::proxy::common::schemas::BackendTargetList;

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = modules::config::Cli::parse();
    let (proxy_config, config_path) = modules::config::resolve_config(&cli)?;
    let _log_guard = modules::logger::init_logger(proxy_config.log_dir.as_deref());

    if cli.write_config {
        modules::config::save_config(&config_path, &proxy_config)?;
        tracing::info!("configuration written to {}", config_path.display());
        return Ok(());
    }
    proxy_config.validate()?;

    let client = Arc::new(proxy::BackendClient::new(
        &proxy_config.backend,
        &proxy_config.upstream_proxy,
    )?);
    client
        .probe(
            proxy_config.backend.probe_attempts,
            proxy_config.backend.probe_interval(),
        )
        .await
        .map_err(|e| format!("scanner backend unavailable: {}", e))?;

    let registry = Arc::new(proxy::TargetRegistry::new(proxy_config.watcher_ttl()));
    if proxy_config.seed_from_backend {
        seed_registry(&registry, client.as_ref()).await;
    }
    let sweeper = proxy_config
        .sweep_interval()
        .map(|interval| registry.clone().spawn_sweeper(interval));

    let state = proxy::AppState {
        registry,
        backend: client,
        credential: Arc::new(proxy::SharedCredential::new(
            &proxy_config.backend.username,
            &proxy_config.backend.password,
        )),
        demo_mode: proxy_config.demo_mode,
        scan_proxy: proxy_config.scan_proxy.clone(),
    };

    let (server, handle) = proxy::AxumServer::start(
        proxy_config.listen_host.clone(),
        proxy_config.listen_port,
        state,
    )
    .await
    .map_err(|e| format!("failed to start proxy server: {}", e))?;

    tracing::info!(
        "scan-mux relaying http://{}:{} to {} (demo mode {})",
        proxy_config.listen_host,
        proxy_config.listen_port,
        proxy_config.backend.api_root(),
        if proxy_config.demo_mode { "on" } else { "off" }
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!("shutdown requested, stopping server...");
    server.stop();
    let _ = handle.await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}

/// Load the targets the backend already holds so clients asking for them are
/// answered without a new creation.
async fn seed_registry(registry: &proxy::TargetRegistry, backend: &dyn Backend) {
    let listing = match backend.get("targets").await {
        Ok(listing) if listing.is_success() => listing,
        Ok(listing) => {
            tracing::warn!("target listing answered {}, starting empty", listing.status);
            return;
        }
        Err(e) => {
            tracing::warn!("target listing failed: {}, starting empty", e);
            return;
        }
    };

    match listing.json::<BackendTargetList>() {
        Ok(list) => {
            let seeded = registry
                .seed(list.targets.into_iter().map(|t| (t.address, t.target_id)))
                .await;
            tracing::info!("seeded {} existing backend target(s)", seeded);
        }
        Err(e) => tracing::warn!("{}, starting empty", e),
    }
}
