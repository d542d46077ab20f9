//! Process wiring: settings, engine, lifecycle, watcher, signals.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

use gridwarden_core::config::{self, EnvSettings, NodeOptions};
use gridwarden_cluster::topology;
use gridwarden_core::ConfigTemplate;
use gridwarden_engine::{Engine, LocalEngine};
use gridwarden_node::{AdminBootstrap, NodeLifecycleManager, ShutdownCoordinator};
use gridwarden_watch::{CredentialWatcher, WatchOptions};

use crate::Cli;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "gridwardend starting");

    // ── Settings ───────────────────────────────────────────────

    let env = EnvSettings::from_env().context("reading environment")?;
    let options = NodeOptions {
        config_file: cli.config_file,
        off_heap_mb: cli.off_heap,
        on_heap_mb: cli.on_heap,
        discovery_port: cli.spi_port,
        cluster_endpoints: cli.cluster,
        consistent_id: cli.consistent_id,
        persistence_enabled: cli.persistence_enabled,
    };
    let mut builder = config::resolve(&options, &env, config::default_discovery_endpoints)
        .context("resolving node configuration")?;

    let template = ConfigTemplate::for_environment(&cli.config_dir, &env);
    if template.source().exists() {
        let rendered = template
            .render()
            .context("rendering engine configuration")?;
        builder.engine_config_path(rendered);
    } else {
        warn!(template = ?template.source(), "engine configuration template not found, using defaults");
    }

    let pending = builder.pending();
    info!(
        on_heap_mb = pending.heap.map(|h| h.max_mb).unwrap_or_default(),
        off_heap_bytes = pending.storage.default_region.max_size_bytes.unwrap_or_default(),
        endpoints = pending.discovery.static_endpoints.len(),
        persistence = pending.persistence_enabled(),
        authentication = pending.authentication_enabled,
        server_tls = pending.tls.is_some(),
        "node configuration resolved"
    );

    // ── Lifecycle ──────────────────────────────────────────────

    let engine: Arc<dyn Engine> = Arc::new(LocalEngine::new());
    let mut manager =
        NodeLifecycleManager::new(engine, builder).with_node_left_policy(env.node_left_policy);
    if let Some(password) = &env.admin_password {
        let mut bootstrap =
            AdminBootstrap::new(password.as_str()).with_client_tls(env.client_tls()?);
        if let Some(endpoint) = &env.admin_endpoint {
            bootstrap = bootstrap.with_endpoint(endpoint.as_str());
        }
        if let Some(timeout) = env.admin_socket_timeout {
            bootstrap = bootstrap.with_socket_timeout(timeout);
        }
        manager = manager.with_bootstrap(bootstrap);
    }
    let manager = Arc::new(manager);
    let topology_task = tokio::spawn(topology::observe(manager.subscribe_events()));

    // ── Credential watcher ─────────────────────────────────────

    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    let paths = env.credential_paths();
    let watch_guard = if paths.is_empty() {
        None
    } else {
        let mut options = WatchOptions::default();
        if let Some(debounce) = env.credential_debounce {
            options.debounce = debounce;
        }
        let guard = CredentialWatcher::new(options)
            .watch(&paths, move |signal| {
                let _ = reload_tx.send(signal);
            })
            .context("watching credential files")?;
        Some(guard)
    };

    // ── Run ────────────────────────────────────────────────────

    let coordinator = ShutdownCoordinator::new(manager);
    let result = coordinator.run(shutdown_signal(), reload_rx).await;

    if let Some(guard) = watch_guard {
        guard.close().await;
    }
    topology_task.abort();
    let reason = result.context("node lifecycle failed")?;

    info!(?reason, "gridwardend stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
