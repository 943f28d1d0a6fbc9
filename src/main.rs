// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tracing_subscriber::EnvFilter;

use relational_notes_vault::{
    api::router,
    audit::{AuditQueryService, AuditTrailRecorder, Masker},
    auth::StaticIdentityProvider,
    config::{Config, LogFormat, StorageBackendKind, DEFAULT_LOG_FILTER},
    context::StaticContextResolver,
    crypto::{EncryptionService, KeyRing},
    state::AppState,
    storage::{AuditStore, DatabaseBackend, MemoryBackend, RecordStore},
    store::SecureRecordStore,
    telemetry::{ChannelTelemetry, SecurityTelemetry, TracingTelemetry},
};

type BoxError = Box<dyn Error + Send + Sync>;

/// Buffered security events before new ones are dropped.
const TELEMETRY_BUFFER: usize = 1024;

/// Time in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
    }
}

fn open_backend(config: &Config) -> Result<(Arc<dyn RecordStore>, Arc<dyn AuditStore>), BoxError> {
    match config.backend {
        StorageBackendKind::Redb => {
            std::fs::create_dir_all(&config.data_dir)?;
            let path = config.database_path();
            let backend = Arc::new(DatabaseBackend::open(&path)?);
            tracing::info!(path = %path.display(), "Opened note database");
            Ok((backend.clone(), backend))
        }
        StorageBackendKind::Memory => {
            tracing::warn!("Using in-memory storage; notes and audit entries are lost on exit");
            let backend = Arc::new(MemoryBackend::new());
            Ok((backend.clone(), backend))
        }
    }
}

/// Security events are handed off to a channel so emitting never blocks a request.
fn spawn_telemetry() -> Arc<dyn SecurityTelemetry> {
    let (telemetry, mut events) = ChannelTelemetry::new(TELEMETRY_BUFFER);
    tokio::spawn(async move {
        let sink = TracingTelemetry;
        while let Some(event) = events.recv().await {
            sink.emit(event);
        }
    });
    Arc::new(telemetry)
}

async fn shutdown_signal(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Shutdown signal received");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

async fn run() -> Result<(), BoxError> {
    let config = Config::from_env()?;

    let keys: Vec<(String, Vec<u8>)> = config
        .note_keys
        .iter()
        .map(|k| (k.key_id.clone(), k.material.clone()))
        .collect();
    let key_ring = Arc::new(KeyRing::from_material(&keys, &config.active_key)?);
    tracing::info!(
        keys = keys.len(),
        active_key = %config.active_key,
        "Key ring loaded"
    );

    let (records, audit_log) = open_backend(&config)?;
    let masker = Masker::new(&config.audit_mask_key)?;
    let identity = StaticIdentityProvider::from_file(&config.identity_file)?;
    let contexts = StaticContextResolver::from_file(&config.context_file)?;

    let store = SecureRecordStore::new(
        records,
        Arc::new(EncryptionService::new(key_ring)),
        Arc::new(AuditTrailRecorder::new(audit_log.clone(), masker)),
        Arc::new(contexts),
        spawn_telemetry(),
    )
    .with_min_reason_len(config.min_reason_len);

    let state = AppState::new(
        Arc::new(store),
        AuditQueryService::new(audit_log),
        Arc::new(identity),
    )
    .with_request_timeout(config.request_timeout);
    let tasks = state.tasks.clone();
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    match &config.tls {
        Some(tls) => {
            // Must be installed before any TLS configuration is built.
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| "failed to install rustls crypto provider")?;
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;

            tracing::info!(%addr, "Notes vault listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::warn!(%addr, "TLS not configured; serving plain http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    // Let detached store operations reach their audit write before the runtime exits
    tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
        tracing::error!(pending = tasks.len(), "Store operations still running at exit");
    }

    tracing::info!("Server stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing(LogFormat::from_env());

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Notes vault failed");
        std::process::exit(1);
    }
}
