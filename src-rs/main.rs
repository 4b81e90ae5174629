use std::{collections::HashSet, env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use billing_webhook_server::{
    build_router,
    config::{Config, DirectoryBackend},
    convex::{ConvexClient, ConvexDirectory},
    directory::{Directory, MemoryDirectory},
    processor::WebhookProcessor,
    state::AppState,
    stripe_api::{BillingProvider, StripeApi},
    WEBHOOK_ROUTE,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env_files = load_env_files()?;
    init_tracing();
    if loaded_env_files.is_empty() {
        tracing::warn!("No .env or .env.local file found. Using process environment only.");
    } else {
        let files = loaded_env_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(files = %files, "Loaded environment files");
    }

    let config = Config::from_env().context("invalid configuration")?;

    let billing: Arc<dyn BillingProvider> = Arc::new(StripeApi::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
    )?);
    let directory = build_directory(&config)?;
    let processor = WebhookProcessor::new(&config.webhook, billing, directory);

    let state = AppState::new(config.clone(), processor);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(route = WEBHOOK_ROUTE, "Webhook endpoint registered");

    if let Some((cert_path, key_path)) = valid_tls_paths(&config) {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS certificate/key")?;

        tracing::info!(
            port = config.port,
            "TLS configuration loaded. Running in HTTPS mode."
        );

        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await
            .context("HTTPS server failed")?;
    } else {
        tracing::info!(port = config.port, "Running in HTTP mode.");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind TCP listener")?;

        axum::serve(listener, app.into_make_service())
            .await
            .context("HTTP server failed")?;
    }

    Ok(())
}

fn build_directory(config: &Config) -> anyhow::Result<Arc<dyn Directory>> {
    match config.directory_backend {
        DirectoryBackend::Convex => {
            let convex_url = config
                .convex_url
                .clone()
                .context("CONVEX_URL environment variable is not set")?;
            let client = ConvexClient::new(convex_url)?;
            tracing::info!(convex_url = %client.base_url(), "Using Convex directory");
            Ok(Arc::new(ConvexDirectory::new(client)))
        }
        DirectoryBackend::Memory => {
            let directory = match &config.directory_seed_file {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    MemoryDirectory::from_seed_json(&raw)?
                }
                None => MemoryDirectory::new(),
            };
            tracing::warn!("Using in-memory directory. State is lost on restart.");
            Ok(Arc::new(directory))
        }
    }
}

fn valid_tls_paths(config: &Config) -> Option<(PathBuf, PathBuf)> {
    let (cert_path, key_path) = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert_path), Some(key_path)) => (cert_path, key_path),
        (None, None) => return None,
        (cert_path, key_path) => {
            tracing::error!(
                cert_path = ?cert_path,
                key_path = ?key_path,
                "TLS needs both TLS_CERT_PATH and TLS_KEY_PATH. Proceeding without TLS."
            );
            return None;
        }
    };

    let mut usable = true;
    for (label, path) in [("certificate", cert_path), ("key", key_path)] {
        if !path.is_file() {
            tracing::error!(path = %path.display(), "TLS {} file not found", label);
            usable = false;
        }
    }
    if !usable {
        tracing::error!("Proceeding without TLS.");
        return None;
    }

    Some((cert_path.clone(), key_path.clone()))
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_env_files() -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(executable_path) = env::current_exe() {
        if let Some(executable_dir) = executable_path.parent() {
            roots.push(executable_dir.to_path_buf());
        }
    }

    let mut seen_roots = HashSet::new();
    let mut loaded = Vec::new();

    for root in roots {
        let key = root.to_string_lossy().to_string();
        if !seen_roots.insert(key) {
            continue;
        }

        for filename in [".env", ".env.local"] {
            let path = root.join(filename);
            if path.is_file() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                loaded.push(path);
            }
        }
    }

    Ok(loaded)
}
