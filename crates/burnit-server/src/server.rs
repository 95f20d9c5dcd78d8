use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, routing::get, Router};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    handlers::{consume_content, create_content, health, info as app_info, ready},
    service::{SecretService, DEFAULT_OP_TIMEOUT},
    store::{
        guard::DEFAULT_MAX_PAYLOAD_BYTES, MemoryBackend, RedbBackend, SecretBackend, SecretStore,
        SizeGuard,
    },
    AppState,
};

/// Which storage engine backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Redb,
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(Self::Redb),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown backend {other:?} (expected redb or memory)"),
        }
    }
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub data_dir: Option<PathBuf>,
    /// Largest payload accepted, in bytes.
    pub max_payload_bytes: usize,
    /// Deadline applied to every storage call.
    pub store_timeout: Duration,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BURNIT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("BURNIT_PORT").unwrap_or(8080),
            backend: env_parse("BURNIT_BACKEND").unwrap_or_default(),
            data_dir: std::env::var("BURNIT_DATA_DIR").ok().map(PathBuf::from),
            max_payload_bytes: env_parse("BURNIT_MAX_PAYLOAD_BYTES")
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            store_timeout: env_parse("BURNIT_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_OP_TIMEOUT),
            sweep_interval: Duration::from_secs(
                env_parse("BURNIT_SWEEP_INTERVAL_SECS").unwrap_or(300),
            ),
            cors_origins: std::env::var("BURNIT_CORS_ORIGINS").ok(),
        }
    }
}

impl ServerConfig {
    /// Request body ceiling: room for a base64-encoded payload plus JSON framing.
    pub fn body_limit(&self) -> usize {
        self.max_payload_bytes.saturating_mul(2).saturating_add(16 * 1024)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    parse_setting(name, &std::env::var(name).ok()?)
}

/// Parse one setting; an unparsable value is logged and falls back to the default.
fn parse_setting<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = raw, "ignoring invalid setting, using default");
            None
        }
    }
}

/// Resolve the directory holding `burnit.db`, creating it if needed.
///
/// An explicit directory wins; otherwise the platform data dir
/// (`~/.local/share/burnit/` on Linux) is used.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "burnit")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}

fn open_backend(cfg: &ServerConfig) -> Result<Arc<dyn SecretBackend>> {
    match cfg.backend {
        BackendKind::Memory => {
            info!("using in-memory backend; secrets will not survive a restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        BackendKind::Redb => {
            let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
            info!(data_dir = %data_dir.display(), "using data directory");
            let backend = RedbBackend::open(&data_dir.join("burnit.db")).context("open store")?;
            Ok(Arc::new(backend))
        }
    }
}

/// Build the router. Split out from `run` so tests can drive it directly.
pub fn router(state: AppState, cfg: &ServerConfig) -> Router {
    let cors = build_cors(cfg.cors_origins.as_deref());

    Router::new()
        .route("/api/content", axum::routing::post(create_content))
        .route("/api/content/{key}", get(consume_content))
        .route("/api/healthcheck", get(health))
        .route("/api/healthcheck/live", get(health))
        .route("/api/healthcheck/ready", get(ready))
        .route("/api/info", get(app_info))
        .with_state(state)
        .layer(DefaultBodyLimit::max(cfg.body_limit()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub fn build_state(cfg: &ServerConfig) -> Result<AppState> {
    let backend = open_backend(cfg)?;
    let service = SecretService::new(
        SecretStore::new(backend),
        SizeGuard::new(cfg.max_payload_bytes),
        cfg.store_timeout,
    );
    Ok(AppState { secrets: service })
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let state = build_state(&cfg)?;
    info!(
        backend = state.secrets.backend_name(),
        max_payload_bytes = cfg.max_payload_bytes,
        "secret store ready"
    );

    state.secrets.clone().spawn_sweep(cfg.sweep_interval);

    let app = router(state, &cfg);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "burnit server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
