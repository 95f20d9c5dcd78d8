use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use burnit_server::BackendKind;
use clap::{Parser, Subcommand};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "burnit", about = "burnit: secrets that burn after one read", version)]
struct Cli {
    /// burnit server URL (default: http://localhost:8080 or $BURNIT_SERVER)
    #[arg(long, env = "BURNIT_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the burnit HTTP server
    Serve {
        /// Port to listen on (default: $BURNIT_PORT or 8080)
        #[arg(long, env = "BURNIT_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $BURNIT_HOST or 0.0.0.0)
        #[arg(long, env = "BURNIT_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Storage backend: redb or memory (default: $BURNIT_BACKEND or redb)
        #[arg(long, env = "BURNIT_BACKEND", default_value = "redb")]
        backend: BackendKind,
        /// Directory for burnit.db (default: $BURNIT_DATA_DIR or platform data dir)
        #[arg(long, env = "BURNIT_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Store a secret and print its one-time key
    Push {
        /// Secret text (omit when using --file)
        #[arg(value_name = "TEXT", required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,
        /// Send a file instead of text
        #[arg(long)]
        file: Option<PathBuf>,
        /// Expire unread after this long, e.g. 30m, 1h, 7d
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Read a secret (this burns it)
    Get {
        /// Retrieval key
        key: String,
        /// Write the content to this path instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print the retrieval URL for a key without reading it
    Share {
        /// Retrieval key
        key: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BURNIT_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            backend,
            data_dir,
        } => cmd_serve(host, port, backend, data_dir).await,

        Commands::Push { text, file, ttl } => {
            cmd_push(&cli.server, text, file.as_deref(), ttl.as_deref()).await
        }

        Commands::Get { key, output } => cmd_get(&cli.server, &key, output.as_deref()).await,

        Commands::Share { key } => {
            println!("{}", content_url(&cli.server, &key));
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(
    host: String,
    port: u16,
    backend: BackendKind,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let cfg = burnit_server::ServerConfig {
        host,
        port,
        backend,
        data_dir,
        ..Default::default()
    };

    burnit_server::run(cfg).await
}

async fn cmd_push(
    server: &str,
    text: Option<String>,
    file: Option<&Path>,
    ttl: Option<&str>,
) -> Result<()> {
    let ttl_seconds = ttl.map(parse_duration).transpose()?;

    let body = match (text, file) {
        (_, Some(path)) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("read file: {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            serde_json::json!({
                "file": STANDARD.encode(bytes),
                "file_name": file_name,
                "ttl_seconds": ttl_seconds,
            })
        }
        (Some(text), None) => serde_json::json!({
            "text": text,
            "ttl_seconds": ttl_seconds,
        }),
        (None, None) => anyhow::bail!("provide TEXT or --file"),
    };

    let resp = Client::new()
        .post(format!("{}/api/content", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }

    let key = json["key"]
        .as_str()
        .context("server response is missing the key")?;
    println!("{key}");
    println!("{}", content_url(server, key));
    Ok(())
}

async fn cmd_get(server: &str, key: &str, output: Option<&Path>) -> Result<()> {
    let resp = Client::new()
        .get(content_url(server, key))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status == StatusCode::NOT_FOUND {
        anyhow::bail!("secret not found (never existed, expired, or already read)");
    }
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }

    let content = STANDARD
        .decode(json["content"].as_str().unwrap_or(""))
        .context("decode content")?;

    match output {
        Some(path) => {
            std::fs::write(path, &content)
                .with_context(|| format!("write file: {}", path.display()))?;
            eprintln!("✓ wrote {} byte(s) to {}", content.len(), path.display());
        }
        None => match json["text"].as_str() {
            Some(text) => println!("{text}"),
            // The secret is already burned; hand the bytes over as-is.
            None => std::io::stdout()
                .write_all(&content)
                .context("write content to stdout")?,
        },
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn content_url(server: &str, key: &str) -> String {
    format!("{}/api/content/{}", server.trim_end_matches('/'), key)
}

fn error_message(json: &Value) -> &str {
    json["message"].as_str().unwrap_or("unknown error")
}

/// Parse human duration strings like "1h", "30m", "7d", "5s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}
