//! servekit demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌──────────┐    ┌─────────┐    ┌───────────┐
//!     ───────────────────▶│   net    │───▶│  http   │───▶│  routing  │───▶ handler
//!                         │ listener │    │   app   │    │   table   │
//!                         └────┬─────┘    └─────────┘    └───────────┘
//!                              │
//!     SIGINT/SIGTERM/SIGUSR1   ▼
//!     or GET /exit ──────▶ lifecycle ──▶ on_start / on_interrupt / on_exit / on_fail
//! ```
//!
//! # Routes
//! - `/` answers `Ok`
//! - `/exit` answers `Exiting`, then stops the service a second later
//! - `/info/{address}` geolocates an address
//! - `/random/{domain}/{len}` returns a random string
//! - `/fibonacci/{index}` returns a Fibonacci number

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clap::Parser;

use servekit::config::{load_config, validate_config, ServiceConfig};
use servekit::ipinfo::IpInfoClient;
use servekit::observability::logging;
use servekit::random::{self, Domain};
use servekit::routing::Request;
use servekit::{RouteTable, Service, State};

/// Largest string the random endpoint will generate.
const MAX_RANDOM_LEN: usize = 4096;

#[derive(Parser)]
#[command(name = "servekit")]
#[command(about = "Demo HTTP service with a managed lifecycle", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener address.
    #[arg(short, long)]
    address: Option<String>,

    /// Override the log level.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(address) = cli.address {
        config.listener.address = address;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    validate_config(&config).map_err(|errors| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    })?;

    logging::init(&config.observability)?;
    tracing::info!(
        address = %config.listener.address,
        drain_secs = config.timeouts.drain_secs,
        "servekit v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let ipinfo = Arc::new(IpInfoClient::from_config(&config.ipinfo)?);
    let routes = RouteTable::new()
        .route("/", |_req| async { "Ok" })
        .route("/info/", move |req| info(Arc::clone(&ipinfo), req))
        .route("/random/", random_string)
        .route("/fibonacci/", fibonacci);

    let mut service = Service::from_config(&config, routes);
    let handle = service.stop_handle();
    let port = config.listener.address.rsplit(':').next().unwrap_or_default().to_string();
    let pid = std::process::id();

    service
        .route("/exit", move |_req| {
            let handle = handle.clone();
            async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    handle.stop();
                });
                "Exiting"
            }
        })
        .on_start(move || tracing::info!("{pid} listening on port {port}"))
        .on_exit(|| tracing::info!("Server is exiting now"))
        .on_fail(|err| tracing::error!(kind = err.kind(), "{err}"))
        .on_interrupt(|signal| tracing::info!("Received {signal}"));

    let state = service.start().await;
    tracing::info!(state = %state, "Shutdown complete");

    Ok(match state {
        State::Stopped => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Path segments after the route prefix.
fn segments<'a>(req: &'a Request, prefix: &str) -> Vec<&'a str> {
    req.uri()
        .path()
        .strip_prefix(prefix)
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

async fn info(client: Arc<IpInfoClient>, req: Request) -> Response {
    let address = match segments(&req, "/info/").as_slice() {
        [address] => address.to_string(),
        _ => return (StatusCode::BAD_REQUEST, "usage: /info/{address}").into_response(),
    };

    match client.get_info(&address).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => {
            tracing::warn!(address = %address, error = %e, "Lookup failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

async fn random_string(req: Request) -> Response {
    let parsed = match segments(&req, "/random/").as_slice() {
        [domain, len] => domain
            .parse::<Domain>()
            .and_then(|d| len.parse::<usize>().map(|n| (d, n)).map_err(|e| e.to_string())),
        _ => Err("usage: /random/{domain}/{len}".to_string()),
    };

    match parsed {
        Ok((_, len)) if len > MAX_RANDOM_LEN => {
            let message = format!("len must be at most {MAX_RANDOM_LEN}");
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        Ok((domain, len)) => match random::generate(domain, len) {
            Ok(value) => value.into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

async fn fibonacci(req: Request) -> Response {
    let index = match segments(&req, "/fibonacci/").as_slice() {
        [index] => index.parse::<i64>(),
        _ => return (StatusCode::BAD_REQUEST, "usage: /fibonacci/{index}").into_response(),
    };

    let value = index
        .map_err(|e| e.to_string())
        .and_then(|i| random::fibonacci(i).map_err(|e| e.to_string()));
    match value {
        Ok(value) => value.to_string().into_response(),
        Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}
