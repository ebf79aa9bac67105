use anyhow::Context;
use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

use gitea_ip_limit::{
    AppState, Gate, SystemClock,
    config::{Args, GateConfig},
    handlers::{admin_router, gateway_router},
};

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = GateConfig::load(&args.config)
        .with_context(|| format!("loading gate config from {}", args.config.display()))?;
    let upstream = args.upstream.trim_end_matches('/').to_string();
    Url::parse(&upstream).with_context(|| format!("invalid upstream URL {:?}", upstream))?;

    let gate = Arc::new(Gate::new(config, Arc::new(SystemClock))?);
    let config = gate.config();
    info!(
        verify_endpoint = %gate.verifier().endpoint(),
        cookie_name = %config.cookie_name,
        trust_authorization = config.trusts_authorization(),
        verify_cooldown = ?config.cooldown(),
        limit = config.limit,
        window = ?config.window,
        trusted_for = ?config.trusted_for,
        timeout = ?config.timeout,
        "gate configured"
    );

    // creating shared state
    let state = Arc::new(AppState {
        client: reqwest::Client::new(),
        upstream,
        gate,
    });

    let gateway = gateway_router(state.clone());
    let admin = admin_router(state.clone());

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("binding gateway port {}", args.port))?;
    let admin_listener = TcpListener::bind(("0.0.0.0", args.admin_port))
        .await
        .with_context(|| format!("binding admin port {}", args.admin_port))?;

    info!(port = args.port, upstream = %state.upstream, "gateway running");
    info!(port = args.admin_port, "serving /health and /metrics");

    let gateway = axum::serve(
        listener,
        gateway.into_make_service_with_connect_info::<SocketAddr>(),
    );
    let admin = axum::serve(admin_listener, admin);
    tokio::try_join!(gateway.into_future(), admin.into_future())?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
