use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use astro_gateway::gateway::telemetry::{self, TelemetryGuard};
use astro_gateway::gateway::{AppState, ChatGateway, GatewayConfig, http_router};
use astro_gateway::{AstrologyDataClient, Env, HttpGeocoder, PlaceResolver, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "astro-gateway")]
#[command(about = "Completion gateway and astrology data proxy")]
#[command(version)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// TOML file with non-secret settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// dotenv file consulted before the process environment
    #[arg(long)]
    dotenv: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,

    /// Export spans over OTLP/HTTP (requires the `gateway-otel` feature)
    #[arg(long)]
    otel: bool,

    #[arg(long)]
    otel_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _telemetry = init_telemetry(&cli)?;

    let env = match cli.dotenv.as_deref() {
        Some(path) => Env::from_dotenv_file(path)
            .map_err(|err| format!("read dotenv {}: {err}", path.display()))?,
        None => Env::default(),
    };
    let mut config = match cli.config.as_deref() {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    config.apply_env(&env)?;
    config.validate()?;

    let chat = ChatGateway::from_config(&config)?;
    if !chat.router().has_primary() && !chat.router().has_fallback() {
        warn!("no completion provider key configured; POST /chat will fail");
    }

    let geocoder: Arc<dyn PlaceResolver> = Arc::new(HttpGeocoder::new(&config.geocode)?);
    let mut state = AppState::new(chat).with_geocoder(geocoder.clone());

    match AstrologyDataClient::from_config(&config, Arc::new(SystemClock)) {
        Ok(client) => {
            let client = client
                .with_geocoder(geocoder)
                .with_observability(state.observability().clone());
            state = state.with_astrology(client);
        }
        Err(err) => warn!(error = %err, "data provider disabled"),
    }

    let app = http_router(state);
    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!(listen = %cli.listen, "astro-gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_telemetry(cli: &Cli) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    if cli.otel || cli.otel_endpoint.is_some() {
        return init_otel(cli);
    }
    telemetry::init_tracing(cli.json_logs)
}

#[cfg(feature = "gateway-otel")]
fn init_otel(cli: &Cli) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    telemetry::init_tracing_with_otel(
        "astro-gateway",
        cli.otel_endpoint.as_deref(),
        cli.json_logs,
    )
}

#[cfg(not(feature = "gateway-otel"))]
fn init_otel(_cli: &Cli) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    Err("--otel requires building with the `gateway-otel` feature".into())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("could not install ctrl-c handler; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
