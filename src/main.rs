use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stopquote::api::{self, ApiState};
use stopquote::config::OracleConfig;
use stopquote::fetch::LiveFetcher;
use stopquote::models::StopPriceSource;
use stopquote::oracle::PriceOracle;
use stopquote::quote::QuoteSigner;
use stopquote::sim::{PriceGenConfig, PriceSimulator};

#[derive(Debug, Parser)]
#[command(name = "stopquote", about = "Signed stop-price quote oracle")]
struct Args {
    /// Path to the price history database.
    #[arg(long, env = "ORACLE_DB_PATH")]
    db: Option<String>,

    /// HTTP server port.
    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Serve quotes from the deterministic simulator instead of live data.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = OracleConfig::from_env().context("loading configuration")?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }

    let signer = Arc::new(QuoteSigner::from_config(&config).context("initializing signer")?);
    info!(oracle_pk = %signer.oracle_pk(), "oracle identity ready");

    let source: Arc<dyn StopPriceSource> = if args.simulate {
        info!("running against the deterministic price simulator");
        let sim = PriceSimulator::new(PriceGenConfig::default())
            .context("building price simulator")?;
        Arc::new(sim)
    } else {
        let fetcher = Arc::new(LiveFetcher::new(&config).context("building live fetcher")?);
        let oracle =
            PriceOracle::open(config.clone(), fetcher).context("opening price oracle")?;
        oracle.start();
        Arc::new(oracle)
    };

    let state = ApiState {
        source,
        signer,
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "quote server listening");

    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stopquote=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
