mod cache;
mod config;
mod dashboard;
mod error;
mod model;
mod poller;
mod store;
mod strategy;
mod trade_values;
mod upstream;
mod utils;

use anyhow::Result;
use clap::Parser;

use crate::{
    cache::MirrorCache,
    config::Settings,
    dashboard::DashboardState,
    store::SqliteStore,
    upstream::{CandleClient, NetWorthClient, OrderbookClient, UpstreamClient},
};

#[derive(Debug, Parser)]
#[command(name = "dexwatch", version)]
struct Cli {
    /// Override HTTP_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override HTTP_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Skip the background pollers (serve API only)
    #[arg(long)]
    no_pollers: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(h) = cli.host {
        settings.http_host = h;
    }
    if let Some(p) = cli.port {
        settings.http_port = p;
    }
    if cli.no_pollers {
        settings.pollers_enabled = false;
    }

    let store = SqliteStore::new(&settings.sqlite_path)?;
    store.init_db()?;

    let cache = MirrorCache::new(settings.series_window);
    let client = UpstreamClient::new(&settings)?;
    let candles = CandleClient::new(&settings, client.clone());
    let net_worth = NetWorthClient::new(&settings, client.clone());
    let orderbook = OrderbookClient::new(&settings, client);

    log::info!(
        "app.start host={} port={} sqlite={} pollers={}",
        settings.http_host,
        settings.http_port,
        store.path(),
        settings.pollers_enabled
    );

    if settings.pollers_enabled {
        poller::spawn_all(
            settings.clone(),
            store.clone(),
            cache.clone(),
            net_worth.clone(),
        );
    }

    dashboard::serve(DashboardState {
        settings,
        store,
        cache,
        candles,
        net_worth,
        orderbook,
    })
    .await
}
