use std::sync::Arc;

use clap::Parser;

use slx_state::api::{app, AppState};
use slx_state::api_keys::{KeyCodec, KeyStore};
use slx_state::billing::CreditLedger;
use slx_state::config::ServiceConfig;
use slx_state::datastore::{Datastore, MemoryStore};
use slx_state::provision::AccountProvisioner;
use slx_state::usage::UsageRecorder;

#[derive(Clone, Debug, Parser)]
pub struct Cli {
    /// Address to listen on; falls back to SLXDB_STATE_LISTEN_ADDR
    #[clap(long, short)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    simple_logger::init_with_level(log::Level::Info)?;

    let parser = Cli::parse();
    let config = ServiceConfig::global();
    let listen_addr = parser
        .listen_addr
        .unwrap_or_else(|| config.listen_addr.clone());

    let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
    let codec = KeyCodec::new(config.master_key.clone());
    let keys = KeyStore::new(store.clone(), codec);
    let ledger = CreditLedger::new(store.clone());
    let recorder = UsageRecorder::new(store.clone(), ledger.clone(), keys.clone());
    let provisioner = AccountProvisioner::new(store.clone(), keys.clone(), ledger.clone());

    let state = Arc::new(AppState {
        provisioner,
        keys,
        ledger,
        recorder,
    });

    log::info!("Starting slx-state on {}", listen_addr);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
