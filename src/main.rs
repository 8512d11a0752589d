//! Crypto Crash Server
//!
//! Binary entrypoint: wires the in-memory backends to the scheduler and
//! the WebSocket server and runs both until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crypto_crash::game::ledger::WagerLedger;
use crypto_crash::game::scheduler::{RoundScheduler, SchedulerConfig};
use crypto_crash::game::types::{UserAccount, UserId};
use crypto_crash::network::auth::AuthConfig;
use crypto_crash::network::server::{GameServer, ServerConfig};
use crypto_crash::store::oracle::StaticOracle;
use crypto_crash::store::persist::MemoryStore;
use crypto_crash::store::shared::MemorySharedState;
use crypto_crash::{EventBus, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Crypto Crash Server v{}", VERSION);

    let shared = Arc::new(MemorySharedState::new());
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(StaticOracle::from_env());
    let events = EventBus::default();

    seed_demo_accounts(&store).await?;

    let ledger = Arc::new(WagerLedger::new(
        shared.clone(),
        store.clone(),
        oracle.clone(),
        events.clone(),
    ));

    let scheduler = RoundScheduler::new(
        SchedulerConfig::from_env(),
        shared,
        store.clone(),
        ledger.clone(),
        events.clone(),
    );
    tokio::spawn(scheduler.run());

    let server = GameServer::new(
        ServerConfig::from_env(),
        AuthConfig::from_env(),
        store,
        oracle,
        ledger,
        events,
    );
    server.run().await.context("server terminated")?;
    Ok(())
}

/// Seed a couple of demo accounts so a fresh in-memory deployment is
/// immediately playable.
async fn seed_demo_accounts(store: &MemoryStore) -> anyhow::Result<()> {
    use crypto_crash::store::persist::GameStore;

    for (id, name) in [("demo-alice", "alice"), ("demo-bob", "bob")] {
        store
            .upsert_account(UserAccount::new(UserId::new(id), name, 1000.0))
            .await
            .with_context(|| format!("failed to seed account {name}"))?;
        info!("Seeded demo account {} ({})", name, id);
    }
    Ok(())
}
