use anyhow::Result;
use async_trait::async_trait;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use vigil::core::{Clock, Config, SystemClock};
use vigil::features::leadership::{
    CoordinationStore, LeaseManager, LeasePolicy, RedisCoordinationStore,
};
use vigil::features::reminders::{
    DeliverySink, DeliveryTarget, ReminderRepository, ReminderScheduler, ReminderStore,
};
use vigil::supervisor::Supervisor;

/// Stand-in sink for running the engine headless: logs every delivery.
///
/// In the bot deployment the gateway client implements [`DeliverySink`] and
/// resolves targets to real channels (with a DM fallback for `Direct`).
struct LogDeliverySink;

#[async_trait]
impl DeliverySink for LogDeliverySink {
    async fn deliver(&self, target: &DeliveryTarget, owner_id: &str, message: &str) -> Result<()> {
        match target {
            DeliveryTarget::Channel {
                guild_id,
                channel_id,
            } => info!("⏰ [guild {guild_id} / channel {channel_id}] <@{owner_id}> {message}"),
            DeliveryTarget::Direct => info!("⏰ [dm] <@{owner_id}> {message}"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting vigil scheduling engine...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = ReminderStore::new(&config.reminder_file);
    let repository = Arc::new(ReminderRepository::load(store, clock.clone()).await);

    let coordination: Option<Arc<dyn CoordinationStore>> = match &config.redis_url {
        Some(url) => match RedisCoordinationStore::connect(url) {
            Ok(store) => {
                info!("Coordination store configured (key '{}')", config.lease_key);
                Some(Arc::new(store))
            }
            Err(e) if config.lease_policy == LeasePolicy::RequireLease => {
                error!("Coordination store unusable and a lease is required: {e:#}");
                return Err(e);
            }
            Err(e) => {
                warn!("Coordination store unusable; continuing without one: {e:#}");
                None
            }
        },
        None => {
            warn!("No REDIS_URL configured; leader election runs degraded");
            None
        }
    };

    let lease = Arc::new(LeaseManager::new(
        coordination,
        config.lease_policy,
        config.lease_key.clone(),
        config.lease_ttl,
    ));

    let scheduler = Arc::new(ReminderScheduler::new(
        repository.clone(),
        Arc::new(LogDeliverySink) as Arc<dyn DeliverySink>,
        clock,
        config.poll_interval,
        config.poll_window,
    ));

    let supervisor = Supervisor::new(lease, scheduler, config.lease_retry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await
}
