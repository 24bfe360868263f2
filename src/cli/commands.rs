//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::extract::{ExtractedRecord, Extractor, ExtractorOptions};
use crate::filter::tier_filter::{self, FilterResult};
use crate::filter::types::PolicyTier;
use crate::platform::{BotApiClient, RawEvent};
use crate::relay::Relay;
use crate::store::{HistoryStore, SqliteHistoryStore};

/// Start the relay
pub async fn start(config: &Config) -> Result<()> {
    info!("Starting contract address relay...");

    let client = Arc::new(BotApiClient::new(config.telegram.client_config())?);
    let me = client
        .get_me()
        .await
        .context("Telegram getMe failed, check the bot token")?;
    info!(
        "Connected as @{} ({})",
        me.username.as_deref().unwrap_or(&me.first_name),
        me.id
    );

    let store: Option<Arc<dyn HistoryStore>> = if config.storage.enabled {
        Some(Arc::new(open_store(config)?))
    } else {
        warn!("Storage disabled - filter level and history will not survive restarts");
        None
    };

    let relay = Arc::new(Relay::from_config(config, client.clone(), store)?);
    let restored = relay.restore_state().await;
    info!(
        "Filter level: {}, dedup: {} ({} addresses primed)",
        restored.tier,
        relay.dedup().mode(),
        restored.primed
    );
    info!(
        "Watching {} ({} chats, {} senders), forwarding to {} destinations",
        relay.selector().mode(),
        relay.selector().chat_count(),
        relay.selector().sender_count(),
        config.delivery.destinations.len()
    );

    let (event_tx, event_rx) = mpsc::channel::<RawEvent>(config.intake.channel_capacity);
    let poller = client.spawn_poller(event_tx);
    let mut relay_task = tokio::spawn(Arc::clone(&relay).run(event_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut relay_task => {
            if let Err(e) = result {
                error!("Relay task failed: {}", e);
            }
            client.stop();
            return Ok(());
        }
    }

    // Stopping the poller closes the event channel; the relay then drains
    client.stop();
    if let Err(e) = poller.await {
        error!("Poller task failed: {}", e);
    }
    if let Err(e) = relay_task.await {
        error!("Relay task failed: {}", e);
    }

    info!("Relay stopped");
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    match config.validate() {
        Ok(()) => println!("Configuration is valid."),
        Err(e) => println!("Configuration is NOT valid: {}", e),
    }
    Ok(())
}

/// Check Telegram connectivity and the history store
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== RELAY HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("Telegram Bot API... ");
    std::io::stdout().flush().ok();
    match check_telegram(config).await {
        Ok(identity) => println!("OK ({})", identity),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("History store... ");
    std::io::stdout().flush().ok();
    if config.storage.enabled {
        match open_store(config).and_then(|store| Ok(store.seen_count()?)) {
            Ok(count) => println!("OK ({} addresses at {})", count, config.storage.path),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    } else {
        println!("SKIPPED (storage disabled)");
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_telegram(config: &Config) -> Result<String> {
    let client = BotApiClient::new(config.telegram.client_config())?;
    let me = client.get_me().await?;
    Ok(format!(
        "@{} id {}",
        me.username.as_deref().unwrap_or(&me.first_name),
        me.id
    ))
}

/// Run the extractor on a message and show what the relay would do
pub fn parse(config: &Config, text: Option<String>) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read message from stdin")?;
            buffer
        }
    };

    let extractor = Extractor::with_options(ExtractorOptions {
        strict_address: config.filter.strict_address,
    })?;
    let policy = config.filter.policy_tier()?;

    match extractor.parse(&text) {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("\n{}", describe_decision(&record, policy));
        }
        None => println!("No contract address found."),
    }

    Ok(())
}

fn describe_decision(record: &ExtractedRecord, policy: PolicyTier) -> String {
    match tier_filter::check(record, policy) {
        FilterResult::Pass => format!(
            "Decision: FORWARD (tier {} at filter level {})",
            record.tier, policy
        ),
        FilterResult::Filtered(reason) => format!("Decision: SKIP ({})", reason),
    }
}

/// List forwarded addresses, newest first
pub async fn history(config: &Config, limit: usize) -> Result<()> {
    let store = require_store(config)?;
    let records = store.recent_records(limit).await?;

    if records.is_empty() {
        println!("No forwarded addresses recorded.");
        return Ok(());
    }

    println!("\n=== FORWARD HISTORY (newest first) ===\n");
    println!(
        "{:<20} {:<46} {:<10} {:>8} {:>10} {:>10}",
        "First seen (UTC)", "Address", "Tier", "Score", "Market K", "Followers"
    );
    for record in &records {
        println!(
            "{:<20} {:<46} {:<10} {:>8} {:>10} {:>10}",
            record.first_seen.format("%Y-%m-%d %H:%M:%S"),
            record.address,
            record.tier,
            record.twitter_score,
            record.market_value_k,
            record.follower_count,
        );
    }
    println!("\n{} record(s)", records.len());

    Ok(())
}

/// Delete all forwarded-address history (the saved filter level is kept)
pub async fn clear_history(config: &Config, force: bool) -> Result<()> {
    let store = require_store(config)?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete all forward history in {}? Addresses may be forwarded again.",
                config.storage.path
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Clear cancelled by user");
            return Ok(());
        }
    }

    let removed = store.clear_seen().await?;
    println!("Removed {} record(s).", removed);
    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteHistoryStore> {
    SqliteHistoryStore::open(&config.storage.path)
        .with_context(|| format!("Failed to open history store {}", config.storage.path))
}

fn require_store(config: &Config) -> Result<SqliteHistoryStore> {
    if !config.storage.enabled {
        anyhow::bail!("Storage is disabled (storage.enabled = false)");
    }
    open_store(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::Tier;

    fn record(tier: Tier) -> ExtractedRecord {
        ExtractedRecord {
            contract_address: "So11111111111111111111111111111111111111112".to_string(),
            tier,
            ..Default::default()
        }
    }

    #[test]
    fn test_describe_decision() {
        let forward = describe_decision(&record(Tier::Good), PolicyTier::Normal);
        assert!(forward.starts_with("Decision: FORWARD"));

        let skip = describe_decision(&record(Tier::Bad), PolicyTier::Good);
        assert!(skip.starts_with("Decision: SKIP"));
        assert!(skip.contains("below"));
    }

    #[tokio::test]
    async fn test_history_requires_storage() {
        let mut config = Config::default();
        config.storage.enabled = false;
        assert!(history(&config, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_history_forced() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("relay.db").to_string_lossy().into_owned();

        let store = open_store(&config).unwrap();
        store
            .record_seen(&crate::store::SeenRecord::from_record(
                &record(Tier::Good),
                chrono::Utc::now(),
            ))
            .await
            .unwrap();

        clear_history(&config, true).await.unwrap();
        assert_eq!(store.seen_count().unwrap(), 0);
    }
}
