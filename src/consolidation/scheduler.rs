// src/consolidation/scheduler.rs
// Background task running scheduled consolidation over the active chats

use super::run_consolidation;
use crate::config::MemoryConfig;
use crate::db::{DatabasePool, river};
use crate::providers::LlmCallback;
use crate::types::TriggerType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Spawn the scheduled consolidation loop.
///
/// Every `consolidation_schedule_secs` the task consolidates each chat
/// that still has live river rows. Send `true` on the shutdown channel to
/// stop the loop after the current cycle.
pub fn spawn_consolidation_scheduler(
    pool: Arc<DatabasePool>,
    config: MemoryConfig,
    llm: Option<Arc<dyn LlmCallback>>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.consolidation_schedule_secs.max(1));
        info!(
            "Consolidation scheduler started ({}s interval)",
            interval.as_secs()
        );

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            cycles += 1;
            let chats = pool
                .try_interact("active chat scan", |conn| {
                    river::active_chats_sync(conn).map_err(Into::into)
                })
                .await
                .unwrap_or_default();

            for chat_id in chats {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = run_consolidation(
                    &pool,
                    &config,
                    llm.as_deref(),
                    &chat_id,
                    TriggerType::Scheduled,
                    None,
                )
                .await
                {
                    warn!("Scheduled consolidation cycle {} failed for {}: {}", cycles, chat_id, e);
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Consolidation scheduler shutting down after {} cycles", cycles);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_river_entry, setup_test_pool};

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let pool = setup_test_pool().await;
        let (tx, rx) = watch::channel(false);

        let handle =
            spawn_consolidation_scheduler(pool, MemoryConfig::default(), None, rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("scheduler should stop after shutdown signal")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_consolidates_active_chats() {
        let pool = setup_test_pool().await;
        pool.interact(|conn| {
            seed_river_entry(conn, "c1", "m1", "x", 10, "2026-01-01T00:00:00.000000Z");
            Ok(())
        })
        .await
        .unwrap();

        let config = MemoryConfig {
            consolidation_schedule_secs: 1,
            ..Default::default()
        };
        let (tx, rx) = watch::channel(false);
        let handle = spawn_consolidation_scheduler(pool.clone(), config, None, rx);

        // Paused time auto-advances through the sleep; poll for the run row
        let mut recorded = 0usize;
        for _ in 0..200 {
            tokio::task::yield_now().await;
            recorded = pool
                .interact(|conn| {
                    crate::db::consolidation::recent_runs_sync(conn, "c1", 10)
                        .map_err(Into::into)
                })
                .await
                .unwrap()
                .len();
            if recorded > 0 {
                break;
            }
        }
        assert!(recorded > 0, "expected at least one scheduled run");

        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(60), handle).await;
    }
}
