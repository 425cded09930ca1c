//! Call ingestion sync
//!
//! Periodically pulls CALL activities for the statuses enabled for QA,
//! maps them to call records and inserts the new ones in `synced` status
//! (or `skipped` when no status tag maps to a rubric group). Insert-only:
//! records the pipeline already owns are never overwritten by the sync.

use callqa_common::events::{EventBus, PipelineEvent};
use callqa_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::db::calls::NewCall;
use crate::models::ProcessingStatus;
use crate::services::platform::{Activity, PlatformClient};

/// Outcome of one sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub skipped: bool,
    pub total_seen: usize,
    pub inserted: usize,
}

/// Periodic platform-to-store ingestion
pub struct CallSyncService {
    db: SqlitePool,
    platform: Arc<PlatformClient>,
    event_bus: EventBus,
}

impl CallSyncService {
    pub fn new(db: SqlitePool, platform: Arc<PlatformClient>, event_bus: EventBus) -> Self {
        Self {
            db,
            platform,
            event_bus,
        }
    }

    /// Run one sync pass
    pub async fn run_once(&self) -> Result<SyncSummary> {
        let statuses = db::statuses::list_active(&self.db).await?;
        if statuses.is_empty() {
            tracing::info!("No active platform statuses configured, skipping sync");
            return Ok(SyncSummary {
                skipped: true,
                ..Default::default()
            });
        }

        let status_ids: Vec<String> = statuses.iter().map(|s| s.status_id.clone()).collect();

        let activities = self
            .platform
            .fetch_activities(&status_ids)
            .await
            .map_err(|e| callqa_common::Error::Internal(format!("Activity fetch failed: {}", e)))?;

        let mut inserted = 0usize;
        for activity in &activities {
            if self.ingest_activity(activity).await? {
                inserted += 1;
            }
        }

        tracing::info!(
            total_seen = activities.len(),
            inserted,
            "Synced calls from platform"
        );

        self.event_bus.emit_lossy(PipelineEvent::CallsSynced {
            inserted,
            total_seen: activities.len(),
            timestamp: Utc::now(),
        });

        Ok(SyncSummary {
            skipped: false,
            total_seen: activities.len(),
            inserted,
        })
    }

    /// Map one activity to a call record and insert it if unseen.
    ///
    /// The rubric group comes from the first status tag with a mapping;
    /// activities with no mapped group are stored as `skipped` so they
    /// remain visible without entering the pipeline.
    async fn ingest_activity(&self, activity: &Activity) -> Result<bool> {
        let item = activity.item.as_ref();

        let agent_id = match item.and_then(|i| i.id_agent.as_ref()) {
            Some(agent) => Some(
                db::agents::upsert_by_username(
                    &self.db,
                    &agent.name,
                    &agent.title,
                    agent.extension.as_deref(),
                )
                .await?,
            ),
            None => None,
        };

        let question_group_id = self.map_group(activity).await?;

        let (processing_status, processing_error) = if question_group_id.is_some() {
            (ProcessingStatus::Synced, None)
        } else {
            (
                ProcessingStatus::Skipped,
                Some("No question group assigned".to_string()),
            )
        };

        let call = NewCall {
            call_id: item
                .and_then(|i| i.id_call.clone())
                .unwrap_or_else(|| activity.name.clone()),
            activity_name: activity.name.clone(),
            call_time: activity.time.clone(),
            duration: activity.duration,
            direction: item.and_then(|i| i.direction.clone()),
            answered: item.and_then(|i| i.answered),
            agent_id,
            question_group_id,
            processing_status,
            processing_error,
        };

        db::calls::insert_if_new(&self.db, &call).await
    }

    async fn map_group(&self, activity: &Activity) -> Result<Option<Uuid>> {
        for status in &activity.statuses {
            if let Some(group_id) = db::statuses::group_for_status(&self.db, &status.name).await? {
                return Ok(Some(group_id));
            }
        }
        Ok(None)
    }

    /// Spawn the periodic sync loop
    pub fn spawn_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Call sync pass failed");
                }
            }
        })
    }
}
