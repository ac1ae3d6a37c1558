//! Durable event log backing [`crate::event_bus`]. Every row is written
//! `pending` before dispatch and only reaches a terminal status after a
//! handler runs, so a crash mid-delivery leaves the event claimable for
//! replay rather than silently dropped.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Retrying,
    Failed,
    /// No processor is registered for this event's kind.
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Retrying => "retrying",
            EventStatus::Failed => "failed",
            EventStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for EventStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => EventStatus::Pending,
            "processing" => EventStatus::Processing,
            "completed" => EventStatus::Completed,
            "retrying" => EventStatus::Retrying,
            "failed" => EventStatus::Failed,
            "skipped" => EventStatus::Skipped,
            other => return Err(crate::Error::Internal(format!("unknown event status: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub kind: String,
    pub priority: i64,
    pub payload: String,
    pub status: EventStatus,
    pub attempts: i64,
    pub created_at: NaiveDateTime,
    pub dispatched_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct EventForCreate {
    pub kind: String,
    pub priority: i64,
    pub payload: String,
    pub metadata: Vec<(String, String)>,
}

pub struct EventBmc;

impl EventBmc {
    pub async fn enqueue(_ctx: &Ctx, mm: &ModelManager, ev_c: EventForCreate) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare("INSERT INTO events (kind, priority, payload) VALUES (?, ?, ?) RETURNING id")
            .await?;
        let mut rows = stmt
            .query((ev_c.kind.as_str(), ev_c.priority, ev_c.payload.as_str()))
            .await?;

        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::Internal("insert into events returned no row".into()));
        };

        if !ev_c.metadata.is_empty() {
            let meta_stmt = db
                .prepare("INSERT INTO event_metadata (event_id, key, value) VALUES (?, ?, ?)")
                .await?;
            for (key, value) in &ev_c.metadata {
                meta_stmt.execute((id, key.as_str(), value.as_str())).await?;
            }
        }

        Ok(id)
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Event> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, kind, priority, payload, status, attempts, created_at, dispatched_at FROM events WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_event(&row)?),
            None => Err(crate::Error::NotFound(format!("event {id}"))),
        }
    }

    /// Fetch and claim the oldest `pending`/`retrying` event ordered by
    /// `(priority ASC, created_at ASC)`, atomically marking it
    /// `processing` so concurrent workers in the bounded worker pool
    /// can't double-deliver it.
    pub async fn claim_next_pending(_ctx: &Ctx, mm: &ModelManager) -> Result<Option<Event>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, status FROM events WHERE status IN ('pending', 'retrying')
                 ORDER BY priority ASC, created_at ASC LIMIT 1",
            )
            .await?;
        let mut rows = stmt.query(()).await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let id: i64 = row.get(0)?;
        let prior_status: String = row.get(1)?;

        let dispatched_at = chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let update_stmt = db
            .prepare(
                "UPDATE events SET status = 'processing', dispatched_at = ?, attempts = attempts + 1
                 WHERE id = ? AND status = ?",
            )
            .await?;
        let affected = update_stmt
            .execute((dispatched_at.as_str(), id, prior_status.as_str()))
            .await?;

        if affected == 0 {
            return Ok(None);
        }

        Ok(Some(Self::get_by_id(_ctx, mm, id).await?))
    }

    pub async fn complete(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE events SET status = 'completed' WHERE id = ? AND status = 'processing'")
            .await?;
        stmt.execute([id]).await?;
        Ok(())
    }

    /// Roll a processing event back to `retrying` after a failed handler,
    /// or to terminal `failed` once `attempts` reaches `max_retries`.
    pub async fn retry_or_fail(_ctx: &Ctx, mm: &ModelManager, id: i64, max_retries: i64) -> Result<EventStatus> {
        let event = Self::get_by_id(_ctx, mm, id).await?;
        let next = if event.attempts < max_retries {
            EventStatus::Retrying
        } else {
            EventStatus::Failed
        };
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE events SET status = ? WHERE id = ? AND status = 'processing'")
            .await?;
        stmt.execute((next.as_str(), id)).await?;
        Ok(next)
    }

    pub async fn skip(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE events SET status = 'skipped' WHERE id = ? AND status = 'processing'")
            .await?;
        stmt.execute([id]).await?;
        Ok(())
    }

    pub async fn metadata_for(_ctx: &Ctx, mm: &ModelManager, event_id: i64) -> Result<Vec<(String, String)>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT key, value FROM event_metadata WHERE event_id = ?")
            .await?;
        let mut rows = stmt.query([event_id]).await?;

        let mut pairs = Vec::new();
        while let Some(row) = rows.next().await? {
            pairs.push((row.get::<String>(0)?, row.get::<String>(1)?));
        }
        Ok(pairs)
    }
}

fn row_to_event(row: &libsql::Row) -> Result<Event> {
    let status_str: String = row.get(4)?;
    let created_at_str: String = row.get(6)?;
    let dispatched_at_str: Option<String> = row.get(7)?;

    Ok(Event {
        id: row.get(0)?,
        kind: row.get(1)?,
        priority: row.get(2)?,
        payload: row.get(3)?,
        status: status_str.parse()?,
        attempts: row.get(5)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
        dispatched_at: dispatched_at_str
            .as_deref()
            .map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap_or_default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::new_test_db_pool;
    use platform_common::AppConfig;
    use std::sync::Arc;

    async fn test_mm() -> ModelManager {
        let db = new_test_db_pool().await.unwrap();
        ModelManager::new_for_test(db, std::env::temp_dir(), Arc::new(AppConfig::default()))
    }

    async fn enqueue_simple(mm: &ModelManager, kind: &str, priority: i64) -> i64 {
        let ctx = Ctx::root_ctx();
        EventBmc::enqueue(
            &ctx,
            mm,
            EventForCreate {
                kind: kind.into(),
                priority,
                payload: "{}".into(),
                metadata: vec![],
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn claim_next_pending_respects_ascending_priority_order() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();

        enqueue_simple(&mm, "action_run.finished", 10).await;
        let urgent_id = EventBmc::enqueue(
            &ctx,
            &mm,
            EventForCreate {
                kind: "push".into(),
                priority: 0,
                payload: "{}".into(),
                metadata: vec![("branch".into(), "main".into())],
            },
        )
        .await
        .unwrap();

        let claimed = EventBmc::claim_next_pending(&ctx, &mm).await.unwrap().unwrap();
        assert_eq!(claimed.id, urgent_id);
        assert_eq!(claimed.kind, "push");
        assert_eq!(claimed.status, EventStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        let meta = EventBmc::metadata_for(&ctx, &mm, claimed.id).await.unwrap();
        assert_eq!(meta, vec![("branch".to_string(), "main".to_string())]);
    }

    #[tokio::test]
    async fn claim_next_pending_only_lets_one_worker_win() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        enqueue_simple(&mm, "push", 0).await;

        let first = EventBmc::claim_next_pending(&ctx, &mm).await.unwrap();
        let second = EventBmc::claim_next_pending(&ctx, &mm).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn retry_or_fail_retries_until_max_then_terminates() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let id = enqueue_simple(&mm, "push", 0).await;

        EventBmc::claim_next_pending(&ctx, &mm).await.unwrap();
        let status = EventBmc::retry_or_fail(&ctx, &mm, id, 2).await.unwrap();
        assert_eq!(status, EventStatus::Retrying);

        EventBmc::claim_next_pending(&ctx, &mm).await.unwrap();
        let status = EventBmc::retry_or_fail(&ctx, &mm, id, 2).await.unwrap();
        assert_eq!(status, EventStatus::Failed);

        let event = EventBmc::get_by_id(&ctx, &mm, id).await.unwrap();
        assert_eq!(event.status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn skip_marks_event_terminal_without_retry() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let id = enqueue_simple(&mm, "unknown.kind", 0).await;

        EventBmc::claim_next_pending(&ctx, &mm).await.unwrap();
        EventBmc::skip(&ctx, &mm, id).await.unwrap();

        let event = EventBmc::get_by_id(&ctx, &mm, id).await.unwrap();
        assert_eq!(event.status, EventStatus::Skipped);
    }
}
