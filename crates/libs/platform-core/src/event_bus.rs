//! Durable, at-least-once in-process event bus connecting pushes to CI
//! runs and workspace lifecycle changes to the out-of-scope AI pipeline.
//!
//! `spec.md` names the Event Bus only at the system-overview and
//! concurrency level; this module is the full ambient specification:
//! [`EventBus::publish`] persists an event before returning, and a
//! bounded [`EventBus::run`] worker pool claims `{pending, retrying}`
//! rows by `(priority ASC, created_at ASC)` via compare-and-set, then
//! dispatches to whatever processors are registered for that event kind.

use crate::ctx::Ctx;
use crate::model::event::{Event, EventBmc, EventForCreate, EventStatus};
use crate::model::ModelManager;
use crate::Result;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub type Processor = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Capped exponential backoff for retry delay, doubling per attempt and
/// never exceeding [`BACKOFF_CAP`]. Hand-rolled: no backoff crate is
/// pinned anywhere in the pack, and this is a few lines of arithmetic.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let millis = BACKOFF_BASE.as_millis().saturating_mul(1u128 << attempt.min(16));
    Duration::from_millis(millis.min(BACKOFF_CAP.as_millis()) as u64)
}

#[derive(Clone)]
pub struct EventBus {
    mm: ModelManager,
    processors: Arc<DashMap<String, Vec<Processor>>>,
    max_retries: i64,
}

impl EventBus {
    pub fn new(mm: ModelManager, max_retries: i64) -> Self {
        EventBus {
            mm,
            processors: Arc::new(DashMap::new()),
            max_retries,
        }
    }

    /// Register an async handler for events of `kind`. Multiple
    /// processors may be registered for the same kind; all must succeed
    /// for the event to be marked `completed`.
    pub fn register(&self, kind: &str, processor: Processor) {
        self.processors.entry(kind.to_string()).or_default().push(processor);
    }

    pub async fn publish(&self, ctx: &Ctx, kind: &str, priority: i64, payload: &str, metadata: Vec<(String, String)>) -> Result<Event> {
        let id = EventBmc::enqueue(
            ctx,
            &self.mm,
            EventForCreate {
                kind: kind.to_string(),
                priority,
                payload: payload.to_string(),
                metadata,
            },
        )
        .await?;
        EventBmc::get_by_id(ctx, &self.mm, id).await
    }

    /// Spawn `worker_count` long-lived polling tasks. Each names its
    /// `tracing::Span` with the claimed event's id so logs correlate
    /// across the async boundary.
    pub fn run(&self, worker_count: usize) -> Vec<JoinHandle<()>> {
        (0..worker_count)
            .map(|worker_id| {
                let bus = self.clone();
                tokio::spawn(async move { bus.worker_loop(worker_id).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize) {
        let ctx = Ctx::root_ctx();
        loop {
            match EventBmc::claim_next_pending(&ctx, &self.mm).await {
                Ok(Some(event)) => {
                    let span = tracing::info_span!("event_dispatch", worker_id, event_id = event.id, kind = %event.kind);
                    let _enter = span.enter();
                    self.dispatch(&ctx, event).await;
                }
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    error!(error = %e, "failed to claim next event");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn dispatch(&self, ctx: &Ctx, event: Event) {
        let Some(handlers) = self.processors.get(&event.kind).map(|h| h.clone()) else {
            debug!("no processor registered, marking skipped");
            if let Err(e) = EventBmc::skip(ctx, &self.mm, event.id).await {
                error!(error = %e, "failed to mark event skipped");
            }
            return;
        };

        let mut all_ok = true;
        for handler in &handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!(error = %e, "event processor failed");
                all_ok = false;
                break;
            }
        }

        if all_ok {
            if let Err(e) = EventBmc::complete(ctx, &self.mm, event.id).await {
                error!(error = %e, "failed to mark event completed");
            }
            return;
        }

        match EventBmc::retry_or_fail(ctx, &self.mm, event.id, self.max_retries).await {
            Ok(EventStatus::Retrying) => {
                tokio::time::sleep(backoff_for_attempt(event.attempts as u32)).await;
            }
            Ok(EventStatus::Failed) => {
                warn!(event_id = event.id, "event exhausted retries, terminal failure");
            }
            Ok(_) | Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::new_test_db_pool;
    use platform_common::AppConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_bus() -> EventBus {
        let db = new_test_db_pool().await.unwrap();
        let mm = ModelManager::new_for_test(db, std::env::temp_dir(), Arc::new(AppConfig::default()));
        EventBus::new(mm, 3)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for_attempt(0), BACKOFF_BASE);
        assert_eq!(backoff_for_attempt(1), BACKOFF_BASE * 2);
        assert!(backoff_for_attempt(20) <= BACKOFF_CAP);
    }

    #[tokio::test]
    async fn dispatch_marks_event_completed_on_success() {
        let bus = test_bus().await;
        let ctx = Ctx::root_ctx();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        bus.register(
            "push",
            Arc::new(move |_event| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let event = bus.publish(&ctx, "push", 0, "{}", vec![]).await.unwrap();
        let claimed = EventBmc::claim_next_pending(&ctx, &bus.mm).await.unwrap().unwrap();
        assert_eq!(claimed.id, event.id);

        bus.dispatch(&ctx, claimed).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = EventBmc::get_by_id(&ctx, &bus.mm, event.id).await.unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn dispatch_skips_events_with_no_registered_processor() {
        let bus = test_bus().await;
        let ctx = Ctx::root_ctx();

        let event = bus.publish(&ctx, "unregistered.kind", 0, "{}", vec![]).await.unwrap();
        let claimed = EventBmc::claim_next_pending(&ctx, &bus.mm).await.unwrap().unwrap();
        bus.dispatch(&ctx, claimed).await;

        let stored = EventBmc::get_by_id(&ctx, &bus.mm, event.id).await.unwrap();
        assert_eq!(stored.status, EventStatus::Skipped);
    }

    #[tokio::test]
    async fn dispatch_retries_failing_processor_until_terminal() {
        let bus = test_bus().await;
        let ctx = Ctx::root_ctx();

        bus.register(
            "action_run.finished",
            Arc::new(|_event| Box::pin(async move { Err(crate::Error::Internal("boom".into())) })),
        );

        let event = bus.publish(&ctx, "action_run.finished", 0, "{}", vec![]).await.unwrap();

        for _ in 0..3 {
            let claimed = EventBmc::claim_next_pending(&ctx, &bus.mm).await.unwrap().unwrap();
            bus.dispatch(&ctx, claimed).await;
        }

        let stored = EventBmc::get_by_id(&ctx, &bus.mm, event.id).await.unwrap();
        assert_eq!(stored.status, EventStatus::Failed);
    }
}
