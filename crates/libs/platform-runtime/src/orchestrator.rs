//! Polls for queued action runs, materializes the triggering commit into
//! a scratch worktree, and dispatches it to the [`SandboxRunner`].
//!
//! Mirrors `platform_core::event_bus::EventBus`'s worker-pool shape: a
//! fixed number of long-lived tasks poll a CAS-guarded queue on a fixed
//! interval rather than waiting on a channel, so a crashed worker simply
//! stops claiming work instead of losing anything in flight.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use platform_core::model::action::ActionBmc;
use platform_core::model::action_artifact::ActionArtifactBmc;
use platform_core::model::action_run::{ActionRunBmc, ActionRunStatus};
use platform_core::{Ctx, ModelManager};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::container_runtime::ContainerRuntime;
use crate::sandbox::{SandboxRequest, SandboxRunner};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60 * 30);

pub struct ActionOrchestrator<R: ContainerRuntime> {
    mm: ModelManager,
    runner: Arc<SandboxRunner<R>>,
}

impl<R: ContainerRuntime + 'static> ActionOrchestrator<R> {
    pub fn new(mm: ModelManager, runner: Arc<SandboxRunner<R>>) -> Self {
        Self { mm, runner }
    }

    /// Spawn `worker_count` polling tasks. Returns their join handles so
    /// the caller can await clean shutdown.
    pub fn run(self: Arc<Self>, worker_count: usize) -> Vec<JoinHandle<()>> {
        (0..worker_count)
            .map(|idx| {
                let this = self.clone();
                tokio::spawn(async move { this.worker_loop(idx).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_idx: usize) {
        let span = tracing::info_span!("action_orchestrator_worker", worker_idx);
        let _enter = span.enter();
        loop {
            match self.try_claim_and_run().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(err) => {
                    error!(error = %err, "orchestrator worker iteration failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Returns `Ok(true)` if a run was claimed and processed (so the
    /// worker should immediately look for more work), `Ok(false)` if the
    /// queue was empty.
    async fn try_claim_and_run(&self) -> Result<bool> {
        let ctx = Ctx::root_ctx();
        let run = match ActionRunBmc::claim_next_queued(&ctx, &self.mm).await? {
            Some(run) => run,
            None => return Ok(false),
        };

        let run_span = tracing::info_span!("action_run", action_run_id = run.id, sandbox_name = tracing::field::Empty);
        run_span.record("sandbox_name", format!("platform-action-{}", run.id).as_str());
        let _enter = run_span.enter();

        info!(action_id = run.action_id, commit_sha = %run.commit_sha, "claimed action run");

        let action = ActionBmc::get_by_id(&ctx, &self.mm, run.action_id).await?;
        let repo = platform_core::model::repository::RepositoryBmc::get_by_id(&ctx, &self.mm, action.repository_id).await?;
        let repo_path = self.mm.repo_path(&repo.slug);

        let workdir = tempfile::tempdir().map_err(Error::Io)?;
        if let Err(err) = materialize_commit(&repo_path, &run.commit_sha, workdir.path()).await {
            warn!(error = %err, "failed to materialize commit for sandbox");
            ActionRunBmc::finish(
                &ctx,
                &self.mm,
                run.id,
                ActionRunStatus::Failed,
                &format!("failed to check out {}: {err}", run.commit_sha),
                None,
            )
            .await?;
            return Ok(true);
        }

        let req = SandboxRequest {
            action_run_id: run.id,
            image: action.image.clone(),
            command: vec!["sh".to_string(), "-c".to_string(), action.command.clone()],
            env: vec![
                ("PLATFORM_COMMIT_SHA".into(), run.commit_sha.clone()),
                ("PLATFORM_BRANCH".into(), run.branch.clone()),
            ],
            workdir_host_path: workdir.path().to_string_lossy().to_string(),
            memory_limit_mb: Some(2048),
            cpu_shares: Some(512),
            pids_limit: Some(256),
            network_enabled: false,
            timeout: DEFAULT_RUN_TIMEOUT,
        };

        let outcome = self.runner.run(req).await;

        match outcome {
            Ok(outcome) => {
                let status = if outcome.exit_code == 0 {
                    ActionRunStatus::Succeeded
                } else {
                    ActionRunStatus::Failed
                };
                self.collect_artifacts(&ctx, run.id, &action.artifact_patterns, workdir.path()).await;
                ActionRunBmc::finish(
                    &ctx,
                    &self.mm,
                    run.id,
                    status,
                    &String::from_utf8_lossy(&outcome.output),
                    Some(outcome.exit_code),
                )
                .await?;
            }
            Err(err) => {
                warn!(error = %err, "sandbox execution failed");
                ActionRunBmc::finish(&ctx, &self.mm, run.id, ActionRunStatus::Failed, &err.to_string(), None).await?;
            }
        }

        Ok(true)
    }

    async fn collect_artifacts(&self, ctx: &Ctx, run_id: i64, patterns: &[String], workdir: &Path) {
        for pattern in patterns {
            let full_pattern = workdir.join(pattern);
            let Some(full_pattern) = full_pattern.to_str() else { continue };
            let matches = match glob::glob(full_pattern) {
                Ok(m) => m,
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "invalid artifact glob pattern");
                    continue;
                }
            };
            for entry in matches.flatten() {
                if !entry.is_file() {
                    continue;
                }
                let Ok(relative) = entry.strip_prefix(workdir) else { continue };
                let relative_str = relative.to_string_lossy().to_string();
                let dest = self.mm.artifact_storage_path(run_id, &relative_str);
                if let Some(parent) = dest.parent() {
                    if tokio::fs::create_dir_all(parent).await.is_err() {
                        continue;
                    }
                }
                if tokio::fs::copy(&entry, &dest).await.is_err() {
                    continue;
                }
                let size_bytes = tokio::fs::metadata(&entry).await.map(|m| m.len()).unwrap_or(0);
                let _ = ActionArtifactBmc::record(ctx, &self.mm, run_id, &relative_str, size_bytes, &dest.to_string_lossy()).await;
            }
        }
    }
}

/// Extract the tree at `commit_sha` into `dest` via `git archive`, piped
/// straight into `tar -x` — the same subprocess-streaming approach the
/// git transport uses for pack data, since a bare repository has no
/// working tree to copy from directly.
async fn materialize_commit(repo_path: &Path, commit_sha: &str, dest: &Path) -> Result<()> {
    let mut archive = Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .args(["archive", commit_sha])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let archive_stdout = archive.stdout.take().ok_or_else(|| Error::ContainerRuntime("git archive produced no stdout".into()))?;

    let mut extract = Command::new("tar")
        .arg("-x")
        .arg("-C")
        .arg(dest)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut extract_stdin = extract.stdin.take().ok_or_else(|| Error::ContainerRuntime("tar produced no stdin".into()))?;

    let mut archive_stdout = archive_stdout;
    tokio::io::copy(&mut archive_stdout, &mut extract_stdin).await?;
    // tar only sees EOF once its stdin handle is actually closed.
    drop(extract_stdin);

    let (archive_status, extract_status) = tokio::join!(archive.wait(), extract.wait());
    let archive_status = archive_status?;
    let extract_status = extract_status?;

    if !archive_status.success() {
        return Err(Error::ContainerRuntime(format!("git archive {commit_sha} failed with {archive_status}")));
    }
    if !extract_status.success() {
        return Err(Error::ContainerRuntime(format!("tar extraction failed with {extract_status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_common::AppConfig;
    use platform_core::model::action::ActionForCreate;
    use platform_core::model::repository::RepositoryForCreate;
    use platform_core::model::user::UserForCreate;
    use platform_core::store::new_test_db_pool;
    use crate::container_runtime::fake::FakeContainerRuntime;

    async fn test_mm() -> ModelManager {
        let db = new_test_db_pool().await.unwrap();
        ModelManager::new_for_test(db, tempfile::tempdir().unwrap().keep(), Arc::new(AppConfig::default()))
    }

    #[tokio::test]
    async fn empty_queue_reports_no_work() {
        let mm = test_mm().await;
        let runtime = Arc::new(FakeContainerRuntime::new());
        let runner = Arc::new(SandboxRunner::new(runtime, 4096));
        let orchestrator = ActionOrchestrator::new(mm, runner);

        let claimed = orchestrator.try_claim_and_run().await.unwrap();
        assert!(!claimed);
    }

    #[tokio::test]
    async fn claims_and_fails_run_when_commit_does_not_exist() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner = platform_core::model::user::UserBmc::create(
            &ctx,
            &mm,
            UserForCreate { username: "octocat".into(), email: "o@example.com".into(), password_hash: "h".into() },
        )
        .await
        .unwrap();
        let repo_id = platform_core::model::repository::RepositoryBmc::create(
            &ctx,
            &mm,
            RepositoryForCreate { owner_id: owner, slug: "demo".into(), description: None, is_private: false },
        )
        .await
        .unwrap();
        platform_core::store::git_cli::init_bare_if_absent(&mm.repo_path("demo")).await.unwrap();
        let action_id = ActionBmc::create(
            &ctx,
            &mm,
            ActionForCreate {
                repository_id: repo_id,
                name: "ci".into(),
                branch_filters: vec![],
                image: "rust:1".into(),
                command: "true".into(),
                artifact_patterns: vec![],
            },
        )
        .await
        .unwrap();
        ActionRunBmc::enqueue(&ctx, &mm, action_id, "deadbeef", "main").await.unwrap();

        let runtime = Arc::new(FakeContainerRuntime::new());
        let runner = Arc::new(SandboxRunner::new(runtime, 4096));
        let orchestrator = ActionOrchestrator::new(mm.clone(), runner);

        let claimed = orchestrator.try_claim_and_run().await.unwrap();
        assert!(claimed);

        let runs = ActionRunBmc::list_for_action(&ctx, &mm, action_id).await.unwrap();
        assert_eq!(runs[0].status, ActionRunStatus::Failed);
    }
}
