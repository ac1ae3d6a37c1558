//! Runs a single action in an isolated, network-disabled container and
//! captures its output under a fixed byte cap.
//!
//! Grounded on the same per-key lock discipline
//! `platform_core::store::resource_lock::ResourceLocks` uses for
//! repository and workspace mutations, keyed here by action run id so
//! two dispatch attempts for the same run can never race.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::container_runtime::{ContainerRuntime, ContainerSpec};
use crate::{Error, Result};

/// Appends bytes up to a fixed cap, then drops the oldest bytes to make
/// room — the tail of the output is always preserved, the head is
/// truncated silently with a marker.
pub struct CappedOutput {
    buf: VecDeque<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedOutput {
    pub fn new(cap: usize) -> Self {
        Self { buf: VecDeque::with_capacity(cap.min(1 << 20)), cap, truncated: false }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.cap {
            self.truncated = self.truncated || self.buf.len() + bytes.len() > self.cap;
            self.buf.clear();
            self.buf.extend(bytes[bytes.len() - self.cap..].iter().copied());
            return;
        }
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.truncated = true;
            self.buf.drain(0..overflow.min(self.buf.len()));
        }
        self.buf.extend(bytes.iter().copied());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 32);
        if self.truncated {
            out.extend_from_slice(b"[output truncated, showing tail]\n");
        }
        out.extend(self.buf);
        out
    }
}

pub struct SandboxRequest {
    pub action_run_id: i64,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir_host_path: String,
    pub memory_limit_mb: Option<u64>,
    pub cpu_shares: Option<u64>,
    pub pids_limit: Option<u64>,
    pub network_enabled: bool,
    pub timeout: Duration,
}

pub struct SandboxOutcome {
    pub exit_code: i32,
    pub output: Vec<u8>,
}

/// Serializes concurrent dispatch per action run and drives a single
/// container through create -> start -> wait -> logs -> remove.
pub struct SandboxRunner<R: ContainerRuntime> {
    runtime: Arc<R>,
    locks: DashMap<i64, Arc<AsyncMutex<()>>>,
    output_cap_bytes: usize,
}

impl<R: ContainerRuntime> SandboxRunner<R> {
    pub fn new(runtime: Arc<R>, output_cap_bytes: usize) -> Self {
        Self { runtime, locks: DashMap::new(), output_cap_bytes }
    }

    fn lock_for(&self, action_run_id: i64) -> Arc<AsyncMutex<()>> {
        self.locks.entry(action_run_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn run(&self, req: SandboxRequest) -> Result<SandboxOutcome> {
        let lock = self.lock_for(req.action_run_id);
        let guard = lock.try_lock();
        let _guard = match guard {
            Ok(g) => g,
            Err(_) => return Err(Error::AlreadyRunning(req.action_run_id)),
        };

        let name = format!("platform-action-{}", req.action_run_id);
        let spec = ContainerSpec {
            image: req.image.clone(),
            command: req.command.clone(),
            env: req.env.clone(),
            mounts: vec![(req.workdir_host_path.clone(), "/workspace".to_string())],
            network_enabled: req.network_enabled,
            memory_limit_mb: req.memory_limit_mb,
            cpu_shares: req.cpu_shares,
            pids_limit: req.pids_limit,
            published_ports: Vec::new(),
        };

        info!(action_run_id = req.action_run_id, image = %req.image, "creating sandbox container");
        let container_id = self.runtime.create(&name, &spec).await?;
        self.runtime.start(&container_id).await?;

        let wait = tokio::time::timeout(req.timeout, self.runtime.wait(&container_id));
        let exit_code = match wait.await {
            Ok(result) => result?,
            Err(_) => {
                warn!(action_run_id = req.action_run_id, "sandbox timed out, killing container");
                self.runtime.kill(&container_id).await?;
                self.runtime.remove(&container_id).await?;
                return Err(Error::Timeout(req.timeout));
            }
        };

        let raw_logs = self.runtime.logs(&container_id, self.output_cap_bytes as u64 * 2).await?;
        let mut capped = CappedOutput::new(self.output_cap_bytes);
        capped.append(&raw_logs);

        self.runtime.remove(&container_id).await?;
        self.locks.remove(&req.action_run_id);

        Ok(SandboxOutcome { exit_code, output: capped.into_bytes() })
    }
}
