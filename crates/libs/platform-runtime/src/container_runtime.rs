//! Abstraction over an external container runtime (`docker`/`podman`).
//!
//! Mirrors the subprocess discipline `platform_core::store::git_cli` uses
//! for git: no in-process container engine, just a thin async wrapper
//! around CLI invocations. Kept as a trait so the sandbox runner and
//! workspace supervisor are testable against [`FakeContainerRuntime`]
//! without a real daemon.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<(String, String)>,
    /// `None` disables networking — the sandbox runner's default unless
    /// the action explicitly declares it needs network.
    pub network_enabled: bool,
    pub memory_limit_mb: Option<u64>,
    pub cpu_shares: Option<u64>,
    pub pids_limit: Option<u64>,
    /// Published `host:container` port pairs — only used for workspace
    /// containers, never for action sandboxes.
    pub published_ports: Vec<(u16, u16)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited(i32),
    Missing,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String>;
    async fn start(&self, container_id: &str) -> Result<()>;
    async fn wait(&self, container_id: &str) -> Result<i32>;
    async fn state(&self, container_id: &str) -> Result<ContainerState>;
    async fn logs(&self, container_id: &str, tail_bytes: u64) -> Result<Vec<u8>>;
    async fn kill(&self, container_id: &str) -> Result<()>;
    async fn remove(&self, container_id: &str) -> Result<()>;
    async fn exec(&self, container_id: &str, command: &[&str]) -> Result<Vec<u8>>;
    async fn copy_out(&self, container_id: &str, container_path: &str, host_path: &Path) -> Result<()>;
}

/// Subprocess implementation over the configured runtime binary
/// (`docker` or `podman` — both implement the same CLI surface used
/// here).
pub struct CliContainerRuntime {
    bin: String,
}

impl CliContainerRuntime {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ContainerRuntime(format!(
                "{} {} failed ({}): {}",
                self.bin,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ContainerRuntime for CliContainerRuntime {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), name.into()];

        if !spec.network_enabled {
            args.push("--network".into());
            args.push("none".into());
        }
        if let Some(mb) = spec.memory_limit_mb {
            args.push("--memory".into());
            args.push(format!("{mb}m"));
        }
        if let Some(shares) = spec.cpu_shares {
            args.push("--cpu-shares".into());
            args.push(shares.to_string());
        }
        if let Some(pids) = spec.pids_limit {
            args.push("--pids-limit".into());
            args.push(pids.to_string());
        }
        for (host, container) in &spec.mounts {
            args.push("-v".into());
            args.push(format!("{host}:{container}"));
        }
        for (host_port, container_port) in &spec.published_ports {
            args.push("-p".into());
            args.push(format!("{host_port}:{container_port}"));
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run(&arg_refs).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.run(&["start", container_id]).await?;
        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i32> {
        let out = self.run(&["wait", container_id]).await?;
        String::from_utf8_lossy(&out)
            .trim()
            .parse()
            .map_err(|_| Error::ContainerRuntime(format!("unexpected `wait` output for {container_id}")))
    }

    async fn state(&self, container_id: &str) -> Result<ContainerState> {
        let out = self
            .run(&["inspect", "-f", "{{.State.Running}} {{.State.ExitCode}}", container_id])
            .await;
        let out = match out {
            Ok(out) => out,
            Err(_) => return Ok(ContainerState::Missing),
        };
        let text = String::from_utf8_lossy(&out);
        let mut parts = text.split_whitespace();
        let running = parts.next() == Some("true");
        let exit_code: i32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(if running {
            ContainerState::Running
        } else {
            ContainerState::Exited(exit_code)
        })
    }

    async fn logs(&self, container_id: &str, tail_bytes: u64) -> Result<Vec<u8>> {
        let out = self.run(&["logs", container_id]).await?;
        if out.len() as u64 > tail_bytes {
            Ok(out[out.len() - tail_bytes as usize..].to_vec())
        } else {
            Ok(out)
        }
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        // A container that already exited returns nonzero from `kill`;
        // that's not a failure worth propagating.
        let _ = self.run(&["kill", container_id]).await;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.run(&["rm", "-f", container_id]).await?;
        Ok(())
    }

    async fn exec(&self, container_id: &str, command: &[&str]) -> Result<Vec<u8>> {
        let mut args = vec!["exec", container_id];
        args.extend(command.iter().copied());
        self.run(&args).await
    }

    async fn copy_out(&self, container_id: &str, container_path: &str, host_path: &Path) -> Result<()> {
        let host_path_str = host_path.to_string_lossy();
        self.run(&["cp", &format!("{container_id}:{container_path}"), &host_path_str])
            .await?;
        Ok(())
    }
}
