//! Git plumbing via subprocess.
//!
//! Every git operation the repository store needs — initializing a bare
//! repo, listing refs, resolving a tree, diffing two branches, merging —
//! shells out to the system `git` binary rather than linking libgit2.
//! This keeps the platform's git behavior identical to what a user would
//! get from the CLI (hooks, protocol negotiation, pack heuristics) and
//! avoids reimplementing any part of the object model in-process.
//!
//! Output capture follows the same shape throughout: `run_git` returns
//! stdout as bytes on success and folds a non-zero exit status plus
//! stderr into `Error::Upstream`.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{Error, Result};

/// Run `git <args>` with `cwd` as the working directory, returning stdout
/// on success.
pub async fn run_git(cwd: &Path, args: &[&str]) -> Result<Vec<u8>> {
    run_git_with_env(cwd, args, &[]).await
}

/// Run `git <args>` with additional environment variables set — used for
/// `GIT_INDEX_FILE`, `GIT_AUTHOR_*`, and `GIT_COMMITTER_*` overrides.
pub async fn run_git_with_env(cwd: &Path, args: &[&str], env: &[(&str, &str)]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    check_status(args, &output.status, &output.stderr)?;
    Ok(output.stdout)
}

/// Run `git <args>` piping `input` to stdin, returning stdout on success.
/// Used for `hash-object --stdin`.
pub async fn run_git_with_stdin(cwd: &Path, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
    }

    let output = child.wait_with_output().await?;
    check_status(args, &output.status, &output.stderr)?;
    Ok(output.stdout)
}

fn check_status(args: &[&str], status: &std::process::ExitStatus, stderr: &[u8]) -> Result<()> {
    if !status.success() {
        let stderr = String::from_utf8_lossy(stderr);
        return Err(Error::Upstream(format!(
            "git {} failed ({}): {}",
            args.join(" "),
            status,
            stderr.trim()
        )));
    }
    Ok(())
}

async fn run_git_text(cwd: &Path, args: &[&str]) -> Result<String> {
    Ok(String::from_utf8_lossy(&run_git(cwd, args).await?).into_owned())
}

/// Initialize a bare repository at `path` if one doesn't already exist.
/// Idempotent: calling this on an existing bare repo is a no-op.
pub async fn init_bare_if_absent(path: &Path) -> Result<()> {
    if path.join("HEAD").exists() {
        return Ok(());
    }
    tokio::fs::create_dir_all(path).await?;
    run_git(path, &["init", "--bare", "-q"]).await?;
    Ok(())
}

/// List refs (branches and tags) in a bare repository.
pub async fn list_refs(repo_path: &Path) -> Result<Vec<RefEntry>> {
    let out = run_git_text(
        repo_path,
        &["for-each-ref", "--format=%(refname)\t%(objectname)\t%(objecttype)"],
    )
    .await?;

    Ok(out
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let name = parts.next()?.to_string();
            let oid = parts.next()?.to_string();
            let kind = parts.next()?.to_string();
            Some(RefEntry { name, oid, kind })
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: String,
    pub oid: String,
    pub kind: String,
}

/// Resolve `rev` (a branch, tag, or SHA prefix) to a full commit SHA.
pub async fn resolve_rev(repo_path: &Path, rev: &str) -> Result<String> {
    let out = run_git_text(repo_path, &["rev-parse", "--verify", rev]).await?;
    Ok(out.trim().to_string())
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: String,
    pub oid: String,
    pub path: String,
}

/// List the entries of a tree at `path_in_tree` (empty string for root)
/// as resolved from `rev`.
pub async fn list_tree(repo_path: &Path, rev: &str, path_in_tree: &str) -> Result<Vec<TreeEntry>> {
    let spec = if path_in_tree.is_empty() {
        rev.to_string()
    } else {
        format!("{rev}:{path_in_tree}")
    };
    let out = run_git_text(repo_path, &["ls-tree", &spec]).await?;

    Ok(out
        .lines()
        .filter_map(|line| {
            let (meta, path) = line.split_once('\t')?;
            let mut fields = meta.split_whitespace();
            let mode = fields.next()?.to_string();
            let kind = fields.next()?.to_string();
            let oid = fields.next()?.to_string();
            Some(TreeEntry {
                mode,
                kind,
                oid,
                path: path.to_string(),
            })
        })
        .collect())
}

/// Fetch the raw bytes of a blob at `path` as resolved from `rev`.
pub async fn read_blob(repo_path: &Path, rev: &str, path: &str) -> Result<Vec<u8>> {
    run_git(repo_path, &["show", &format!("{rev}:{path}")]).await
}

/// Size in bytes of the object at `oid`, without reading its content.
pub async fn blob_size(repo_path: &Path, oid: &str) -> Result<u64> {
    let out = run_git_text(repo_path, &["cat-file", "-s", oid]).await?;
    out.trim()
        .parse()
        .map_err(|_| Error::Internal(format!("unexpected cat-file -s output: {out}")))
}

/// Unified diff between two revisions, optionally scoped to a path.
pub async fn diff(repo_path: &Path, base: &str, head: &str) -> Result<String> {
    run_git_text(repo_path, &["diff", &format!("{base}...{head}")]).await
}

/// Commit log between two revisions (or the full history of `head` when
/// `base` is `None`), newest first.
pub async fn log(repo_path: &Path, base: Option<&str>, head: &str, limit: usize) -> Result<Vec<CommitEntry>> {
    log_impl(repo_path, base, head, limit, None).await
}

/// Like [`log`], but scoped to commits that touched `path` — used to
/// derive a tree entry's last-modified time without walking the whole
/// history.
pub async fn log_for_path(repo_path: &Path, head: &str, path: &str, limit: usize) -> Result<Vec<CommitEntry>> {
    log_impl(repo_path, None, head, limit, Some(path)).await
}

/// `limit == usize::MAX` is treated as "no limit" (omits `-N`) rather
/// than passed through literally.
async fn log_impl(repo_path: &Path, base: Option<&str>, head: &str, limit: usize, path: Option<&str>) -> Result<Vec<CommitEntry>> {
    let range = match base {
        Some(base) => format!("{base}..{head}"),
        None => head.to_string(),
    };
    let limit_arg = (limit != usize::MAX).then(|| format!("-{limit}"));

    let mut args = vec!["log"];
    if let Some(limit_arg) = &limit_arg {
        args.push(limit_arg);
    }
    args.push("--format=%H%x1f%an%x1f%ae%x1f%aI%x1f%s");
    args.push(&range);
    if let Some(path) = path {
        args.push("--");
        args.push(path);
    }

    let out = run_git_text(repo_path, &args).await?;

    Ok(out
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\x1f');
            Some(CommitEntry {
                sha: fields.next()?.to_string(),
                author_name: fields.next()?.to_string(),
                author_email: fields.next()?.to_string(),
                authored_at: fields.next()?.to_string(),
                subject: fields.next()?.to_string(),
            })
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct CommitEntry {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: String,
    pub subject: String,
}

/// Hash `content` into the object database as a blob, returning its OID.
/// Used by `WriteFile` to stage a new file without a working tree.
pub async fn hash_object_blob(repo_path: &Path, content: &[u8]) -> Result<String> {
    let out = run_git_with_stdin(repo_path, &["hash-object", "-w", "--stdin"], content).await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

/// Build a new tree from `base_tree` (or empty, if `None`) with `path`
/// replaced by `blob_oid` at file mode `mode` (e.g. `"100644"`), using a
/// throwaway index file so this never touches a working tree — the
/// repository is bare.
pub async fn write_tree_with_file(
    repo_path: &Path,
    base_tree: Option<&str>,
    path: &str,
    mode: &str,
    blob_oid: &str,
) -> Result<String> {
    let index_path = repo_path.join(".tmp-index").join(uuid::Uuid::new_v4().to_string());
    if let Some(parent) = index_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let index_file = index_path.to_str().ok_or_else(|| Error::Internal("index path is not valid UTF-8".into()))?;
    let env = [("GIT_INDEX_FILE", index_file)];

    let result = async {
        if let Some(tree) = base_tree {
            run_git_with_env(repo_path, &["read-tree", tree], &env).await?;
        }
        let cacheinfo = format!("{mode},{blob_oid},{path}");
        run_git_with_env(repo_path, &["update-index", "--add", "--cacheinfo", &cacheinfo], &env).await?;
        let tree_out = run_git_with_env(repo_path, &["write-tree"], &env).await?;
        Ok(String::from_utf8_lossy(&tree_out).trim().to_string())
    }
    .await;

    let _ = tokio::fs::remove_file(&index_path).await;
    result
}

/// Create a commit object pointing at `tree`, with `parent` (if any) as
/// its sole parent.
pub async fn commit_tree(
    repo_path: &Path,
    tree: &str,
    parent: Option<&str>,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<String> {
    let mut args = vec!["commit-tree", tree];
    if let Some(parent) = parent {
        args.push("-p");
        args.push(parent);
    }
    args.push("-m");
    args.push(message);

    let env = [
        ("GIT_AUTHOR_NAME", author_name),
        ("GIT_AUTHOR_EMAIL", author_email),
        ("GIT_COMMITTER_NAME", author_name),
        ("GIT_COMMITTER_EMAIL", author_email),
    ];
    let out = run_git_with_env(repo_path, &args, &env).await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

/// Atomically update `refname` to `new_oid`, verifying it still points at
/// `expected_old` first — this is the compare-and-set that serializes
/// concurrent pushes and `WriteFile` calls at the ref level.
pub async fn update_ref(repo_path: &Path, refname: &str, new_oid: &str, expected_old: Option<&str>) -> Result<()> {
    match expected_old {
        Some(old) => run_git(repo_path, &["update-ref", refname, new_oid, old]).await?,
        None => run_git(repo_path, &["update-ref", refname, new_oid]).await?,
    };
    Ok(())
}

/// Resolve the merge base of two revisions.
pub async fn merge_base(repo_path: &Path, a: &str, b: &str) -> Result<String> {
    Ok(run_git_text(repo_path, &["merge-base", a, b]).await?.trim().to_string())
}

/// Simulate a merge of `branch_a` and `branch_b` against `base` using the
/// three-argument `git merge-tree --write-tree` form (the two-argument
/// legacy form is not supported). Returns the resulting tree OID and
/// whether conflict markers are present in the simulated result.
pub async fn merge_tree(repo_path: &Path, base: &str, branch_a: &str, branch_b: &str) -> Result<MergeTreeResult> {
    let output = Command::new("git")
        .args(["merge-tree", "--write-tree", base, branch_a, branch_b])
        .current_dir(repo_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    // Exit code 0 = clean merge, tree OID on the first line.
    // Exit code 1 = conflicts; first line is still a (conflicted) tree OID.
    // Any other exit code is a real failure (bad revs, etc).
    match output.status.code() {
        Some(0) => Ok(MergeTreeResult {
            tree_oid: stdout.lines().next().unwrap_or_default().to_string(),
            has_conflicts: false,
        }),
        Some(1) => Ok(MergeTreeResult {
            tree_oid: stdout.lines().next().unwrap_or_default().to_string(),
            has_conflicts: true,
        }),
        _ => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Upstream(format!("git merge-tree failed: {}", stderr.trim())))
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeTreeResult {
    pub tree_oid: String,
    pub has_conflicts: bool,
}

/// Merge `head` into `base_branch` in a throwaway worktree, returning the
/// SHA of the merge commit on success. Never touches the caller's working
/// tree; the merge happens in a temporary worktree checked out from the
/// bare repo and discarded afterward.
pub async fn merge_branches(
    repo_path: &Path,
    base_branch: &str,
    head: &str,
    commit_message: &str,
) -> Result<String> {
    let worktree_dir = tempfile_dir(repo_path, "merge")?;
    run_git(
        repo_path,
        &[
            "worktree",
            "add",
            "--no-checkout",
            "-B",
            base_branch,
            worktree_dir.to_str().ok_or_else(|| {
                Error::Internal("merge worktree path is not valid UTF-8".into())
            })?,
            base_branch,
        ],
    )
    .await?;

    let merge_result = async {
        run_git(&worktree_dir, &["checkout", base_branch]).await?;
        run_git(
            &worktree_dir,
            &["merge", "--no-ff", "-m", commit_message, head],
        )
        .await?;
        resolve_rev(&worktree_dir, "HEAD").await
    }
    .await;

    let _ = run_git(
        repo_path,
        &["worktree", "remove", "--force", worktree_dir.to_string_lossy().as_ref()],
    )
    .await;

    merge_result
}

fn tempfile_dir(repo_path: &Path, prefix: &str) -> Result<std::path::PathBuf> {
    let dir = repo_path.join(".worktrees").join(format!(
        "{prefix}-{}",
        uuid::Uuid::new_v4()
    ));
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo_with_commit(dir: &Path) -> String {
        run_git(dir, &["init", "-q", "-b", "main"]).await.unwrap();
        run_git(dir, &["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        run_git(dir, &["config", "user.name", "Test"]).await.unwrap();
        tokio::fs::write(dir.join("README.md"), b"hello\n")
            .await
            .unwrap();
        run_git(dir, &["add", "."]).await.unwrap();
        run_git(dir, &["commit", "-q", "-m", "initial"]).await.unwrap();
        resolve_rev(dir, "HEAD").await.unwrap()
    }

    #[tokio::test]
    async fn init_bare_if_absent_is_idempotent() {
        let dir = TempDir::new().unwrap();
        init_bare_if_absent(dir.path()).await.unwrap();
        assert!(dir.path().join("HEAD").exists());
        // second call must not error
        init_bare_if_absent(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn resolve_rev_and_list_tree_round_trip() {
        let dir = TempDir::new().unwrap();
        let sha = init_repo_with_commit(dir.path()).await;

        let resolved = resolve_rev(dir.path(), "HEAD").await.unwrap();
        assert_eq!(resolved, sha);

        let entries = list_tree(dir.path(), "HEAD", "").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "README.md");
    }

    #[tokio::test]
    async fn read_blob_returns_file_contents() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path()).await;

        let content = read_blob(dir.path(), "HEAD", "README.md").await.unwrap();
        assert_eq!(content, b"hello\n");
    }

    #[tokio::test]
    async fn log_returns_commits_newest_first() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path()).await;
        tokio::fs::write(dir.path().join("second.txt"), b"more\n")
            .await
            .unwrap();
        run_git(dir.path(), &["add", "."]).await.unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "second commit"])
            .await
            .unwrap();

        let commits = log(dir.path(), None, "HEAD", 10).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject, "second commit");
    }

    #[tokio::test]
    async fn run_git_surfaces_stderr_on_failure() {
        let dir = TempDir::new().unwrap();
        let err = run_git(dir.path(), &["rev-parse", "--verify", "nonexistent"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn synthesized_commit_round_trips_on_bare_repo() {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("repo.git");
        init_bare_if_absent(&repo_path).await.unwrap();

        let blob = hash_object_blob(&repo_path, b"hello bare world\n").await.unwrap();
        let tree = write_tree_with_file(&repo_path, None, "README.md", "100644", &blob)
            .await
            .unwrap();
        let commit = commit_tree(&repo_path, &tree, None, "initial", "Test", "test@example.com")
            .await
            .unwrap();
        update_ref(&repo_path, "refs/heads/main", &commit, None).await.unwrap();

        let resolved = resolve_rev(&repo_path, "refs/heads/main").await.unwrap();
        assert_eq!(resolved, commit);

        let content = read_blob(&repo_path, "refs/heads/main", "README.md").await.unwrap();
        assert_eq!(content, b"hello bare world\n");
    }

    #[tokio::test]
    async fn update_ref_rejects_stale_expected_old() {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("repo.git");
        init_bare_if_absent(&repo_path).await.unwrap();

        let blob = hash_object_blob(&repo_path, b"v1\n").await.unwrap();
        let tree = write_tree_with_file(&repo_path, None, "f.txt", "100644", &blob).await.unwrap();
        let commit1 = commit_tree(&repo_path, &tree, None, "v1", "Test", "test@example.com")
            .await
            .unwrap();
        update_ref(&repo_path, "refs/heads/main", &commit1, None).await.unwrap();

        let blob2 = hash_object_blob(&repo_path, b"v2\n").await.unwrap();
        let tree2 = write_tree_with_file(&repo_path, Some(&tree), "f.txt", "100644", &blob2)
            .await
            .unwrap();
        let commit2 = commit_tree(&repo_path, &tree2, Some(&commit1), "v2", "Test", "test@example.com")
            .await
            .unwrap();

        let err = update_ref(&repo_path, "refs/heads/main", &commit2, Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn merge_tree_reports_clean_merge_and_conflicts() {
        let dir = TempDir::new().unwrap();
        run_git(dir.path(), &["init", "-q", "-b", "main"]).await.unwrap();
        run_git(dir.path(), &["config", "user.email", "test@example.com"]).await.unwrap();
        run_git(dir.path(), &["config", "user.name", "Test"]).await.unwrap();
        tokio::fs::write(dir.path().join("f.txt"), b"base\n").await.unwrap();
        run_git(dir.path(), &["add", "."]).await.unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "base"]).await.unwrap();
        let base = resolve_rev(dir.path(), "HEAD").await.unwrap();

        run_git(dir.path(), &["checkout", "-q", "-b", "feature"]).await.unwrap();
        tokio::fs::write(dir.path().join("g.txt"), b"feature\n").await.unwrap();
        run_git(dir.path(), &["add", "."]).await.unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "feature"]).await.unwrap();

        let clean = merge_tree(dir.path(), &base, "main", "feature").await.unwrap();
        assert!(!clean.has_conflicts);
        assert!(!clean.tree_oid.is_empty());

        run_git(dir.path(), &["checkout", "-q", "main"]).await.unwrap();
        tokio::fs::write(dir.path().join("f.txt"), b"main-change\n").await.unwrap();
        run_git(dir.path(), &["add", "."]).await.unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "main change"]).await.unwrap();

        run_git(dir.path(), &["checkout", "-q", "feature"]).await.unwrap();
        tokio::fs::write(dir.path().join("f.txt"), b"feature-change\n").await.unwrap();
        run_git(dir.path(), &["add", "."]).await.unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "feature change"]).await.unwrap();

        let conflicting = merge_tree(dir.path(), &base, "main", "feature").await.unwrap();
        assert!(conflicting.has_conflicts);
    }
}
