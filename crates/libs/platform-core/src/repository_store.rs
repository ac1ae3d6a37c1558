//! The sole reader/writer of repository metadata and the sole executor
//! of git commands against the on-disk bare repositories.
//!
//! Every write operation here (`write_file`, `merge_branch`, branch
//! create/delete/set-default) acquires the repository's resource lock
//! via `ModelManager::locks` first — a bare repository has no working
//! tree to serialize concurrent writers, so this module is what makes
//! two simultaneous pushes to the same repo safe.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::ctx::Ctx;
use crate::model::event::{EventBmc, EventForCreate};
use crate::model::repository::{Repository, RepositoryBmc, RepositoryForCreate};
use crate::model::user::UserBmc;
use crate::model::ModelManager;
use crate::store::git_cli;
use crate::utils::validation::validate_repo_slug;
use crate::{Error, Result};

/// Maximum bytes scanned from the start of a blob to decide whether it
/// is binary (presence of a NUL byte).
const BINARY_SNIFF_LIMIT: usize = 8192;

fn repo_lock_key(repo_id: i64) -> String {
    format!("repo:{repo_id}")
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    pub entry_type: TreeEntryType,
    pub size: u64,
    pub mode: String,
    pub hash: String,
    pub mod_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeEntryType {
    File,
    Dir,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub content: Vec<u8>,
    pub size: u64,
    pub is_binary: bool,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub is_current: bool,
    pub is_default: bool,
    pub last_commit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Commit {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: String,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diff {
    pub files: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
    pub patch: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrDiff {
    pub files: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
    pub commits: Vec<Commit>,
    pub can_merge: bool,
    pub has_conflicts: bool,
}

/// Derive the repository slug from a display name: lowercase, hyphenate,
/// strip to the slug regex's alphabet. On collision, append `-2`
/// through `-10` before failing.
pub async fn create(
    ctx: &Ctx,
    mm: &ModelManager,
    owner_id: i64,
    name: &str,
    description: Option<String>,
    is_private: bool,
) -> Result<Repository> {
    let owner = UserBmc::get_by_id(ctx, mm, owner_id).await?;
    let base_slug = crate::utils::slugify(name);

    // Slug resolution is check-then-insert, and slugs are globally
    // unique (not just per-owner) so two different owners can't collide
    // on the same on-disk bare-repo directory. Serialize on a single
    // global key so two concurrent creates, whoever owns them, can't
    // both observe the same slug as free before either has inserted its
    // row.
    let _creation_guard = mm.locks.acquire("repo-create").await;
    let slug = resolve_free_slug(ctx, mm, &base_slug).await?;
    validate_repo_slug(&slug)?;

    let repo_id = RepositoryBmc::create(
        ctx,
        mm,
        RepositoryForCreate {
            owner_id,
            slug: slug.clone(),
            description,
            is_private,
        },
    )
    .await?;

    let repo_path = mm.repo_path(&slug);
    if let Err(e) = git_cli::init_bare_if_absent(&repo_path).await {
        warn!(error = %e, slug, "rolling back repository creation after bare init failure");
        let _ = RepositoryBmc::delete(ctx, mm, repo_id).await;
        let _ = tokio::fs::remove_dir_all(&repo_path).await;
        return Err(e);
    }

    EventBmc::enqueue(
        ctx,
        mm,
        EventForCreate {
            kind: "repository.created".into(),
            priority: 0,
            payload: serde_json::json!({"repository_id": repo_id, "slug": slug}).to_string(),
            metadata: vec![("owner_id".into(), owner.id.to_string())],
        },
    )
    .await?;

    debug!(repo_id, slug, "repository created");
    RepositoryBmc::get_by_id(ctx, mm, repo_id).await
}

async fn resolve_free_slug(ctx: &Ctx, mm: &ModelManager, base_slug: &str) -> Result<String> {
    if RepositoryBmc::get_by_slug(ctx, mm, base_slug).await.is_err() {
        return Ok(base_slug.to_string());
    }
    for suffix in 2..=10 {
        let candidate = format!("{base_slug}-{suffix}");
        if RepositoryBmc::get_by_slug(ctx, mm, &candidate).await.is_err() {
            return Ok(candidate);
        }
    }
    Err(Error::Conflict(format!(
        "no available slug for '{base_slug}' after 10 attempts"
    )))
}

/// Remove a repository's metadata record and on-disk bare directory.
/// Derived rows (grants, comments, actions, action runs, artifacts)
/// cascade via `ON DELETE CASCADE` foreign keys — this function only
/// needs to delete the repository row itself and the directory.
/// Idempotent: deleting an already-deleted repository succeeds.
pub async fn delete(ctx: &Ctx, mm: &ModelManager, repo_id: i64) -> Result<()> {
    let repo = match RepositoryBmc::get_by_id(ctx, mm, repo_id).await {
        Ok(repo) => repo,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    let _guard = mm.locks.acquire(&repo_lock_key(repo_id)).await;
    RepositoryBmc::delete(ctx, mm, repo_id).await?;

    let repo_path = mm.repo_path(&repo.slug);
    if repo_path.exists() {
        tokio::fs::remove_dir_all(&repo_path).await?;
    }
    Ok(())
}

/// List the entries of `path` in `branch` (default branch if `None`),
/// directories before files, lexicographic within each group. A branch
/// that does not resolve yields an empty sequence, not an error.
pub async fn get_file_tree(
    ctx: &Ctx,
    mm: &ModelManager,
    repo_id: i64,
    branch: Option<&str>,
    path: &str,
) -> Result<Vec<TreeEntry>> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let branch = branch.unwrap_or(&repo.default_branch);
    let rev = format!("refs/heads/{branch}");

    if git_cli::resolve_rev(&repo_path, &rev).await.is_err() {
        return Ok(Vec::new());
    }

    let raw_entries = git_cli::list_tree(&repo_path, &rev, path).await?;
    let mut entries = Vec::with_capacity(raw_entries.len());
    for entry in raw_entries {
        let full_path = if path.is_empty() {
            entry.path.clone()
        } else {
            format!("{path}/{}", entry.path)
        };
        let entry_type = if entry.kind == "tree" {
            TreeEntryType::Dir
        } else {
            TreeEntryType::File
        };
        let size = if entry_type == TreeEntryType::File {
            git_cli::blob_size(&repo_path, &entry.oid).await.unwrap_or(0)
        } else {
            0
        };
        let mod_time = last_commit_touching(&repo_path, &rev, &full_path).await;

        entries.push(TreeEntry {
            name: entry.path,
            path: full_path,
            entry_type,
            size,
            mode: entry.mode,
            hash: entry.oid,
            mod_time,
        });
    }

    entries.sort_by(|a, b| match (a.entry_type, b.entry_type) {
        (TreeEntryType::Dir, TreeEntryType::File) => std::cmp::Ordering::Less,
        (TreeEntryType::File, TreeEntryType::Dir) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
    Ok(entries)
}

async fn last_commit_touching(repo_path: &Path, rev: &str, path: &str) -> Option<NaiveDateTime> {
    let commits = git_cli::log_for_path(repo_path, rev, path, 1).await.ok()?;
    commits
        .into_iter()
        .next()
        .and_then(|c| NaiveDateTime::parse_from_str(&c.authored_at, "%Y-%m-%dT%H:%M:%S%:z").ok())
}

/// Fetch a single file's content, binary/language classification.
/// Fails `Error::NotFound` if the object is absent or is a tree.
pub async fn get_file(ctx: &Ctx, mm: &ModelManager, repo_id: i64, branch: Option<&str>, path: &str) -> Result<FileContent> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let branch = branch.unwrap_or(&repo.default_branch);
    let rev = format!("refs/heads/{branch}");

    let entries = git_cli::list_tree(&repo_path, &rev, path).await.map_err(|_| {
        Error::NotFound(format!("{path} on {branch}"))
    })?;
    if entries.is_empty() {
        return Err(Error::NotFound(format!("{path} on {branch}")));
    }

    let content = git_cli::read_blob(&repo_path, &rev, path)
        .await
        .map_err(|_| Error::NotFound(format!("{path} on {branch}")))?;

    let sniff_len = content.len().min(BINARY_SNIFF_LIMIT);
    let is_binary = content[..sniff_len].contains(&0u8);
    let language = language_for_path(path);

    Ok(FileContent {
        size: content.len() as u64,
        content,
        is_binary,
        language,
    })
}

fn language_for_path(path: &str) -> String {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "rb" => "ruby",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "sh" => "shell",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        _ => "text",
    }
    .to_string()
}

/// Synthesize a commit on `branch` adding/updating `path` to `content`,
/// without ever checking out a working tree: hash the blob, build a new
/// tree from the branch's current tree via a throwaway index, commit
/// with the branch tip as parent, and atomically update the ref. On an
/// empty repository the commit has no parent, and if the repository has
/// no default branch commit yet, `branch` is promoted to default.
pub async fn write_file(
    ctx: &Ctx,
    mm: &ModelManager,
    repo_id: i64,
    branch: &str,
    path: &str,
    content: &[u8],
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<String> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let refname = format!("refs/heads/{branch}");

    let _guard = mm.locks.acquire(&repo_lock_key(repo_id)).await;

    let current_tip = git_cli::resolve_rev(&repo_path, &refname).await.ok();
    let base_tree = match &current_tip {
        Some(tip) => Some(git_cli::resolve_rev(&repo_path, &format!("{tip}^{{tree}}")).await?),
        None => None,
    };

    let blob_oid = git_cli::hash_object_blob(&repo_path, content).await?;
    let tree_oid = git_cli::write_tree_with_file(&repo_path, base_tree.as_deref(), path, "100644", &blob_oid).await?;
    let commit_oid = git_cli::commit_tree(
        &repo_path,
        &tree_oid,
        current_tip.as_deref(),
        message,
        author_name,
        author_email,
    )
    .await?;

    git_cli::update_ref(&repo_path, &refname, &commit_oid, current_tip.as_deref()).await?;

    let had_no_branches = git_cli::list_refs(&repo_path)
        .await?
        .iter()
        .filter(|r| r.name.starts_with("refs/heads/"))
        .count()
        <= 1;
    if current_tip.is_none() && had_no_branches {
        RepositoryBmc::set_default_branch(ctx, mm, repo_id, branch).await?;
    }

    debug!(repo_id, branch, path, commit_oid, "wrote file");
    Ok(commit_oid)
}

pub async fn branches(ctx: &Ctx, mm: &ModelManager, repo_id: i64) -> Result<Vec<BranchInfo>> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let refs = git_cli::list_refs(&repo_path).await?;

    Ok(refs
        .into_iter()
        .filter_map(|r| r.name.strip_prefix("refs/heads/").map(|name| (name.to_string(), r.oid)))
        .map(|(name, oid)| BranchInfo {
            is_default: name == repo.default_branch,
            is_current: name == repo.default_branch,
            last_commit: oid,
            name,
        })
        .collect())
}

pub async fn create_branch(ctx: &Ctx, mm: &ModelManager, repo_id: i64, name: &str, from: &str) -> Result<()> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let _guard = mm.locks.acquire(&repo_lock_key(repo_id)).await;

    let from_oid = git_cli::resolve_rev(&repo_path, &format!("refs/heads/{from}")).await?;
    git_cli::update_ref(&repo_path, &format!("refs/heads/{name}"), &from_oid, None).await
}

pub async fn delete_branch(ctx: &Ctx, mm: &ModelManager, repo_id: i64, name: &str) -> Result<()> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    if name == repo.default_branch {
        return Err(Error::Invalid(format!("cannot delete default branch '{name}'")));
    }
    let repo_path = mm.repo_path(&repo.slug);
    let _guard = mm.locks.acquire(&repo_lock_key(repo_id)).await;

    git_cli::run_git(&repo_path, &["update-ref", "-d", &format!("refs/heads/{name}")])
        .await
        .map(|_| ())
}

pub async fn set_default_branch(ctx: &Ctx, mm: &ModelManager, repo_id: i64, name: &str) -> Result<()> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    git_cli::resolve_rev(&repo_path, &format!("refs/heads/{name}")).await?;
    RepositoryBmc::set_default_branch(ctx, mm, repo_id, name).await
}

pub async fn commits(ctx: &Ctx, mm: &ModelManager, repo_id: i64, branch: &str, limit: usize) -> Result<Vec<Commit>> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let raw = git_cli::log(&repo_path, None, &format!("refs/heads/{branch}"), limit).await?;
    Ok(raw.into_iter().map(into_commit).collect())
}

fn into_commit(entry: git_cli::CommitEntry) -> Commit {
    Commit {
        sha: entry.sha,
        author_name: entry.author_name,
        author_email: entry.author_email,
        authored_at: entry.authored_at,
        subject: entry.subject,
    }
}

pub async fn get_commit_diff(ctx: &Ctx, mm: &ModelManager, repo_id: i64, sha: &str) -> Result<Diff> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let parent = format!("{sha}^");
    let patch = git_cli::diff(&repo_path, &parent, sha).await?;
    Ok(parse_diff(&patch))
}

pub async fn get_commits_between(ctx: &Ctx, mm: &ModelManager, repo_id: i64, from: &str, to: &str) -> Result<Vec<Commit>> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let raw = git_cli::log(&repo_path, Some(from), to, usize::MAX).await?;
    Ok(raw.into_iter().map(into_commit).collect())
}

fn parse_diff(patch: &str) -> Diff {
    let mut files = Vec::new();
    let mut additions = 0;
    let mut deletions = 0;
    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("+++ b/") {
            files.push(rest.to_string());
        } else if line.starts_with('+') && !line.starts_with("+++") {
            additions += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            deletions += 1;
        }
    }
    Diff {
        files,
        additions,
        deletions,
        patch: patch.to_string(),
    }
}

/// Three-dot diff between `base` and `compare`, plus a mergeability
/// verdict: fast-forward if `compare`'s history already contains
/// `base`'s tip, otherwise simulated via `merge-tree`.
pub async fn pr_diff(ctx: &Ctx, mm: &ModelManager, repo_id: i64, base: &str, compare: &str) -> Result<PrDiff> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let base_ref = format!("refs/heads/{base}");
    let compare_ref = format!("refs/heads/{compare}");

    let base_oid = git_cli::resolve_rev(&repo_path, &base_ref).await?;
    let compare_oid = git_cli::resolve_rev(&repo_path, &compare_ref).await?;

    let patch = git_cli::diff(&repo_path, &base_oid, &compare_oid).await?;
    let diff = parse_diff(&patch);
    let commits = git_cli::log(&repo_path, Some(&base_oid), &compare_oid, usize::MAX)
        .await?
        .into_iter()
        .map(into_commit)
        .collect();

    let merge_base = git_cli::merge_base(&repo_path, &base_oid, &compare_oid).await?;
    let (can_merge, has_conflicts) = if merge_base == base_oid {
        (true, false)
    } else {
        let merge = git_cli::merge_tree(&repo_path, &merge_base, &base_oid, &compare_oid).await?;
        (!merge.has_conflicts, merge.has_conflicts)
    };

    Ok(PrDiff {
        files: diff.files,
        additions: diff.additions,
        deletions: diff.deletions,
        commits,
        can_merge,
        has_conflicts,
    })
}

/// Merge `source` into `target`: fast-forward if possible, otherwise a
/// 3-way merge via `merge-tree` producing a two-parent merge commit.
/// Fails with `Error::Conflict` when the simulation reports conflicts;
/// never attempts automatic resolution.
pub async fn merge_branch(
    ctx: &Ctx,
    mm: &ModelManager,
    repo_id: i64,
    source: &str,
    target: &str,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<String> {
    let repo = RepositoryBmc::get_by_id(ctx, mm, repo_id).await?;
    let repo_path = mm.repo_path(&repo.slug);
    let source_ref = format!("refs/heads/{source}");
    let target_ref = format!("refs/heads/{target}");

    let _guard = mm.locks.acquire(&repo_lock_key(repo_id)).await;

    let source_oid = git_cli::resolve_rev(&repo_path, &source_ref).await?;
    let target_oid = git_cli::resolve_rev(&repo_path, &target_ref).await?;
    let merge_base = git_cli::merge_base(&repo_path, &target_oid, &source_oid).await?;

    if merge_base == target_oid {
        git_cli::update_ref(&repo_path, &target_ref, &source_oid, Some(&target_oid)).await?;
        return Ok(source_oid);
    }

    let merged = git_cli::merge_tree(&repo_path, &merge_base, &target_oid, &source_oid).await?;
    if merged.has_conflicts {
        return Err(Error::Conflict(format!(
            "merging '{source}' into '{target}' produced conflicts"
        )));
    }

    // A merge commit needs two parents; `commit_tree` only takes one via
    // `-p`, so the two-parent form is built directly here.
    let merge_commit = git_cli::run_git_with_env(
        &repo_path,
        &[
            "commit-tree",
            &merged.tree_oid,
            "-p",
            &target_oid,
            "-p",
            &source_oid,
            "-m",
            message,
        ],
        &[
            ("GIT_AUTHOR_NAME", author_name),
            ("GIT_AUTHOR_EMAIL", author_email),
            ("GIT_COMMITTER_NAME", author_name),
            ("GIT_COMMITTER_EMAIL", author_email),
        ],
    )
    .await
    .map(|out| String::from_utf8_lossy(&out).trim().to_string())?;

    git_cli::update_ref(&repo_path, &target_ref, &merge_commit, Some(&target_oid)).await?;
    Ok(merge_commit)
}

/// Sum of the on-disk object database size, recomputed opportunistically
/// after writes that change history (`write_file`, `merge_branch`).
pub async fn on_disk_size_bytes(mm: &ModelManager, repo: &Repository) -> Result<u64> {
    let objects_dir = mm.repo_path(&repo.slug).join("objects");
    let mut total = 0u64;
    let mut stack = vec![objects_dir];
    while let Some(dir) = stack.pop() {
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(_) => continue,
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::UserForCreate;
    use crate::store::new_test_db_pool;
    use platform_common::AppConfig;
    use std::sync::Arc;

    async fn test_mm() -> ModelManager {
        let db = new_test_db_pool().await.unwrap();
        let data_dir = tempfile::tempdir().unwrap().keep();
        ModelManager::new_for_test(db, data_dir, Arc::new(AppConfig::default()))
    }

    async fn seed_owner(ctx: &Ctx, mm: &ModelManager) -> i64 {
        UserBmc::create(
            ctx,
            mm,
            UserForCreate {
                username: "octocat".into(),
                email: "octocat@example.com".into(),
                password_hash: "hash".into(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_initializes_bare_repo_on_disk() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;

        let repo = create(&ctx, &mm, owner_id, "My Blog", None, false).await.unwrap();
        assert_eq!(repo.slug, "my-blog");
        assert!(mm.repo_path(&repo.slug).join("HEAD").exists());
    }

    #[tokio::test]
    async fn create_resolves_slug_collisions_with_numeric_suffix() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;

        let first = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();
        let second = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();
        assert_eq!(first.slug, "blog");
        assert_eq!(second.slug, "blog-2");
    }

    #[tokio::test]
    async fn slug_collision_across_different_owners_still_resolves_and_never_reuses_a_directory() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_a = seed_owner(&ctx, &mm).await;
        let owner_b = UserBmc::create(
            &ctx,
            &mm,
            UserForCreate {
                username: "hubot".into(),
                email: "hubot@example.com".into(),
                password_hash: "hash".into(),
            },
        )
        .await
        .unwrap();

        let first = create(&ctx, &mm, owner_a, "blog", None, false).await.unwrap();
        let second = create(&ctx, &mm, owner_b, "blog", None, false).await.unwrap();

        assert_eq!(first.slug, "blog");
        assert_eq!(second.slug, "blog-2");
        assert_ne!(mm.repo_path(&first.slug), mm.repo_path(&second.slug));
        write_file(&ctx, &mm, first.id, "main", "owner-a.txt", b"a\n", "a", "A", "a@example.com")
            .await
            .unwrap();
        // The second owner's repo must still be a fresh, unrelated bare
        // repository, not owner A's directory reused under a new row.
        let tree = get_file_tree(&ctx, &mm, second.id, Some("main"), "").await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn write_file_creates_first_commit_and_promotes_default_branch() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();

        let sha = write_file(
            &ctx,
            &mm,
            repo.id,
            "main",
            "README.md",
            b"hello\n",
            "initial",
            "Test",
            "test@example.com",
        )
        .await
        .unwrap();

        let file = get_file(&ctx, &mm, repo.id, Some("main"), "README.md").await.unwrap();
        assert_eq!(file.content, b"hello\n");
        assert!(!file.is_binary);
        assert_eq!(file.language, "markdown");

        let repo = RepositoryBmc::get_by_id(&ctx, &mm, repo.id).await.unwrap();
        assert_eq!(repo.default_branch, "main");

        let log = commits(&ctx, &mm, repo.id, "main", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].sha, sha);
    }

    #[tokio::test]
    async fn write_file_second_commit_has_first_as_parent() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();

        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"v1\n", "add a", "Test", "t@example.com")
            .await
            .unwrap();
        write_file(&ctx, &mm, repo.id, "main", "b.txt", b"v1\n", "add b", "Test", "t@example.com")
            .await
            .unwrap();

        let tree = get_file_tree(&ctx, &mm, repo.id, Some("main"), "").await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "a.txt");

        let log = commits(&ctx, &mm, repo.id, "main", 10).await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn get_file_tree_on_unresolved_branch_is_empty_not_error() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();

        let tree = get_file_tree(&ctx, &mm, repo.id, Some("nope"), "").await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn get_file_on_missing_path_is_not_found() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();
        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"v1\n", "add a", "Test", "t@example.com")
            .await
            .unwrap();

        let err = get_file(&ctx, &mm, repo.id, Some("main"), "missing.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn branch_lifecycle_create_set_default_delete() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();
        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"v1\n", "add a", "Test", "t@example.com")
            .await
            .unwrap();

        create_branch(&ctx, &mm, repo.id, "feature", "main").await.unwrap();
        let names: Vec<String> = branches(&ctx, &mm, repo.id).await.unwrap().into_iter().map(|b| b.name).collect();
        assert!(names.contains(&"feature".to_string()));

        let err = delete_branch(&ctx, &mm, repo.id, "main").await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        set_default_branch(&ctx, &mm, repo.id, "feature").await.unwrap();
        delete_branch(&ctx, &mm, repo.id, "main").await.unwrap();

        let names: Vec<String> = branches(&ctx, &mm, repo.id).await.unwrap().into_iter().map(|b| b.name).collect();
        assert!(!names.contains(&"main".to_string()));
    }

    #[tokio::test]
    async fn pr_diff_reports_fast_forward_when_possible() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();

        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"v1\n", "add a", "Test", "t@example.com")
            .await
            .unwrap();
        create_branch(&ctx, &mm, repo.id, "feature", "main").await.unwrap();
        write_file(&ctx, &mm, repo.id, "feature", "b.txt", b"v1\n", "add b", "Test", "t@example.com")
            .await
            .unwrap();

        let diff = pr_diff(&ctx, &mm, repo.id, "main", "feature").await.unwrap();
        assert!(diff.can_merge);
        assert!(!diff.has_conflicts);
        assert_eq!(diff.commits.len(), 1);
    }

    #[tokio::test]
    async fn merge_branch_fast_forwards_when_target_unchanged() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();

        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"v1\n", "add a", "Test", "t@example.com")
            .await
            .unwrap();
        create_branch(&ctx, &mm, repo.id, "feature", "main").await.unwrap();
        write_file(&ctx, &mm, repo.id, "feature", "b.txt", b"v1\n", "add b", "Test", "t@example.com")
            .await
            .unwrap();

        let merged = merge_branch(&ctx, &mm, repo.id, "feature", "main", "merge feature", "Test", "t@example.com")
            .await
            .unwrap();

        let log = commits(&ctx, &mm, repo.id, "main", 10).await.unwrap();
        assert_eq!(log[0].sha, merged);
    }

    #[tokio::test]
    async fn merge_branch_fails_with_conflict_on_divergent_same_file_edits() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();

        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"base\n", "base", "Test", "t@example.com")
            .await
            .unwrap();
        create_branch(&ctx, &mm, repo.id, "feature", "main").await.unwrap();
        write_file(&ctx, &mm, repo.id, "main", "a.txt", b"main change\n", "main change", "Test", "t@example.com")
            .await
            .unwrap();
        write_file(&ctx, &mm, repo.id, "feature", "a.txt", b"feature change\n", "feature change", "Test", "t@example.com")
            .await
            .unwrap();

        let err = merge_branch(&ctx, &mm, repo.id, "feature", "main", "merge", "Test", "t@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_directory() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let owner_id = seed_owner(&ctx, &mm).await;
        let repo = create(&ctx, &mm, owner_id, "blog", None, false).await.unwrap();
        let repo_path = mm.repo_path(&repo.slug);
        assert!(repo_path.exists());

        delete(&ctx, &mm, repo.id).await.unwrap();
        assert!(!repo_path.exists());
        delete(&ctx, &mm, repo.id).await.unwrap();
    }
}
