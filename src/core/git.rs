//! Git primitives for the remote-publish pipeline.
//!
//! Everything shells out to `git`; no repository state is cached between
//! calls. The commit identity is always passed with `-c` so the ambient
//! `user.name`/`user.email` never leak into publish commits.

use std::path::Path;
use std::process::{Command, Output};

use serde::Serialize;

use crate::error::{Error, PushRejectedDetails, Result};
use crate::utils::command;

/// Fixed author identity for publish commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { sha: String },
    NothingToCommit,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushOutput {
    pub remote: String,
    pub branch: String,
    pub up_to_date: bool,
}

fn execute_git(repo: &Path, args: &[&str]) -> Result<Output> {
    tracing::debug!(repo = %repo.display(), ?args, "git");
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| Error::git_command_failed(format!("Failed to run git: {}", e)))
}

fn git_failure(action: &str, output: &Output) -> Error {
    Error::git_command_failed(format!(
        "git {} failed: {}",
        action,
        command::error_text(output)
    ))
}

pub fn is_git_repo(path: &Path) -> bool {
    command::run_in_optional(path, "git", &["rev-parse", "--git-dir"]).is_some()
}

/// Whether `pathspec` has staged, unstaged, or untracked changes.
pub fn has_changes(repo: &Path, pathspec: &str) -> Result<bool> {
    let output = execute_git(repo, &["status", "--porcelain=v1", "--", pathspec])?;
    if !output.status.success() {
        return Err(git_failure("status", &output));
    }
    Ok(!output.stdout.is_empty())
}

/// Stage additions, modifications, and deletions under `pathspec`.
pub fn stage(repo: &Path, pathspec: &str) -> Result<()> {
    let output = execute_git(repo, &["add", "-A", "--", pathspec])?;
    if !output.status.success() {
        return Err(git_failure("add", &output));
    }
    Ok(())
}

/// Commit staged changes under `pathspec` as `identity`.
///
/// Nothing staged is not an error: the publish pipeline is idempotent and a
/// second run over unchanged output simply commits nothing.
pub fn commit_as(
    repo: &Path,
    identity: &Identity,
    message: &str,
    pathspec: &str,
) -> Result<CommitOutcome> {
    let staged = execute_git(repo, &["diff", "--cached", "--quiet", "--", pathspec])?;
    match staged.status.code() {
        Some(0) => return Ok(CommitOutcome::NothingToCommit),
        Some(1) => {}
        _ => return Err(git_failure("diff --cached", &staged)),
    }

    let user_name = format!("user.name={}", identity.name);
    let user_email = format!("user.email={}", identity.email);
    let output = execute_git(
        repo,
        &[
            "-c",
            &user_name,
            "-c",
            &user_email,
            "commit",
            "--no-verify",
            "-m",
            message,
            "--",
            pathspec,
        ],
    )?;
    if !output.status.success() {
        return Err(git_failure("commit", &output));
    }

    let sha = command::run_in(repo, "git", &["rev-parse", "HEAD"], "git rev-parse")
        .map_err(|e| Error::git_command_failed(e.message))?;
    Ok(CommitOutcome::Committed { sha })
}

/// The branch a remote considers its default.
///
/// Tries the local `refs/remotes/<remote>/HEAD`, then asks the remote, then
/// falls back to the checked-out branch.
pub fn default_branch(repo: &Path, remote: &str) -> Result<String> {
    let symbolic = format!("refs/remotes/{}/HEAD", remote);
    if let Some(full) = command::run_in_optional(repo, "git", &["symbolic-ref", "--quiet", &symbolic]) {
        let prefix = format!("refs/remotes/{}/", remote);
        if let Some(branch) = full.strip_prefix(&prefix) {
            return Ok(branch.to_string());
        }
    }

    if let Some(listing) = command::run_in_optional(repo, "git", &["ls-remote", "--symref", remote, "HEAD"]) {
        if let Some(branch) = parse_symref(&listing) {
            return Ok(branch);
        }
    }

    match command::run_in_optional(repo, "git", &["symbolic-ref", "--quiet", "--short", "HEAD"]) {
        Some(branch) => Ok(branch),
        None => Err(Error::git_command_failed(format!(
            "Cannot determine default branch of remote '{}'",
            remote
        ))
        .with_hint("Set publish.remote.branch in docship.toml")),
    }
}

/// Extract the branch from `ls-remote --symref` output
/// (`ref: refs/heads/main\tHEAD`).
fn parse_symref(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let rest = line.strip_prefix("ref: ")?;
        let (target, name) = rest.split_once('\t')?;
        if name.trim() != "HEAD" {
            return None;
        }
        target.strip_prefix("refs/heads/").map(str::to_string)
    })
}

fn is_rejection(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("[rejected]")
        || lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("[remote rejected]")
}

/// `git push <remote> HEAD:<branch>`. No fetch, rebase, or retry.
pub fn push(repo: &Path, remote: &str, branch: &str) -> Result<PushOutput> {
    let refspec = format!("HEAD:{}", branch);
    let output = execute_git(repo, &["push", remote, &refspec])?;
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        if is_rejection(&stderr) {
            return Err(Error::publish_push_rejected(PushRejectedDetails {
                remote: remote.to_string(),
                branch: branch.to_string(),
                stderr: stderr.trim().to_string(),
            }));
        }
        return Err(git_failure("push", &output));
    }

    Ok(PushOutput {
        remote: remote.to_string(),
        branch: branch.to_string(),
        up_to_date: stderr.contains("Everything up-to-date"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_symref_reads_head_target() {
        let listing = "ref: refs/heads/main\tHEAD\n3f1c0a9e\tHEAD\n";
        assert_eq!(parse_symref(listing), Some("main".to_string()));
        assert_eq!(parse_symref("3f1c0a9e\tHEAD\n"), None);
    }

    #[test]
    fn rejection_detection() {
        assert!(is_rejection(
            " ! [rejected]        HEAD -> master (fetch first)\nerror: failed to push some refs"
        ));
        assert!(is_rejection("hint: Updates were rejected because of a non-fast-forward"));
        assert!(!is_rejection("fatal: 'nowhere' does not appear to be a git repository"));
    }

    #[cfg(unix)]
    mod with_repos {
        use super::*;
        use std::fs;
        use tempfile::TempDir;

        fn git(dir: &Path, args: &[&str]) {
            let out = Command::new("git").args(args).current_dir(dir).output().unwrap();
            assert!(out.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&out.stderr));
        }

        fn identity() -> Identity {
            Identity {
                name: "docs-bot".to_string(),
                email: "docs-bot@example.com".to_string(),
            }
        }

        /// A work repo with one commit, pushed to a bare `origin`.
        fn repo_with_remote() -> (TempDir, TempDir) {
            let remote = TempDir::new().unwrap();
            git(remote.path(), &["init", "--bare", "-b", "master"]);

            let work = TempDir::new().unwrap();
            git(work.path(), &["init", "-b", "master"]);
            fs::write(work.path().join("README"), "hi").unwrap();
            git(work.path(), &["add", "."]);
            git(
                work.path(),
                &["-c", "user.name=t", "-c", "user.email=t@t", "commit", "-m", "init"],
            );
            git(
                work.path(),
                &["remote", "add", "origin", &remote.path().to_string_lossy()],
            );
            git(work.path(), &["push", "origin", "HEAD:master"]);
            (work, remote)
        }

        #[test]
        fn commit_uses_fixed_identity_and_is_idempotent() {
            let (work, _remote) = repo_with_remote();
            let repo = work.path();
            fs::create_dir_all(repo.join("docs/html")).unwrap();
            fs::write(repo.join("docs/html/index.html"), "<html/>").unwrap();

            assert!(has_changes(repo, "docs/html").unwrap());
            stage(repo, "docs/html").unwrap();
            let outcome = commit_as(repo, &identity(), "Update documentation", "docs/html").unwrap();
            assert!(matches!(outcome, CommitOutcome::Committed { .. }));

            let author = command::run_in(repo, "git", &["log", "-1", "--format=%an <%ae>"], "log").unwrap();
            assert_eq!(author, "docs-bot <docs-bot@example.com>");

            assert!(!has_changes(repo, "docs/html").unwrap());
            stage(repo, "docs/html").unwrap();
            assert_eq!(
                commit_as(repo, &identity(), "Update documentation", "docs/html").unwrap(),
                CommitOutcome::NothingToCommit
            );
        }

        #[test]
        fn commit_ignores_changes_outside_pathspec() {
            let (work, _remote) = repo_with_remote();
            let repo = work.path();
            fs::write(repo.join("README"), "changed").unwrap();
            git(repo, &["add", "README"]);

            assert_eq!(
                commit_as(repo, &identity(), "Update documentation", "docs/html").unwrap(),
                CommitOutcome::NothingToCommit
            );
        }

        #[test]
        fn default_branch_falls_back_to_remote_head() {
            let (work, _remote) = repo_with_remote();
            assert_eq!(default_branch(work.path(), "origin").unwrap(), "master");
        }

        #[test]
        fn push_to_diverged_remote_is_rejected() {
            let (work, remote) = repo_with_remote();

            // A second clone pushes first, so `work` is now behind.
            let other = TempDir::new().unwrap();
            git(
                other.path(),
                &["clone", &remote.path().to_string_lossy(), "."],
            );
            fs::write(other.path().join("CHANGES"), "x").unwrap();
            git(other.path(), &["add", "."]);
            git(
                other.path(),
                &["-c", "user.name=o", "-c", "user.email=o@o", "commit", "-m", "other"],
            );
            git(other.path(), &["push", "origin", "HEAD:master"]);

            fs::write(work.path().join("LOCAL"), "y").unwrap();
            stage(work.path(), "LOCAL").unwrap();
            commit_as(work.path(), &identity(), "local", "LOCAL").unwrap();

            let err = push(work.path(), "origin", "master").unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::PublishPushRejected);
            assert_eq!(err.details["remote"], "origin");
        }

        #[test]
        fn push_without_changes_is_up_to_date() {
            let (work, _remote) = repo_with_remote();
            let out = push(work.path(), "origin", "master").unwrap();
            assert!(out.up_to_date);
        }

        #[test]
        fn push_to_unknown_remote_is_git_failure() {
            let (work, _remote) = repo_with_remote();
            let err = push(work.path(), "nowhere", "master").unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::GitCommandFailed);
        }
    }
}
