use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use serde::Serialize;

use crate::config::PublishConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Disabled,
    NothingToPublish,
    Pushed { commit: String },
}

/// Makes the document store visible to the outside world. Publishing with no
/// pending changes is a successful no-op.
pub trait Publisher: Send + Sync {
    fn publish(&self) -> anyhow::Result<PublishOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self) -> anyhow::Result<PublishOutcome> {
        Ok(PublishOutcome::Disabled)
    }
}

/// Where `git push` sends commits. A token-bearing URL is kept out of logs and
/// error messages.
#[derive(Clone)]
enum PushTarget {
    Remote(String),
    Token { repo: String, token: String },
}

impl PushTarget {
    fn arg(&self) -> String {
        match self {
            Self::Remote(remote) => remote.clone(),
            Self::Token { repo, token } => format!("https://{token}@github.com/{repo}.git"),
        }
    }

    fn redacted(&self) -> String {
        match self {
            Self::Remote(remote) => remote.clone(),
            Self::Token { repo, .. } => format!("https://***@github.com/{repo}.git"),
        }
    }
}

impl std::fmt::Debug for PushTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Debug, Clone)]
pub struct GitPublisher {
    repo_dir: PathBuf,
    paths: Vec<PathBuf>,
    target: PushTarget,
    branch: String,
    message: String,
    retry: RetryPolicy,
}

impl GitPublisher {
    /// `default_paths` is used when the configuration names no paths.
    pub fn new(config: &PublishConfig, default_paths: Vec<PathBuf>, retry: RetryPolicy) -> Self {
        let target = match (&config.github_repo, &config.github_token) {
            (Some(repo), Some(token)) => PushTarget::Token {
                repo: repo.clone(),
                token: token.clone(),
            },
            _ => PushTarget::Remote(config.remote.clone()),
        };
        let paths = if config.paths.is_empty() {
            default_paths
        } else {
            config.paths.clone()
        };
        Self {
            repo_dir: config.repo_dir.clone(),
            paths,
            target,
            branch: config.branch.clone(),
            message: config.message.clone(),
            retry,
        }
    }

    fn pathspecs(&self) -> Vec<String> {
        let mut specs = vec!["--".to_owned()];
        specs.extend(self.paths.iter().map(|path| path.to_string_lossy().into_owned()));
        specs
    }

    fn run_checked(&self, args: &[String], shown: &str) -> anyhow::Result<String> {
        let output = self.run_allow_failure(args, shown)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            anyhow::bail!(
                "git {shown} failed (exit {:?}): {}",
                output.status.code(),
                self.scrub(&stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn run_allow_failure(&self, args: &[String], shown: &str) -> anyhow::Result<Output> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(args)
            .output()
            .with_context(|| format!("run git {shown} in {}", self.repo_dir.display()))
    }

    fn scrub(&self, text: &str) -> String {
        match &self.target {
            PushTarget::Token { token, .. } if !token.is_empty() => text.replace(token, "***"),
            _ => text.to_owned(),
        }
    }
}

impl Publisher for GitPublisher {
    /// Commit pending changes under the configured paths, then push whenever
    /// the remote branch is behind `HEAD`. A commit left unpushed by an
    /// earlier failed push goes out on the next call even with a clean tree.
    fn publish(&self) -> anyhow::Result<PublishOutcome> {
        let mut add = vec!["add".to_owned(), "-A".to_owned()];
        add.extend(self.pathspecs());
        add.push(":(exclude)*.backup".to_owned());
        self.run_checked(&add, "add")?;

        let mut status = vec!["status".to_owned(), "--porcelain".to_owned()];
        status.extend(self.pathspecs());
        let changes = self.run_checked(&status, "status")?;
        if changes.is_empty() {
            tracing::debug!(repo_dir = %self.repo_dir.display(), "working tree clean");
        } else {
            tracing::debug!(changed = changes.lines().count(), "committing changes");
            let mut commit = vec!["commit".to_owned(), "-m".to_owned(), self.message.clone()];
            commit.extend(self.pathspecs());
            let committed = self.run_allow_failure(&commit, "commit")?;
            if !committed.status.success() {
                tracing::info!(
                    stdout = %String::from_utf8_lossy(&committed.stdout).trim(),
                    "git commit made no commit"
                );
            }
        }

        let Some(head) = self.local_head()? else {
            tracing::info!(repo_dir = %self.repo_dir.display(), "repository has no commits; nothing to publish");
            return Ok(PublishOutcome::NothingToPublish);
        };
        if self.remote_head()?.as_deref() == Some(head.as_str()) {
            tracing::info!(commit = %head, branch = %self.branch, "remote is up to date");
            return Ok(PublishOutcome::NothingToPublish);
        }

        let push = vec![
            "push".to_owned(),
            self.target.arg(),
            format!("HEAD:refs/heads/{}", self.branch),
        ];
        let shown = format!("push {} {}", self.target.redacted(), self.branch);
        self.retry
            .run(&shown, |_| self.run_checked(&push, &shown).map(drop))?;

        tracing::info!(commit = %head, target = %self.target.redacted(), branch = %self.branch, "published");
        Ok(PublishOutcome::Pushed { commit: head })
    }
}

impl GitPublisher {
    fn local_head(&self) -> anyhow::Result<Option<String>> {
        let args = ["rev-parse".to_owned(), "--verify".to_owned(), "-q".to_owned(), "HEAD".to_owned()];
        let output = self.run_allow_failure(&args, "rev-parse")?;
        let head = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok((output.status.success() && !head.is_empty()).then_some(head))
    }

    /// Commit the remote branch points at, `None` when the branch does not
    /// exist there yet.
    fn remote_head(&self) -> anyhow::Result<Option<String>> {
        let args = vec![
            "ls-remote".to_owned(),
            self.target.arg(),
            format!("refs/heads/{}", self.branch),
        ];
        let shown = format!("ls-remote {} {}", self.target.redacted(), self.branch);
        let listed = self
            .retry
            .run(&shown, |_| self.run_checked(&args, &shown))?;
        Ok(listed
            .split_whitespace()
            .next()
            .map(str::to_owned))
    }
}

/// Publisher for the given configuration; `--no-publish` and a disabled
/// config both yield the no-op publisher.
pub fn build_publisher(
    config: &PublishConfig,
    data_dir: &Path,
    retry: RetryPolicy,
) -> Box<dyn Publisher> {
    if config.enabled {
        Box::new(GitPublisher::new(config, vec![data_dir.to_path_buf()], retry))
    } else {
        Box::new(NoopPublisher)
    }
}
