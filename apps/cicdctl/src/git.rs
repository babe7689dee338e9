use std::collections::BTreeSet;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::config::AutomationConfig;
use crate::error::{AutomationError, AutomationResult};
use crate::utils::{run_cmd_capture, which, CommandResult};

pub trait WorkingCopy {
    fn root(&self) -> &Path;
    fn branch(&self) -> Option<&str>;
    /// Creates the branch when absent and checks it out.
    fn switch_to_branch(&mut self, name: &str) -> AutomationResult<()>;
    /// Stages a file or directory given relative to the root (or absolute inside it).
    fn add(&mut self, path: &Path) -> AutomationResult<()>;
    /// Fails when nothing has been staged since the last commit.
    fn commit(&mut self, message: &str) -> AutomationResult<()>;
    fn push(&mut self, remote: &str, branch: &str) -> AutomationResult<()>;
    /// Best-effort and idempotent; never fails.
    fn destroy(&mut self);
}

pub trait Cloner {
    type Copy: WorkingCopy;

    fn clone_repository(&self, remote_url: &str) -> AutomationResult<Self::Copy>;
}

/// Owns a working copy for one run and destroys it exactly once, on
/// `release` or when dropped on an error path.
pub struct CopyGuard<C: WorkingCopy> {
    copy: C,
    released: bool,
}

impl<C: WorkingCopy> CopyGuard<C> {
    pub fn new(copy: C) -> Self {
        Self {
            copy,
            released: false,
        }
    }

    pub fn release(mut self) {
        self.copy.destroy();
        self.released = true;
    }
}

impl<C: WorkingCopy> Deref for CopyGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.copy
    }
}

impl<C: WorkingCopy> DerefMut for CopyGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.copy
    }
}

impl<C: WorkingCopy> Drop for CopyGuard<C> {
    fn drop(&mut self) {
        if !self.released {
            self.copy.destroy();
        }
    }
}

/// Clones into a uniquely named temporary directory under the work root.
#[derive(Debug, Clone)]
pub struct GitCloner {
    work_root: PathBuf,
    author_name: String,
    author_email: String,
}

impl GitCloner {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            work_root: config.work_root.clone(),
            author_name: config.git_author_name.clone(),
            author_email: config.git_author_email.clone(),
        }
    }
}

impl Cloner for GitCloner {
    type Copy = GitWorkingCopy;

    fn clone_repository(&self, remote_url: &str) -> AutomationResult<GitWorkingCopy> {
        if which("git").is_none() {
            return Err(AutomationError::repository("git is not installed"));
        }
        fs::create_dir_all(&self.work_root).map_err(|err| {
            AutomationError::repository(format!(
                "cannot create work root {}: {err}",
                self.work_root.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix("cicdctl-")
            .tempdir_in(&self.work_root)
            .map_err(|err| {
                AutomationError::repository(format!("cannot create working directory: {err}"))
            })?;
        let root = dir.path().join("repo");

        let mut command = git_command();
        command.arg("clone").arg("--quiet").arg(remote_url).arg(&root);
        let result = run_git(command)?;
        if !result.ok {
            return Err(AutomationError::repository(format!(
                "cannot clone {remote_url}: {}",
                result.diagnostics()
            )));
        }
        tracing::info!(remote = remote_url, path = %root.display(), "repository cloned");

        Ok(GitWorkingCopy {
            remote_url: remote_url.to_string(),
            dir: Some(dir),
            root,
            branch: None,
            staged: BTreeSet::new(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        })
    }
}

#[derive(Debug)]
pub struct GitWorkingCopy {
    remote_url: String,
    dir: Option<TempDir>,
    root: PathBuf,
    branch: Option<String>,
    staged: BTreeSet<PathBuf>,
    author_name: String,
    author_email: String,
}

fn git_command() -> Command {
    let mut command = Command::new("git");
    command.env("GIT_TERMINAL_PROMPT", "0");
    command
}

fn run_git(command: Command) -> AutomationResult<CommandResult> {
    run_cmd_capture(command)
        .map_err(|err| AutomationError::repository(format!("failed to run git: {err}")))
}

impl GitWorkingCopy {
    pub fn staged(&self) -> impl Iterator<Item = &Path> {
        self.staged.iter().map(PathBuf::as_path)
    }

    fn ensure_alive(&self) -> AutomationResult<()> {
        if self.dir.is_none() {
            return Err(AutomationError::repository(format!(
                "working copy of {} was already destroyed",
                self.remote_url
            )));
        }
        Ok(())
    }

    fn git(&self, args: &[&str]) -> AutomationResult<CommandResult> {
        self.ensure_alive()?;
        let mut command = git_command();
        command.current_dir(&self.root).args(args);
        run_git(command)
    }

    fn git_ok(&self, args: &[&str]) -> AutomationResult<CommandResult> {
        let result = self.git(args)?;
        if !result.ok {
            return Err(AutomationError::repository(format!(
                "{} failed: {}",
                result.command,
                result.diagnostics()
            )));
        }
        Ok(result)
    }

    fn has_ref(&self, reference: &str) -> AutomationResult<bool> {
        Ok(self
            .git(&["rev-parse", "--verify", "--quiet", reference])?
            .ok)
    }

    fn relative(&self, path: &Path) -> AutomationResult<PathBuf> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| {
                    AutomationError::repository(format!(
                        "{} is outside the working copy",
                        path.display()
                    ))
                })?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };
        if relative
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(AutomationError::repository(format!(
                "{} escapes the working copy",
                path.display()
            )));
        }
        Ok(relative)
    }
}

impl WorkingCopy for GitWorkingCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    fn switch_to_branch(&mut self, name: &str) -> AutomationResult<()> {
        let local = format!("refs/heads/{name}");
        let remote = format!("refs/remotes/origin/{name}");
        if self.has_ref(&local)? {
            self.git_ok(&["checkout", name])?;
        } else if self.has_ref(&remote)? {
            self.git_ok(&["checkout", "-b", name, "--track", &format!("origin/{name}")])?;
        } else if !self.has_ref("HEAD")? {
            // Unborn HEAD: the remote has no commit yet.
            self.git_ok(&["symbolic-ref", "HEAD", &local])?;
        } else {
            self.git_ok(&["checkout", "-b", name])?;
        }
        tracing::info!(branch = name, "switched branch");
        self.branch = Some(name.to_string());
        Ok(())
    }

    fn add(&mut self, path: &Path) -> AutomationResult<()> {
        self.ensure_alive()?;
        let relative = self.relative(path)?;
        if self.staged.contains(&relative) {
            return Ok(());
        }
        if !self.root.join(&relative).exists() {
            return Err(AutomationError::repository(format!(
                "cannot stage {}: no such file or directory",
                relative.display()
            )));
        }
        let staged_path = relative.to_string_lossy().to_string();
        self.git_ok(&["add", "--", &staged_path])?;
        tracing::debug!(path = %staged_path, "staged");
        self.staged.insert(relative);
        Ok(())
    }

    fn commit(&mut self, message: &str) -> AutomationResult<()> {
        self.ensure_alive()?;
        if self.staged.is_empty() {
            return Err(AutomationError::repository(
                "nothing staged: refusing to create an empty commit",
            ));
        }
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.git_ok(&[
            "-c",
            &name,
            "-c",
            &email,
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "-m",
            message,
        ])?;
        tracing::info!(files = self.staged.len(), "committed");
        self.staged.clear();
        Ok(())
    }

    fn push(&mut self, remote: &str, branch: &str) -> AutomationResult<()> {
        self.git_ok(&["push", "--quiet", remote, branch])?;
        tracing::info!(remote, branch, "pushed");
        Ok(())
    }

    fn destroy(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => tracing::info!(path = %path.display(), "working copy removed"),
            Err(err) => tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to remove working copy"
            ),
        }
    }
}

impl Drop for GitWorkingCopy {
    fn drop(&mut self) {
        self.destroy();
    }
}
