use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("{} is not a git repository", .0.display())]
    NotARepository(PathBuf),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Version control over the database directory.
#[async_trait]
pub trait VersionControl: Send + Sync {
    fn is_repository(&self) -> bool;

    /// Uncommitted changes as a unified diff, untracked files included.
    /// `None` when the tree is clean.
    async fn diff(&self) -> Result<Option<String>, VcsError>;

    /// Stage everything and commit.
    async fn commit(&self, message: &str) -> Result<(), VcsError>;
}

/// `VersionControl` backed by the `git` binary.
pub struct GitCli {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn git(&self, args: &[&str]) -> Result<String, VcsError> {
        let command = format!("git {}", args.join(" "));
        debug!("Running {} in {}", command, self.repo_root.display());

        let child = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(VcsError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn untracked_files(&self) -> Result<Vec<String>, VcsError> {
        let listing = self
            .git(&["ls-files", "--others", "--exclude-standard"])
            .await?;
        Ok(listing
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    fn is_repository(&self) -> bool {
        self.repo_root.join(".git").exists()
    }

    async fn diff(&self) -> Result<Option<String>, VcsError> {
        if !self.is_repository() {
            return Err(VcsError::NotARepository(self.repo_root.clone()));
        }

        let mut parts = Vec::new();
        let tracked = self.git(&["diff", "HEAD"]).await?;
        if !tracked.trim().is_empty() {
            parts.push(tracked.trim_end().to_string());
        }

        for path in self.untracked_files().await? {
            match tokio::fs::read_to_string(self.repo_root.join(&path)).await {
                Ok(content) => parts.push(new_file_diff(&path, &content)),
                Err(e) => {
                    debug!("Listing {} without content: {}", path, e);
                    parts.push(binary_file_diff(&path));
                }
            }
        }

        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parts.join("\n")))
        }
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        if !self.is_repository() {
            return Err(VcsError::NotARepository(self.repo_root.clone()));
        }
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "-m", message]).await?;
        Ok(())
    }
}

/// Render an untracked file as a git new-file diff.
pub fn new_file_diff(path: &str, content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut diff = format!(
        "diff --git a/{path} b/{path}\n\
         new file mode 100644\n\
         index 0000000..0000000\n\
         --- /dev/null\n\
         +++ b/{path}\n\
         @@ -0,0 +1,{} @@",
        lines.len()
    );
    for line in lines {
        diff.push_str("\n+");
        diff.push_str(line);
    }
    diff
}

/// Render an untracked file whose content is not text.
pub fn binary_file_diff(path: &str) -> String {
    format!(
        "diff --git a/{path} b/{path}\n\
         new file mode 100644\n\
         index 0000000..0000000\n\
         Binary files /dev/null and b/{path} differ"
    )
}
