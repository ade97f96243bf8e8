//! Environment abstraction used by the primitive tools.
//!
//! Tools never touch `std::fs` or spawn processes directly; they go through
//! an [`Environment`]. [`crate::filesystem::LocalFileSystem`] is the local
//! implementation.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directories skipped by glob and grep.
pub const IGNORED_DIRS: &[&str] = &["node_modules", "target", "dist", ".git"];

/// Match result from a grep search
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line_content: String,
}

/// Kind of a directory entry. Symlinks are reported as such, not followed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes; 0 for symlinks
    pub size: u64,
}

/// What to search for and where.
#[derive(Clone, Debug)]
pub struct GrepQuery {
    pub pattern: regex::Regex,
    /// File or directory to search
    pub path: PathBuf,
    /// Only search files whose name matches this glob
    pub include: Option<glob::Pattern>,
    /// Stop after this many matches
    pub max_matches: usize,
    /// Skip files larger than this
    pub max_file_size: u64,
}

/// Result from command execution
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecResult {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

#[async_trait]
pub trait Environment: Send + Sync {
    /// Read file contents as UTF-8 string
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    async fn read_file(&self, path: &Path) -> Result<String>;

    /// Write string content to file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    async fn write_file(&self, path: &Path, content: &str) -> Result<()>;

    async fn exists(&self, path: &Path) -> bool;

    async fn is_dir(&self, path: &Path) -> bool;

    /// Direct children of `path`, in no particular order.
    ///
    /// # Errors
    /// Returns an error if `path` is not a readable directory.
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Files matching `pattern` under `base`, newest first.
    ///
    /// # Errors
    /// Returns an error if the pattern is invalid.
    async fn glob(&self, pattern: &str, base: &Path) -> Result<Vec<PathBuf>>;

    /// # Errors
    /// Returns an error if the search root cannot be read.
    async fn grep(&self, query: &GrepQuery) -> Result<Vec<GrepMatch>>;

    /// Run `command` through the shell. A timeout is reported in the result,
    /// not as an error.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned.
    async fn exec(&self, command: &str, workdir: Option<&Path>, timeout: Duration)
    -> Result<ExecResult>;

    /// Working directory for relative paths and commands
    fn root(&self) -> &Path;

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }
}

/// Whether any component of `path` is an ignored directory.
#[must_use]
pub fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
    })
}
