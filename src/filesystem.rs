//! Local implementation of the [`Environment`] trait.

use crate::environment::{
    DirEntry, EntryKind, Environment, ExecResult, GrepMatch, GrepQuery, is_ignored,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Filesystem and shell of the local machine, rooted at a working directory.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rooted at the process working directory.
    ///
    /// # Errors
    /// Returns an error if the working directory cannot be determined.
    pub fn from_current_dir() -> Result<Self> {
        Ok(Self::new(
            std::env::current_dir().context("Failed to read current directory")?,
        ))
    }
}

#[async_trait]
impl Environment for LocalFileSystem {
    async fn read_file(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", path.display()))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|m| m.is_dir())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to read directory: {}", path.display()))?;

        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to read directory: {}", path.display()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let (kind, size) = match entry.file_type().await {
                Ok(ft) if ft.is_symlink() => (EntryKind::Symlink, 0),
                Ok(ft) => {
                    let size = entry.metadata().await.map_or(0, |m| m.len());
                    let kind = if ft.is_dir() {
                        EntryKind::Dir
                    } else {
                        EntryKind::File
                    };
                    (kind, size)
                }
                Err(e) => {
                    log::debug!("Skipping unreadable entry name={name} error={e}");
                    continue;
                }
            };
            listed.push(DirEntry { name, kind, size });
        }
        Ok(listed)
    }

    async fn glob(&self, pattern: &str, base: &Path) -> Result<Vec<PathBuf>> {
        let full = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            base.join(pattern)
        };
        let full = full.to_string_lossy().into_owned();

        let mut found: Vec<(PathBuf, SystemTime)> = glob::glob(&full)
            .with_context(|| format!("Invalid glob pattern: {pattern}"))?
            .filter_map(std::result::Result::ok)
            .filter(|p| !is_ignored(p.strip_prefix(base).unwrap_or(p)))
            .filter_map(|p| {
                let meta = std::fs::metadata(&p).ok()?;
                meta.is_file()
                    .then(|| (p, meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)))
            })
            .collect();

        found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(found.into_iter().map(|(p, _)| p).collect())
    }

    async fn grep(&self, query: &GrepQuery) -> Result<Vec<GrepMatch>> {
        let mut matches = Vec::new();
        let meta = tokio::fs::metadata(&query.path)
            .await
            .with_context(|| format!("Failed to read path: {}", query.path.display()))?;

        if meta.is_file() {
            grep_file(&query.path, query, &mut matches).await;
            return Ok(matches);
        }

        // Iterative walk with an explicit queue
        let mut dirs_to_process = vec![query.path.clone()];
        while let Some(dir) = dirs_to_process.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            let mut children = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                children.push(entry.path());
            }
            children.sort();

            for path in children {
                if matches.len() >= query.max_matches {
                    return Ok(matches);
                }
                let Ok(metadata) = tokio::fs::metadata(&path).await else {
                    continue;
                };
                if metadata.is_dir() {
                    if !is_ignored(Path::new(path.file_name().unwrap_or_default())) {
                        dirs_to_process.push(path);
                    }
                } else if metadata.is_file() && metadata.len() <= query.max_file_size {
                    let included = query.include.as_ref().is_none_or(|glob| {
                        path.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| glob.matches(n))
                    });
                    if included {
                        grep_file(&path, query, &mut matches).await;
                    }
                }
            }
        }
        Ok(matches)
    }

    async fn exec(
        &self,
        command: &str,
        workdir: Option<&Path>,
        timeout: Duration,
    ) -> Result<ExecResult> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir.unwrap_or(&self.root))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn shell")?;

        // Output is collected as it arrives so a timed-out command still
        // reports what it printed.
        let stdout = Captured::default();
        let stderr = Captured::default();
        let readers = [
            child.stdout.take().map(|out| tokio::spawn(capture(out, stdout.clone()))),
            child.stderr.take().map(|err| tokio::spawn(capture(err, stderr.clone()))),
        ];

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status.context("Failed to wait for command")?.code(), false),
            Err(_) => {
                log::warn!("Command timed out timeout_ms={}", timeout.as_millis());
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed out command error={e}");
                }
                (None, true)
            }
        };

        // Background children may keep the pipes open; wait briefly, then
        // keep what was read.
        for mut reader in readers.into_iter().flatten() {
            if tokio::time::timeout(OUTPUT_DRAIN, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        Ok(ExecResult {
            stdout: stdout.take(),
            stderr: stderr.take(),
            exit_code,
            timed_out,
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// How long to keep reading output after the process itself has exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

/// Bytes read so far from one output pipe.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn extend(&self, bytes: &[u8]) {
        if let Ok(mut buffer) = self.0.lock() {
            buffer.extend_from_slice(bytes);
        }
    }

    fn take(&self) -> String {
        self.0.lock().map_or_else(
            |_| String::new(),
            |mut buffer| String::from_utf8_lossy(&std::mem::take(&mut *buffer)).into_owned(),
        )
    }
}

async fn capture(mut pipe: impl AsyncRead + Unpin, sink: Captured) {
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink.extend(&chunk[..n]),
            Err(e) => {
                log::debug!("Stopped reading command output error={e}");
                break;
            }
        }
    }
}

/// Append matches from one file. Unreadable and binary files are skipped.
async fn grep_file(path: &Path, query: &GrepQuery, matches: &mut Vec<GrepMatch>) {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return;
    };
    if bytes.iter().take(1024).any(|&b| b == 0) {
        return;
    }
    let content = String::from_utf8_lossy(&bytes);
    for (line_num, line) in content.lines().enumerate() {
        if matches.len() >= query.max_matches {
            return;
        }
        if query.pattern.is_match(line) {
            matches.push(GrepMatch {
                path: path.to_string_lossy().into_owned(),
                line_number: line_num + 1,
                line_content: line.to_string(),
            });
        }
    }
}
