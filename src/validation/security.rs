//! Tool-specific security policy applied to sanitized input.
//!
//! The policy looks only at the input values; it never touches the
//! filesystem or the network. Paths are resolved lexically and hosts are
//! checked as written, without DNS resolution.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Component, Path, PathBuf};
use url::{Host, Url};

const DEFAULT_BLOCKED_PATHS: &[&str] = &["/etc/passwd", "/etc/shadow", "/etc/sudoers", "/root", "/.ssh"];

const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "169.254.169.254",
    "metadata.google.internal",
];

const DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    r"rm\s+(-[a-z]*r[a-z]*f?[a-z]*|-[a-z]*f[a-z]*r[a-z]*|--recursive)(\s+-\S+)*\s+[/~]",
    r"mkfs\.",
    r"dd\s+.*of=/dev",
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    r">\s*/dev/sd[a-z]",
    r"chmod\s+(-R\s+)?777\s+/",
    r"curl\s.*\|\s*(sudo\s+)?(ba)?sh\b",
    r"wget\s.*\|\s*(sudo\s+)?(ba)?sh\b",
];

const PATH_FIELDS: &[&str] = &["file_path", "filePath", "path"];

/// Outcome of a security check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityVerdict {
    Allowed,
    Denied(String),
}

impl SecurityVerdict {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self::Denied(reason.into())
    }
}

/// Policy gate run before any tool executes.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    home: PathBuf,
    cwd: PathBuf,
    blocked_paths: Vec<PathBuf>,
    blocked_hosts: Vec<String>,
    dangerous_commands: Vec<Regex>,
}

impl SecurityPolicy {
    /// Policy rooted at the given home and working directories.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            home: normalize(&home.into()),
            cwd: normalize(&cwd.into()),
            blocked_paths: DEFAULT_BLOCKED_PATHS.iter().map(PathBuf::from).collect(),
            blocked_hosts: DEFAULT_BLOCKED_HOSTS.iter().map(|h| (*h).to_string()).collect(),
            dangerous_commands: compile_patterns(DANGEROUS_COMMAND_PATTERNS.iter().copied()),
        }
    }

    /// Policy for the current process: `HOME` (default `/tmp`) and the
    /// current directory.
    #[must_use]
    pub fn from_env() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        let cwd = std::env::current_dir().unwrap_or_else(|_| home.clone());
        Self::new(home, cwd)
    }

    #[must_use]
    pub fn with_blocked_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.blocked_paths.extend(paths.into_iter().map(|p| normalize(&p)));
        self
    }

    #[must_use]
    pub fn with_blocked_hosts(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        self.blocked_hosts.extend(hosts);
        self
    }

    /// Extra case-insensitive command patterns; invalid patterns are skipped.
    #[must_use]
    pub fn with_denied_commands<'a>(mut self, patterns: impl IntoIterator<Item = &'a str>) -> Self {
        self.dangerous_commands.extend(compile_patterns(patterns));
        self
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Run the check that applies to `tool_name`. Tools without a dedicated
    /// policy are allowed.
    #[must_use]
    pub fn check(&self, tool_name: &str, input: &Value) -> SecurityVerdict {
        match tool_name {
            "Bash" => {
                if let Some(command) = input.get("command").and_then(Value::as_str) {
                    let verdict = self.check_command(command);
                    if !verdict.is_allowed() {
                        return verdict;
                    }
                }
                match input.get("workdir").and_then(Value::as_str) {
                    Some(workdir) => self.check_path(workdir),
                    None => SecurityVerdict::Allowed,
                }
            }
            "Read" | "Write" | "Edit" => PATH_FIELDS
                .iter()
                .find_map(|field| input.get(*field).and_then(Value::as_str))
                .map_or(SecurityVerdict::Allowed, |path| self.check_path(path)),
            "WebFetch" => input
                .get("url")
                .and_then(Value::as_str)
                .map_or(SecurityVerdict::Allowed, |url| self.check_url(url)),
            _ => SecurityVerdict::Allowed,
        }
    }

    #[must_use]
    pub fn check_command(&self, command: &str) -> SecurityVerdict {
        if self.dangerous_commands.iter().any(|re| re.is_match(command)) {
            log::warn!("Dangerous command rejected command={command:?}");
            return SecurityVerdict::denied("Command contains potentially dangerous operations");
        }
        SecurityVerdict::Allowed
    }

    #[must_use]
    pub fn check_path(&self, path: &str) -> SecurityVerdict {
        let path = Path::new(path);
        if !path.is_absolute() {
            return SecurityVerdict::denied("Path must be absolute");
        }

        let resolved = normalize(path);
        if let Some(blocked) = self.blocked_paths.iter().find(|b| resolved.starts_with(b)) {
            return SecurityVerdict::denied(format!("Access to {} is not allowed", blocked.display()));
        }

        if resolved.starts_with(&self.home) || resolved.starts_with(&self.cwd) {
            SecurityVerdict::Allowed
        } else {
            SecurityVerdict::denied("Path must be under home directory or current working directory")
        }
    }

    #[must_use]
    pub fn check_url(&self, raw: &str) -> SecurityVerdict {
        let Ok(url) = Url::parse(raw) else {
            return SecurityVerdict::denied("Invalid URL");
        };
        if !matches!(url.scheme(), "http" | "https") {
            return SecurityVerdict::denied("Only http and https URLs are allowed");
        }

        let internal = match url.host() {
            None => return SecurityVerdict::denied("Invalid URL"),
            Some(Host::Domain(domain)) => self.is_blocked_host(domain),
            Some(Host::Ipv4(ip)) => self.is_blocked_host(&ip.to_string()) || is_internal_ipv4(ip),
            Some(Host::Ipv6(ip)) => self.is_blocked_host(&ip.to_string()) || is_internal_ipv6(ip),
        };

        if internal {
            SecurityVerdict::denied("Access to internal or private hosts is not allowed")
        } else {
            SecurityVerdict::Allowed
        }
    }

    fn is_blocked_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        self.blocked_hosts.iter().any(|blocked| {
            host.eq_ignore_ascii_case(blocked)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", blocked.to_ascii_lowercase()))
        })
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Parse a URL and upgrade `http` to `https` before fetching.
///
/// # Errors
///
/// Returns an error if the URL does not parse.
pub fn upgrade_to_https(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw)?;
    if url.scheme() == "http" && url.set_scheme("https").is_err() {
        anyhow::bail!("Cannot upgrade URL to https: {raw}");
    }
    Ok(url)
}

fn compile_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Vec<Regex> {
    patterns
        .into_iter()
        .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("Skipping invalid command pattern pattern={p} error={e}");
                None
            }
        })
        .collect()
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

const fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.to_ipv4_mapped().is_some_and(is_internal_ipv4)
        || (ip.segments()[0] & 0xfe00) == 0xfc00
        || (ip.segments()[0] & 0xffc0) == 0xfe80
}
