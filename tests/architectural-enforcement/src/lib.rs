//! Architectural Enforcement Integration Tests
//!
//! Source scanners that keep the router crates honest:
//! - No sleeping outside retry backoff
//! - No blocking I/O inside async code
//!
//! Everything after a file's `#[cfg(test)]` marker is treated as test code
//! and skipped, as are integration test directories.

use std::fs;
use std::path::{Path, PathBuf};

/// Root of the router crates
#[must_use]
pub fn router_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../router")
}

/// A production source line
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
    /// Whether the enclosing fn is async
    pub in_async_fn: bool,
    /// Up to 15 preceding lines, lowercased
    pub context: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Every production line of every `.rs` file under `dir`
#[must_use]
pub fn production_lines(dir: &Path) -> Vec<SourceLine> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs")
            || path
                .strip_prefix(dir)
                .is_ok_and(|rel| rel.components().any(|c| c.as_os_str() == "tests"))
        {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        out.extend(scan_source(path, &content));
    }
    out
}

/// Split `content` into production lines
#[must_use]
pub fn scan_source(path: &Path, content: &str) -> Vec<SourceLine> {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    let mut in_async_fn = false;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        if is_fn_header(trimmed) {
            in_async_fn = trimmed.contains("async fn ");
        }

        let code = line.split("//").next().unwrap_or(line).to_string();
        let context = lines[idx.saturating_sub(15)..idx]
            .iter()
            .map(|l| l.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        out.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code,
            in_async_fn,
            context,
        });
    }
    out
}

fn is_fn_header(line: &str) -> bool {
    line.starts_with("fn ")
        || line.starts_with("async fn ")
        || line.starts_with("pub fn ")
        || line.starts_with("pub async fn ")
        || line.starts_with("pub(crate) fn ")
        || line.starts_with("pub(crate) async fn ")
        || line.starts_with("pub(super) fn ")
}

/// Whether the line sleeps the thread or task
#[must_use]
pub fn is_sleep(line: &SourceLine) -> bool {
    line.code.contains("::sleep(") || line.code.contains(".sleep(")
}

/// Whether a sleep sits inside retry backoff
#[must_use]
pub fn is_backoff_sleep(line: &SourceLine) -> bool {
    !line.code.contains("std::thread")
        && (line.context.contains("backoff") || line.context.contains("retry"))
}

/// Whether the line performs blocking I/O
#[must_use]
pub fn is_blocking_io(line: &SourceLine) -> bool {
    let code = &line.code;
    code.contains("std::net::")
        || code.contains("reqwest::blocking")
        || code.contains("std::process::Command")
        || code.contains("std::thread::sleep")
        || (line.in_async_fn && code.contains("std::fs::"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<SourceLine> {
        scan_source(Path::new("x.rs"), src)
    }

    #[test]
    fn test_stops_at_test_module() {
        let scanned = lines("fn a() {}\n#[cfg(test)]\nmod tests { fn b() { std::thread::sleep(d); } }\n");
        assert_eq!(scanned.len(), 1);
    }

    #[test]
    fn test_tracks_async_fn() {
        let scanned = lines(
            "fn load() {\n    std::fs::read_to_string(p);\n}\nasync fn save() {\n    std::fs::write(p, b);\n}\n",
        );
        assert!(!is_blocking_io(&scanned[1]));
        assert!(is_blocking_io(&scanned[4]));
    }

    #[test]
    fn test_backoff_sleep_allowed() {
        let scanned = lines(
            "async fn call() {\n    let delay = retry.backoff_for_attempt(n);\n    tokio::time::sleep(delay).await;\n}\n",
        );
        assert!(is_sleep(&scanned[2]));
        assert!(is_backoff_sleep(&scanned[2]));
    }

    #[test]
    fn test_polling_sleep_rejected() {
        let scanned = lines("async fn poll() {\n    loop {\n        tokio::time::sleep(d).await;\n    }\n}\n");
        assert!(is_sleep(&scanned[2]));
        assert!(!is_backoff_sleep(&scanned[2]));
    }
}
