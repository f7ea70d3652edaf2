//! # Watch patterns for change-triggered worker restarts.
//!
//! A [`WatchPattern`] is either:
//! - a **glob** containing `*` or `?` (`**` spans directories), matched against the full path;
//! - a **plain path** naming a file, or a directory watched recursively.
//!
//! ```text
//! /srv/app/src/**/*.php   → /srv/app/src/a.php, /srv/app/src/x/y/b.php
//! /srv/app/config         → /srv/app/config, /srv/app/config/env/prod.ini
//! ```
//!
//! Wildcards match across directory separators: `/srv/app/*.php` also covers
//! `/srv/app/lib/x.php`. Relative patterns are anchored with
//! [`WatchPattern::resolve`] before use.

use std::path::{Component, Path, PathBuf};

use wildmatch::WildMatch;

/// One filesystem pattern from a worker declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPattern {
    raw: String,
    path: PathBuf,
    glob: Option<String>,
}

fn is_glob(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// `*` in wildmatch already crosses `/`, so `**` segments collapse to one `*`
/// (which also lets `a/**/b` match `a/b`).
fn normalize_glob(s: &str) -> String {
    let mut out = s.replace("/**/", "/*");
    if let Some(stripped) = out.strip_suffix("/**") {
        out = format!("{stripped}/*");
    }
    if let Some(stripped) = out.strip_prefix("**/") {
        out = format!("*{stripped}");
    }
    while out.contains("**") {
        out = out.replace("**", "*");
    }
    out
}

impl WatchPattern {
    /// Parses a raw pattern. Returns `None` for an empty string.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self::build(trimmed.to_string(), PathBuf::from(trimmed)))
    }

    fn build(raw: String, path: PathBuf) -> Self {
        let text = path.to_string_lossy();
        let glob = is_glob(&text).then(|| normalize_glob(&text));
        Self { raw, path, glob }
    }

    /// Anchors a relative pattern at `base`. Absolute patterns are returned unchanged.
    pub fn resolve(&self, base: &Path) -> Self {
        if self.path.is_absolute() {
            return self.clone();
        }
        Self::build(self.raw.clone(), base.join(&self.path))
    }

    /// The pattern as declared.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_glob(&self) -> bool {
        self.glob.is_some()
    }

    /// Longest leading part of the pattern without wildcards; the directory to watch.
    pub fn root(&self) -> PathBuf {
        if self.glob.is_none() {
            return self.path.clone();
        }
        let mut root = PathBuf::new();
        for component in self.path.components() {
            if let Component::Normal(part) = component {
                if is_glob(&part.to_string_lossy()) {
                    break;
                }
            }
            root.push(component.as_os_str());
        }
        root
    }

    /// Returns true if a change to `path` concerns this pattern.
    pub fn matches(&self, path: &Path) -> bool {
        match &self.glob {
            Some(glob) => WildMatch::new(glob).matches(&path.to_string_lossy()),
            None => path.starts_with(&self.path),
        }
    }
}
