//! Versioned template storage
//!
//! Templates live in one flat directory as `<slug>-v<version>.html`, next to
//! an optional `<slug>-v<version>.json` holding the sample data they were
//! saved with. Each save of a slug takes the next free version, starting at 1.
//! Saved files are never modified or deleted.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

static VERSIONED_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)-v(\d+)\.html$").unwrap());

/// Turn a user-supplied template name into a filesystem-safe slug.
///
/// Lowercases, turns whitespace runs into `-`, drops everything outside
/// `[a-z0-9-_]`, collapses repeated dashes and trims dashes from both ends.
/// The result may be empty, which callers treat as an invalid name.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();

    let mut slug = String::with_capacity(lowered.len());
    let mut pending_dash = false;
    for c in lowered.chars() {
        let c = if c.is_ascii_whitespace() { '-' } else { c };
        if c == '-' {
            pending_dash = true;
            continue;
        }
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            continue;
        }
        if pending_dash {
            slug.push('-');
            pending_dash = false;
        }
        slug.push(c);
    }

    slug.trim_start_matches('-').to_string()
}

pub fn versioned_filename(slug: &str, version: u32) -> String {
    format!("{}-v{}.html", slug, version)
}

fn data_filename(slug: &str, version: u32) -> String {
    format!("{}-v{}.json", slug, version)
}

/// Split `report-v3.html` into `("report", 3)`.
fn parse_versioned(filename: &str) -> Option<(&str, u32)> {
    let captures = VERSIONED_FILE.captures(filename)?;
    let name = captures.get(1)?.as_str();
    let version = captures.get(2)?.as_str().parse().ok()?;
    Some((name, version))
}

/// How concurrent saves of the same slug pick their version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationPolicy {
    /// Read the directory and write without coordination. Two simultaneous
    /// saves of one slug can pick the same version; the later write wins.
    #[default]
    Unsynchronized,
    /// Serialize allocate-then-write per slug within this process.
    PerSlugLock,
}

/// One stored template, as reported by [`TemplateStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    pub name: String,
    pub filename: String,
    /// 0 for files that do not follow the versioned naming scheme
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedTemplate {
    pub filename: String,
    pub version: u32,
}

/// Flat directory of versioned templates.
#[derive(Debug)]
pub struct TemplateStore {
    dir: PathBuf,
    policy: AllocationPolicy,
    slug_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: AllocationPolicy::default(),
            slug_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// The version the next save of `slug` would get.
    ///
    /// A missing directory counts as empty.
    pub fn next_version(&self, slug: &str) -> Result<u32> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(Error::List(e)),
        };

        let mut highest: u32 = 0;
        for entry in entries {
            let entry = entry.map_err(Error::List)?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((name, version)) = parse_versioned(file_name) {
                if name == slug {
                    highest = highest.max(version);
                }
            }
        }

        highest
            .checked_add(1)
            .ok_or_else(|| Error::VersionsExhausted(slug.to_string()))
    }

    /// Write `content` as version `version` of `slug` and return its filename.
    ///
    /// `data`, when non-empty, is written to the companion `.json` file. A
    /// failure there is logged and does not fail the save.
    pub fn save(&self, slug: &str, version: u32, content: &str, data: Option<&str>) -> Result<String> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let filename = versioned_filename(slug, version);
        let path = self.dir.join(&filename);
        fs::write(&path, content).map_err(|source| Error::Write { path, source })?;

        if let Some(data) = data.filter(|d| !d.is_empty()) {
            let data_path = self.dir.join(data_filename(slug, version));
            if let Err(e) = fs::write(&data_path, data) {
                warn!(path = %data_path.display(), error = %e, "Failed to write template data file");
            }
        }

        info!(filename = %filename, version, "Saved template");
        Ok(filename)
    }

    /// Allocate the next version of `slug` and save `content` under it.
    pub fn save_next(&self, slug: &str, content: &str, data: Option<&str>) -> Result<SavedTemplate> {
        let lock = match self.policy {
            AllocationPolicy::Unsynchronized => None,
            AllocationPolicy::PerSlugLock => Some(self.slug_lock(slug)),
        };
        let _guard = lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        let version = self.next_version(slug)?;
        let filename = self.save(slug, version, content, data)?;
        Ok(SavedTemplate { filename, version })
    }

    fn slug_lock(&self, slug: &str) -> Arc<Mutex<()>> {
        let mut locks = self.slug_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(slug.to_string()).or_default().clone()
    }

    /// Every `.html` file in the directory, by name ascending and then
    /// newest version first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<TemplateInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::List(e)),
        };

        let mut templates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Error::List)?;
            if entry.file_type().map_err(Error::List)?.is_dir() {
                continue;
            }
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            let Some(stem) = filename.strip_suffix(".html") else {
                continue;
            };

            let (name, version) = match parse_versioned(&filename) {
                Some((name, version)) => (name.to_string(), version),
                None => (stem.to_string(), 0),
            };
            templates.push(TemplateInfo {
                name,
                filename,
                version,
            });
        }

        templates.sort_by(|a, b| a.name.cmp(&b.name).then(b.version.cmp(&a.version)));
        Ok(templates)
    }

    /// Read a stored file by its bare filename.
    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        if !is_plain_filename(filename) {
            return Err(Error::InvalidFilename(filename.to_string()));
        }
        fs::read(self.dir.join(filename)).map_err(Error::Read)
    }
}

/// A single visible path component: no separators, no `..`, not hidden.
fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\', '\0'])
}
