use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::ViewPaths;

/// View search paths with a cached template listing.
///
/// The listing holds template names relative to their search path, without
/// format and handler extensions (`people/_form.html.erb` is `people/_form`).
/// [`reload`](ViewPaths::reload) rescans every directory.
#[derive(Debug)]
pub struct TemplatePaths {
    dirs: Vec<PathBuf>,
    templates: RwLock<Vec<(String, PathBuf)>>,
    scans: AtomicU64,
}

impl TemplatePaths {
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let paths = Self {
            dirs,
            templates: RwLock::new(Vec::new()),
            scans: AtomicU64::new(0),
        };
        paths.rescan();
        paths
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Template names in search-path order.
    #[must_use]
    pub fn templates(&self) -> Vec<String> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// File for a template name; earlier search paths win.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, path)| path.clone())
    }

    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Acquire)
    }

    fn rescan(&self) {
        let mut found = Vec::new();
        for dir in &self.dirs {
            for entry in WalkDir::new(dir).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Skipping unreadable view path entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(name) = template_name(dir, entry.path()) {
                    found.push((name, entry.path().to_path_buf()));
                }
            }
        }
        let count = found.len();
        *self.templates.write().unwrap_or_else(PoisonError::into_inner) = found;
        self.scans.fetch_add(1, Ordering::AcqRel);
        debug!(templates = count, dirs = self.dirs.len(), "View paths scanned");
    }
}

impl ViewPaths for TemplatePaths {
    fn reload(&self) -> anyhow::Result<()> {
        self.rescan();
        Ok(())
    }
}

/// `root/people/_form.html.erb` → `people/_form`
fn template_name(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let last = parts.pop()?;
    let stem = last.split('.').next().filter(|s| !s.is_empty())?;
    parts.push(stem.to_string());
    Some(parts.join("/"))
}
