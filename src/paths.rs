// src/paths.rs

//! Discovery of unit source directories.
//!
//! Produces the ordered, symlink-resolved, de-duplicated list of
//! directories the loader reads units from. A `QUADLET_UNIT_DIRS`
//! override short-circuits the built-in search path entirely; the
//! built-in path differs between rootful and rootless invocations.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Environment override: colon-separated absolute directories
pub const UNIT_DIRS_ENV: &str = "QUADLET_UNIT_DIRS";

const ADMIN_DIR: &str = "/etc/containers/systemd";
const DISTRO_DIR: &str = "/usr/share/containers/systemd";
const TRANSIENT_DIR: &str = "/run/containers/systemd";

type DirFilter<'a> = &'a dyn Fn(&Path) -> bool;

/// Ordered unit source directories for this invocation
pub fn unit_search_dirs(rootless: bool) -> Result<Vec<PathBuf>> {
    let override_dirs = env::var(UNIT_DIRS_ENV).ok();
    resolve_unit_dirs(override_dirs.as_deref(), rootless)
}

fn resolve_unit_dirs(override_dirs: Option<&str>, rootless: bool) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    // An env override replaces the whole built-in search path
    if let Some(value) = override_dirs {
        for dir in value.split(':').filter(|d| !d.is_empty()) {
            if !dir.starts_with('/') {
                return Err(Error::RelativeUnitDir(dir.to_string()));
            }
            append_subpaths(&mut dirs, &mut seen, Path::new(dir), None);
        }
        return Ok(dirs);
    }

    if rootless {
        if let Some(runtime) = env::var_os("XDG_RUNTIME_DIR") {
            append_subpaths(
                &mut dirs,
                &mut seen,
                &PathBuf::from(runtime).join("containers/systemd"),
                None,
            );
        }
        let config_home = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir);
        if let Some(config) = config_home {
            append_subpaths(
                &mut dirs,
                &mut seen,
                &config.join("containers/systemd"),
                None,
            );
        }
        let uid = nix::unistd::Uid::effective().as_raw().to_string();
        append_subpaths(
            &mut dirs,
            &mut seen,
            &Path::new(ADMIN_DIR).join("users").join(&uid),
            None,
        );
        // The shared per-user tree: skip other users' numeric subtrees
        let own_uid = uid.clone();
        let filter = move |p: &Path| {
            let base = p.file_name().map(|n| n.to_string_lossy().into_owned());
            match base {
                Some(name) if name.chars().all(|c| c.is_ascii_digit()) => name == own_uid,
                _ => true,
            }
        };
        append_subpaths(
            &mut dirs,
            &mut seen,
            &Path::new(ADMIN_DIR).join("users"),
            Some(&filter),
        );
    } else {
        append_subpaths(&mut dirs, &mut seen, Path::new(TRANSIENT_DIR), None);
        let no_users = |p: &Path| p.file_name().map(|n| n != "users").unwrap_or(true);
        append_subpaths(&mut dirs, &mut seen, Path::new(ADMIN_DIR), Some(&no_users));
        append_subpaths(&mut dirs, &mut seen, Path::new(DISTRO_DIR), None);
    }

    Ok(dirs)
}

/// Append `root` and its subdirectories to `dirs`.
///
/// Symlinks are resolved before recording; `*.d` drop-in directories are
/// skipped; `filter` can prune whole subtrees; `seen` guards against
/// symlink cycles and duplicate entries across roots.
fn append_subpaths(
    dirs: &mut Vec<PathBuf>,
    seen: &mut HashSet<PathBuf>,
    root: &Path,
    filter: Option<DirFilter<'_>>,
) {
    let resolved = match root.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            // A missing source dir is normal; anything else is worth a log line
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("skipping unit dir {}: {}", root.display(), e);
            }
            return;
        }
    };

    let walker = WalkDir::new(&resolved)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.depth() > 0 && name.ends_with(".d") {
                return false;
            }
            if let Some(filter) = filter {
                if entry.depth() > 0 && !filter(entry.path()) {
                    return false;
                }
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("error walking {}: {}", resolved.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = match entry.path().canonicalize() {
            Ok(path) => path,
            Err(_) => continue,
        };
        if seen.insert(path.clone()) {
            dirs.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_override_requires_absolute_paths() {
        let result = resolve_unit_dirs(Some("relative/path"), false);
        assert!(matches!(result, Err(Error::RelativeUnitDir(_))));
    }

    #[test]
    fn test_override_replaces_search_path() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();

        let value = format!("{}:{}", a.display(), b.display());
        let dirs = resolve_unit_dirs(Some(&value), false).unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0], a.canonicalize().unwrap());
        assert_eq!(dirs[1], b.canonicalize().unwrap());
    }

    #[test]
    fn test_missing_override_dir_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let value = tmp.path().join("does-not-exist").display().to_string();
        let dirs = resolve_unit_dirs(Some(&value), false).unwrap();
        assert!(dirs.is_empty());
    }

    #[test]
    fn test_subdirectories_included_dropins_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("units");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::create_dir_all(root.join("demo.container.d")).unwrap();

        let value = root.display().to_string();
        let dirs = resolve_unit_dirs(Some(&value), false).unwrap();
        let names: Vec<String> = dirs
            .iter()
            .map(|d| d.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"units".to_string()));
        assert!(names.contains(&"nested".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".d")));
    }

    #[test]
    fn test_duplicate_dirs_recorded_once() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        fs::create_dir_all(&a).unwrap();

        let value = format!("{}:{}", a.display(), a.display());
        let dirs = resolve_unit_dirs(Some(&value), false).unwrap();
        assert_eq!(dirs.len(), 1);
    }

    #[test]
    fn test_symlinked_dir_resolved() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        let link = tmp.path().join("link");
        fs::create_dir_all(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let value = format!("{}:{}", link.display(), real.display());
        let dirs = resolve_unit_dirs(Some(&value), false).unwrap();
        // Both names resolve to the same directory, recorded once
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0], real.canonicalize().unwrap());
    }
}
