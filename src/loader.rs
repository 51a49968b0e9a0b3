// src/loader.rs

//! Loading of unit files and their drop-ins.
//!
//! Units are read non-recursively from each source directory in precedence
//! order; the first directory to provide a given file name wins. Drop-in
//! `.conf` fragments are collected from every `<candidate>.d` directory,
//! de-duplicated by file name with the most specific directory winning,
//! then merged in alphabetical file-name order — the sort order is an
//! override-precedence property, not a cosmetic one.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::unitfile::UnitFile;

/// Unit file extensions this generator understands
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "container", "volume", "kube", "network", "image", "build", "pod",
];

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Unit loader; owns the cross-directory "seen" set so that earlier
/// directories shadow later same-named files
#[derive(Default)]
pub struct Loader {
    seen: HashSet<OsString>,
}

impl Loader {
    pub fn new() -> Loader {
        Loader::default()
    }

    /// Load all supported units from one directory (non-recursive).
    ///
    /// Parse failures are returned alongside the successfully loaded
    /// units; the caller logs them and continues the batch.
    pub fn load_units_from_dir(&mut self, dir: &Path) -> (Vec<UnitFile>, Vec<Error>) {
        let mut units = Vec::new();
        let mut errors = Vec::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    errors.push(Error::Io(e));
                }
                return (units, errors);
            }
        };

        let mut names: Vec<OsString> = Vec::new();
        for entry in entries.flatten() {
            names.push(entry.file_name());
        }
        // Deterministic load order independent of readdir order
        names.sort();

        for name in names {
            let path = dir.join(&name);
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !is_supported_extension(&ext) {
                continue;
            }
            if !path.is_file() {
                continue;
            }
            if self.seen.contains(&name) {
                debug!(
                    "{} already loaded from an earlier directory, skipping {}",
                    name.to_string_lossy(),
                    path.display()
                );
                continue;
            }
            self.seen.insert(name);

            debug!("loading {}", path.display());
            match UnitFile::load(&path) {
                Ok(unit) => units.push(unit),
                Err(e) => errors.push(e),
            }
        }

        (units, errors)
    }
}

/// Merge all applicable drop-ins into `unit`.
///
/// Candidates are every source directory crossed with every drop-in
/// directory name for this unit. Iteration runs most-specific-first so
/// that a same-named `.conf` in a more specific directory shadows the
/// broader one; the surviving set is merged in alphabetical order.
pub fn load_unit_dropins(unit: &mut UnitFile, source_dirs: &[PathBuf]) -> Result<()> {
    let mut dropins: HashMap<String, PathBuf> = HashMap::new();

    let mut candidates = unit.dropin_paths();
    candidates.reverse();

    for candidate in &candidates {
        for source_dir in source_dirs {
            let dropin_dir = source_dir.join(candidate);
            let entries = match std::fs::read_dir(&dropin_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("cannot read {}: {}", dropin_dir.display(), e);
                    }
                    continue;
                }
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".conf") {
                    continue;
                }
                // First occurrence is the most specific; keep it
                dropins
                    .entry(name)
                    .or_insert_with(|| dropin_dir.join(entry.file_name()));
            }
        }
    }

    let mut names: Vec<&String> = dropins.keys().collect();
    names.sort();

    for name in names {
        let path = &dropins[name];
        debug!("merging drop-in {} into {}", path.display(), unit.filename);
        let dropin = UnitFile::load(path)?;
        unit.merge(&dropin);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_loads_only_supported_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("a.container"), "[Container]\nImage=x\n");
        write(&tmp.path().join("b.volume"), "[Volume]\n");
        write(&tmp.path().join("c.service"), "[Service]\n");
        write(&tmp.path().join("README"), "not a unit\n");

        let mut loader = Loader::new();
        let (units, errors) = loader.load_units_from_dir(tmp.path());
        assert!(errors.is_empty());
        let names: Vec<&str> = units.iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, ["a.container", "b.volume"]);
    }

    #[test]
    fn test_first_directory_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        write(&first.join("a.container"), "[Container]\nImage=first\n");
        write(&second.join("a.container"), "[Container]\nImage=second\n");
        write(&second.join("b.container"), "[Container]\nImage=b\n");

        let mut loader = Loader::new();
        let (mut units, _) = loader.load_units_from_dir(&first);
        let (more, _) = loader.load_units_from_dir(&second);
        units.extend(more);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].lookup("Container", "Image").unwrap(), "first");
    }

    #[test]
    fn test_parse_error_does_not_stop_batch() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("bad.container"), "Image=no group\n");
        write(&tmp.path().join("good.container"), "[Container]\nImage=x\n");

        let mut loader = Loader::new();
        let (units, errors) = loader.load_units_from_dir(tmp.path());
        assert_eq!(units.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(units[0].filename, "good.container");
    }

    #[test]
    fn test_dropins_merge_in_alphabetical_order() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("units");
        write(&source.join("demo.container"), "[Container]\nImage=base\n");
        write(
            &source.join("demo.container.d/10-a.conf"),
            "[Container]\nImage=from-a\n",
        );
        write(
            &source.join("demo.container.d/20-b.conf"),
            "[Container]\nImage=from-b\n",
        );

        let mut unit = UnitFile::load(&source.join("demo.container")).unwrap();
        load_unit_dropins(&mut unit, &[source]).unwrap();
        // 20-b merges after 10-a, so its value wins
        assert_eq!(unit.lookup("Container", "Image").unwrap(), "from-b");
    }

    #[test]
    fn test_specific_dropin_shadows_broad_same_name() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("units");
        write(&source.join("demo.container"), "[Container]\nImage=base\n");
        write(
            &source.join("container.d/override.conf"),
            "[Container]\nImage=broad\n",
        );
        write(
            &source.join("demo.container.d/override.conf"),
            "[Container]\nImage=specific\n",
        );

        let mut unit = UnitFile::load(&source.join("demo.container")).unwrap();
        load_unit_dropins(&mut unit, &[source]).unwrap();
        assert_eq!(unit.lookup("Container", "Image").unwrap(), "specific");
    }

    #[test]
    fn test_template_instance_uses_template_dropins() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("units");
        write(&source.join("web@prod.container"), "[Container]\nImage=base\n");
        write(
            &source.join("web@.container.d/common.conf"),
            "[Container]\nLabel=tier=web\n",
        );

        let mut unit = UnitFile::load(&source.join("web@prod.container")).unwrap();
        load_unit_dropins(&mut unit, &[source]).unwrap();
        assert_eq!(unit.lookup("Container", "Label").unwrap(), "tier=web");
    }
}
