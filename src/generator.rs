// src/generator.rs

//! Generator orchestration: discover, load, convert, write, enable.
//!
//! Per-unit failures are collected and logged but never abort the batch;
//! only structural problems (unusable output directory) surface as an
//! error to the caller.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::convert::{self, ResourceNames, PodInfo, PodsInfoMap, INSTALL_GROUP};
use crate::error::{Error, Result};
use crate::loader::{self, Loader};
use crate::paths;
use crate::signature::SignatureVerifier;
use crate::unitfile::UnitFile;

pub struct Generator {
    pub output_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub is_user: bool,
    pub list_images: Option<PathBuf>,
    pub verifier: Option<SignatureVerifier>,
}

/// Conversion order: producers of resource names convert before their
/// consumers, pods last so every member container has registered.
fn conversion_order(filename: &str) -> u8 {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some("image") => 1,
        Some("volume") | Some("network") => 2,
        Some("build") => 3,
        Some("container") | Some("kube") => 4,
        Some("pod") => 5,
        _ => u8::MAX,
    }
}

impl Generator {
    pub fn run(&self) -> Result<()> {
        let dirs = paths::unit_search_dirs(self.is_user)?;
        self.run_with_dirs(&dirs)
    }

    pub fn run_with_dirs(&self, dirs: &[PathBuf]) -> Result<()> {
        let mut errors: Vec<Error> = Vec::new();

        let mut loader = Loader::new();
        let mut units: Vec<UnitFile> = Vec::new();
        for dir in dirs {
            let (loaded, load_errors) = loader.load_units_from_dir(dir);
            units.extend(loaded);
            errors.extend(load_errors);
        }

        if let Some(verifier) = &self.verifier {
            units.retain(|unit| match &unit.path {
                Some(path) => match verifier.verify(path) {
                    Ok(()) => true,
                    Err(err) => {
                        errors.push(err);
                        false
                    }
                },
                None => true,
            });
        }

        let mut kept: Vec<UnitFile> = Vec::new();
        for mut unit in units {
            match loader::load_unit_dropins(&mut unit, dirs) {
                Ok(()) => kept.push(unit),
                Err(err) => errors.push(err.in_unit(&unit.filename)),
            }
        }
        let mut units = kept;

        if units.is_empty() {
            debug!("no unit files found");
            report_errors(&errors);
            return Ok(());
        }

        units.sort_by(|a, b| {
            conversion_order(&a.filename)
                .cmp(&conversion_order(&b.filename))
                .then_with(|| a.filename.cmp(&b.filename))
        });

        let mut names = ResourceNames::new();
        let mut pods = PodsInfoMap::new();
        for unit in &units {
            if unit.filename.ends_with(".build") {
                // Pre-filled so .volume units can reference the built
                // image before the .build unit itself converts
                if let Ok(tag) = convert::build::image_name(unit) {
                    names.insert(unit.filename.clone(), tag);
                }
            } else if unit.filename.ends_with(".pod") {
                pods.insert(
                    unit.filename.clone(),
                    PodInfo {
                        service_name: convert::pod::pod_service_name(unit),
                        containers: Vec::new(),
                    },
                );
            }
        }

        let mut services: Vec<UnitFile> = Vec::new();
        let mut images: Vec<String> = Vec::new();
        for unit in &units {
            let converted = self.convert_unit(unit, &mut names, &mut pods, &mut images);
            match converted {
                Ok(service) => services.push(service),
                Err(err) => errors.push(err.in_unit(&unit.filename)),
            }
        }

        if let Some(list_path) = &self.list_images {
            let mut out = images.join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            fs::write(list_path, out)?;
            info!(path = %list_path.display(), count = images.len(), "wrote image list");
        }

        // An image listing without an output directory only inventories
        if self.dry_run || self.output_dir.is_some() {
            for service in &mut services {
                if let Err(err) = self.emit_service(service) {
                    match err {
                        // A broken output directory is not a per-unit problem
                        Error::Io(_) => {
                            report_errors(&errors);
                            return Err(err);
                        }
                        other => errors.push(other),
                    }
                }
            }
        }

        report_errors(&errors);
        Ok(())
    }

    fn convert_unit(
        &self,
        unit: &UnitFile,
        names: &mut ResourceNames,
        pods: &mut PodsInfoMap,
        images: &mut Vec<String>,
    ) -> Result<UnitFile> {
        let ext = Path::new(&unit.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        debug!(unit = %unit.filename, "converting");
        match ext {
            "container" => {
                if let Some(image) = unit.lookup(convert::CONTAINER_GROUP, "Image") {
                    images.push(image);
                }
                convert::container::convert(unit, names, pods, self.is_user)
            }
            "volume" => {
                let (service, name) = convert::volume::convert(unit, names)?;
                names.insert(unit.filename.clone(), name);
                Ok(service)
            }
            "network" => {
                let (service, name) = convert::network::convert(unit)?;
                names.insert(unit.filename.clone(), name);
                Ok(service)
            }
            "image" => {
                if let Some(image) = unit.lookup(convert::IMAGE_GROUP, "Image") {
                    images.push(image);
                }
                let (service, name) = convert::image::convert(unit)?;
                names.insert(unit.filename.clone(), name);
                Ok(service)
            }
            "build" => {
                let (service, name) = convert::build::convert(unit, names)?;
                images.push(name.clone());
                names.insert(unit.filename.clone(), name);
                Ok(service)
            }
            "kube" => convert::kube::convert(unit, names, self.is_user),
            "pod" => convert::pod::convert(unit, names, pods),
            other => Err(Error::Parse {
                path: unit.filename.clone(),
                line: 0,
                msg: format!("unsupported unit extension {:?}", other),
            }),
        }
    }

    /// Write (or print) one generated service and its enablement links.
    fn emit_service(&self, service: &mut UnitFile) -> Result<()> {
        if self.dry_run {
            service.remove_group(INSTALL_GROUP);
            let mut text = String::new();
            service.write_to(&mut text);
            println!("---{}---\n{}", service.filename, text);
            return Ok(());
        }

        let out_dir = self.output_dir.as_deref().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                ErrorKind::NotFound,
                "no output directory",
            ))
        })?;
        fs::create_dir_all(out_dir)?;

        self.enable_service(service, out_dir)?;
        service.remove_group(INSTALL_GROUP);

        let mut text = String::new();
        service.write_to(&mut text);
        let path = out_dir.join(&service.filename);
        fs::write(&path, text)?;
        info!(service = %path.display(), "wrote service");
        Ok(())
    }

    /// Translate the `[Install]` group into generator-time symlinks,
    /// which is the only enablement mechanism available to generators.
    fn enable_service(&self, service: &UnitFile, out_dir: &Path) -> Result<()> {
        let aliases = service.lookup_all(INSTALL_GROUP, "Alias");
        let wanted_by = service.lookup_all(INSTALL_GROUP, "WantedBy");
        let required_by = service.lookup_all(INSTALL_GROUP, "RequiredBy");
        if aliases.is_empty() && wanted_by.is_empty() && required_by.is_empty() {
            return Ok(());
        }

        // A plain template cannot be linked; DefaultInstance= names the
        // instance to enable
        let mut link_name = service.filename.clone();
        if let Some((base, instance)) = service.template_parts() {
            if instance.is_empty() {
                let default_instance = service
                    .lookup(INSTALL_GROUP, "DefaultInstance")
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| Error::InvalidValue {
                        unit: service.filename.clone(),
                        key: "DefaultInstance".to_string(),
                        msg: "template unit enablement requires DefaultInstance=".to_string(),
                    })?;
                let (stem, ext) = base.split_at(base.rfind('.').unwrap_or(base.len()));
                link_name = format!("{}{}{}", stem, default_instance, ext);
            }
        }

        for alias in aliases {
            symlink(Path::new(&service.filename), &out_dir.join(&alias))?;
        }
        for (targets, subdir) in [(wanted_by, "wants"), (required_by, "requires")] {
            for target in targets {
                let link_dir = out_dir.join(format!("{}.{}", target, subdir));
                fs::create_dir_all(&link_dir)?;
                symlink(
                    &Path::new("..").join(&service.filename),
                    &link_dir.join(&link_name),
                )?;
            }
        }
        Ok(())
    }
}

fn symlink(target: &Path, location: &Path) -> Result<()> {
    debug!(link = %location.display(), target = %target.display(), "symlink");
    match std::os::unix::fs::symlink(target, location) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(Error::Io(err)),
    }
}

fn report_errors(errors: &[Error]) {
    if errors.is_empty() {
        return;
    }
    let mut report = format!("{} unit(s) failed:", errors.len());
    for err in errors {
        report.push_str("\n  ");
        report.push_str(&err.to_string());
    }
    warn!("{}", report);
}
