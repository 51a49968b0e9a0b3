// src/convert/volume.rs

//! `.volume` unit conversion.
//!
//! The service is a oneshot that creates the named volume if it does not
//! exist yet; `RemainAfterExit=yes` keeps it active so dependent
//! container services can order against it.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "Copy",
    "Device",
    "Driver",
    "Group",
    "Image",
    "Label",
    "Options",
    "PodmanArgs",
    "Type",
    "User",
    "VolumeName",
];

/// Returns the generated service unit together with the podman volume
/// name registered for other units to reference.
pub fn convert(volume: &UnitFile, names: &ResourceNames) -> Result<(UnitFile, String)> {
    check_for_unknown_keys(volume, VOLUME_GROUP, SUPPORTED_KEYS)?;

    let unit_name = volume.filename.clone();
    let invalid = |key: &str, msg: String| Error::InvalidValue {
        unit: unit_name.clone(),
        key: key.to_string(),
        msg,
    };

    let volume_name = volume
        .lookup(VOLUME_GROUP, "VolumeName")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default_resource_name(&volume.filename));

    let own_service = service_name(&volume.filename, "-volume");
    let mut service = start_service(volume, VOLUME_GROUP, X_VOLUME_GROUP, &own_service);
    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.set(SERVICE_GROUP, "Type", "oneshot");
    service.set(SERVICE_GROUP, "RemainAfterExit", "yes");
    service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");

    let mut podman = PodmanCmdline::new_command("volume");
    podman.add("create");
    podman.add("--ignore");

    let driver = volume.lookup(VOLUME_GROUP, "Driver").unwrap_or_default();
    if !driver.is_empty() {
        podman.add(format!("--driver={}", driver));
    }

    if driver == "image" {
        let image = volume
            .lookup(VOLUME_GROUP, "Image")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::MissingKey {
                unit: unit_name.clone(),
                key: "Image".to_string(),
            })?;
        let resolved = resolve_image_ref(volume, &mut service, names, &image)?;
        podman.add(format!("--opt=image={}", resolved));
    } else if volume.lookup(VOLUME_GROUP, "Image").is_some() {
        return Err(invalid("Image", "Image= requires Driver=image".to_string()));
    }

    let mut opts: Vec<String> = Vec::new();
    if let Some(device) = volume.lookup(VOLUME_GROUP, "Device") {
        if !device.is_empty() {
            opts.push(format!("device={}", device));
        }
    }
    if let Some(fs_type) = volume.lookup(VOLUME_GROUP, "Type") {
        if !fs_type.is_empty() {
            opts.push(format!("type={}", fs_type));
        }
    }

    let mut mount_opts: Vec<String> = Vec::new();
    if let Some(options) = volume.lookup(VOLUME_GROUP, "Options") {
        if !options.is_empty() {
            mount_opts.push(options);
        }
    }
    if let Some(uid) = volume.lookup_uid(VOLUME_GROUP, "User")? {
        mount_opts.push(format!("uid={}", uid));
    }
    if let Some(gid) = volume.lookup_gid(VOLUME_GROUP, "Group")? {
        mount_opts.push(format!("gid={}", gid));
    }
    if !mount_opts.is_empty() {
        opts.push(format!("o={}", mount_opts.join(",")));
    }
    for opt in opts {
        podman.add(format!("--opt={}", opt));
    }

    if let Some(copy) = volume.lookup_boolean(VOLUME_GROUP, "Copy") {
        podman.add(if copy { "--opt=copy" } else { "--opt=nocopy" });
    }

    let labels = lookup_all_key_val(volume, VOLUME_GROUP, "Label")?;
    podman.add_keys("--label", &labels);

    podman.add_slice(&volume.lookup_all_args(VOLUME_GROUP, "PodmanArgs")?);
    podman.add(volume_name.clone());

    service.set(SERVICE_GROUP, "ExecStart", &podman.to_exec_start());
    Ok((service, volume_name))
}
