// src/convert/build.rs

//! `.build` unit conversion.
//!
//! Oneshot service running `podman build` with a forced `--tag` so the
//! produced image has the name other units resolved the `.build`
//! reference to. Volume sources may reference `.volume` units, which is
//! why build names are prefilled before volumes convert.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "Annotation",
    "Arch",
    "AuthFile",
    "DNS",
    "DNSOption",
    "DNSSearch",
    "Environment",
    "File",
    "ForceRM",
    "ImageTag",
    "Label",
    "Network",
    "PodmanArgs",
    "Pull",
    "Secret",
    "SecurityLabelDisable",
    "SecurityLabelType",
    "SetWorkingDirectory",
    "TLSVerify",
    "Target",
    "Variant",
    "Volume",
];

/// The image name a `.build` unit produces, needed before its own
/// conversion so `.volume` units can reference it.
pub fn image_name(build: &UnitFile) -> Result<String> {
    let tags = build.lookup_all(BUILD_GROUP, "ImageTag");
    match tags.first() {
        Some(tag) if !tag.is_empty() => Ok(tag.clone()),
        _ => Err(Error::MissingKey {
            unit: build.filename.clone(),
            key: "ImageTag".to_string(),
        }),
    }
}

pub fn convert(build: &UnitFile, names: &ResourceNames) -> Result<(UnitFile, String)> {
    check_for_unknown_keys(build, BUILD_GROUP, SUPPORTED_KEYS)?;

    let unit_name = build.filename.clone();
    let invalid = |key: &str, msg: String| Error::InvalidValue {
        unit: unit_name.clone(),
        key: key.to_string(),
        msg,
    };

    let resolved_name = image_name(build)?;

    let own_service = service_name(&build.filename, "-build");
    let mut service = start_service(build, BUILD_GROUP, X_BUILD_GROUP, &own_service);
    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.set(SERVICE_GROUP, "Type", "oneshot");
    service.set(SERVICE_GROUP, "RemainAfterExit", "yes");
    service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");

    let mut podman = PodmanCmdline::new_command("build");
    for tag in build.lookup_all(BUILD_GROUP, "ImageTag") {
        if !tag.is_empty() {
            podman.add(format!("--tag={}", tag));
        }
    }

    for (key, flag) in [
        ("Arch", "--arch"),
        ("AuthFile", "--authfile"),
        ("Target", "--target"),
        ("Variant", "--variant"),
        ("Pull", "--pull"),
    ] {
        if let Some(value) = build.lookup(BUILD_GROUP, key) {
            if !value.is_empty() {
                podman.add(format!("{}={}", flag, value));
            }
        }
    }
    if let Some(tls_verify) = build.lookup_boolean(BUILD_GROUP, "TLSVerify") {
        podman.add_bool("--tls-verify", tls_verify);
    }
    if build.lookup_boolean_with_default(BUILD_GROUP, "ForceRM", true) {
        podman.add("--force-rm");
    }

    for dns in build.lookup_all(BUILD_GROUP, "DNS") {
        podman.add(format!("--dns={}", dns));
    }
    for opt in build.lookup_all(BUILD_GROUP, "DNSOption") {
        podman.add(format!("--dns-option={}", opt));
    }
    for search in build.lookup_all(BUILD_GROUP, "DNSSearch") {
        podman.add(format!("--dns-search={}", search));
    }

    for network in build.lookup_all(BUILD_GROUP, "Network") {
        let resolved = resolve_network_ref(build, &mut service, names, &network)?;
        podman.add(format!("--network={}", resolved));
    }

    if build.lookup_boolean_with_default(BUILD_GROUP, "SecurityLabelDisable", false) {
        podman.add("--security-opt=label=disable");
    }
    if let Some(label_type) = build.lookup(BUILD_GROUP, "SecurityLabelType") {
        if !label_type.is_empty() {
            podman.add(format!("--security-opt=label=type:{}", label_type));
        }
    }

    for secret in build.lookup_all(BUILD_GROUP, "Secret") {
        podman.add(format!("--secret={}", secret));
    }
    for volume in build.lookup_all(BUILD_GROUP, "Volume") {
        add_volume_arg(build, &mut service, names, &mut podman, &volume)?;
    }

    let env = lookup_all_key_val(build, BUILD_GROUP, "Environment")?;
    podman.add_keys("--env", &env);
    let labels = lookup_all_key_val(build, BUILD_GROUP, "Label")?;
    podman.add_keys("--label", &labels);
    let annotations = lookup_all_key_val(build, BUILD_GROUP, "Annotation")?;
    podman.add_keys("--annotation", &annotations);

    podman.add_slice(&build.lookup_all_args(BUILD_GROUP, "PodmanArgs")?);

    // The context: either an explicit working directory or the
    // directory of the Containerfile named by File=
    let file = build.lookup(BUILD_GROUP, "File").unwrap_or_default();
    let workdir = build
        .lookup(BUILD_GROUP, "SetWorkingDirectory")
        .unwrap_or_default();
    match (file.as_str(), workdir.as_str()) {
        ("", "") => {
            return Err(invalid(
                "File",
                "neither File= nor SetWorkingDirectory= is set".to_string(),
            ));
        }
        (file, "") => {
            if !file.starts_with('/') && !file.contains("://") {
                return Err(invalid(
                    "File",
                    format!("relative path {:?} requires SetWorkingDirectory=", file),
                ));
            }
            podman.add(format!("--file={}", file));
            if let Some(parent) = std::path::Path::new(file).parent() {
                service.set(SERVICE_GROUP, "WorkingDirectory", &parent.display().to_string());
            }
        }
        (file, workdir) => {
            if !file.is_empty() {
                podman.add(format!("--file={}", file));
            }
            service.set(SERVICE_GROUP, "WorkingDirectory", workdir);
        }
    }
    podman.add(".");

    service.set(SERVICE_GROUP, "ExecStart", &podman.to_exec_start());
    Ok((service, resolved_name))
}
