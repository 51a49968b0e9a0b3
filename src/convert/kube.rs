// src/convert/kube.rs

//! `.kube` unit conversion.
//!
//! `podman kube play` manages the pod lifecycle itself, so the service
//! is `Type=notify` with `--service-container=true` carrying sd-notify,
//! and `ExecStopPost` runs `kube down`.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "AutoUpdate",
    "ConfigMap",
    "ExitCodePropagation",
    "LogDriver",
    "Network",
    "PodmanArgs",
    "PublishPort",
    "RemapGid",
    "RemapUid",
    "RemapUidSize",
    "RemapUsers",
    "SetWorkingDirectory",
    "UserNS",
    "Yaml",
];

pub fn convert(kube: &UnitFile, names: &ResourceNames, is_user: bool) -> Result<UnitFile> {
    check_for_unknown_keys(kube, KUBE_GROUP, SUPPORTED_KEYS)?;

    let unit_name = kube.filename.clone();
    let invalid = |key: &str, msg: String| Error::InvalidValue {
        unit: unit_name.clone(),
        key: key.to_string(),
        msg,
    };

    let yaml = kube
        .lookup(KUBE_GROUP, "Yaml")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingKey {
            unit: unit_name.clone(),
            key: "Yaml".to_string(),
        })?;

    let own_service = service_name(&kube.filename, "");
    let mut service = start_service(kube, KUBE_GROUP, X_KUBE_GROUP, &own_service);

    match service.lookup(SERVICE_GROUP, "KillMode").as_deref() {
        None | Some("") => service.set(SERVICE_GROUP, "KillMode", "mixed"),
        Some("mixed") | Some("control-group") => {}
        Some(other) => {
            return Err(invalid("KillMode", format!("invalid kill mode {:?}", other)));
        }
    }

    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.add(SERVICE_GROUP, "Environment", "PODMAN_SYSTEMD_UNIT=%n");
    service.set(SERVICE_GROUP, "Type", "notify");
    service.set(SERVICE_GROUP, "NotifyAccess", "all");
    service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");

    match kube
        .lookup(KUBE_GROUP, "SetWorkingDirectory")
        .unwrap_or_default()
        .as_str()
    {
        "" => {}
        "yaml" => {
            let yaml_dir = std::path::Path::new(&yaml)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| {
                    invalid(
                        "SetWorkingDirectory",
                        format!("Yaml path {:?} has no parent directory", yaml),
                    )
                })?;
            service.set(
                SERVICE_GROUP,
                "WorkingDirectory",
                &yaml_dir.display().to_string(),
            );
        }
        other => {
            return Err(invalid(
                "SetWorkingDirectory",
                format!("unsupported value {:?}, expected \"yaml\"", other),
            ));
        }
    }

    let mut podman = PodmanCmdline::new_command("kube");
    podman.add("play");
    podman.add("--replace");
    podman.add("--service-container=true");

    if let Some(ecp) = kube.lookup(KUBE_GROUP, "ExitCodePropagation") {
        if !ecp.is_empty() {
            podman.add(format!("--service-exit-code-propagation={}", ecp));
        }
    }

    let log_driver = kube
        .lookup(KUBE_GROUP, "LogDriver")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "passthrough".to_string());
    podman.add("--log-driver").add(log_driver);

    for network in kube.lookup_all(KUBE_GROUP, "Network") {
        let resolved = resolve_network_ref(kube, &mut service, names, &network)?;
        podman.add(format!("--network={}", resolved));
    }

    for config_map in kube.lookup_all(KUBE_GROUP, "ConfigMap") {
        if !config_map.starts_with('/') {
            return Err(invalid(
                "ConfigMap",
                format!("path {:?} is not absolute", config_map),
            ));
        }
        podman.add(format!("--configmap={}", config_map));
    }

    for port in kube.lookup_all(KUBE_GROUP, "PublishPort") {
        add_publish_port(kube, &mut podman, &port)?;
    }

    // UserNS= takes the plain podman syntax; the Remap* keys are the
    // older declarative spelling, and the two are mutually exclusive
    let userns = kube.lookup(KUBE_GROUP, "UserNS").unwrap_or_default();
    if !userns.is_empty() {
        if kube.lookup(KUBE_GROUP, "RemapUsers").is_some() {
            return Err(invalid(
                "UserNS",
                "UserNS= and RemapUsers= are mutually exclusive".to_string(),
            ));
        }
        podman.add(format!("--userns={}", userns));
    } else {
        handle_user_remap(kube, KUBE_GROUP, &mut podman, is_user)?;
    }

    if let Some(auto_update) = kube.lookup(KUBE_GROUP, "AutoUpdate") {
        if !auto_update.is_empty() {
            for value in auto_update.split_whitespace() {
                match value.split_once('/') {
                    Some((ctr, policy)) => podman.add(format!(
                        "--annotation=io.containers.autoupdate/{}={}",
                        ctr, policy
                    )),
                    None => podman
                        .add(format!("--annotation=io.containers.autoupdate={}", value)),
                };
            }
        }
    }

    podman.add_slice(&kube.lookup_all_args(KUBE_GROUP, "PodmanArgs")?);
    podman.add(yaml.clone());

    service.set(SERVICE_GROUP, "ExecStart", &podman.to_exec_start());

    let mut down = PodmanCmdline::new_command("kube");
    down.add("down");
    down.add(yaml);
    service.add(SERVICE_GROUP, "ExecStopPost", &down.to_exec_start());

    Ok(service)
}
