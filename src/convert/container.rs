// src/convert/container.rs

//! `.container` unit conversion.
//!
//! Produces a `Type=notify` service whose `ExecStart` runs the container
//! in the foreground of conmon (`--log-driver passthrough`,
//! `--cgroups=split`), with defaults chosen for systemd supervision:
//! no container NAT with the service lifecycle (`--rm`, `--replace`),
//! read-only rootfs with a volatile `/tmp`, init process, dropped
//! capabilities, and no new privileges.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "AddCapability",
    "Annotation",
    "ContainerName",
    "DropCapability",
    "Environment",
    "EnvironmentFile",
    "EnvironmentHost",
    "Exec",
    "ExposeHostPort",
    "Group",
    "IP",
    "IP6",
    "Image",
    "Label",
    "LogDriver",
    "Mount",
    "Network",
    "NoNewPrivileges",
    "Notify",
    "Pod",
    "PodmanArgs",
    "PublishPort",
    "ReadOnly",
    "RemapGid",
    "RemapUid",
    "RemapUidSize",
    "RemapUsers",
    "RunInit",
    "SeccompProfile",
    "SecurityLabelDisable",
    "SecurityLabelType",
    "Timezone",
    "User",
    "VolatileTmp",
    "Volume",
];

pub fn convert(
    container: &UnitFile,
    names: &ResourceNames,
    pods: &mut PodsInfoMap,
    is_user: bool,
) -> Result<UnitFile> {
    check_for_unknown_keys(container, CONTAINER_GROUP, SUPPORTED_KEYS)?;

    let unit_name = container.filename.clone();
    let invalid = |key: &str, msg: String| Error::InvalidValue {
        unit: unit_name.clone(),
        key: key.to_string(),
        msg,
    };

    let image = container
        .lookup(CONTAINER_GROUP, "Image")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingKey {
            unit: unit_name.clone(),
            key: "Image".to_string(),
        })?;

    let own_service = service_name(&container.filename, "");
    let mut service = start_service(container, CONTAINER_GROUP, X_CONTAINER_GROUP, &own_service);

    // One consistent kill behavior: the conmon process must survive
    // podman exiting, so only mixed and control-group are allowed.
    match service.lookup(SERVICE_GROUP, "KillMode").as_deref() {
        None | Some("") => service.set(SERVICE_GROUP, "KillMode", "mixed"),
        Some("mixed") | Some("control-group") => {}
        Some(other) => {
            return Err(invalid("KillMode", format!("invalid kill mode {:?}", other)));
        }
    }

    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.add(SERVICE_GROUP, "Environment", "PODMAN_SYSTEMD_UNIT=%n");

    // Remove the cid file on both ends of the lifecycle; stale ones keep
    // --cidfile from working after an unclean shutdown
    service.add(SERVICE_GROUP, "ExecStartPre", "-rm -f %t/%N.cid");
    service.add(
        SERVICE_GROUP,
        "ExecStopPost",
        &format!("-{} rm -f -i --cidfile=%t/%N.cid", cmdline::PODMAN),
    );
    service.add(SERVICE_GROUP, "ExecStopPost", "-rm -f %t/%N.cid");

    let container_name = container
        .lookup(CONTAINER_GROUP, "ContainerName")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "systemd-%N".to_string());

    let mut podman = PodmanCmdline::new_command("run");
    podman.add(format!("--name={}", container_name));
    podman.add("--cidfile=%t/%N.cid");
    podman.add("--replace");
    podman.add("--rm");
    podman.add("-d");

    let log_driver = container
        .lookup(CONTAINER_GROUP, "LogDriver")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "passthrough".to_string());
    podman.add("--log-driver").add(log_driver);

    // Never pull at service start; that is the .image unit's job
    podman.add("--pull=never");
    podman.add("--runtime").add("/usr/bin/crun");
    podman.add("--cgroups=split");

    // conmon reports ready by default; Notify=true hands sd-notify to
    // the container itself
    let container_notify = container.lookup_boolean_with_default(CONTAINER_GROUP, "Notify", false);
    if container_notify {
        podman.add("--sdnotify=container");
    } else {
        podman.add("--sdnotify=conmon");
    }
    service.set(SERVICE_GROUP, "Type", "notify");
    service.set(SERVICE_GROUP, "NotifyAccess", "all");
    if service.lookup(SERVICE_GROUP, "SyslogIdentifier").is_none() {
        service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");
    }
    service.add(SERVICE_GROUP, "Delegate", "yes");

    if let Some(timezone) = container.lookup(CONTAINER_GROUP, "Timezone") {
        if !timezone.is_empty() {
            podman.add(format!("--tz={}", timezone));
        }
    }

    if container.lookup_boolean_with_default(CONTAINER_GROUP, "RunInit", true) {
        podman.add("--init");
    }

    if container.lookup_boolean_with_default(CONTAINER_GROUP, "NoNewPrivileges", true) {
        podman.add("--security-opt=no-new-privileges");
    }
    if container.lookup_boolean_with_default(CONTAINER_GROUP, "SecurityLabelDisable", false) {
        podman.add("--security-opt=label=disable");
    }
    if let Some(label_type) = container.lookup(CONTAINER_GROUP, "SecurityLabelType") {
        if !label_type.is_empty() {
            podman.add(format!("--security-opt=label=type:{}", label_type));
        }
    }
    if let Some(profile) = container.lookup(CONTAINER_GROUP, "SeccompProfile") {
        if !profile.is_empty() {
            podman.add(format!("--security-opt=seccomp={}", profile));
        }
    }

    // Everything dropped unless listed, then additions layered on top
    let mut drop_caps = container.lookup_all_strv(CONTAINER_GROUP, "DropCapability")?;
    if drop_caps.is_empty() {
        drop_caps.push("all".to_string());
    }
    for cap in drop_caps {
        podman.add(format!("--cap-drop={}", cap.to_ascii_lowercase()));
    }
    for cap in container.lookup_all_strv(CONTAINER_GROUP, "AddCapability")? {
        podman.add(format!("--cap-add={}", cap.to_ascii_lowercase()));
    }

    let read_only = container.lookup_boolean_with_default(CONTAINER_GROUP, "ReadOnly", true);
    if read_only {
        podman.add("--read-only");
    }
    // A writable /tmp even on read-only roots, unless opted out
    if container.lookup_boolean_with_default(CONTAINER_GROUP, "VolatileTmp", true) {
        podman.add("--tmpfs=/tmp:rw,size=512M,mode=1777");
    }

    handle_user_remap(container, CONTAINER_GROUP, &mut podman, is_user)?;

    if let Some(user) = container.lookup(CONTAINER_GROUP, "User") {
        if !user.is_empty() {
            match container.lookup(CONTAINER_GROUP, "Group") {
                Some(group) if !group.is_empty() => {
                    podman.add(format!("--user={}:{}", user, group));
                }
                _ => {
                    podman.add(format!("--user={}", user));
                }
            }
        }
    } else if container.lookup(CONTAINER_GROUP, "Group").is_some() {
        return Err(invalid("Group", "Group= requires User=".to_string()));
    }

    for network in container.lookup_all(CONTAINER_GROUP, "Network") {
        let resolved = resolve_network_ref(container, &mut service, names, &network)?;
        podman.add(format!("--network={}", resolved));
    }
    if let Some(ip) = container.lookup(CONTAINER_GROUP, "IP") {
        if !ip.is_empty() {
            podman.add(format!("--ip={}", ip));
        }
    }
    if let Some(ip6) = container.lookup(CONTAINER_GROUP, "IP6") {
        if !ip6.is_empty() {
            podman.add(format!("--ip6={}", ip6));
        }
    }

    for port in container.lookup_all(CONTAINER_GROUP, "ExposeHostPort") {
        if !is_port_range(&port) {
            return Err(invalid(
                "ExposeHostPort",
                format!("invalid port {:?}", port),
            ));
        }
        podman.add(format!("--expose={}", port));
    }
    for port in container.lookup_all(CONTAINER_GROUP, "PublishPort") {
        add_publish_port(container, &mut podman, &port)?;
    }

    if container.lookup_boolean_with_default(CONTAINER_GROUP, "EnvironmentHost", false) {
        podman.add("--env-host");
    }
    for env_file in container.lookup_all(CONTAINER_GROUP, "EnvironmentFile") {
        podman.add(format!("--env-file={}", env_file));
    }
    let env = lookup_all_key_val(container, CONTAINER_GROUP, "Environment")?;
    podman.add_keys("--env", &env);

    let labels = lookup_all_key_val(container, CONTAINER_GROUP, "Label")?;
    podman.add_keys("--label", &labels);
    let annotations = lookup_all_key_val(container, CONTAINER_GROUP, "Annotation")?;
    podman.add_keys("--annotation", &annotations);

    for volume in container.lookup_all(CONTAINER_GROUP, "Volume") {
        add_volume_arg(container, &mut service, names, &mut podman, &volume)?;
    }
    for mount in container.lookup_all(CONTAINER_GROUP, "Mount") {
        podman.add(format!("--mount={}", mount));
    }

    // Joining a pod: the pod service must exist and outlive us
    if let Some(pod_ref) = container.lookup(CONTAINER_GROUP, "Pod") {
        if !pod_ref.is_empty() {
            if !pod_ref.ends_with(".pod") {
                return Err(invalid(
                    "Pod",
                    format!("{:?} is not a .pod unit reference", pod_ref),
                ));
            }
            let pod = pods.get_mut(&pod_ref).ok_or_else(|| Error::InvalidValue {
                unit: unit_name.clone(),
                key: "Pod".to_string(),
                msg: format!("requested pod unit {} was not found", pod_ref),
            })?;
            podman.add(format!(
                "--pod-id-file=%t/{}.pod-id",
                unit_stem(&pod.service_name)
            ));
            let pod_service = pod.service_name.clone();
            service.add(UNIT_GROUP, "BindsTo", &pod_service);
            service.add(UNIT_GROUP, "Requires", &pod_service);
            service.add(UNIT_GROUP, "After", &pod_service);
            pod.containers.push(own_service.clone());
        }
    }

    podman.add_slice(&container.lookup_all_args(CONTAINER_GROUP, "PodmanArgs")?);

    let resolved_image = resolve_image_ref(container, &mut service, names, &image)?;
    podman.add(resolved_image);

    podman.add_slice(&container.lookup_all_args(CONTAINER_GROUP, "Exec")?);

    service.set(SERVICE_GROUP, "ExecStart", &podman.to_exec_start());
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_text(text: &str) -> Result<UnitFile> {
        let unit = UnitFile::parse(text, "demo.container").unwrap();
        let names = ResourceNames::new();
        let mut pods = PodsInfoMap::new();
        convert(&unit, &names, &mut pods, false)
    }

    #[test]
    fn test_minimal_container() {
        let service = convert_text("[Container]\nImage=quay.io/foo:latest\n").unwrap();
        assert_eq!(service.filename, "demo.service");
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("--replace --rm -d"), "exec: {}", exec);
        assert!(exec.contains("--name=systemd-%N"), "exec: {}", exec);
        assert!(exec.ends_with("quay.io/foo:latest"), "exec: {}", exec);
        assert_eq!(service.lookup(SERVICE_GROUP, "KillMode").unwrap(), "mixed");
        assert_eq!(service.lookup(SERVICE_GROUP, "Type").unwrap(), "notify");
        assert!(service
            .lookup_all(UNIT_GROUP, "RequiresMountsFor")
            .contains(&"%t/containers".to_string()));
        // The semantic group is moved aside, not deleted
        assert!(service.has_group(X_CONTAINER_GROUP));
        assert!(!service.has_group(CONTAINER_GROUP));
    }

    #[test]
    fn test_missing_image_fails() {
        let err = convert_text("[Container]\n").unwrap_err();
        assert!(matches!(err, Error::MissingKey { key, .. } if key == "Image"));
    }

    #[test]
    fn test_unknown_key_fails() {
        let err = convert_text("[Container]\nImage=x\nNoSuchKey=1\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedKey { key, .. } if key == "NoSuchKey"));
    }

    #[test]
    fn test_invalid_kill_mode_fails() {
        let err =
            convert_text("[Container]\nImage=x\n\n[Service]\nKillMode=none\n").unwrap_err();
        assert!(matches!(err, Error::InvalidValue { key, .. } if key == "KillMode"));
    }

    #[test]
    fn test_defaults_can_be_disabled() {
        let on = convert_text("[Container]\nImage=x\n").unwrap();
        let exec = on.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("--init"));
        assert!(exec.contains("--security-opt=no-new-privileges"));
        assert!(exec.contains("--cap-drop=all"));
        assert!(exec.contains("--read-only"));
        assert!(exec.contains("--tmpfs=/tmp:rw,size=512M,mode=1777"));

        let off = convert_text(
            "[Container]\nImage=x\nRunInit=no\nNoNewPrivileges=no\nReadOnly=no\nVolatileTmp=no\nDropCapability=net_admin\n",
        )
        .unwrap();
        let exec = off.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(!exec.contains("--init"));
        assert!(!exec.contains("no-new-privileges"));
        assert!(!exec.contains("--read-only"));
        assert!(!exec.contains("--tmpfs"));
        assert!(exec.contains("--cap-drop=net_admin"));
        assert!(!exec.contains("--cap-drop=all"));
    }

    #[test]
    fn test_environment_sorted_and_deterministic() {
        let text = "[Container]\nImage=x\nEnvironment=Z=26 A=1\nLabel=app=demo\n";
        let first = convert_text(text).unwrap();
        let second = convert_text(text).unwrap();
        let exec = first.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert_eq!(exec, second.lookup(SERVICE_GROUP, "ExecStart").unwrap());
        let a = exec.find("--env=A=1").unwrap();
        let z = exec.find("--env=Z=26").unwrap();
        assert!(a < z, "env flags must be sorted: {}", exec);
    }

    #[test]
    fn test_publish_port() {
        let service =
            convert_text("[Container]\nImage=quay.io/foo:latest\nPublishPort=8080:80\n").unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("-p=8080:80"), "exec: {}", exec);
    }

    #[test]
    fn test_volume_unit_reference() {
        let unit = UnitFile::parse(
            "[Container]\nImage=x\nVolume=data.volume:/var/lib/data:ro\n",
            "demo.container",
        )
        .unwrap();
        let mut names = ResourceNames::new();
        names.insert("data.volume".to_string(), "systemd-data".to_string());
        let mut pods = PodsInfoMap::new();
        let service = convert(&unit, &names, &mut pods, false).unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("-v=systemd-data:/var/lib/data:ro"), "exec: {}", exec);
        assert_eq!(
            service.lookup(UNIT_GROUP, "Requires").unwrap(),
            "data-volume.service"
        );
    }

    #[test]
    fn test_keep_id_rejected_for_system_units() {
        let err = convert_text("[Container]\nImage=x\nRemapUsers=keep-id\n").unwrap_err();
        assert!(matches!(err, Error::InvalidValue { key, .. } if key == "RemapUsers"));

        let unit = UnitFile::parse(
            "[Container]\nImage=x\nRemapUsers=keep-id\n",
            "demo.container",
        )
        .unwrap();
        let names = ResourceNames::new();
        let mut pods = PodsInfoMap::new();
        let service = convert(&unit, &names, &mut pods, true).unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("--userns=keep-id"));
    }

    #[test]
    fn test_manual_remap_merges_ranges() {
        let service = convert_text(
            "[Container]\nImage=x\nRemapUsers=manual\nRemapUid=100-149\nRemapUid=150-199\nRemapGid=100-199\n",
        )
        .unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("--uidmap=0:100:100"), "exec: {}", exec);
        assert!(exec.contains("--gidmap=0:100:100"), "exec: {}", exec);
    }

    #[test]
    fn test_pod_membership() {
        let unit = UnitFile::parse(
            "[Container]\nImage=x\nPod=app.pod\n",
            "demo.container",
        )
        .unwrap();
        let names = ResourceNames::new();
        let mut pods = PodsInfoMap::new();
        pods.insert(
            "app.pod".to_string(),
            PodInfo {
                service_name: "app-pod.service".to_string(),
                containers: Vec::new(),
            },
        );
        let service = convert(&unit, &names, &mut pods, false).unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("--pod-id-file=%t/app-pod.pod-id"), "exec: {}", exec);
        assert_eq!(service.lookup(UNIT_GROUP, "BindsTo").unwrap(), "app-pod.service");
        assert_eq!(pods["app.pod"].containers, ["demo.service"]);
    }

    #[test]
    fn test_exec_and_podman_args_ordering() {
        let service = convert_text(
            "[Container]\nImage=img\nPodmanArgs=--memory=2g\nExec=/bin/sh -c \"echo hi\"\n",
        )
        .unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        let memory = exec.find("--memory=2g").unwrap();
        let image = exec.find(" img ").unwrap();
        let sh = exec.find("/bin/sh").unwrap();
        assert!(memory < image, "podman args before image: {}", exec);
        assert!(image < sh, "exec args after image: {}", exec);
    }
}
