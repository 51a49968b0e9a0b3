// src/convert/pod.rs

//! `.pod` unit conversion.
//!
//! The pod infra process is not a child of the service, so the service
//! is `Type=forking` with a pid file, and create/start/stop/rm hang off
//! the standard Exec hooks. Member container services bind to the pod
//! service; the pod in turn wants and orders before its members so
//! starting the pod brings the containers up.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "Network",
    "PodName",
    "PodmanArgs",
    "PublishPort",
    "Volume",
];

/// The service name a `.pod` unit generates, needed up front so member
/// containers can reference it before the pod itself converts.
pub fn pod_service_name(pod: &UnitFile) -> String {
    service_name(&pod.filename, "-pod")
}

pub fn convert(pod: &UnitFile, names: &ResourceNames, pods: &PodsInfoMap) -> Result<UnitFile> {
    check_for_unknown_keys(pod, POD_GROUP, SUPPORTED_KEYS)?;

    let pod_name = pod
        .lookup(POD_GROUP, "PodName")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default_resource_name(&pod.filename));

    let own_service = pod_service_name(pod);
    let mut service = start_service(pod, POD_GROUP, X_POD_GROUP, &own_service);
    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.add(SERVICE_GROUP, "Environment", "PODMAN_SYSTEMD_UNIT=%n");
    service.set(SERVICE_GROUP, "Type", "forking");
    service.set(SERVICE_GROUP, "Restart", "on-failure");
    service.set(SERVICE_GROUP, "PIDFile", "%t/%N.pid");
    service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");

    // Starting the pod pulls its members up with it
    if let Some(info) = pods.get(&pod.filename) {
        for container_service in &info.containers {
            service.add(UNIT_GROUP, "Wants", container_service);
            service.add(UNIT_GROUP, "Before", container_service);
        }
    }

    let mut create = PodmanCmdline::new_command("pod");
    create.add("create");
    create.add("--infra-conmon-pidfile=%t/%N.pid");
    create.add("--pod-id-file=%t/%N.pod-id");
    create.add("--exit-policy=stop");
    create.add("--replace");
    create.add(format!("--name={}", pod_name));

    for network in pod.lookup_all(POD_GROUP, "Network") {
        let resolved = resolve_network_ref(pod, &mut service, names, &network)?;
        create.add(format!("--network={}", resolved));
    }
    for port in pod.lookup_all(POD_GROUP, "PublishPort") {
        add_publish_port(pod, &mut create, &port)?;
    }
    for volume in pod.lookup_all(POD_GROUP, "Volume") {
        add_volume_arg(pod, &mut service, names, &mut create, &volume)?;
    }
    create.add_slice(&pod.lookup_all_args(POD_GROUP, "PodmanArgs")?);
    service.add(SERVICE_GROUP, "ExecStartPre", &create.to_exec_start());

    let mut start = PodmanCmdline::new_command("pod");
    start.add("start");
    start.add("--pod-id-file=%t/%N.pod-id");
    service.add(SERVICE_GROUP, "ExecStart", &start.to_exec_start());

    let mut stop = PodmanCmdline::new_command("pod");
    stop.add("stop");
    stop.add("--pod-id-file=%t/%N.pod-id");
    stop.add("--ignore");
    stop.add("--time=10");
    service.add(SERVICE_GROUP, "ExecStop", &stop.to_exec_start());

    let mut rm = PodmanCmdline::new_command("pod");
    rm.add("rm");
    rm.add("--pod-id-file=%t/%N.pod-id");
    rm.add("--ignore");
    rm.add("--force");
    service.add(SERVICE_GROUP, "ExecStopPost", &rm.to_exec_start());

    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_text(text: &str) -> Result<UnitFile> {
        let unit = UnitFile::parse(text, "app.pod").unwrap();
        convert(&unit, &ResourceNames::new(), &PodsInfoMap::new())
    }

    #[test]
    fn test_basic_pod() {
        let service = convert_text("[Pod]\n").unwrap();
        assert_eq!(service.filename, "app-pod.service");
        assert_eq!(service.lookup(SERVICE_GROUP, "Type").unwrap(), "forking");
        let create = service.lookup(SERVICE_GROUP, "ExecStartPre").unwrap();
        assert!(create.contains("pod create"), "create: {}", create);
        assert!(create.contains("--name=systemd-app"), "create: {}", create);
        assert!(create.contains("--exit-policy=stop"), "create: {}", create);
        let start = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(start.contains("pod start --pod-id-file=%t/%N.pod-id"), "start: {}", start);
        let stop = service.lookup(SERVICE_GROUP, "ExecStop").unwrap();
        assert!(stop.contains("pod stop"), "stop: {}", stop);
        let rm = service.lookup(SERVICE_GROUP, "ExecStopPost").unwrap();
        assert!(rm.contains("pod rm"), "rm: {}", rm);
    }

    #[test]
    fn test_pod_wants_registered_containers() {
        let unit = UnitFile::parse("[Pod]\n", "app.pod").unwrap();
        let mut pods = PodsInfoMap::new();
        pods.insert(
            "app.pod".to_string(),
            PodInfo {
                service_name: "app-pod.service".to_string(),
                containers: vec!["web.service".to_string(), "db.service".to_string()],
            },
        );
        let service = convert(&unit, &ResourceNames::new(), &pods).unwrap();
        let wants = service.lookup_all(UNIT_GROUP, "Wants");
        assert_eq!(wants, ["web.service", "db.service"]);
        let before = service.lookup_all(UNIT_GROUP, "Before");
        assert_eq!(before, ["web.service", "db.service"]);
    }

    #[test]
    fn test_pod_name_override() {
        let service = convert_text("[Pod]\nPodName=frontend\n").unwrap();
        let create = service.lookup(SERVICE_GROUP, "ExecStartPre").unwrap();
        assert!(create.contains("--name=frontend"), "create: {}", create);
    }

    #[test]
    fn test_pod_publish_port() {
        let service = convert_text("[Pod]\nPublishPort=8080:80\n").unwrap();
        let create = service.lookup(SERVICE_GROUP, "ExecStartPre").unwrap();
        assert!(create.contains("-p=8080:80"), "create: {}", create);
    }

    #[test]
    fn test_unknown_key_fails() {
        let err = convert_text("[Pod]\nImage=x\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedKey { key, .. } if key == "Image"));
    }
}
