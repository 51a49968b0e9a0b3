// src/convert/mod.rs

//! Per-type conversion of parsed units into systemd services.
//!
//! Each converter validates its unit against a closed key schema,
//! duplicates the source (renaming the semantic group to an ignored
//! `X-` group), and assembles one podman command line that becomes the
//! service's `ExecStart`. Cross-unit naming (volumes, networks, images,
//! builds, pods) flows through [`ResourceNames`] and [`PodsInfoMap`],
//! which the orchestrator owns and populates in dependency order.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::ranges::Ranges;
use crate::unitfile::UnitFile;

pub mod build;
pub mod cmdline;
pub mod container;
pub mod image;
pub mod kube;
pub mod network;
pub mod pod;
pub mod volume;

pub use cmdline::PodmanCmdline;

pub const UNIT_GROUP: &str = "Unit";
pub const SERVICE_GROUP: &str = "Service";
pub const INSTALL_GROUP: &str = "Install";

pub const CONTAINER_GROUP: &str = "Container";
pub const VOLUME_GROUP: &str = "Volume";
pub const NETWORK_GROUP: &str = "Network";
pub const IMAGE_GROUP: &str = "Image";
pub const BUILD_GROUP: &str = "Build";
pub const KUBE_GROUP: &str = "Kube";
pub const POD_GROUP: &str = "Pod";

pub const X_CONTAINER_GROUP: &str = "X-Container";
pub const X_VOLUME_GROUP: &str = "X-Volume";
pub const X_NETWORK_GROUP: &str = "X-Network";
pub const X_IMAGE_GROUP: &str = "X-Image";
pub const X_BUILD_GROUP: &str = "X-Build";
pub const X_KUBE_GROUP: &str = "X-Kube";
pub const X_POD_GROUP: &str = "X-Pod";

/// Map from unit file name (`data.volume`) to the podman resource name
/// the generated service will create (`systemd-data`). Populated as units
/// convert; read-only for referring units converted later.
pub type ResourceNames = HashMap<String, String>;

/// Pod bookkeeping: built once from all `.pod` units, then containers
/// register themselves as they convert.
#[derive(Debug, Clone)]
pub struct PodInfo {
    /// The generated pod service name, e.g. `mypod-pod.service`
    pub service_name: String,
    /// Container service names joining this pod, in conversion order
    pub containers: Vec<String>,
}

/// Keyed by `.pod` unit file name
pub type PodsInfoMap = HashMap<String, PodInfo>;

/// Strip the unit-type extension and append `suffix + ".service"`
pub fn service_name(filename: &str, suffix: &str) -> String {
    let stem = filename
        .rfind('.')
        .map(|dot| &filename[..dot])
        .unwrap_or(filename);
    format!("{}{}.service", stem, suffix)
}

/// File stem without the unit-type extension
pub fn unit_stem(filename: &str) -> &str {
    filename
        .rfind('.')
        .map(|dot| &filename[..dot])
        .unwrap_or(filename)
}

/// Default podman resource name for a unit: `systemd-<stem>`
pub fn default_resource_name(filename: &str) -> String {
    format!("systemd-{}", unit_stem(filename))
}

/// Reject any key in `group` that is not in the fixed allow-list
pub fn check_for_unknown_keys(unit: &UnitFile, group: &str, supported: &[&str]) -> Result<()> {
    for key in unit.keys(group) {
        if !supported.contains(&key.as_str()) {
            return Err(Error::UnsupportedKey {
                unit: unit.filename.clone(),
                group: group.to_string(),
                key,
            });
        }
    }
    Ok(())
}

/// Common conversion prologue: duplicate the source unit, point systemd
/// back at it via `SourcePath=`, and move the semantic group out of the
/// way so systemd ignores it in the generated service.
pub fn start_service(unit: &UnitFile, group: &str, x_group: &str, service: &str) -> UnitFile {
    let mut out = unit.clone();
    out.filename = service.to_string();
    if let Some(path) = &unit.path {
        out.add(UNIT_GROUP, "SourcePath", &path.display().to_string());
    }
    out.rename_group(group, x_group);
    out
}

/// Collect repeated `key=value` assignments into a sorted map (later
/// assignments win); used for `Environment=`, `Label=`, `Annotation=`.
pub fn lookup_all_key_val(
    unit: &UnitFile,
    group: &str,
    key: &str,
) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for word in unit.lookup_all_args(group, key)? {
        let Some((k, v)) = word.split_once('=') else {
            return Err(Error::InvalidValue {
                unit: unit.filename.clone(),
                key: key.to_string(),
                msg: format!("assignment {:?} has no '='", word),
            });
        };
        map.insert(k.to_string(), v.to_string());
    }
    Ok(map)
}

/// Split a port specification on `:`, leaving bracketed IPv6 literals
/// intact: `abc[foo::bar]xyz:foo:bar` → `["abc[foo::bar]xyz", "foo", "bar"]`
pub fn split_ports(ports: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut bracketed = false;
    for c in ports.chars() {
        match c {
            '[' => {
                bracketed = true;
                current.push(c);
            }
            ']' => {
                bracketed = false;
                current.push(c);
            }
            ':' if !bracketed => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// `port`, `start-end`, optionally suffixed `/tcp` or `/udp`
pub fn is_port_range(value: &str) -> bool {
    let value = value
        .strip_suffix("/tcp")
        .or_else(|| value.strip_suffix("/udp"))
        .unwrap_or(value);
    let (start, end) = match value.split_once('-') {
        Some((start, end)) => (start, end),
        None => (value, value),
    };
    !start.is_empty()
        && !end.is_empty()
        && start.chars().all(|c| c.is_ascii_digit())
        && end.chars().all(|c| c.is_ascii_digit())
}

/// Translate one `PublishPort=` value into a `-p=` argument, honoring
/// `ip:hostPort:containerPort`, `hostPort:containerPort`, and bare
/// `containerPort` forms.
pub fn add_publish_port(unit: &UnitFile, podman: &mut PodmanCmdline, value: &str) -> Result<()> {
    let invalid = |msg: String| Error::InvalidValue {
        unit: unit.filename.clone(),
        key: "PublishPort".to_string(),
        msg,
    };

    let parts = split_ports(value);
    let (mut ip, host_port, container_port) = match parts.len() {
        1 => (String::new(), String::new(), parts[0].clone()),
        2 => (String::new(), parts[0].clone(), parts[1].clone()),
        3 => (parts[0].clone(), parts[1].clone(), parts[2].clone()),
        n => {
            return Err(invalid(format!(
                "invalid port format {:?} ({} segments)",
                value, n
            )))
        }
    };

    if ip == "0.0.0.0" {
        ip.clear();
    }
    if !host_port.is_empty() && !is_port_range(&host_port) {
        return Err(invalid(format!("invalid host port {:?}", host_port)));
    }
    if !is_port_range(&container_port) {
        return Err(invalid(format!(
            "invalid container port {:?}",
            container_port
        )));
    }

    let arg = if !ip.is_empty() {
        format!("{}:{}:{}", ip, host_port, container_port)
    } else if !host_port.is_empty() {
        format!("{}:{}", host_port, container_port)
    } else {
        container_port
    };
    podman.add(format!("-p={}", arg));
    Ok(())
}

/// Parse `RemapUid=`/`RemapGid=` words (`N` or `N-M`, inclusive both
/// ends) into a merged range set
pub fn lookup_ranges(unit: &UnitFile, group: &str, key: &str) -> Result<Ranges> {
    let mut ranges = Ranges::empty();
    for word in unit.lookup_all_strv(group, key)? {
        let invalid = |msg: String| Error::InvalidValue {
            unit: unit.filename.clone(),
            key: key.to_string(),
            msg,
        };
        let (start, end) = match word.split_once('-') {
            Some((start, end)) => (start, end),
            None => (word.as_str(), word.as_str()),
        };
        let start: u32 = start
            .parse()
            .map_err(|_| invalid(format!("invalid id range {:?}", word)))?;
        let end: u32 = end
            .parse()
            .map_err(|_| invalid(format!("invalid id range {:?}", word)))?;
        if end < start {
            return Err(invalid(format!("empty id range {:?}", word)));
        }
        ranges.add(start, end - start + 1);
    }
    Ok(ranges)
}

/// Emit `--uidmap`/`--gidmap` triples, assigning container ids
/// sequentially over the merged host ranges
pub fn add_id_maps(podman: &mut PodmanCmdline, flag: &str, ranges: &Ranges) {
    let mut container_id: u32 = 0;
    for range in ranges.ranges() {
        podman.add(format!(
            "{}={}:{}:{}",
            flag, container_id, range.start, range.length
        ));
        container_id += range.length;
    }
}

/// Apply `RemapUsers=` handling to a container-like command line
pub fn handle_user_remap(
    unit: &UnitFile,
    group: &str,
    podman: &mut PodmanCmdline,
    is_user: bool,
) -> Result<()> {
    let mode = unit.lookup(group, "RemapUsers").unwrap_or_default();
    let invalid = |key: &str, msg: String| Error::InvalidValue {
        unit: unit.filename.clone(),
        key: key.to_string(),
        msg,
    };

    match mode.as_str() {
        "" => {
            if !unit.lookup_all(group, "RemapUid").is_empty()
                || !unit.lookup_all(group, "RemapGid").is_empty()
            {
                return Err(invalid(
                    "RemapUid",
                    "RemapUid/RemapGid require RemapUsers=manual".to_string(),
                ));
            }
        }
        "manual" => {
            let uid_ranges = lookup_ranges(unit, group, "RemapUid")?;
            let gid_ranges = lookup_ranges(unit, group, "RemapGid")?;
            add_id_maps(podman, "--uidmap", &uid_ranges);
            add_id_maps(podman, "--gidmap", &gid_ranges);
        }
        "auto" => {
            match unit.lookup_uint32(group, "RemapUidSize") {
                Some(size) => podman.add(format!("--userns=auto:size={}", size)),
                None => podman.add("--userns=auto"),
            };
        }
        "keep-id" => {
            if !is_user {
                return Err(invalid(
                    "RemapUsers",
                    "RemapUsers=keep-id is only supported in user mode".to_string(),
                ));
            }
            podman.add("--userns=keep-id");
        }
        other => {
            return Err(invalid(
                "RemapUsers",
                format!("unsupported value {:?} (expected manual, auto, or keep-id)", other),
            ));
        }
    }
    Ok(())
}

/// Resolve a volume source: absolute paths gain a `RequiresMountsFor=`;
/// `*.volume` references are rewritten to the generated volume name and
/// wired up with `Requires=`/`After=` on the volume service.
pub fn resolve_volume_source(
    unit: &UnitFile,
    service: &mut UnitFile,
    names: &ResourceNames,
    source: &str,
) -> Result<String> {
    if source.starts_with('/') {
        service.add(UNIT_GROUP, "RequiresMountsFor", source);
        return Ok(source.to_string());
    }
    if source.ends_with(".volume") {
        let name = names.get(source).ok_or_else(|| Error::InvalidValue {
            unit: unit.filename.clone(),
            key: "Volume".to_string(),
            msg: format!("requested volume unit {} was not found", source),
        })?;
        let volume_service = service_name(source, "-volume");
        service.add(UNIT_GROUP, "Requires", &volume_service);
        service.add(UNIT_GROUP, "After", &volume_service);
        return Ok(name.clone());
    }
    Ok(source.to_string())
}

/// Resolve a network reference the same way volumes resolve
pub fn resolve_network_ref(
    unit: &UnitFile,
    service: &mut UnitFile,
    names: &ResourceNames,
    value: &str,
) -> Result<String> {
    if !value.ends_with(".network") {
        return Ok(value.to_string());
    }
    let name = names.get(value).ok_or_else(|| Error::InvalidValue {
        unit: unit.filename.clone(),
        key: "Network".to_string(),
        msg: format!("requested network unit {} was not found", value),
    })?;
    let network_service = service_name(value, "-network");
    service.add(UNIT_GROUP, "Requires", &network_service);
    service.add(UNIT_GROUP, "After", &network_service);
    Ok(name.clone())
}

/// Resolve an image reference: `*.image` and `*.build` names map to the
/// resource registered by the corresponding generated service.
pub fn resolve_image_ref(
    unit: &UnitFile,
    service: &mut UnitFile,
    names: &ResourceNames,
    value: &str,
) -> Result<String> {
    let suffix = if value.ends_with(".image") {
        "-image"
    } else if value.ends_with(".build") {
        "-build"
    } else {
        return Ok(value.to_string());
    };
    let name = names.get(value).ok_or_else(|| Error::InvalidValue {
        unit: unit.filename.clone(),
        key: "Image".to_string(),
        msg: format!("requested image unit {} was not found", value),
    })?;
    let image_service = service_name(value, suffix);
    service.add(UNIT_GROUP, "Requires", &image_service);
    service.add(UNIT_GROUP, "After", &image_service);
    Ok(name.clone())
}

/// Translate one `Volume=` value (`SRC:DST[:OPTS]`, or bare `DST` for an
/// anonymous volume) into a `-v=` argument
pub fn add_volume_arg(
    unit: &UnitFile,
    service: &mut UnitFile,
    names: &ResourceNames,
    podman: &mut PodmanCmdline,
    value: &str,
) -> Result<()> {
    let parts: Vec<&str> = value.splitn(3, ':').collect();
    let (source, dest, options) = match parts.as_slice() {
        [dest] => (None, *dest, None),
        [source, dest] => (Some(*source), *dest, None),
        [source, dest, options] => (Some(*source), *dest, Some(*options)),
        _ => unreachable!(),
    };

    let mut arg = String::new();
    if let Some(source) = source {
        arg.push_str(&resolve_volume_source(unit, service, names, source)?);
        arg.push(':');
    }
    arg.push_str(dest);
    if let Some(options) = options {
        arg.push(':');
        arg.push_str(options);
    }
    podman.add(format!("-v={}", arg));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ports_brackets() {
        assert_eq!(
            split_ports("abc[foo::bar]xyz:foo:bar"),
            ["abc[foo::bar]xyz", "foo", "bar"]
        );
        assert_eq!(split_ports("8080:80"), ["8080", "80"]);
        assert_eq!(split_ports("80"), ["80"]);
        assert_eq!(split_ports("[::1]:100:200"), ["[::1]", "100", "200"]);
    }

    #[test]
    fn test_is_port_range() {
        assert!(is_port_range("80"));
        assert!(is_port_range("80-90"));
        assert!(is_port_range("80/tcp"));
        assert!(is_port_range("80-90/udp"));
        assert!(!is_port_range(""));
        assert!(!is_port_range("http"));
        assert!(!is_port_range("80-"));
        assert!(!is_port_range("-90"));
    }

    #[test]
    fn test_service_name_derivation() {
        assert_eq!(service_name("demo.container", ""), "demo.service");
        assert_eq!(service_name("data.volume", "-volume"), "data-volume.service");
        assert_eq!(default_resource_name("data.volume"), "systemd-data");
    }

    #[test]
    fn test_check_for_unknown_keys() {
        let unit = UnitFile::parse("[Volume]\nLabel=a=b\nBogus=1\n", "x.volume").unwrap();
        let err = check_for_unknown_keys(&unit, VOLUME_GROUP, &["Label"]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKey { key, .. } if key == "Bogus"));
    }

    #[test]
    fn test_lookup_all_key_val_sorted_last_wins() {
        let unit = UnitFile::parse(
            "[Container]\nEnvironment=B=2 A=1\nEnvironment=A=override\n",
            "x.container",
        )
        .unwrap();
        let map = lookup_all_key_val(&unit, CONTAINER_GROUP, "Environment").unwrap();
        let pairs: Vec<(&str, &str)> = map
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(pairs, [("A", "override"), ("B", "2")]);
    }

    #[test]
    fn test_lookup_ranges_inclusive() {
        let unit = UnitFile::parse(
            "[Container]\nRemapUid=100-199 500\n",
            "x.container",
        )
        .unwrap();
        let ranges = lookup_ranges(&unit, CONTAINER_GROUP, "RemapUid").unwrap();
        assert_eq!(ranges.ranges().len(), 2);
        assert_eq!(ranges.ranges()[0].start, 100);
        assert_eq!(ranges.ranges()[0].length, 100);
        assert_eq!(ranges.ranges()[1].start, 500);
        assert_eq!(ranges.ranges()[1].length, 1);
    }

    #[test]
    fn test_add_publish_port_forms() {
        let unit = UnitFile::parse("[Container]\n", "x.container").unwrap();
        let mut podman = PodmanCmdline::new_command("run");
        add_publish_port(&unit, &mut podman, "8080:80").unwrap();
        add_publish_port(&unit, &mut podman, "80").unwrap();
        add_publish_port(&unit, &mut podman, "127.0.0.1:81:82").unwrap();
        add_publish_port(&unit, &mut podman, "0.0.0.0:83:84").unwrap();
        let args = podman.args();
        assert_eq!(&args[args.len() - 4..], &["-p=8080:80", "-p=80", "-p=127.0.0.1:81:82", "-p=83:84"]);

        assert!(add_publish_port(&unit, &mut podman, "no:such:port:spec").is_err());
        assert!(add_publish_port(&unit, &mut podman, "http:80").is_err());
    }

    #[test]
    fn test_resolve_volume_source_path_and_unit() {
        let unit = UnitFile::parse("[Container]\n", "x.container").unwrap();
        let mut service = UnitFile::new("x.service");
        let mut names = ResourceNames::new();
        names.insert("data.volume".to_string(), "systemd-data".to_string());

        let path = resolve_volume_source(&unit, &mut service, &names, "/srv/data").unwrap();
        assert_eq!(path, "/srv/data");
        assert_eq!(
            service.lookup(UNIT_GROUP, "RequiresMountsFor").unwrap(),
            "/srv/data"
        );

        let named = resolve_volume_source(&unit, &mut service, &names, "data.volume").unwrap();
        assert_eq!(named, "systemd-data");
        assert_eq!(
            service.lookup(UNIT_GROUP, "Requires").unwrap(),
            "data-volume.service"
        );

        assert!(resolve_volume_source(&unit, &mut service, &names, "missing.volume").is_err());
    }
}
