// src/convert/network.rs

//! `.network` unit conversion.
//!
//! Oneshot service creating the named network with `--ignore`, kept
//! active via `RemainAfterExit` for ordering.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "DisableDNS",
    "Driver",
    "Gateway",
    "IPAMDriver",
    "IPRange",
    "IPv6",
    "Internal",
    "Label",
    "NetworkName",
    "Options",
    "PodmanArgs",
    "Subnet",
];

/// Returns the generated service unit and the podman network name.
pub fn convert(network: &UnitFile) -> Result<(UnitFile, String)> {
    check_for_unknown_keys(network, NETWORK_GROUP, SUPPORTED_KEYS)?;

    let unit_name = network.filename.clone();
    let invalid = |key: &str, msg: String| Error::InvalidValue {
        unit: unit_name.clone(),
        key: key.to_string(),
        msg,
    };

    let network_name = network
        .lookup(NETWORK_GROUP, "NetworkName")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default_resource_name(&network.filename));

    let own_service = service_name(&network.filename, "-network");
    let mut service = start_service(network, NETWORK_GROUP, X_NETWORK_GROUP, &own_service);
    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.set(SERVICE_GROUP, "Type", "oneshot");
    service.set(SERVICE_GROUP, "RemainAfterExit", "yes");
    service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");

    let mut podman = PodmanCmdline::new_command("network");
    podman.add("create");
    podman.add("--ignore");

    if network.lookup_boolean_with_default(NETWORK_GROUP, "DisableDNS", false) {
        podman.add("--disable-dns");
    }
    if network.lookup_boolean_with_default(NETWORK_GROUP, "Internal", false) {
        podman.add("--internal");
    }
    if network.lookup_boolean_with_default(NETWORK_GROUP, "IPv6", false) {
        podman.add("--ipv6");
    }

    if let Some(driver) = network.lookup(NETWORK_GROUP, "Driver") {
        if !driver.is_empty() {
            podman.add(format!("--driver={}", driver));
        }
    }
    if let Some(ipam) = network.lookup(NETWORK_GROUP, "IPAMDriver") {
        if !ipam.is_empty() {
            podman.add(format!("--ipam-driver={}", ipam));
        }
    }

    let subnets = network.lookup_all(NETWORK_GROUP, "Subnet");
    let gateways = network.lookup_all(NETWORK_GROUP, "Gateway");
    let ip_ranges = network.lookup_all(NETWORK_GROUP, "IPRange");
    if subnets.is_empty() && (!gateways.is_empty() || !ip_ranges.is_empty()) {
        return Err(invalid(
            "Subnet",
            "Gateway= and IPRange= require at least one Subnet=".to_string(),
        ));
    }
    if gateways.len() > subnets.len() || ip_ranges.len() > subnets.len() {
        return Err(invalid(
            "Subnet",
            "more Gateway= or IPRange= values than Subnet= values".to_string(),
        ));
    }
    for subnet in &subnets {
        podman.add(format!("--subnet={}", subnet));
    }
    for gateway in &gateways {
        podman.add(format!("--gateway={}", gateway));
    }
    for ip_range in &ip_ranges {
        podman.add(format!("--ip-range={}", ip_range));
    }

    if let Some(options) = network.lookup(NETWORK_GROUP, "Options") {
        if !options.is_empty() {
            podman.add(format!("--opt={}", options));
        }
    }

    let labels = lookup_all_key_val(network, NETWORK_GROUP, "Label")?;
    podman.add_keys("--label", &labels);

    podman.add_slice(&network.lookup_all_args(NETWORK_GROUP, "PodmanArgs")?);
    podman.add(network_name.clone());

    service.set(SERVICE_GROUP, "ExecStart", &podman.to_exec_start());
    Ok((service, network_name))
}
