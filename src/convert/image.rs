// src/convert/image.rs

//! `.image` unit conversion.
//!
//! Oneshot service that pulls the referenced image ahead of any
//! container service depending on it.

use super::*;
use crate::unitfile::UnitFile;

pub const SUPPORTED_KEYS: &[&str] = &[
    "AllTags",
    "Arch",
    "AuthFile",
    "CertDir",
    "Creds",
    "DecryptionKey",
    "Image",
    "ImageTag",
    "OS",
    "PodmanArgs",
    "Policy",
    "TLSVerify",
    "Variant",
];

/// Returns the generated service unit and the image reference other
/// units resolve `foo.image` to.
pub fn convert(image: &UnitFile) -> Result<(UnitFile, String)> {
    check_for_unknown_keys(image, IMAGE_GROUP, SUPPORTED_KEYS)?;

    let unit_name = image.filename.clone();
    let image_ref = image
        .lookup(IMAGE_GROUP, "Image")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingKey {
            unit: unit_name.clone(),
            key: "Image".to_string(),
        })?;

    // ImageTag= overrides the name other units see, for the case where
    // the pull spec and the local tag differ
    let resolved_name = image
        .lookup(IMAGE_GROUP, "ImageTag")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| image_ref.clone());

    let own_service = service_name(&image.filename, "-image");
    let mut service = start_service(image, IMAGE_GROUP, X_IMAGE_GROUP, &own_service);
    service.add(UNIT_GROUP, "RequiresMountsFor", "%t/containers");
    service.set(SERVICE_GROUP, "Type", "oneshot");
    service.set(SERVICE_GROUP, "RemainAfterExit", "yes");
    service.set(SERVICE_GROUP, "SyslogIdentifier", "%N");

    let mut podman = PodmanCmdline::new_command("image");
    podman.add("pull");

    for (key, flag) in [
        ("Arch", "--arch"),
        ("AuthFile", "--authfile"),
        ("CertDir", "--cert-dir"),
        ("Creds", "--creds"),
        ("DecryptionKey", "--decryption-key"),
        ("OS", "--os"),
        ("Policy", "--policy"),
        ("Variant", "--variant"),
    ] {
        if let Some(value) = image.lookup(IMAGE_GROUP, key) {
            if !value.is_empty() {
                podman.add(format!("{}={}", flag, value));
            }
        }
    }
    if let Some(all_tags) = image.lookup_boolean(IMAGE_GROUP, "AllTags") {
        podman.add_bool("--all-tags", all_tags);
    }
    if let Some(tls_verify) = image.lookup_boolean(IMAGE_GROUP, "TLSVerify") {
        podman.add_bool("--tls-verify", tls_verify);
    }

    podman.add_slice(&image.lookup_all_args(IMAGE_GROUP, "PodmanArgs")?);
    podman.add(image_ref);

    service.set(SERVICE_GROUP, "ExecStart", &podman.to_exec_start());
    Ok((service, resolved_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_text(text: &str) -> Result<(UnitFile, String)> {
        let unit = UnitFile::parse(text, "base.image").unwrap();
        convert(&unit)
    }

    #[test]
    fn test_basic_image() {
        let (service, name) = convert_text("[Image]\nImage=quay.io/base:latest\n").unwrap();
        assert_eq!(service.filename, "base-image.service");
        assert_eq!(name, "quay.io/base:latest");
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("image pull"), "exec: {}", exec);
        assert!(exec.ends_with("quay.io/base:latest"), "exec: {}", exec);
    }

    #[test]
    fn test_missing_image_fails() {
        let err = convert_text("[Image]\n").unwrap_err();
        assert!(matches!(err, Error::MissingKey { key, .. } if key == "Image"));
    }

    #[test]
    fn test_image_tag_overrides_resolved_name() {
        let (_, name) =
            convert_text("[Image]\nImage=quay.io/base:latest\nImageTag=localhost/base\n").unwrap();
        assert_eq!(name, "localhost/base");
    }

    #[test]
    fn test_pull_options() {
        let (service, _) = convert_text(
            "[Image]\nImage=quay.io/base\nTLSVerify=false\nArch=arm64\nAllTags=yes\n",
        )
        .unwrap();
        let exec = service.lookup(SERVICE_GROUP, "ExecStart").unwrap();
        assert!(exec.contains("--tls-verify=false"), "exec: {}", exec);
        assert!(exec.contains("--arch=arm64"), "exec: {}", exec);
        assert!(exec.contains("--all-tags"), "exec: {}", exec);
    }
}
