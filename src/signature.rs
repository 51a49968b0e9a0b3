// src/signature.rs

//! Optional ed25519 verification of unit sources.
//!
//! When the `QUADLET_PUBKEY_DIR` environment variable names a directory,
//! every discovered unit file must carry a detached `<path>.sig` (a raw
//! 64-byte ed25519 signature over the file contents) that verifies
//! against one of the DER `SubjectPublicKeyInfo` keys in that directory.
//! Without the variable set, verification is skipped entirely.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const PUBKEY_DIR_ENV: &str = "QUADLET_PUBKEY_DIR";

pub struct SignatureVerifier {
    keys: Vec<(PathBuf, VerifyingKey)>,
}

impl SignatureVerifier {
    /// Load trusted keys as configured in the environment. `None` means
    /// verification is not enabled.
    pub fn from_env() -> Result<Option<SignatureVerifier>> {
        match std::env::var(PUBKEY_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Ok(Some(Self::load(Path::new(&dir))?)),
            _ => Ok(None),
        }
    }

    /// Load every `*.pub` / `*.der` key in `dir`.
    pub fn load(dir: &Path) -> Result<SignatureVerifier> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "pub" && ext != "der" {
                continue;
            }
            let der = fs::read(&path)?;
            let key = VerifyingKey::from_public_key_der(&der).map_err(|e| Error::Signature {
                path: path.clone(),
                msg: format!("invalid public key: {}", e),
            })?;
            debug!(key = %path.display(), "loaded trusted key");
            keys.push((path, key));
        }
        if keys.is_empty() {
            warn!(dir = %dir.display(), "key directory contains no usable keys");
        }
        Ok(SignatureVerifier { keys })
    }

    /// Check the detached signature of `path`; accepts if any trusted
    /// key verifies it.
    pub fn verify(&self, path: &Path) -> Result<()> {
        let reject = |msg: String| Error::Signature {
            path: path.to_path_buf(),
            msg,
        };

        let mut sig_path = path.as_os_str().to_os_string();
        sig_path.push(".sig");
        let sig_bytes = fs::read(&sig_path)
            .map_err(|_| reject("missing detached signature".to_string()))?;
        let sig_bytes: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| reject(format!("signature is {} bytes, expected 64", sig_bytes.len())))?;
        let signature = Signature::from_bytes(&sig_bytes);

        let content = fs::read(path)?;
        for (key_path, key) in &self.keys {
            if key.verify(&content, &signature).is_ok() {
                debug!(unit = %path.display(), key = %key_path.display(), "signature accepted");
                return Ok(());
            }
        }
        Err(reject("no trusted key verifies the signature".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePublicKey;
    use ed25519_dalek::{Signer, SigningKey};

    fn write_key(dir: &Path, name: &str, key: &SigningKey) {
        let der = key.verifying_key().to_public_key_der().unwrap();
        fs::write(dir.join(name), der.as_bytes()).unwrap();
    }

    #[test]
    fn test_accepts_valid_signature() {
        let tmp = tempfile::tempdir().unwrap();
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        write_key(tmp.path(), "trusted.der", &signing);

        let unit = tmp.path().join("demo.container");
        fs::write(&unit, "[Container]\nImage=x\n").unwrap();
        let sig = signing.sign(&fs::read(&unit).unwrap());
        fs::write(tmp.path().join("demo.container.sig"), sig.to_bytes()).unwrap();

        let verifier = SignatureVerifier::load(tmp.path()).unwrap();
        verifier.verify(&unit).unwrap();
    }

    #[test]
    fn test_rejects_missing_signature() {
        let tmp = tempfile::tempdir().unwrap();
        write_key(tmp.path(), "trusted.der", &SigningKey::from_bytes(&[7u8; 32]));
        let unit = tmp.path().join("demo.container");
        fs::write(&unit, "[Container]\nImage=x\n").unwrap();

        let verifier = SignatureVerifier::load(tmp.path()).unwrap();
        let err = verifier.verify(&unit).unwrap_err();
        assert!(matches!(err, Error::Signature { .. }));
    }

    #[test]
    fn test_rejects_wrong_key() {
        let tmp = tempfile::tempdir().unwrap();
        write_key(tmp.path(), "trusted.der", &SigningKey::from_bytes(&[7u8; 32]));

        let unit = tmp.path().join("demo.container");
        fs::write(&unit, "[Container]\nImage=x\n").unwrap();
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let sig = other.sign(&fs::read(&unit).unwrap());
        fs::write(tmp.path().join("demo.container.sig"), sig.to_bytes()).unwrap();

        let verifier = SignatureVerifier::load(tmp.path()).unwrap();
        assert!(verifier.verify(&unit).is_err());
    }

    #[test]
    fn test_rejects_truncated_signature() {
        let tmp = tempfile::tempdir().unwrap();
        write_key(tmp.path(), "trusted.der", &SigningKey::from_bytes(&[7u8; 32]));
        let unit = tmp.path().join("demo.container");
        fs::write(&unit, "[Container]\nImage=x\n").unwrap();
        fs::write(tmp.path().join("demo.container.sig"), [0u8; 10]).unwrap();

        let verifier = SignatureVerifier::load(tmp.path()).unwrap();
        let err = verifier.verify(&unit).unwrap_err();
        assert!(matches!(err, Error::Signature { msg, .. } if msg.contains("10 bytes")));
    }
}
