//! Instance identity advertised by the webhook self-test.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePublicKey;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::{Result, RouterError};

const SEED_LEN: usize = 32;

pub struct InstanceIdentity {
    public_key_der: Vec<u8>,
    encoded_public_key: String,
}

impl InstanceIdentity {
    /// Fresh identity that lives only as long as the process.
    pub fn generate() -> Result<Self> {
        Self::from_seed(&rand::random::<[u8; SEED_LEN]>())
    }

    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Result<Self> {
        let verifying_key = SigningKey::from_bytes(seed).verifying_key();
        let der = verifying_key
            .to_public_key_der()
            .map_err(|e| RouterError::IdentityError(format!("Failed to encode public key: {}", e)))?;
        let public_key_der = der.as_bytes().to_vec();
        let encoded_public_key = STANDARD.encode(&public_key_der);
        Ok(Self {
            public_key_der,
            encoded_public_key,
        })
    }

    /// Loads the hex-encoded seed at `path`, creating it if missing.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let bytes = hex::decode(contents.trim()).map_err(|e| {
                RouterError::IdentityError(format!("Invalid key file '{}': {}", path.display(), e))
            })?;
            let seed: [u8; SEED_LEN] = bytes.try_into().map_err(|_| {
                RouterError::IdentityError(format!(
                    "Key file '{}' must hold {} bytes",
                    path.display(),
                    SEED_LEN
                ))
            })?;
            info!("Loaded instance identity from {:?}", path);
            return Self::from_seed(&seed);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let seed = rand::random::<[u8; SEED_LEN]>();
        write_seed_file(path, &seed)?;
        info!("Created instance identity at {:?}", path);
        Self::from_seed(&seed)
    }

    /// DER-encoded SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Base64 of [`Self::public_key_der`], as sent in the identity header.
    pub fn encoded_public_key(&self) -> &str {
        &self.encoded_public_key
    }
}

/// The seed is private key material: owner read/write only on unix.
fn write_seed_file(path: &Path, seed: &[u8; SEED_LEN]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(hex::encode(seed).as_bytes())?;
    file.sync_all()?;
    Ok(())
}
