use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::fs;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
/// Marks a sealed value in the persisted registry document.
const SEALED_PREFIX: &str = "enc1:";

/// Key protecting credentials at rest. Lives next to the registry as a
/// 0600 file and never leaves the data dir.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreKey(Vec<u8>);

impl StoreKey {
    pub fn load_or_generate(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("store.key");
        if path.exists() {
            let bytes =
                fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
            if bytes.len() != KEY_LEN {
                return Err(anyhow!("Invalid store key length in {:?}", path));
            }
            return Ok(StoreKey(bytes));
        }

        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        fs::write(&path, key).with_context(|| format!("Failed to write {:?}", path))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(StoreKey(key.to_vec()))
    }
}

/// Encrypt a credential for storage: AES-GCM, fresh nonce prepended,
/// hex-encoded behind a version prefix.
pub fn seal(key: &StoreKey, value: &str) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, value.as_bytes())
        .map_err(|e| anyhow!("Encryption failure: {}", e))?;

    let mut buf = nonce_bytes.to_vec();
    buf.extend(ciphertext);
    Ok(format!("{}{}", SEALED_PREFIX, hex::encode(buf)))
}

/// Reverse of `seal`. Values without the prefix pass through untouched so
/// registry documents written before encryption-at-rest still load.
pub fn open_sealed(key: &StoreKey, value: &str) -> Result<String> {
    let Some(encoded) = value.strip_prefix(SEALED_PREFIX) else {
        return Ok(value.to_string());
    };

    let bytes = hex::decode(encoded).context("Sealed value is not valid hex")?;
    if bytes.len() < NONCE_LEN {
        return Err(anyhow!("Sealed value too short"));
    }
    let nonce = Nonce::from_slice(&bytes[..NONCE_LEN]);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let plaintext = cipher
        .decrypt(nonce, &bytes[NONCE_LEN..])
        .map_err(|e| anyhow!("Decryption failure: {}", e))?;

    String::from_utf8(plaintext).context("Decrypted credential is not UTF-8")
}
