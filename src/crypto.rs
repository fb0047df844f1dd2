//! Secrets at rest: a per-process 32-byte key stored 0600 next to the
//! database, AES-256-GCM for mailbox passwords and credential blobs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use rand::RngCore;

const KEY_FILE_NAME: &str = ".key";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    /// Loads the key file from `root`, creating it on first run.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(KEY_FILE_NAME);
        match fs::read(&path) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                Ok(SecretBox { key })
            }
            Ok(_) => anyhow::bail!("key file {} is corrupt", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::create(&path),
            Err(err) => Err(err).with_context(|| format!("reading key file {}", path.display())),
        }
    }

    fn create(path: &PathBuf) -> Result<Self> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .with_context(|| format!("creating key file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .context("restricting key file permissions")?;
        }

        file.write_all(&key).context("writing key file")?;
        file.sync_all().context("syncing key file")?;
        Ok(SecretBox { key })
    }

    #[cfg(test)]
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        SecretBox { key }
    }

    /// Encrypts to base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("decoding secret")?;
        if raw.len() <= NONCE_LEN {
            anyhow::bail!("secret too short");
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("decryption failed; wrong key?"))?;
        String::from_utf8(plaintext).context("secret is not valid UTF-8")
    }
}
