use {
    aes_siv::{Aes256SivAead, KeyInit, Nonce, aead::Aead},
    anyhow::{Context, Result},
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    blindbackup_protocol::{EncryptionKey, RelativePath},
};

pub struct Cipher {
    inner: Aes256SivAead,
}

impl Cipher {
    #[must_use]
    #[inline]
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            inner: Aes256SivAead::new(key.get()),
        }
    }

    #[inline]
    pub fn encrypt_bytes(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .encrypt(nonce, plaintext)
            .context("encryption failed for bytes")
    }

    #[inline]
    pub fn decrypt_bytes(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .decrypt(nonce, ciphertext)
            .context("decryption failed for bytes")
    }

    /// Encrypts a single file name. The same name always produces the same result.
    #[inline]
    pub fn encrypt_name(&self, name: &str) -> Result<String> {
        let ciphertext = self
            .inner
            .encrypt(&Nonce::default(), name.as_bytes())
            .context("encryption failed")?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(ciphertext))
    }

    #[inline]
    pub fn decrypt_name(&self, name: &str) -> Result<String> {
        let ciphertext = BASE64_URL_SAFE_NO_PAD.decode(name)?;
        let plaintext = self
            .inner
            .decrypt(&Nonce::default(), ciphertext.as_slice())
            .with_context(|| format!("decryption failed for `{name}`"))?;
        Ok(String::from_utf8(plaintext)?)
    }

    /// Encrypts every component of `path` separately, so that the server still
    /// sees the same tree shape.
    #[inline]
    pub fn encrypt_path(&self, path: &RelativePath) -> Result<RelativePath> {
        path.components()
            .try_fold(RelativePath::root(), |encrypted, name| {
                encrypted.join(&self.encrypt_name(name)?)
            })
    }

    #[inline]
    pub fn decrypt_path(&self, path: &RelativePath) -> Result<RelativePath> {
        path.components()
            .try_fold(RelativePath::root(), |decrypted, name| {
                decrypted.join(&self.decrypt_name(name)?)
            })
    }
}
