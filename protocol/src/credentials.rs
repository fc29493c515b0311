use {
    aes_siv::{
        Aes256SivAead, KeyInit,
        aead::array::{Array, typenum::U64},
    },
    anyhow::{Context as _, Error, Result, format_err},
    base64::{
        Engine,
        display::Base64Display,
        prelude::{BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD},
    },
    serde::{Deserialize, Deserializer, Serialize, Serializer, de},
    sha2::{Digest, Sha256, Sha512},
    std::{
        borrow::Cow,
        fmt::{self, Debug, Display},
        str::FromStr,
    },
};

const KEY_LENGTH: usize = 64;

/// Prefix of password file entries that store a SHA-256 digest instead of the password.
pub const HASHED_PASSWORD_PREFIX: &str = "sha256:";

/// Secret used by a user to log in. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Password(String);

impl Password {
    #[must_use]
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    #[inline]
    pub fn as_unmasked_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Form stored in the password file by the admin endpoints.
    #[must_use]
    #[inline]
    pub fn hashed(&self) -> String {
        format!("{HASHED_PASSWORD_PREFIX}{}", hex_digest(&self.0))
    }

    /// Checks an offered password against a stored password file entry,
    /// which is either cleartext or `sha256:<hex>`.
    /// An empty stored entry disables the account.
    #[must_use]
    #[inline]
    pub fn matches_stored(&self, stored: &str) -> bool {
        if stored.is_empty() {
            return false;
        }
        let expected = match stored.strip_prefix(HASHED_PASSWORD_PREFIX) {
            Some(hash) => hash.to_ascii_lowercase(),
            None => hex_digest(stored),
        };
        // Both sides are fixed-length digests.
        hex_digest(&self.0) == expected
    }
}

fn hex_digest(value: &str) -> String {
    base16(&Sha256::digest(value.as_bytes()))
}

fn base16(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

impl Debug for Password {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password").finish()
    }
}

/// Login and password sent with every request in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub password: Password,
}

impl Credentials {
    #[must_use]
    #[inline]
    pub fn new(login: impl Into<String>, password: Password) -> Self {
        Self {
            login: login.into(),
            password,
        }
    }

    #[must_use]
    #[inline]
    pub fn to_basic_header(&self) -> String {
        let pair = format!("{}:{}", self.login, self.password.as_unmasked_str());
        format!("Basic {}", BASE64_STANDARD.encode(pair))
    }

    #[inline]
    pub fn from_basic_header(header: &str) -> Result<Self> {
        let encoded = header
            .strip_prefix("Basic ")
            .context("authorization header is not Basic")?;
        let decoded = String::from_utf8(BASE64_STANDARD.decode(encoded.trim())?)?;
        let (login, password) = decoded
            .split_once(':')
            .context("missing ':' in basic credentials")?;
        Ok(Self::new(login, Password::new(password)))
    }
}

/// Secret used to encrypt file contents and names on the client.
///
/// The server never sees it.
#[derive(Clone)]
pub struct EncryptionKey(Array<u8, U64>);

impl EncryptionKey {
    #[inline]
    pub fn generate() -> Result<Self> {
        Ok(Self(Aes256SivAead::generate_key()?))
    }

    /// Derives a key from a passphrase.
    #[must_use]
    #[inline]
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha512::digest(passphrase.as_bytes());
        let mut bytes = [0_u8; KEY_LENGTH];
        bytes.copy_from_slice(&digest);
        Self(bytes.into())
    }

    #[must_use]
    #[inline]
    pub fn get(&self) -> &Array<u8, U64> {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        Base64Display::new(self.0.as_ref(), &BASE64_URL_SAFE_NO_PAD)
    }
}

impl<'de> Deserialize<'de> for EncryptionKey {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Serialize for EncryptionKey {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BASE64_URL_SAFE_NO_PAD.encode(self.0).serialize(serializer)
    }
}

/// Accepts either a base64-encoded 64-byte key or `passphrase:<text>`.
impl FromStr for EncryptionKey {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(passphrase) = s.strip_prefix("passphrase:") {
            return Ok(Self::from_passphrase(passphrase));
        }
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(s)?;
        let array = <[u8; KEY_LENGTH]>::try_from(bytes).map_err(|bytes| {
            format_err!("invalid length; got {}, expected {KEY_LENGTH}", bytes.len())
        })?;
        Ok(Self(array.into()))
    }
}

impl Debug for EncryptionKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey").finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_header_roundtrip() {
        let credentials = Credentials::new("alice", Password::new("pa:ss"));
        let parsed = Credentials::from_basic_header(&credentials.to_basic_header()).unwrap();
        assert_eq!(parsed.login, "alice");
        assert_eq!(parsed.password.as_unmasked_str(), "pa:ss");
        Credentials::from_basic_header("Bearer abc").unwrap_err();
    }

    #[test]
    fn stored_passwords() {
        let password = Password::new("secret1");
        assert!(password.matches_stored("secret1"));
        assert!(password.matches_stored(&password.hashed()));
        assert!(!password.matches_stored("secret2"));
        assert!(!password.matches_stored(""));
        assert!(!Password::new("").matches_stored(""));
    }

    #[test]
    fn password_is_not_printed() {
        let password = Password::new("hunter22");
        assert!(!format!("{password:?}").contains("hunter22"));
    }

    #[test]
    fn encryption_key_from_str() {
        static KEY: &str = "qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqg";
        assert_eq!(
            EncryptionKey::from_str(KEY)
                .unwrap()
                .display_unmasked()
                .to_string(),
            KEY,
        );
        EncryptionKey::from_str("").unwrap_err();
        EncryptionKey::from_str(&format!("{KEY}:")).unwrap_err();
        let derived = EncryptionKey::from_str("passphrase:correct horse").unwrap();
        assert_eq!(
            derived.display_unmasked().to_string(),
            EncryptionKey::from_passphrase("correct horse")
                .display_unmasked()
                .to_string(),
        );
    }
}
