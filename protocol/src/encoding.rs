use {
    anyhow::Result,
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    serde::{Serialize, de::DeserializeOwned},
    std::io::Write,
};

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(value, bincode::config::legacy())
}

pub fn serialize_into<T: Serialize>(
    mut writer: impl Write,
    value: &T,
) -> Result<usize, bincode::error::EncodeError> {
    bincode::serde::encode_into_std_write(value, &mut writer, bincode::config::legacy())
}

pub fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, bincode::error::DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy()).map(|(data, _len)| data)
}

/// Encodes a request so that it can be used as a single URL path segment.
pub fn to_url_token<T: Serialize>(value: &T) -> Result<String> {
    Ok(BASE64_URL_SAFE_NO_PAD.encode(serialize(value)?))
}

pub fn from_url_token<T: DeserializeOwned>(token: &str) -> Result<T> {
    Ok(deserialize(&BASE64_URL_SAFE_NO_PAD.decode(token)?)?)
}
