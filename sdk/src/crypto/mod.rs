//! Client-side encryption. The server only ever sees the output of this module.
//!
//! All encryption operations use AES-SIV.
//!
//! File names are encrypted using zero nonce, so the result is deterministic:
//! the client must be able to encrypt a path again and find it on the server.
//! Each path component is encrypted individually and encoded in url-safe base64,
//! so an encrypted path is still a valid relative path and parent-child
//! relationships are preserved.
//!
//! File content is split into fixed-size blocks, and a random nonce is chosen
//! for each block. The encrypted file is a magic number (32 bits, little endian)
//! followed by blocks of the following form:
//!
//! - block size (32 bits, little endian) - length of the following block (nonce + encrypted content)
//! - nonce (128 bits) - the random nonce used to encrypt this block
//! - encrypted content (plaintext length + 128-bit tag)
//!
//! Content is not compressed, so the encrypted size depends only on the plaintext size
//! (see [`encrypted_size`]). This allows comparing local and remote listings without
//! downloading anything.

mod cipher;
mod io;

pub use {
    cipher::Cipher,
    io::{DecryptingWriter, EncryptedFile, encrypted_size, original_size},
};
