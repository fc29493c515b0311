use {
    crate::crypto::Cipher,
    aes_siv::Nonce,
    anyhow::Result,
    byteorder::{ByteOrder, LE, WriteBytesExt},
    fs_err::File,
    rand::RngCore,
    std::{
        cmp::min,
        io::{self, Write},
        path::Path,
    },
    tempfile::SpooledTempFile,
};

/// Max size of encrypted file content that will be stored in memory.
/// Files exceeding this limit will be stored as a temporary file on disk.
const MAX_IN_MEMORY: usize = 32 * 1024 * 1024;

/// Max length of a file chunk that will be encrypted at once.
const BLOCK_SIZE: usize = 1024 * 1024;

/// File type marker that is stored at the beginning of every encrypted file.
const MAGIC_NUMBER: u32 = 0x3142_4b42;

const MAGIC_LEN: u64 = 4;
const LENGTH_PREFIX_LEN: usize = 4;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;
const BLOCK_OVERHEAD: usize = LENGTH_PREFIX_LEN + NONCE_LEN + TAG_LEN;

fn other_error(message: &'static str) -> io::Error {
    io::Error::other(message)
}

/// Returns the size of the encrypted form of a file of `original_size` bytes.
#[must_use]
#[inline]
pub fn encrypted_size(original_size: u64) -> u64 {
    let block_size = BLOCK_SIZE as u64;
    let blocks = original_size.div_ceil(block_size);
    MAGIC_LEN
        .saturating_add(blocks.saturating_mul(BLOCK_OVERHEAD as u64))
        .saturating_add(original_size)
}

/// Inverse of [`encrypted_size`]. Returns `None` if no plaintext size
/// produces `encrypted_size`.
#[must_use]
#[inline]
pub fn original_size(encrypted_size: u64) -> Option<u64> {
    let payload = encrypted_size.checked_sub(MAGIC_LEN)?;
    let full_block = (BLOCK_SIZE + BLOCK_OVERHEAD) as u64;
    let blocks = payload.div_ceil(full_block);
    let overhead = blocks.checked_mul(BLOCK_OVERHEAD as u64)?;
    let original = payload.checked_sub(overhead)?;
    (self::encrypted_size(original) == encrypted_size).then_some(original)
}

/// Writes encrypted blocks of file content.
struct EncryptingWriter<'a, W> {
    // Input data of the currently accumulated block.
    buf: Vec<u8>,
    output: W,
    cipher: &'a Cipher,
    original_size: u64,
    encrypted_size: u64,
}

impl<'a, W: Write> EncryptingWriter<'a, W> {
    fn new(mut output: W, cipher: &'a Cipher) -> io::Result<Self> {
        output.write_u32::<LE>(MAGIC_NUMBER)?;
        Ok(Self {
            buf: Vec::new(),
            output,
            cipher,
            original_size: 0,
            encrypted_size: MAGIC_LEN,
        })
    }

    fn write_block(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let input_len = min(self.buf.len(), BLOCK_SIZE);
        let mut nonce = Nonce::default();
        rand::rng().fill_bytes(&mut nonce);

        let block = self.buf.get(..input_len).unwrap_or_default();
        let ciphertext = self
            .cipher
            .encrypt_bytes(&nonce, block)
            .map_err(|_| other_error("encryption failed"))?;
        let output_size = nonce
            .len()
            .checked_add(ciphertext.len())
            .ok_or_else(|| other_error("block is too large"))?;

        self.output.write_u32::<LE>(
            u32::try_from(output_size).map_err(|_| other_error("block is too large"))?,
        )?;
        self.output.write_all(&nonce)?;
        self.output.write_all(&ciphertext)?;
        self.original_size = self.original_size.saturating_add(input_len as u64);
        self.encrypted_size = self
            .encrypted_size
            .saturating_add((LENGTH_PREFIX_LEN + output_size) as u64);

        self.buf.drain(..input_len);
        Ok(())
    }

    fn finish(mut self) -> io::Result<(W, u64, u64)> {
        self.write_block()?;
        self.output.flush()?;
        Ok((self.output, self.original_size, self.encrypted_size))
    }
}

impl<W: Write> Write for EncryptingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.buf.len() >= BLOCK_SIZE {
            self.write_block()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

/// Decrypts a stream produced by [`Cipher::encrypt_file`] and writes the plaintext to `output`.
pub struct DecryptingWriter<'a, W: Write> {
    // Whether the magic number has been read.
    got_header: bool,
    // Input data that is not yet decrypted.
    buf: Vec<u8>,
    cipher: &'a Cipher,
    output: W,
    written: u64,
}

impl<'a, W: Write> DecryptingWriter<'a, W> {
    #[inline]
    pub fn new(cipher: &'a Cipher, output: W) -> Self {
        Self {
            got_header: false,
            buf: Vec::new(),
            cipher,
            output,
            written: 0,
        }
    }

    /// Returns the output and the number of plaintext bytes written.
    #[inline]
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        while self.process_block()? {}
        if !self.got_header {
            return Err(other_error("missing file header"));
        }
        if !self.buf.is_empty() {
            return Err(other_error("trailing data found"));
        }
        self.output.flush()?;
        Ok((self.output, self.written))
    }

    /// Returns true if a block was consumed.
    fn process_block(&mut self) -> io::Result<bool> {
        if !self.got_header {
            if self.buf.len() < 4 {
                return Ok(false);
            }
            if LE::read_u32(&self.buf) != MAGIC_NUMBER {
                return Err(other_error("magic number mismatch"));
            }
            self.buf.drain(..4);
            self.got_header = true;
        }
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(false);
        }
        let len = usize::try_from(LE::read_u32(&self.buf)).map_err(io::Error::other)?;
        let max_block_size = BLOCK_SIZE + NONCE_LEN + TAG_LEN;
        if len > max_block_size {
            return Err(io::Error::other(format!(
                "block size is too large (expected at most {max_block_size}, got {len})"
            )));
        }
        let Some(chunk_data) = self
            .buf
            .get(LENGTH_PREFIX_LEN..)
            .and_then(|rest| rest.get(..len))
        else {
            return Ok(false);
        };
        let (nonce, ciphertext) = chunk_data
            .split_at_checked(NONCE_LEN)
            .ok_or_else(|| other_error("chunk data is too short"))?;
        let nonce = Nonce::try_from(nonce).map_err(|_| other_error("invalid nonce"))?;
        let plaintext = self
            .cipher
            .decrypt_bytes(&nonce, ciphertext)
            .map_err(|_| other_error("decryption failed"))?;
        self.output.write_all(&plaintext)?;
        self.written = self.written.saturating_add(plaintext.len() as u64);
        self.buf.drain(..LENGTH_PREFIX_LEN + len);
        Ok(true)
    }
}

impl<W: Write> Write for DecryptingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.process_block()? {}
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

/// Encrypted content ready for upload.
pub struct EncryptedFile {
    pub file: SpooledTempFile,
    pub original_size: u64,
    pub encrypted_size: u64,
}

impl Cipher {
    #[inline]
    pub fn encrypt_file(&self, path: impl AsRef<Path>) -> Result<EncryptedFile> {
        let mut input_file = File::open(path.as_ref())?;
        let output = SpooledTempFile::new(MAX_IN_MEMORY);
        let mut encryptor = EncryptingWriter::new(output, self)?;
        io::copy(&mut input_file, &mut encryptor)?;
        let (file, original_size, encrypted_size) = encryptor.finish()?;
        Ok(EncryptedFile {
            file,
            original_size,
            encrypted_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_formula() {
        assert_eq!(encrypted_size(0), 4);
        assert_eq!(encrypted_size(10), 4 + 36 + 10);
        let one_block = BLOCK_SIZE as u64;
        assert_eq!(encrypted_size(one_block), 4 + 36 + one_block);
        assert_eq!(encrypted_size(one_block + 1), 4 + 72 + one_block + 1);
        for size in [0, 1, 10, one_block - 1, one_block, one_block + 1, 5 * one_block + 7] {
            assert_eq!(original_size(encrypted_size(size)), Some(size));
        }
        assert_eq!(original_size(3), None);
        assert_eq!(original_size(5), None);
    }
}
