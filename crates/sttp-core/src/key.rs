//! Key material: the evolving pad buffer, its sizing, and persistence.
//!
//! A key of length `L` determines the whole chest layout: `L - 32` payload
//! bytes per chest and `2 * L` bytes per chest on the wire. The buffer is
//! owned exclusively and replaced wholesale after every processed chest;
//! rotation is an explicit state transition, never shared mutation.
//!
//! Key files are raw bytes with no header. The backing directory is created
//! on first save if absent.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use sttp_crypto::{DIGEST_LEN, fill_random};
use zeroize::Zeroizing;

use crate::error::KeyError;

/// Upper bound on key length in bytes (16 MiB).
///
/// A key file past this size is a misconfiguration, not a bigger pad.
pub const MAX_KEY_LEN: usize = 16 * 1024 * 1024;

/// Default message capacity per chest when the builder is not configured.
pub const DEFAULT_MSG_CAPACITY: usize = 512;

/// Well-known path for this endpoint's sending-lane key.
pub const DEFAULT_LOCAL_KEY_PATH: &str = ".sttp/keys/local.key";

/// Well-known path for the receiving-lane key.
pub const DEFAULT_REMOTE_KEY_PATH: &str = ".sttp/keys/remote.key";

/// An opaque fixed-length key buffer with derived chest sizing and an
/// optional backing file for persistence.
///
/// # Invariants
///
/// - `len() > DIGEST_LEN`, so every chest carries at least one message byte.
/// - The buffer is mutated only by the tunnel engine, one whole-buffer
///   replacement per processed chest.
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
    backing_path: Option<PathBuf>,
}

impl KeyMaterial {
    /// Load a key from a raw key file.
    ///
    /// The entire file becomes the key buffer.
    ///
    /// # Errors
    ///
    /// - [`KeyError::KeyTooSmall`] if the file is not longer than a digest
    /// - [`KeyError::KeyTooLarge`] if the file exceeds [`MAX_KEY_LEN`]
    /// - [`KeyError::Io`] if the file cannot be read
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let len = fs::metadata(path)?.len();
        validate_key_len(len)?;

        let bytes = fs::read(path)?;
        Ok(Self { bytes: Zeroizing::new(bytes), backing_path: Some(path.to_path_buf()) })
    }

    /// Wrap key bytes provisioned out-of-band. No backing file is set.
    ///
    /// # Errors
    ///
    /// Same size bounds as [`load`](Self::load).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, KeyError> {
        validate_key_len(bytes.len() as u64)?;
        Ok(Self { bytes: Zeroizing::new(bytes), backing_path: None })
    }

    /// Start configuring a freshly generated key.
    pub fn builder() -> KeyMaterialBuilder {
        KeyMaterialBuilder::new()
    }

    /// Key length `L` in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a valid key holds more than [`DIGEST_LEN`] bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Plaintext message bytes carried per chest (`L - DIGEST_LEN`).
    pub fn msg_capacity(&self) -> usize {
        self.bytes.len() - DIGEST_LEN
    }

    /// Bytes one chest occupies on the wire (`2 * L`).
    pub fn chest_size(&self) -> usize {
        self.bytes.len() * 2
    }

    /// Read-only view of the key bytes (the pad for the next chest).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Backing file this key persists to, if one is associated.
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing_path.as_deref()
    }

    /// Replace the whole buffer with the next key. Engine-only.
    ///
    /// The lengths always match: a chest's next-key field is exactly as long
    /// as the key that encrypted it.
    pub(crate) fn rotate(&mut self, next_key: &[u8]) {
        debug_assert_eq!(next_key.len(), self.bytes.len(), "next key must match key length");
        self.bytes.copy_from_slice(next_key);
    }

    /// Persist the current bytes to the backing file.
    ///
    /// # Errors
    ///
    /// [`KeyError::NoBackingFile`] if no backing file is associated;
    /// otherwise I/O and path errors as in [`save_as`](Self::save_as).
    pub fn save(&self) -> Result<(), KeyError> {
        let path = self.backing_path.as_ref().ok_or(KeyError::NoBackingFile)?;
        write_key_file(path, &self.bytes)
    }

    /// Persist the current bytes to `path` and make it the backing file.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// [`KeyError::NotAFile`] if `path` is a directory, [`KeyError::Io`] on
    /// write failure.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let path = path.as_ref();
        write_key_file(path, &self.bytes)?;
        self.backing_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Persist both sides of a key pair, falling back to the well-known
    /// default paths for a side with no backing file.
    pub fn pack_pair(mine: &mut Self, peer: &mut Self) -> Result<(), KeyError> {
        match mine.backing_path {
            Some(_) => mine.save()?,
            None => mine.save_as(DEFAULT_LOCAL_KEY_PATH)?,
        }
        match peer.backing_path {
            Some(_) => peer.save()?,
            None => peer.save_as(DEFAULT_REMOTE_KEY_PATH)?,
        }
        Ok(())
    }
}

// Key bytes never appear in debug output.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.len())
            .field("msg_capacity", &self.msg_capacity())
            .field("chest_size", &self.chest_size())
            .field("backing_path", &self.backing_path)
            .finish()
    }
}

/// Builder deriving consistent chest sizing from any one of: explicit chest
/// size, explicit message capacity, or explicit key length.
///
/// The three setters re-derive each other; the last writer wins. Validation
/// happens at configuration time, so `build()` cannot fail.
#[derive(Debug, Clone)]
pub struct KeyMaterialBuilder {
    msg_capacity: usize,
    backing_path: Option<PathBuf>,
}

impl KeyMaterialBuilder {
    fn new() -> Self {
        Self { msg_capacity: DEFAULT_MSG_CAPACITY, backing_path: None }
    }

    /// Set the on-wire chest size; message capacity becomes
    /// `n / 2 - DIGEST_LEN`.
    ///
    /// # Errors
    ///
    /// [`KeyError::InvalidSize`] if `n` is odd or below
    /// `2 * (DIGEST_LEN + 1)`.
    pub fn chest_size(mut self, n: usize) -> Result<Self, KeyError> {
        if n < 2 * (DIGEST_LEN + 1) {
            return Err(KeyError::InvalidSize { reason: "chest size too small" });
        }
        if n % 2 != 0 {
            return Err(KeyError::InvalidSize { reason: "chest size must be even" });
        }

        self.msg_capacity = n / 2 - DIGEST_LEN;
        Ok(self)
    }

    /// Set the plaintext bytes carried per chest; chest size becomes
    /// `2 * (n + DIGEST_LEN)`.
    ///
    /// # Errors
    ///
    /// [`KeyError::InvalidSize`] if `n` is zero.
    pub fn msg_capacity(mut self, n: usize) -> Result<Self, KeyError> {
        if n < 1 {
            return Err(KeyError::InvalidSize { reason: "message capacity must be at least 1" });
        }

        self.msg_capacity = n;
        Ok(self)
    }

    /// Set the key length directly; message capacity becomes
    /// `l - DIGEST_LEN`.
    ///
    /// # Errors
    ///
    /// [`KeyError::InvalidSize`] if `l` does not exceed [`DIGEST_LEN`].
    pub fn length(mut self, l: usize) -> Result<Self, KeyError> {
        if l <= DIGEST_LEN {
            return Err(KeyError::InvalidSize { reason: "key length must exceed the digest" });
        }

        self.msg_capacity = l - DIGEST_LEN;
        Ok(self)
    }

    /// Associate a backing file, creating it (and parent directories) if
    /// absent.
    ///
    /// # Errors
    ///
    /// [`KeyError::NotAFile`] if the path is a directory, [`KeyError::Io`]
    /// if it cannot be created.
    pub fn backing_file(mut self, path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        ensure_parent_dirs(path)?;
        fs::OpenOptions::new().write(true).create(true).truncate(false).open(path)?;

        self.backing_path = Some(path.to_path_buf());
        Ok(self)
    }

    /// Generate the key: `chest_size / 2` fresh bytes from the CSPRNG.
    pub fn build(self) -> KeyMaterial {
        let mut bytes = Zeroizing::new(vec![0u8; self.msg_capacity + DIGEST_LEN]);
        fill_random(&mut bytes);

        KeyMaterial { bytes, backing_path: self.backing_path }
    }
}

fn validate_key_len(len: u64) -> Result<(), KeyError> {
    if len <= DIGEST_LEN as u64 {
        return Err(KeyError::KeyTooSmall { len, min: DIGEST_LEN });
    }
    if len > MAX_KEY_LEN as u64 {
        return Err(KeyError::KeyTooLarge { len, max: MAX_KEY_LEN });
    }
    Ok(())
}

fn ensure_parent_dirs(path: &Path) -> Result<(), KeyError> {
    if path.is_dir() {
        return Err(KeyError::NotAFile { path: path.to_path_buf() });
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_key_file(path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
    ensure_parent_dirs(path)?;
    fs::write(path, bytes)?;
    Ok(())
}
