//! SHA-1 digesting helpers (spec §4.B).
//!
//! Two modes are needed: hashing a bounded prefix of an already-written raw
//! file (`file_sha1`), and incrementally hashing bytes as they are written or
//! decoded (`data_sha1`). Both are built on `openssl::sha`, the same crate
//! the wider codebase already uses for config-file digests.

use std::fs::File;
use std::io::Read;

use openssl::sha::Sha1;

use crate::error::{BackupError, Result};

/// Sentinel meaning "hash the whole file", mirroring `SHA1_LIMIT_WHOLE_FILE`.
pub const SHA1_LIMIT_WHOLE_FILE: u64 = u64::MAX;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash the first `min(limit, file length)` bytes of `file`, without
/// disturbing any caller-visible seek position (we dup the fd via
/// `File::try_clone`, matching the "duplicate fd used by the writer"
/// convention used elsewhere in this crate).
pub fn hash_file_prefix(file: &File, limit: u64) -> Result<String> {
    let mut reader = file.try_clone().map_err(BackupError::io_unpathed)?;
    use std::io::Seek;
    reader.seek(std::io::SeekFrom::Start(0)).map_err(BackupError::io_unpathed)?;

    let mut hasher = Sha1::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut remaining = limit;

    loop {
        if remaining == 0 {
            break;
        }
        let want = std::cmp::min(buf.len() as u64, remaining) as usize;
        let n = reader.read(&mut buf[..want]).map_err(BackupError::io_unpathed)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        if limit != SHA1_LIMIT_WHOLE_FILE {
            remaining -= n as u64;
        }
    }

    Ok(hex_lower(&hasher.finish()))
}

/// Streaming SHA-1 accumulator: `init`/`update`/`finalize(hex_lower)`.
pub struct StreamingHasher {
    inner: Sha1,
}

impl StreamingHasher {
    pub fn init() -> Self {
        Self { inner: Sha1::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> String {
        hex_lower(&self.inner.finish())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::init()
    }
}

pub fn hex_lower(digest: &[u8; 20]) -> String {
    let mut s = String::with_capacity(40);
    for byte in digest {
        s.push_str(&format!("{:02x}", byte));
    }
    s
}

pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex_lower(&hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_prefix_hashes_to_sha1_of_empty_string() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let digest = hash_file_prefix(tmp.as_file(), SHA1_LIMIT_WHOLE_FILE).unwrap();
        assert_eq!(digest, sha1_hex(b""));
    }

    #[test]
    fn prefix_limit_excludes_trailing_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        tmp.flush().unwrap();
        let digest = hash_file_prefix(tmp.as_file(), 5).unwrap();
        assert_eq!(digest, sha1_hex(b"hello"));
    }

    #[test]
    fn streaming_hasher_matches_one_shot() {
        let mut hasher = StreamingHasher::init();
        hasher.update(b"foo");
        hasher.update(b"bar");
        assert_eq!(hasher.finalize(), sha1_hex(b"foobar"));
    }
}
