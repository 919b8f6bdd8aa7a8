//! Chunked-stream codec (spec §4.A).
//!
//! The log is a concatenation of independent gzip members: each `append`
//! session writes exactly one member, finished with a full trailer so the
//! next session can start a fresh, independently-decodable member right
//! after it (gzip multistream concatenation semantics).
//!
//! Reading needs two access patterns:
//!   * sequential, multi-member scans (reindex, tail validation) where the
//!     decoder for member N+1 must pick up exactly where member N's decoder
//!     left off, without re-reading or dropping any buffered bytes;
//!   * random access to one member at a known raw offset (message payload
//!     retrieval, tail-chunk validation).
//!
//! `flate2::bufread::GzDecoder` stops exactly at the end of one gzip member
//! (header + deflate body + CRC32/ISIZE trailer) and leaves any bytes beyond
//! it untouched in its `BufRead`. We wrap the underlying file in a small
//! byte-accounting `BufRead` so `member_end` can report precisely how many
//! raw bytes the member occupied, which is what lets the reindex path chain
//! `Chunk.offset` values without consulting the index it is rebuilding.

use std::fs::File;
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{BackupError, Result};

const BUF_CAPACITY: usize = 64 * 1024;

/// `BufRead` wrapper that counts bytes actually consumed (via `consume`),
/// as opposed to bytes merely pre-fetched into the buffer. This is the
/// quantity that corresponds to "bytes logically read by the gzip decoder",
/// i.e. the raw size of the member being decoded.
struct CountingBufReader {
    inner: io::BufReader<File>,
    consumed: u64,
}

impl CountingBufReader {
    fn new(file: File) -> Self {
        Self { inner: io::BufReader::with_capacity(BUF_CAPACITY, file), consumed: 0 }
    }
}

impl Read for CountingBufReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl BufRead for CountingBufReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.consumed += amt as u64;
    }
}

/// Reads the log file member-by-member, decoding one gzip member at a time.
pub struct MemberReader {
    file: File,
    reader: Option<CountingBufReader>,
    decoder: Option<GzDecoder<CountingBufReader>>,
    at_eof_of_member: bool,
    consumed_before_member: u64,
}

impl MemberReader {
    pub fn new(file: File) -> Self {
        Self {
            file,
            reader: None,
            decoder: None,
            at_eof_of_member: false,
            consumed_before_member: 0,
        }
    }

    /// The underlying file, for callers that need to compute something
    /// (e.g. a prefix hash) alongside member-by-member decoding.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Begin reading a new member. If `raw_offset` is given, seeks there
    /// first and discards any buffered look-ahead (random access). If
    /// `None`, continues from wherever the previous member's decoder left
    /// off (sequential scan) -- the caller must have called `member_end()`
    /// on the prior member first.
    pub fn member_start(&mut self, raw_offset: Option<u64>) -> Result<()> {
        self.at_eof_of_member = false;

        if let Some(offset) = raw_offset {
            self.file.seek(SeekFrom::Start(offset)).map_err(BackupError::io_unpathed)?;
            self.reader = Some(CountingBufReader::new(
                self.file.try_clone().map_err(BackupError::io_unpathed)?,
            ));
        } else if self.reader.is_none() {
            self.reader = Some(CountingBufReader::new(
                self.file.try_clone().map_err(BackupError::io_unpathed)?,
            ));
        }

        let reader = self.reader.take().expect("reader initialized above");
        self.consumed_before_member = reader.consumed;
        self.decoder = Some(GzDecoder::new(reader));
        Ok(())
    }

    /// True once there are no more raw bytes available to start a member.
    pub fn eof(&mut self) -> Result<bool> {
        match &mut self.reader {
            Some(r) => Ok(r.fill_buf().map_err(BackupError::io_unpathed)?.is_empty()),
            None => {
                let mut probe = CountingBufReader::new(
                    self.file.try_clone().map_err(BackupError::io_unpathed)?,
                );
                let empty = probe.fill_buf().map_err(BackupError::io_unpathed)?.is_empty();
                self.reader = Some(probe);
                Ok(empty)
            }
        }
    }

    /// Read decompressed bytes from the current member. Returns `Ok(0)` at
    /// member EOF, like `Read::read`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| BackupError::InvalidState("member_start not called".into()))?;
        let n = decoder.read(buf).map_err(|err| BackupError::CorruptLog {
            offset: 0,
            reason: format!("gzip decode failed: {}", err),
        })?;
        if n == 0 {
            self.at_eof_of_member = true;
        }
        Ok(n)
    }

    /// Reads the current member fully into `out`, returning the decoded
    /// length. Convenience wrapper over repeated `read()` calls.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        let mut buf = [0u8; BUF_CAPACITY];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            total += n as u64;
        }
        Ok(total)
    }

    pub fn member_eof(&self) -> bool {
        self.at_eof_of_member
    }

    /// Finalize reading the current member, returning its raw (compressed)
    /// byte length, and retaining the underlying reader for a subsequent
    /// sequential `member_start(None)`.
    pub fn member_end(&mut self) -> Result<u64> {
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| BackupError::InvalidState("member_start not called".into()))?;
        let reader = decoder.into_inner();
        let raw_len = reader.consumed - self.consumed_before_member;
        self.reader = Some(reader);
        Ok(raw_len)
    }
}

/// Writes exactly one gzip member, wrapping a duplicated file handle so
/// closing the encoder does not close the backup's own fd (spec §9).
pub struct MemberWriter {
    encoder: GzEncoder<File>,
}

impl MemberWriter {
    pub fn create(file: &File) -> Result<Self> {
        let dup = file.try_clone().map_err(BackupError::io_unpathed)?;
        Ok(Self { encoder: GzEncoder::new(dup, Compression::default()) })
    }

    /// Write `buf` fully, looping as needed; a single underlying write is
    /// never asked to move more than `i32::MAX` bytes at a time, matching
    /// the historical constraint that the codec's write primitive is
    /// bounded by a signed 32-bit count.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        const MAX_CHUNK: usize = i32::MAX as usize;
        while !buf.is_empty() {
            let n = std::cmp::min(buf.len(), MAX_CHUNK);
            self.encoder.write_all(&buf[..n]).map_err(BackupError::io_unpathed)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Emit a full-flush boundary: bytes written so far become part of a
    /// decodable prefix, so a crash after this point still leaves the
    /// member recoverable up to the last flushed command.
    pub fn full_flush(&mut self) -> Result<()> {
        self.encoder.flush().map_err(BackupError::io_unpathed)
    }

    /// Finish the member: writes the gzip CRC32/ISIZE trailer, producing a
    /// standalone, independently-decodable member, and returns the
    /// underlying (duplicated) file handle.
    pub fn finish(self) -> Result<File> {
        self.encoder.finish().map_err(BackupError::io_unpathed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn reopen(path: &std::path::Path) -> File {
        std::fs::OpenOptions::new().read(true).write(true).open(path).unwrap()
    }

    #[test]
    fn single_member_round_trips() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = reopen(tmp.path());
        let mut writer = MemberWriter::create(&file).unwrap();
        writer.write_all(b"hello, world").unwrap();
        writer.finish().unwrap();

        let file = reopen(tmp.path());
        let mut reader = MemberReader::new(file);
        reader.member_start(Some(0)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello, world");
        let raw_len = reader.member_end().unwrap();
        assert_eq!(raw_len, tmp.as_file().metadata().unwrap().len());
    }

    #[test]
    fn two_members_are_independently_decodable() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = reopen(tmp.path());
        let mut w1 = MemberWriter::create(&file).unwrap();
        w1.write_all(b"first").unwrap();
        w1.finish().unwrap();

        let offset1 = std::fs::metadata(tmp.path()).unwrap().len();

        let file2 = std::fs::OpenOptions::new().write(true).open(tmp.path()).unwrap();
        let mut file2 = file2;
        file2.seek(SeekFrom::End(0)).unwrap();
        let mut w2 = MemberWriter::create(&file2).unwrap();
        w2.write_all(b"second").unwrap();
        w2.finish().unwrap();

        let file = reopen(tmp.path());
        let mut reader = MemberReader::new(file);

        reader.member_start(Some(0)).unwrap();
        let mut out1 = Vec::new();
        reader.read_to_end(&mut out1).unwrap();
        assert_eq!(out1, b"first");
        let len1 = reader.member_end().unwrap();
        assert_eq!(len1, offset1);

        reader.member_start(None).unwrap();
        let mut out2 = Vec::new();
        reader.read_to_end(&mut out2).unwrap();
        assert_eq!(out2, b"second");
        reader.member_end().unwrap();

        assert!(reader.eof().unwrap());
    }
}
