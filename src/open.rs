//! Open/validate (spec §4.F).

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{BackupError, Result};
use crate::hash::{self, StreamingHasher};
use crate::index::IndexStore;
use crate::store::Backup;
use crate::tools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Normal,
    Reindex,
}

pub(crate) fn open_paths(log_path: &Path, index_path: &Path, mode: OpenMode) -> Result<Backup> {
    let log_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|err| BackupError::io(log_path, err))?;

    log::debug!("open: waiting for exclusive lock on {:?}", log_path);
    tools::lock_exclusive(&log_file, log_path)?;
    log::debug!("open: lock acquired on {:?}", log_path);

    let old_index_path = {
        let mut s = index_path.as_os_str().to_owned();
        s.push(".old");
        std::path::PathBuf::from(s)
    };

    match mode {
        OpenMode::Reindex => {
            match std::fs::rename(index_path, &old_index_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(BackupError::io(index_path, err)),
            }
        }
        OpenMode::Normal => {
            let log_len = log_file.metadata().map_err(BackupError::io_unpathed)?.len();
            let index_missing_or_empty = match std::fs::metadata(index_path) {
                Ok(meta) => meta.len() == 0,
                Err(_) => true,
            };
            if log_len > 0 && index_missing_or_empty {
                return Err(BackupError::ReindexRequired(log_path.to_owned()));
            }
        }
    }

    let index = IndexStore::open(index_path)?;

    if mode == OpenMode::Reindex {
        let reindex_file = log_file.try_clone().map_err(BackupError::io_unpathed)?;
        if let Err(err) = crate::reindex::run(reindex_file, &index) {
            drop(index);
            let _ = std::fs::remove_file(index_path);
            if old_index_path.exists() {
                let _ = std::fs::rename(&old_index_path, index_path);
            }
            return Err(err);
        }
        let _ = std::fs::remove_file(&old_index_path);
    } else {
        validate_latest_chunk(&log_file, &index, log_path)?;
    }

    Ok(Backup {
        log_path: log_path.to_owned(),
        index_path: index_path.to_owned(),
        log_file,
        index,
        session: None,
    })
}

fn validate_latest_chunk(log_file: &std::fs::File, index: &IndexStore, log_path: &Path) -> Result<()> {
    let chunk = match index.get_latest_chunk()? {
        Some(c) => c,
        None => return Ok(()), // fresh store, nothing to validate
    };

    let recomputed_file_sha1 = hash::hash_file_prefix(log_file, chunk.offset as u64)?;
    if recomputed_file_sha1 != chunk.file_sha1 {
        log::error!("checksum mismatch: file_sha1 of {:?} prefix disagrees with chunk {}", log_path, chunk.id);
        return Err(BackupError::ChecksumMismatch {
            chunk_id: chunk.id,
            reason: "file_sha1 of log prefix disagrees with index".into(),
        });
    }

    let mut reader = crate::codec::MemberReader::new(
        log_file.try_clone().map_err(BackupError::io_unpathed)?,
    );
    reader.member_start(Some(chunk.offset as u64))?;

    let mut hasher = StreamingHasher::init();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    let raw_len = reader.member_end()?;
    let data_sha1 = hasher.finalize();

    let expected_len = chunk.length.ok_or_else(|| BackupError::ChecksumMismatch {
        chunk_id: chunk.id,
        reason: "chunk has no recorded length (incomplete session)".into(),
    })?;

    if total as i64 != expected_len || Some(data_sha1) != chunk.data_sha1 {
        log::error!("checksum mismatch: chunk {} decoded content disagrees with index", chunk.id);
        return Err(BackupError::ChecksumMismatch {
            chunk_id: chunk.id,
            reason: "decoded length or data_sha1 disagrees with index".into(),
        });
    }

    let log_len = log_file.metadata().map_err(BackupError::io_unpathed)?.len();
    if log_len != chunk.offset as u64 + raw_len {
        log::error!(
            "checksum mismatch: {} bytes follow the latest known chunk {} in {:?}",
            log_len - (chunk.offset as u64 + raw_len),
            chunk.id,
            log_path
        );
        return Err(BackupError::ChecksumMismatch {
            chunk_id: chunk.id,
            reason: "log file is longer than the latest indexed chunk; reindex required".into(),
        });
    }

    Ok(())
}
