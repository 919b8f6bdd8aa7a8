//! Small filesystem helpers shared by the directory and session layers.

use std::fs::File;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::fcntl::{flock, FlockArg};
use nix::sys::stat;
use nix::unistd;

use crate::error::{BackupError, Result};

/// Write `data` to `path` atomically: write to a sibling temp file, fsync
/// semantics aside, then rename over the destination. Uses `mkstemp` so
/// concurrent writers (different processes or threads) never collide on
/// the temp name.
pub fn file_set_contents<P: AsRef<Path>>(
    path: P,
    data: &[u8],
    perm: Option<stat::Mode>,
) -> Result<()> {
    let path = path.as_ref();

    let mut template = path.to_owned();
    template.set_extension("tmp_XXXXXX");
    let (fd, tmp_path) = unistd::mkstemp(&template)
        .map_err(|err| BackupError::InvalidState(format!("mkstemp {:?} failed: {}", template, err)))?;

    let mode: stat::Mode = perm.unwrap_or_else(|| {
        stat::Mode::S_IRUSR | stat::Mode::S_IWUSR | stat::Mode::S_IRGRP | stat::Mode::S_IROTH
    });

    if let Err(err) = stat::fchmod(fd, mode) {
        let _ = unistd::unlink(&tmp_path);
        return Err(BackupError::InvalidState(format!("fchmod {:?} failed: {}", tmp_path, err)));
    }

    use std::os::unix::io::FromRawFd;
    let mut file = unsafe { File::from_raw_fd(fd) };

    if let Err(err) = file.write_all(data) {
        let _ = unistd::unlink(&tmp_path);
        return Err(BackupError::io(tmp_path, err));
    }

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = unistd::unlink(&tmp_path);
        return Err(BackupError::io(path, err));
    }

    Ok(())
}

/// Acquires an exclusive, blocking `flock` directly on `file`'s own
/// descriptor. The lock is held for as long as `file` (or any fd sharing
/// its open file description) stays open; it is released on close or
/// process exit. This blocks the calling thread on the kernel lock queue
/// rather than polling, matching the single-writer model (spec §5): only
/// one append session or reindex may hold a given backup's lock at a time.
pub fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(|_| BackupError::Locked(path.to_owned()))
}
