//! Top-level backup store handle (spec §6 API surface).

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::BackupStoreConfig;
use crate::directory::Directory;
use crate::error::Result;
use crate::index::types::{Chunk, Mailbox, Message};
use crate::index::IndexStore;
use crate::open::OpenMode;
use crate::session::SessionState;

/// One open backup: exclusively owns the log file descriptor, the index
/// handle, and any in-flight append session (spec §5 resource lifetimes).
pub struct Backup {
    pub(crate) log_path: PathBuf,
    pub(crate) index_path: PathBuf,
    pub(crate) log_file: File,
    pub(crate) index: IndexStore,
    pub(crate) session: Option<SessionState>,
}

impl Backup {
    /// Resolves `userid` via the configured directory, then opens it.
    pub fn open(userid: &str, config: &BackupStoreConfig) -> Result<Self> {
        let directory = Directory::open(&config.backups_db_path, &config.backup_data_path)?;
        let (log_path, index_path) = directory.resolve(userid)?;
        Self::open_paths(&log_path, Some(&index_path), OpenMode::Normal)
    }

    /// Opens a backup directly from its paths, bypassing the directory.
    /// `index_path` defaults to `<log_path>.index` when not given.
    pub fn open_paths(log_path: &Path, index_path: Option<&Path>, mode: OpenMode) -> Result<Self> {
        let derived;
        let index_path = match index_path {
            Some(p) => p,
            None => {
                derived = crate::directory::index_path_for(log_path);
                derived.as_path()
            }
        };
        crate::open::open_paths(log_path, index_path, mode)
    }

    /// Rebuilds the index entirely from the log (spec §4.G), deriving the
    /// index path as `<log_path>.index`.
    pub fn reindex(log_path: &Path) -> Result<Self> {
        Self::open_paths(log_path, None, OpenMode::Reindex)
    }

    pub fn get_paths(&self) -> (&Path, &Path) {
        (&self.log_path, &self.index_path)
    }

    /// Releases the exclusive lock and closes the log/index handles. Safe
    /// to call with a pending append session: it is aborted first.
    pub fn close(mut self) -> Result<()> {
        if self.session.is_some() {
            self.append_abort()?;
        }
        Ok(())
    }

    // -- readers (spec §4.H) ---------------------------------------------

    pub fn get_chunks(&self) -> Result<Vec<Chunk>> {
        self.index.get_chunks()
    }

    pub fn get_latest_chunk(&self) -> Result<Option<Chunk>> {
        self.index.get_latest_chunk()
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        self.index.get_chunk(id)
    }

    pub fn get_message(&self, guid: &str) -> Result<Option<Message>> {
        self.index.get_message(guid)
    }

    pub fn get_mailbox_by_name(&self, mboxname: &str, want_records: bool) -> Result<Option<Mailbox>> {
        self.index.get_mailbox_by_name(mboxname, want_records)
    }

    pub fn get_mailbox_by_uniqueid(&self, uniqueid: &str, want_records: bool) -> Result<Option<Mailbox>> {
        self.index.get_mailbox_by_uniqueid(uniqueid, want_records)
    }

    /// Mailboxes, optionally filtered to one chunk's `last_chunk_id`.
    pub fn get_mailboxes(&self, chunk_id: Option<i64>, want_records: bool) -> Result<Vec<Mailbox>> {
        self.index.get_mailboxes(chunk_id, want_records)
    }

    /// Messages, optionally filtered to one chunk.
    pub fn get_messages(&self, chunk_id: Option<i64>) -> Result<Vec<Message>> {
        self.index.get_messages(chunk_id)
    }

    /// Folds `cb` over `get_mailboxes(chunk_id, want_records)`, stopping
    /// early if `cb` returns `false`. A thin convenience over the eager
    /// reader above (spec §9 lazy-sequence note).
    pub fn mailbox_foreach(
        &self,
        chunk_id: Option<i64>,
        want_records: bool,
        mut cb: impl FnMut(&Mailbox) -> Result<bool>,
    ) -> Result<()> {
        for mailbox in self.get_mailboxes(chunk_id, want_records)? {
            if !cb(&mailbox)? {
                break;
            }
        }
        Ok(())
    }

    pub fn message_foreach(
        &self,
        chunk_id: Option<i64>,
        mut cb: impl FnMut(&Message) -> Result<bool>,
    ) -> Result<()> {
        for message in self.get_messages(chunk_id)? {
            if !cb(&message)? {
                break;
            }
        }
        Ok(())
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.index.rollback_backup_index_txn();
        }
    }
}

/// Resolves `userid` to its `(log_path, index_path)` without opening or
/// locking the backup itself (spec §6 `get_paths(userid, out_data,
/// out_index)`). Allocates a fresh log file and directory entry on first
/// use, same as `Backup::open` would.
pub fn get_paths(userid: &str, config: &BackupStoreConfig) -> Result<(PathBuf, PathBuf)> {
    let directory = Directory::open(&config.backups_db_path, &config.backup_data_path)?;
    directory.resolve(userid)
}

