//! Path directory (spec §4.C): maps a userid to its backup log path.
//!
//! Backed by a one-table SQLite database, `userid_directory(userid, log_path)`.
//! Entry allocation creates the log file with a unique name first (via
//! `mkstemp`-style atomic creation, so two processes resolving the same new
//! userid concurrently can never collide on a filename), then inserts the
//! mapping; if the insert fails the file is unlinked so no orphan is left
//! behind.

use std::path::{Path, PathBuf};

use nix::unistd;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{BackupError, Result};
use crate::hash::sha1_hex;

pub struct Directory {
    conn: Connection,
    root: PathBuf,
}

impl Directory {
    pub fn open(db_path: &Path, root: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(|e| BackupError::Schema(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS userid_directory (
                userid   TEXT PRIMARY KEY,
                log_path TEXT NOT NULL
            );",
        )?;
        std::fs::create_dir_all(root).map_err(|err| BackupError::io(root, err))?;
        Ok(Self { conn, root: root.to_owned() })
    }

    /// One-hex-character bucket directory derived from the userid, so a
    /// single directory never accumulates every user's log file.
    fn bucket(userid: &str) -> String {
        sha1_hex(userid.as_bytes())[..1].to_string()
    }

    fn lookup(&self, userid: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .conn
            .query_row(
                "SELECT log_path FROM userid_directory WHERE userid = ?1",
                params![userid],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(PathBuf::from))
    }

    /// Resolves `userid` to `(log_path, index_path)`, allocating a fresh
    /// log file and directory entry on first use.
    pub fn resolve(&self, userid: &str) -> Result<(PathBuf, PathBuf)> {
        if let Some(log_path) = self.lookup(userid)? {
            let index_path = index_path_for(&log_path);
            return Ok((log_path, index_path));
        }

        let bucket_dir = self.root.join(Self::bucket(userid));
        std::fs::create_dir_all(&bucket_dir).map_err(|err| BackupError::io(bucket_dir.as_path(), err))?;

        let template = bucket_dir.join(format!("{}_XXXXXX", userid));
        let (fd, log_path) = unistd::mkstemp(&template).map_err(|err| {
            BackupError::InvalidState(format!("mkstemp {:?} failed: {}", template, err))
        })?;
        let _ = unistd::close(fd);

        if let Err(err) = self.conn.execute(
            "INSERT INTO userid_directory (userid, log_path) VALUES (?1, ?2)",
            params![userid, log_path.to_string_lossy()],
        ) {
            let _ = unistd::unlink(log_path.as_path());
            return Err(err.into());
        }

        let index_path = index_path_for(&log_path);
        Ok((log_path, index_path))
    }
}

pub(crate) fn index_path_for(log_path: &Path) -> PathBuf {
    let mut s = log_path.as_os_str().to_owned();
    s.push(".index");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_remembers_path() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let db_path = tmp_dir.path().join("directory.sqlite3");
        let root = tmp_dir.path().join("data");
        let dir = Directory::open(&db_path, &root).unwrap();

        let (log1, idx1) = dir.resolve("alice@example.com").unwrap();
        assert!(log1.exists());
        assert_eq!(idx1, index_path_for(&log1));

        let (log2, idx2) = dir.resolve("alice@example.com").unwrap();
        assert_eq!(log1, log2);
        assert_eq!(idx1, idx2);
    }

    #[test]
    fn distinct_users_get_distinct_paths() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let db_path = tmp_dir.path().join("directory.sqlite3");
        let root = tmp_dir.path().join("data");
        let dir = Directory::open(&db_path, &root).unwrap();

        let (log_a, _) = dir.resolve("alice@example.com").unwrap();
        let (log_b, _) = dir.resolve("bob@example.com").unwrap();
        assert_ne!(log_a, log_b);
    }
}
