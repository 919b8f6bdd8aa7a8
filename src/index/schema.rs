//! Index schema definition and version migrations (spec §4.D, §6).

use rusqlite::Connection;

use crate::error::{BackupError, Result};

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE chunk (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_start    INTEGER NOT NULL,
    ts_end      INTEGER NOT NULL,
    offset      INTEGER NOT NULL,
    length      INTEGER,
    file_sha1   TEXT NOT NULL,
    data_sha1   TEXT
);

CREATE TABLE message (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    guid        TEXT NOT NULL UNIQUE,
    partition   TEXT NOT NULL,
    chunk_id    INTEGER NOT NULL REFERENCES chunk(id),
    offset      INTEGER NOT NULL,
    length      INTEGER NOT NULL
);
CREATE INDEX message_chunkid ON message(chunk_id);

CREATE TABLE mailbox (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    last_chunk_id   INTEGER NOT NULL REFERENCES chunk(id),
    uniqueid        TEXT NOT NULL UNIQUE,
    mboxname        TEXT NOT NULL UNIQUE,
    mboxtype        TEXT NOT NULL DEFAULT '',
    last_uid        INTEGER NOT NULL DEFAULT 0,
    highestmodseq   INTEGER NOT NULL DEFAULT 0,
    recentuid       INTEGER NOT NULL DEFAULT 0,
    recenttime      INTEGER NOT NULL DEFAULT 0,
    last_appenddate INTEGER NOT NULL DEFAULT 0,
    pop3_last_login INTEGER NOT NULL DEFAULT 0,
    pop3_show_after INTEGER NOT NULL DEFAULT 0,
    uidvalidity     INTEGER NOT NULL DEFAULT 0,
    partition       TEXT NOT NULL DEFAULT '',
    acl             TEXT NOT NULL DEFAULT '',
    options         TEXT NOT NULL DEFAULT '',
    sync_crc        INTEGER NOT NULL DEFAULT 0,
    sync_crc_annot  INTEGER NOT NULL DEFAULT 0,
    quotaroot       TEXT NOT NULL DEFAULT '',
    xconvmodseq     INTEGER NOT NULL DEFAULT 0,
    annotations     TEXT NOT NULL DEFAULT '',
    deleted         INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX mailbox_last_chunkid ON mailbox(last_chunk_id);

CREATE TABLE mailbox_message (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    mailbox_id      INTEGER NOT NULL REFERENCES mailbox(id),
    message_id      INTEGER NOT NULL REFERENCES message(id),
    last_chunk_id   INTEGER NOT NULL REFERENCES chunk(id),
    uid             INTEGER NOT NULL,
    modseq          INTEGER NOT NULL DEFAULT 0,
    last_updated    INTEGER NOT NULL DEFAULT 0,
    flags           TEXT NOT NULL DEFAULT '',
    internaldate    INTEGER NOT NULL DEFAULT 0,
    guid            TEXT NOT NULL,
    size            INTEGER NOT NULL DEFAULT 0,
    annotations     TEXT NOT NULL DEFAULT '',
    expunged        INTEGER NOT NULL DEFAULT 0,
    UNIQUE(mailbox_id, uid)
);
CREATE INDEX mailbox_message_last_chunkid ON mailbox_message(last_chunk_id);
"#;

/// Opens (creating if needed) the schema at the connection's current
/// version, running any pending migrations inside one transaction.
pub fn open_and_migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| BackupError::Schema(e.to_string()))?;

    if current == SCHEMA_VERSION {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(BackupError::Schema(format!(
            "index schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    let tx = conn.transaction().map_err(|e| BackupError::Schema(e.to_string()))?;
    if current == 0 {
        tx.execute_batch(SCHEMA_V1).map_err(|e| BackupError::Schema(e.to_string()))?;
    }
    // Future migrations would branch on `current` here, each one folding
    // forward to `SCHEMA_VERSION`.
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| BackupError::Schema(e.to_string()))?;
    tx.commit().map_err(|e| BackupError::Schema(e.to_string()))?;

    Ok(())
}
