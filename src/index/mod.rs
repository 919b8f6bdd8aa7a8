//! Relational index store (spec §4.D).
//!
//! Backed by SQLite via `rusqlite`. All mutations made by one append
//! session are scoped by the literal named transaction `backup_index`
//! (a `SAVEPOINT`), so `append_abort` can roll every change in that
//! session back regardless of how many individual statements it ran.

pub mod schema;
pub mod types;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{BackupError, Result};
use types::{Chunk, Mailbox, MailboxMessage, MailboxRecord, Message};

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path).map_err(|e| BackupError::Schema(e.to_string()))?;
        schema::open_and_migrate(&mut conn)?;
        Ok(Self { conn })
    }

    // -- named transaction scoping one append session -----------------

    pub fn begin_backup_index_txn(&self) -> Result<()> {
        self.conn.execute_batch("SAVEPOINT backup_index;")?;
        Ok(())
    }

    pub fn commit_backup_index_txn(&self) -> Result<()> {
        self.conn.execute_batch("RELEASE SAVEPOINT backup_index;")?;
        Ok(())
    }

    pub fn rollback_backup_index_txn(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK TO SAVEPOINT backup_index; RELEASE SAVEPOINT backup_index;")?;
        Ok(())
    }

    // -- chunk ----------------------------------------------------------

    pub fn insert_chunk_start(&self, ts: i64, offset: i64, file_sha1: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO chunk (ts_start, ts_end, offset, length, file_sha1, data_sha1)
             VALUES (?1, ?1, ?2, NULL, ?3, NULL)",
            params![ts, offset, file_sha1],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_chunk_ts_end(&self, chunk_id: i64, ts_end: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE chunk SET ts_end = ?1 WHERE id = ?2",
            params![ts_end, chunk_id],
        )?;
        Ok(())
    }

    pub fn update_chunk_end(&self, chunk_id: i64, length: i64, data_sha1: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE chunk SET length = ?1, data_sha1 = ?2 WHERE id = ?3",
            params![length, data_sha1, chunk_id],
        )?;
        Ok(())
    }

    fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
        Ok(Chunk {
            id: row.get(0)?,
            ts_start: row.get(1)?,
            ts_end: row.get(2)?,
            offset: row.get(3)?,
            length: row.get(4)?,
            file_sha1: row.get(5)?,
            data_sha1: row.get(6)?,
        })
    }

    const CHUNK_COLUMNS: &'static str =
        "id, ts_start, ts_end, offset, length, file_sha1, data_sha1";

    pub fn get_chunks(&self) -> Result<Vec<Chunk>> {
        let sql = format!("SELECT {} FROM chunk ORDER BY id", Self::CHUNK_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_chunk)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_latest_chunk(&self) -> Result<Option<Chunk>> {
        let sql = format!(
            "SELECT {} FROM chunk ORDER BY id DESC LIMIT 1",
            Self::CHUNK_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [], Self::row_to_chunk).optional()?)
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        let sql = format!("SELECT {} FROM chunk WHERE id = ?1", Self::CHUNK_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], Self::row_to_chunk).optional()?)
    }

    // -- message ----------------------------------------------------------

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        Ok(Message {
            id: row.get(0)?,
            guid: row.get(1)?,
            partition: row.get(2)?,
            chunk_id: row.get(3)?,
            offset: row.get(4)?,
            length: row.get(5)?,
        })
    }

    const MESSAGE_COLUMNS: &'static str = "id, guid, partition, chunk_id, offset, length";

    /// Upsert-by-guid: last writer wins within the authoritative log order.
    pub fn upsert_message(
        &self,
        guid: &str,
        partition: &str,
        chunk_id: i64,
        offset: i64,
        length: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO message (guid, partition, chunk_id, offset, length)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(guid) DO UPDATE SET
                partition = excluded.partition,
                chunk_id = excluded.chunk_id,
                offset = excluded.offset,
                length = excluded.length",
            params![guid, partition, chunk_id, offset, length],
        )?;
        let sql = format!("SELECT {} FROM message WHERE guid = ?1", Self::MESSAGE_COLUMNS);
        let id: i64 = self.conn.query_row(&sql, params![guid], |row| row.get(0))?;
        Ok(id)
    }

    pub fn get_message(&self, guid: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM message WHERE guid = ?1", Self::MESSAGE_COLUMNS);
        Ok(self.conn.query_row(&sql, params![guid], Self::row_to_message).optional()?)
    }

    pub fn get_messages(&self, chunk_id: Option<i64>) -> Result<Vec<Message>> {
        match chunk_id {
            Some(id) => {
                let sql = format!(
                    "SELECT {} FROM message WHERE chunk_id = ?1 ORDER BY id",
                    Self::MESSAGE_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![id], Self::row_to_message)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            }
            None => {
                let sql = format!("SELECT {} FROM message ORDER BY id", Self::MESSAGE_COLUMNS);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map([], Self::row_to_message)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            }
        }
    }

    // -- mailbox ----------------------------------------------------------

    const MAILBOX_COLUMNS: &'static str = "id, last_chunk_id, uniqueid, mboxname, mboxtype, \
        last_uid, highestmodseq, recentuid, recenttime, last_appenddate, pop3_last_login, \
        pop3_show_after, uidvalidity, partition, acl, options, sync_crc, sync_crc_annot, \
        quotaroot, xconvmodseq, annotations, deleted";

    fn row_to_mailbox(row: &rusqlite::Row) -> rusqlite::Result<Mailbox> {
        Ok(Mailbox {
            id: row.get(0)?,
            last_chunk_id: row.get(1)?,
            fields: MailboxRecord {
                uniqueid: row.get(2)?,
                mboxname: row.get(3)?,
                mboxtype: row.get(4)?,
                last_uid: row.get(5)?,
                highestmodseq: row.get(6)?,
                recentuid: row.get(7)?,
                recenttime: row.get(8)?,
                last_appenddate: row.get(9)?,
                pop3_last_login: row.get(10)?,
                pop3_show_after: row.get(11)?,
                uidvalidity: row.get(12)?,
                partition: row.get(13)?,
                acl: row.get(14)?,
                options: row.get(15)?,
                sync_crc: row.get(16)?,
                sync_crc_annot: row.get(17)?,
                quotaroot: row.get(18)?,
                xconvmodseq: row.get(19)?,
                annotations: row.get(20)?,
                deleted: row.get::<_, i64>(21)? != 0,
            },
            records: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_mailbox(&self, last_chunk_id: i64, fields: &MailboxRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO mailbox (
                last_chunk_id, uniqueid, mboxname, mboxtype, last_uid, highestmodseq,
                recentuid, recenttime, last_appenddate, pop3_last_login, pop3_show_after,
                uidvalidity, partition, acl, options, sync_crc, sync_crc_annot, quotaroot,
                xconvmodseq, annotations, deleted
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
             ON CONFLICT(uniqueid) DO UPDATE SET
                last_chunk_id = excluded.last_chunk_id,
                mboxname = excluded.mboxname,
                mboxtype = excluded.mboxtype,
                last_uid = excluded.last_uid,
                highestmodseq = excluded.highestmodseq,
                recentuid = excluded.recentuid,
                recenttime = excluded.recenttime,
                last_appenddate = excluded.last_appenddate,
                pop3_last_login = excluded.pop3_last_login,
                pop3_show_after = excluded.pop3_show_after,
                uidvalidity = excluded.uidvalidity,
                partition = excluded.partition,
                acl = excluded.acl,
                options = excluded.options,
                sync_crc = excluded.sync_crc,
                sync_crc_annot = excluded.sync_crc_annot,
                quotaroot = excluded.quotaroot,
                xconvmodseq = excluded.xconvmodseq,
                annotations = excluded.annotations,
                deleted = excluded.deleted",
            params![
                last_chunk_id,
                fields.uniqueid,
                fields.mboxname,
                fields.mboxtype,
                fields.last_uid,
                fields.highestmodseq,
                fields.recentuid,
                fields.recenttime,
                fields.last_appenddate,
                fields.pop3_last_login,
                fields.pop3_show_after,
                fields.uidvalidity,
                fields.partition,
                fields.acl,
                fields.options,
                fields.sync_crc,
                fields.sync_crc_annot,
                fields.quotaroot,
                fields.xconvmodseq,
                fields.annotations,
                fields.deleted as i64,
            ],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM mailbox WHERE uniqueid = ?1",
            params![fields.uniqueid],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_mailbox_id(&self, uniqueid: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM mailbox WHERE uniqueid = ?1",
                params![uniqueid],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn mark_mailbox_deleted(&self, uniqueid: &str, last_chunk_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE mailbox SET deleted = 1, last_chunk_id = ?2 WHERE uniqueid = ?1",
            params![uniqueid, last_chunk_id],
        )?;
        Ok(())
    }

    fn fetch_mailbox_records(&self, mailbox_id: i64) -> Result<Vec<MailboxMessage>> {
        let sql = format!(
            "SELECT {} FROM mailbox_message WHERE mailbox_id = ?1 ORDER BY uid",
            Self::MAILBOX_MESSAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![mailbox_id], Self::row_to_mailbox_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_mailbox_by_name(
        &self,
        mboxname: &str,
        want_records: bool,
    ) -> Result<Option<Mailbox>> {
        let sql = format!(
            "SELECT {} FROM mailbox WHERE mboxname = ?1",
            Self::MAILBOX_COLUMNS
        );
        let mailbox = self
            .conn
            .query_row(&sql, params![mboxname], Self::row_to_mailbox)
            .optional()?;
        self.maybe_attach_records(mailbox, want_records)
    }

    pub fn get_mailbox_by_uniqueid(
        &self,
        uniqueid: &str,
        want_records: bool,
    ) -> Result<Option<Mailbox>> {
        let sql = format!(
            "SELECT {} FROM mailbox WHERE uniqueid = ?1",
            Self::MAILBOX_COLUMNS
        );
        let mailbox = self
            .conn
            .query_row(&sql, params![uniqueid], Self::row_to_mailbox)
            .optional()?;
        self.maybe_attach_records(mailbox, want_records)
    }

    fn maybe_attach_records(&self, mailbox: Option<Mailbox>, want_records: bool) -> Result<Option<Mailbox>> {
        match mailbox {
            None => Ok(None),
            Some(mut m) => {
                if want_records {
                    m.records = Some(self.fetch_mailbox_records(m.id)?);
                }
                Ok(Some(m))
            }
        }
    }

    pub fn get_mailboxes(&self, chunk_id: Option<i64>, want_records: bool) -> Result<Vec<Mailbox>> {
        let sql = match chunk_id {
            Some(_) => format!(
                "SELECT {} FROM mailbox WHERE last_chunk_id = ?1 ORDER BY id",
                Self::MAILBOX_COLUMNS
            ),
            None => format!("SELECT {} FROM mailbox ORDER BY id", Self::MAILBOX_COLUMNS),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let mailboxes: Vec<Mailbox> = match chunk_id {
            Some(id) => stmt
                .query_map(params![id], Self::row_to_mailbox)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], Self::row_to_mailbox)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        if !want_records {
            return Ok(mailboxes);
        }
        mailboxes
            .into_iter()
            .map(|mut m| {
                m.records = Some(self.fetch_mailbox_records(m.id)?);
                Ok(m)
            })
            .collect()
    }

    // -- mailbox_message --------------------------------------------------

    const MAILBOX_MESSAGE_COLUMNS: &'static str = "id, mailbox_id, message_id, last_chunk_id, \
        uid, modseq, last_updated, flags, internaldate, guid, size, annotations, expunged";

    fn row_to_mailbox_message(row: &rusqlite::Row) -> rusqlite::Result<MailboxMessage> {
        Ok(MailboxMessage {
            id: row.get(0)?,
            mailbox_id: row.get(1)?,
            message_id: row.get(2)?,
            last_chunk_id: row.get(3)?,
            uid: row.get(4)?,
            modseq: row.get(5)?,
            last_updated: row.get(6)?,
            flags: row.get(7)?,
            internaldate: row.get(8)?,
            guid: row.get(9)?,
            size: row.get(10)?,
            annotations: row.get(11)?,
            expunged: row.get::<_, i64>(12)? != 0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_mailbox_message(
        &self,
        mailbox_id: i64,
        message_id: i64,
        last_chunk_id: i64,
        rec: &MailboxMessage,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mailbox_message (
                mailbox_id, message_id, last_chunk_id, uid, modseq, last_updated, flags,
                internaldate, guid, size, annotations, expunged
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(mailbox_id, uid) DO UPDATE SET
                message_id = excluded.message_id,
                last_chunk_id = excluded.last_chunk_id,
                modseq = excluded.modseq,
                last_updated = excluded.last_updated,
                flags = excluded.flags,
                internaldate = excluded.internaldate,
                guid = excluded.guid,
                size = excluded.size,
                annotations = excluded.annotations,
                expunged = excluded.expunged",
            params![
                mailbox_id,
                message_id,
                last_chunk_id,
                rec.uid,
                rec.modseq,
                rec.last_updated,
                rec.flags,
                rec.internaldate,
                rec.guid,
                rec.size,
                rec.annotations,
                rec.expunged as i64,
            ],
        )?;
        Ok(())
    }

    pub fn expunge_mailbox_message(&self, mailbox_id: i64, uid: i64, last_chunk_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE mailbox_message SET expunged = 1, last_chunk_id = ?3
             WHERE mailbox_id = ?1 AND uid = ?2",
            params![mailbox_id, uid, last_chunk_id],
        )?;
        Ok(())
    }

    pub fn unexpunge_mailbox_message(&self, mailbox_id: i64, uid: i64, last_chunk_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE mailbox_message SET expunged = 0, last_chunk_id = ?3
             WHERE mailbox_id = ?1 AND uid = ?2",
            params![mailbox_id, uid, last_chunk_id],
        )?;
        Ok(())
    }
}
