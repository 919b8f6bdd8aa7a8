//! Append session state machine (spec §4.E).

use crate::codec::MemberWriter;
use crate::command::{self, ApplyLine, DList, Verb};
use crate::error::{BackupError, Result};
use crate::hash::{self, StreamingHasher};
use crate::index::types::{MailboxMessage, MailboxRecord};
use crate::index::IndexStore;
use crate::store::Backup;

/// Controls whether a session writes to the log at all, and whether it
/// flushes a decodable boundary after every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionMode {
    /// Index-only: used by reindex, which replays commands that are
    /// already on disk without writing them again.
    pub index_only: bool,
    /// Skip the per-command full-flush; only the final `end()` flush
    /// guarantees a decodable boundary. Faster, but a crash mid-session
    /// loses more of the tail than the default mode.
    pub noflush: bool,
}

pub(crate) struct SessionState {
    pub(crate) chunk_id: i64,
    pub(crate) wrote_bytes: u64,
    pub(crate) last_ts: i64,
    pub(crate) hasher: StreamingHasher,
    pub(crate) writer: Option<MemberWriter>,
    pub(crate) mode: SessionMode,
}

impl Backup {
    pub fn append_start(&mut self, ts: i64, mode: SessionMode) -> Result<()> {
        if self.session.is_some() {
            return Err(BackupError::InvalidState("append session already active".into()));
        }

        let file_sha1 = hash::hash_file_prefix(&self.log_file, hash::SHA1_LIMIT_WHOLE_FILE)?;
        let offset = self.log_file.metadata().map_err(BackupError::io_unpathed)?.len();

        let mut writer = if mode.index_only {
            None
        } else {
            Some(MemberWriter::create(&self.log_file)?)
        };

        let header = command::format_chunk_header(ts);
        let mut hasher = StreamingHasher::init();
        hasher.update(header.as_bytes());

        if let Some(w) = writer.as_mut() {
            w.write_all(header.as_bytes())?;
            if !mode.noflush {
                w.full_flush()?;
            }
        }

        self.index.begin_backup_index_txn()?;
        let chunk_id = self.index.insert_chunk_start(ts, offset as i64, &file_sha1)?;

        self.session = Some(SessionState {
            chunk_id,
            wrote_bytes: header.len() as u64,
            last_ts: ts,
            hasher,
            writer,
            mode,
        });

        log::info!("append_start: chunk {} at offset {}", chunk_id, offset);
        Ok(())
    }

    pub fn append(&mut self, ts: i64, raw_dlist: &str) -> Result<()> {
        let chunk_id;
        {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| BackupError::InvalidState("no active append session".into()))?;

            session.last_ts = ts;

            let line = command::format_apply_line(ts, raw_dlist);
            session.hasher.update(line.as_bytes());

            if let Some(w) = session.writer.as_mut() {
                w.write_all(line.as_bytes())?;
                if !session.mode.noflush {
                    w.full_flush()?;
                }
            }

            let payload_offset = session.wrote_bytes;
            session.wrote_bytes += line.len() as u64;
            chunk_id = session.chunk_id;

            let apply = command::parse_apply_line(line.trim_end_matches("\r\n"))?;
            apply_command(&self.index, chunk_id, &apply, payload_offset, line.len() as u64)?;
        }
        Ok(())
    }

    pub fn append_end(&mut self) -> Result<()> {
        let session = self
            .session
            .take()
            .ok_or_else(|| BackupError::InvalidState("no active append session".into()))?;

        let data_sha1 = session.hasher.finalize();
        if let Some(mut w) = session.writer {
            w.full_flush()?;
            w.finish()?;
        }

        self.index.update_chunk_ts_end(session.chunk_id, session.last_ts)?;
        self.index.update_chunk_end(session.chunk_id, session.wrote_bytes as i64, &data_sha1)?;
        self.index.commit_backup_index_txn()?;
        log::info!("append_end: chunk {} ({} bytes)", session.chunk_id, session.wrote_bytes);
        Ok(())
    }

    pub fn append_abort(&mut self) -> Result<()> {
        let _session = self
            .session
            .take()
            .ok_or_else(|| BackupError::InvalidState("no active append session".into()))?;

        self.index.rollback_backup_index_txn()?;
        log::warn!("append_abort: rolled back pending chunk; raw log bytes left for reindex");
        Ok(())
    }
}

fn mailbox_record_from_dlist(dlist: &DList) -> MailboxRecord {
    MailboxRecord {
        uniqueid: dlist.field_str("UNIQUEID").unwrap_or_default().to_string(),
        mboxname: dlist.field_str("MBOXNAME").unwrap_or_default().to_string(),
        mboxtype: dlist.field_str("MBOXTYPE").unwrap_or_default().to_string(),
        last_uid: dlist.field_i64("LAST_UID").unwrap_or(0),
        highestmodseq: dlist.field_i64("HIGHESTMODSEQ").unwrap_or(0),
        recentuid: dlist.field_i64("RECENTUID").unwrap_or(0),
        recenttime: dlist.field_i64("RECENTTIME").unwrap_or(0),
        last_appenddate: dlist.field_i64("LAST_APPENDDATE").unwrap_or(0),
        pop3_last_login: dlist.field_i64("POP3_LAST_LOGIN").unwrap_or(0),
        pop3_show_after: dlist.field_i64("POP3_SHOW_AFTER").unwrap_or(0),
        uidvalidity: dlist.field_i64("UIDVALIDITY").unwrap_or(0),
        partition: dlist.field_str("PARTITION").unwrap_or_default().to_string(),
        acl: dlist.field_str("ACL").unwrap_or_default().to_string(),
        options: dlist.field_str("OPTIONS").unwrap_or_default().to_string(),
        sync_crc: dlist.field_i64("SYNC_CRC").unwrap_or(0),
        sync_crc_annot: dlist.field_i64("SYNC_CRC_ANNOT").unwrap_or(0),
        quotaroot: dlist.field_str("QUOTAROOT").unwrap_or_default().to_string(),
        xconvmodseq: dlist.field_i64("XCONVMODSEQ").unwrap_or(0),
        annotations: dlist.field_str("ANNOTATIONS").unwrap_or_default().to_string(),
        deleted: false,
    }
}

fn mailbox_message_from_record(record: &DList, ts: i64) -> MailboxMessage {
    MailboxMessage {
        uid: record.field_i64("UID").unwrap_or(0),
        modseq: record.field_i64("MODSEQ").unwrap_or(0),
        last_updated: ts,
        flags: record.field_str("FLAGS").unwrap_or_default().to_string(),
        internaldate: record.field_i64("INTERNALDATE").unwrap_or(0),
        guid: record.field_str("GUID").unwrap_or_default().to_string(),
        size: record.field_i64("SIZE").unwrap_or(0),
        annotations: record.field_str("ANNOTATIONS").unwrap_or_default().to_string(),
        expunged: false,
        ..Default::default()
    }
}

/// Applies one parsed `APPLY` command to the index (spec §4.E command
/// semantics). Shared by live append sessions and reindex, since both
/// walk the same command stream and must update the index identically.
pub(crate) fn apply_command(
    index: &IndexStore,
    chunk_id: i64,
    apply: &ApplyLine,
    payload_offset: u64,
    payload_length: u64,
) -> Result<()> {
    match &apply.verb {
        Verb::Message => {
            if let Some(guid) = apply.dlist.field_str("GUID") {
                let partition = apply.dlist.field_str("PARTITION").unwrap_or_default();
                index.upsert_message(guid, partition, chunk_id, payload_offset as i64, payload_length as i64)?;
            }
        }
        Verb::Mailbox => {
            let fields = mailbox_record_from_dlist(&apply.dlist);
            if fields.uniqueid.is_empty() {
                return Ok(());
            }
            let mailbox_id = index.upsert_mailbox(chunk_id, &fields)?;
            for record in apply.dlist.sub_lists_named("RECORD") {
                let mut mm = mailbox_message_from_record(record, apply.ts);
                let message_id = match index.get_message(&mm.guid)? {
                    Some(m) => m.id,
                    None => 0,
                };
                mm.mailbox_id = mailbox_id;
                mm.message_id = message_id;
                mm.last_chunk_id = chunk_id;
                index.upsert_mailbox_message(mailbox_id, message_id, chunk_id, &mm)?;
            }
        }
        Verb::Expunge => {
            if let (Some(uniqueid), Some(uid)) =
                (apply.dlist.field_str("UNIQUEID"), apply.dlist.field_i64("UID"))
            {
                if let Some(mailbox_id) = index.get_mailbox_id(uniqueid)? {
                    index.expunge_mailbox_message(mailbox_id, uid, chunk_id)?;
                }
            }
        }
        Verb::Unexpunge => {
            if let (Some(uniqueid), Some(uid)) =
                (apply.dlist.field_str("UNIQUEID"), apply.dlist.field_i64("UID"))
            {
                if let Some(mailbox_id) = index.get_mailbox_id(uniqueid)? {
                    index.unexpunge_mailbox_message(mailbox_id, uid, chunk_id)?;
                }
            }
        }
        Verb::Unmailbox => {
            if let Some(uniqueid) = apply.dlist.field_str("UNIQUEID") {
                index.mark_mailbox_deleted(uniqueid, chunk_id)?;
            }
        }
        Verb::Other(_) => {}
    }
    Ok(())
}
