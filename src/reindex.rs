//! Reindex (spec §4.G): rebuild the index entirely from the log.

use std::fs::File;

use crate::codec::MemberReader;
use crate::command::{self, Verb};
use crate::error::{BackupError, Result};
use crate::hash::{self, StreamingHasher};
use crate::index::IndexStore;
use crate::session;

/// Walks every gzip member of `log_file` in order, replaying each `APPLY`
/// line through the same command-ingest path a live append session uses,
/// and committing one chunk row per member. Stops gracefully (without
/// error) on an undecodable trailing member, since that is the expected
/// shape of an aborted or crashed session's orphaned bytes.
pub(crate) fn run(log_file: File, index: &IndexStore) -> Result<()> {
    let mut reader = MemberReader::new(log_file);
    let mut member_offset: u64 = 0;
    let mut prev_ts_end: Option<i64> = None;
    let mut member_index = 0u64;

    loop {
        if reader.eof()? {
            break;
        }

        let start_offset = if member_index == 0 { Some(0) } else { None };
        if reader.member_start(start_offset).is_err() {
            log::warn!("reindex: undecodable member at raw offset {}, stopping", member_offset);
            break;
        }

        let mut raw = Vec::new();
        if reader.read_to_end(&mut raw).is_err() {
            log::warn!("reindex: truncated member at raw offset {}, stopping", member_offset);
            break;
        }

        let text = match String::from_utf8(raw) {
            Ok(t) => t,
            Err(_) => {
                return Err(BackupError::CorruptLog {
                    offset: member_offset,
                    reason: "member body is not valid utf-8".into(),
                })
            }
        };

        let mut lines = text.split("\r\n").filter(|l| !l.is_empty());
        let header_line = lines.next().ok_or_else(|| BackupError::CorruptLog {
            offset: member_offset,
            reason: "member has no header line".into(),
        })?;
        let ts = command::parse_chunk_header(header_line)?;

        if let Some(prev_ts_end) = prev_ts_end {
            if ts < prev_ts_end {
                return Err(BackupError::DataOrder(format!(
                    "member at offset {} starts at ts {}, before previous chunk's ts_end {}",
                    member_offset, ts, prev_ts_end
                )));
            }
        }

        let file_sha1 = hash::hash_file_prefix(reader.file(), member_offset)?;

        index.begin_backup_index_txn()?;
        let chunk_id = index.insert_chunk_start(ts, member_offset as i64, &file_sha1)?;

        let header_text = format!("{}\r\n", header_line);
        let mut hasher = StreamingHasher::init();
        hasher.update(header_text.as_bytes());
        let mut wrote_bytes = header_text.len() as u64;
        let mut last_ts = ts;

        for line in lines {
            let apply = command::parse_apply_line(line)?;
            if apply.ts < last_ts {
                index.rollback_backup_index_txn()?;
                return Err(BackupError::DataOrder(format!(
                    "line ts {} precedes prior line ts {} in member at offset {}",
                    apply.ts, last_ts, member_offset
                )));
            }
            last_ts = apply.ts;

            let full_line = format!("{}\r\n", line);
            hasher.update(full_line.as_bytes());
            let payload_offset = wrote_bytes;
            wrote_bytes += full_line.len() as u64;

            if !matches!(apply.verb, Verb::Other(_)) {
                session::apply_command(index, chunk_id, &apply, payload_offset, full_line.len() as u64)?;
            }
        }

        let data_sha1 = hasher.finalize();
        let raw_len = reader.member_end()?;
        index.update_chunk_ts_end(chunk_id, last_ts)?;
        index.update_chunk_end(chunk_id, wrote_bytes as i64, &data_sha1)?;
        index.commit_backup_index_txn()?;

        log::info!("reindex: chunk {} ({} decoded bytes) at raw offset {}", chunk_id, wrote_bytes, member_offset);

        member_offset += raw_len;
        prev_ts_end = Some(last_ts);
        member_index += 1;
    }

    Ok(())
}
