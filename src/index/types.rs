//! Owned row types for the index entities (spec §3).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: i64,
    pub ts_start: i64,
    pub ts_end: i64,
    pub offset: i64,
    /// `None` until `append_end` commits the final length.
    pub length: Option<i64>,
    pub file_sha1: String,
    pub data_sha1: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub guid: String,
    pub partition: String,
    pub chunk_id: i64,
    pub offset: i64,
    pub length: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailboxRecord {
    pub uniqueid: String,
    pub mboxname: String,
    pub mboxtype: String,
    pub last_uid: i64,
    pub highestmodseq: i64,
    pub recentuid: i64,
    pub recenttime: i64,
    pub last_appenddate: i64,
    pub pop3_last_login: i64,
    pub pop3_show_after: i64,
    pub uidvalidity: i64,
    pub partition: String,
    pub acl: String,
    pub options: String,
    pub sync_crc: i64,
    pub sync_crc_annot: i64,
    pub quotaroot: String,
    pub xconvmodseq: i64,
    pub annotations: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub id: i64,
    pub last_chunk_id: i64,
    pub fields: MailboxRecord,
    pub records: Option<Vec<MailboxMessage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailboxMessage {
    pub id: i64,
    pub mailbox_id: i64,
    pub message_id: i64,
    pub last_chunk_id: i64,
    pub uid: i64,
    pub modseq: i64,
    pub last_updated: i64,
    pub flags: String,
    pub internaldate: i64,
    pub guid: String,
    pub size: i64,
    pub annotations: String,
    pub expunged: bool,
}
