//! Parsing and serialization of `APPLY` log lines (spec §4.E, §4.I).
//!
//! The full replication wire grammar belongs to an external collaborator
//! (spec §1); this module only tokenizes enough of the `dlist` body to pull
//! out the fields the index needs (verb, `UNIQUEID`, `MBOXNAME`, per-record
//! `RECORD` groups, ...). It is a structural subset, not a validating parser.

use crate::error::{BackupError, Result};

/// One line of the decoded chunk body: `<ts> APPLY <dlist>`.
#[derive(Debug, Clone)]
pub struct ApplyLine {
    pub ts: i64,
    pub verb: Verb,
    pub dlist: DList,
    /// The raw dlist text as it appeared on the line (after "APPLY "),
    /// preserved verbatim so it can be written back unchanged.
    pub raw_dlist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Mailbox,
    Message,
    Expunge,
    Unexpunge,
    Unmailbox,
    Other(String),
}

impl Verb {
    fn parse(word: &str) -> Self {
        match word {
            "MAILBOX" => Verb::Mailbox,
            "MESSAGE" => Verb::Message,
            "EXPUNGE" => Verb::Expunge,
            "UNEXPUNGE" => Verb::Unexpunge,
            "UNMAILBOX" => Verb::Unmailbox,
            other => Verb::Other(other.to_string()),
        }
    }
}

/// A minimal nested atom/list tree. `dlist` bodies are whitespace
/// separated atoms with `(...)` used for nested sub-lists (e.g. the
/// `RECORD` group embedded in a `MAILBOX` command); `"..."` quotes atoms
/// containing spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DList {
    Atom(String),
    List(Vec<DList>),
}

impl DList {
    /// Look up `KEY` in a flat `List` laid out as alternating key/value
    /// atoms (the common case: `UNIQUEID x MBOXNAME y ...`), returning the
    /// value that follows it, whatever shape it is.
    pub fn field(&self, key: &str) -> Option<&DList> {
        if let DList::List(items) = self {
            let mut iter = items.iter();
            while let Some(item) = iter.next() {
                if let DList::Atom(k) = item {
                    if k.eq_ignore_ascii_case(key) {
                        return iter.next();
                    }
                }
            }
        }
        None
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        match self.field(key)? {
            DList::Atom(s) => Some(s.as_str()),
            DList::List(_) => None,
        }
    }

    pub fn field_i64(&self, key: &str) -> Option<i64> {
        self.field_str(key)?.parse().ok()
    }

    /// All top-level nested lists named `key` (e.g. every `RECORD` entry's
    /// sub-list, or the list following a `RECORD` key itself if it groups
    /// several records together as a list-of-lists).
    pub fn sub_lists_named(&self, key: &str) -> Vec<&DList> {
        let mut out = Vec::new();
        if let DList::List(items) = self {
            let mut iter = items.iter().peekable();
            while let Some(item) = iter.next() {
                if let DList::Atom(k) = item {
                    if k.eq_ignore_ascii_case(key) {
                        if let Some(next) = iter.peek() {
                            if let DList::List(records) = next {
                                // `RECORD (record1 record2 ...)` -- each
                                // inner entry is itself a list.
                                for r in records.iter() {
                                    if matches!(r, DList::List(_)) {
                                        out.push(r);
                                    }
                                }
                            }
                            iter.next();
                        }
                    }
                }
            }
        }
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            DList::Atom(a) => {
                if a.is_empty() || a.contains(char::is_whitespace) || a.contains(['(', ')']) {
                    out.push('"');
                    out.push_str(a);
                    out.push('"');
                } else {
                    out.push_str(a);
                }
            }
            DList::List(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    item.write(out);
                }
                out.push(')');
            }
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        match self {
            DList::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    item.write(&mut out);
                }
            }
            atom => atom.write(&mut out),
        }
        out
    }
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), src }
    }

    fn skip_ws(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    /// Parses the top level as an implicit flat list of atoms/sub-lists
    /// (the `VERB key value key value ...` shape), stopping at end of
    /// input.
    fn parse_top(&mut self) -> Result<DList> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek().is_none() {
                break;
            }
            items.push(self.parse_item()?);
        }
        Ok(DList::List(items))
    }

    fn parse_item(&mut self) -> Result<DList> {
        self.skip_ws();
        match self.chars.peek() {
            None => Err(BackupError::CorruptLog { offset: 0, reason: "unexpected end of dlist".into() }),
            Some(&(_, '(')) => self.parse_list(),
            Some(&(_, '"')) => self.parse_quoted(),
            _ => self.parse_atom(),
        }
    }

    fn parse_list(&mut self) -> Result<DList> {
        self.chars.next(); // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.chars.peek() {
                None => {
                    return Err(BackupError::CorruptLog {
                        offset: 0,
                        reason: "unterminated dlist sub-list".into(),
                    })
                }
                Some(&(_, ')')) => {
                    self.chars.next();
                    break;
                }
                _ => items.push(self.parse_item()?),
            }
        }
        Ok(DList::List(items))
    }

    fn parse_quoted(&mut self) -> Result<DList> {
        self.chars.next(); // consume opening quote
        let start = match self.chars.peek() {
            Some(&(i, _)) => i,
            None => self.src.len(),
        };
        let mut end = self.src.len();
        loop {
            match self.chars.next() {
                None => break,
                Some((i, '"')) => {
                    end = i;
                    break;
                }
                Some(_) => {}
            }
        }
        Ok(DList::Atom(self.src[start..end].to_string()))
    }

    fn parse_atom(&mut self) -> Result<DList> {
        let start = match self.chars.peek() {
            Some(&(i, _)) => i,
            None => self.src.len(),
        };
        let mut end = self.src.len();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                end = i;
                break;
            }
            self.chars.next();
        }
        Ok(DList::Atom(self.src[start..end].to_string()))
    }
}

pub fn parse_dlist(text: &str) -> Result<DList> {
    Tokenizer::new(text).parse_top()
}

/// Parses one decoded log line, `<ts> APPLY <dlist>` (without the trailing
/// `\r\n`, which the caller strips).
pub fn parse_apply_line(line: &str) -> Result<ApplyLine> {
    let mut parts = line.splitn(3, ' ');
    let ts: i64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| BackupError::CorruptLog { offset: 0, reason: "missing timestamp".into() })?;
    let verb_word = parts
        .next()
        .ok_or_else(|| BackupError::CorruptLog { offset: 0, reason: "missing APPLY keyword".into() })?;
    if verb_word != "APPLY" {
        return Err(BackupError::CorruptLog {
            offset: 0,
            reason: format!("expected APPLY, found {:?}", verb_word),
        });
    }
    let raw_dlist = parts.next().unwrap_or("").to_string();
    let dlist = parse_dlist(&raw_dlist)?;
    let verb = match &dlist {
        DList::List(items) => match items.first() {
            Some(DList::Atom(v)) => Verb::parse(v),
            _ => Verb::Other(String::new()),
        },
        DList::Atom(v) => Verb::parse(v),
    };
    Ok(ApplyLine { ts, verb, dlist, raw_dlist })
}

/// Serializes one log line, `<ts> APPLY <dlist>\r\n`, ready to be fed to
/// the codec and the SHA-1 context together.
pub fn format_apply_line(ts: i64, raw_dlist: &str) -> String {
    format!("{} APPLY {}\r\n", ts, raw_dlist)
}

pub fn format_chunk_header(ts: i64) -> String {
    format!("# cyrus backup: chunk start {}\r\n", ts)
}

/// Parses the chunk header line, returning its timestamp.
pub fn parse_chunk_header(line: &str) -> Result<i64> {
    let rest = line.strip_prefix("# cyrus backup: chunk start ").ok_or_else(|| {
        BackupError::CorruptLog { offset: 0, reason: "missing chunk header line".into() }
    })?;
    rest.trim().parse().map_err(|_| BackupError::CorruptLog {
        offset: 0,
        reason: "malformed chunk header timestamp".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_mailbox_command() {
        let line = "1700000000 APPLY MAILBOX UNIQUEID X MBOXNAME INBOX";
        let parsed = parse_apply_line(line).unwrap();
        assert_eq!(parsed.ts, 1700000000);
        assert_eq!(parsed.verb, Verb::Mailbox);
        assert_eq!(parsed.dlist.field_str("UNIQUEID"), Some("X"));
        assert_eq!(parsed.dlist.field_str("MBOXNAME"), Some("INBOX"));
    }

    #[test]
    fn parses_nested_records() {
        let line = r#"1700000060 APPLY MAILBOX UNIQUEID X MBOXNAME INBOX RECORD ((UID 5 GUID g5) (UID 6 GUID g6))"#;
        let parsed = parse_apply_line(line).unwrap();
        let records = parsed.dlist.sub_lists_named("RECORD");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].field_str("UID"), Some("5"));
        assert_eq!(records[1].field_str("GUID"), Some("g6"));
    }

    #[test]
    fn parses_quoted_atom_with_spaces() {
        let line = r#"1700000000 APPLY MAILBOX ACL "alice lrs bob lrwip""#;
        let parsed = parse_apply_line(line).unwrap();
        assert_eq!(parsed.dlist.field_str("ACL"), Some("alice lrs bob lrwip"));
    }

    #[test]
    fn chunk_header_round_trips() {
        let header = format_chunk_header(1700000000);
        assert_eq!(header, "# cyrus backup: chunk start 1700000000\r\n");
        assert_eq!(parse_chunk_header(header.trim_end()).unwrap(), 1700000000);
    }

    #[test]
    fn rejects_missing_header() {
        assert!(parse_chunk_header("not a header").is_err());
    }
}
