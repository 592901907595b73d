//! Commit object serialization and identity lines.

use chrono::{DateTime, FixedOffset, Utc};

use super::{ObjectId, Result, StoreError};

/// A name/email identity with a timestamp, as recorded in commit
/// author and committer lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

impl PersonIdent {
    /// Create an identity stamped with the current time.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        PersonIdent {
            name: name.into(),
            email: email.into(),
            when: Utc::now().fixed_offset(),
        }
    }

    /// Create an identity with an explicit timestamp.
    pub fn at(
        name: impl Into<String>,
        email: impl Into<String>,
        when: DateTime<FixedOffset>,
    ) -> Self {
        PersonIdent {
            name: name.into(),
            email: email.into(),
            when,
        }
    }

    fn format_line(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.when.timestamp(),
            self.when.format("%z")
        )
    }

    fn parse_line(line: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidObject(format!("bad identity line '{line}'"));
        let open = line.find(" <").ok_or_else(invalid)?;
        let close = line[open..].find('>').ok_or_else(invalid)? + open;
        let name = line[..open].to_string();
        let email = line[open + 2..close].to_string();
        let mut tail = line[close + 1..].split_whitespace();
        let epoch: i64 = tail
            .next()
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let tz = tail.next().ok_or_else(invalid)?;
        let offset = parse_tz_offset(tz).ok_or_else(invalid)?;
        let when = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(invalid)?
            .with_timezone(&offset);
        Ok(PersonIdent { name, email, when })
    }
}

fn parse_tz_offset(tz: &str) -> Option<FixedOffset> {
    let bytes = tz.as_bytes();
    if bytes.len() != 5 {
        return None;
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = tz[1..3].parse().ok()?;
    let minutes: i32 = tz[3..5].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 60 + minutes) * 60)
}

/// A commit: a tree, parent commits, identities and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Id of this commit object.
    pub id: ObjectId,
    /// Id of the root tree of this commit.
    pub tree: ObjectId,
    /// Parent commit ids; empty for an initial commit.
    pub parents: Vec<ObjectId>,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

impl Commit {
    /// The first line of the commit message.
    pub fn short_message(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// Serialize a commit body.
pub(crate) fn encode_commit(
    tree: ObjectId,
    parents: &[ObjectId],
    author: &PersonIdent,
    committer: &PersonIdent,
    message: &str,
) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("tree ");
    out.push_str(&tree.hex());
    out.push('\n');
    for parent in parents {
        out.push_str("parent ");
        out.push_str(&parent.hex());
        out.push('\n');
    }
    out.push_str("author ");
    out.push_str(&author.format_line());
    out.push('\n');
    out.push_str("committer ");
    out.push_str(&committer.format_line());
    out.push_str("\n\n");
    out.push_str(message);
    out.into_bytes()
}

/// Decode a commit body.
pub(crate) fn decode_commit(id: ObjectId, bytes: &[u8]) -> Result<Commit> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| StoreError::InvalidObject(format!("commit {id} is not UTF-8")))?;
    let (header, message) = text
        .split_once("\n\n")
        .ok_or_else(|| StoreError::InvalidObject(format!("commit {id} has no message")))?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    for line in header.lines() {
        if let Some(hex_id) = line.strip_prefix("tree ") {
            tree = Some(ObjectId::from_hex(hex_id)?);
        } else if let Some(hex_id) = line.strip_prefix("parent ") {
            parents.push(ObjectId::from_hex(hex_id)?);
        } else if let Some(ident) = line.strip_prefix("author ") {
            author = Some(PersonIdent::parse_line(ident)?);
        } else if let Some(ident) = line.strip_prefix("committer ") {
            committer = Some(PersonIdent::parse_line(ident)?);
        }
    }

    let missing = |field: &str| StoreError::InvalidObject(format!("commit {id} missing {field}"));
    Ok(Commit {
        id,
        tree: tree.ok_or_else(|| missing("tree"))?,
        parents,
        author: author.ok_or_else(|| missing("author"))?,
        committer: committer.ok_or_else(|| missing("committer"))?,
        message: message.to_string(),
    })
}
