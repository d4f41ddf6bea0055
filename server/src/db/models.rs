//! Row mappers between the SQLite schema and the shared DTOs.
//!
//! Column order is fixed by the SELECT lists in `chat::store`; every query
//! that maps into a DTO must select the columns in the order documented on
//! the mapper.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

use lavoro_shared::{Attachment, Contact, Group, GroupMessage, Message};

/// Server-assigned timestamp. Fixed millisecond precision so the stored
/// text sorts chronologically under SQLite's lexicographic ORDER BY.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The next representable instant after `ts` at millisecond precision.
/// Used to keep per-thread send times strictly increasing.
pub fn instant_after(ts: &str) -> String {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => (dt.with_timezone(&Utc) + chrono::Duration::milliseconds(1))
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) => ts.to_string(),
    }
}

fn parse_ts(value: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn attachment_from(url: Option<String>, kind: Option<String>) -> Option<Attachment> {
    match (url, kind) {
        (Some(url), Some(kind)) => Some(Attachment { url, kind }),
        (Some(url), None) => Some(Attachment {
            url,
            kind: "file".to_string(),
        }),
        _ => None,
    }
}

/// Columns: id, sender_id, receiver_id, body, attachment_url,
/// attachment_kind, sent_at, is_read, edited, edited_at
pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let sent_at: String = row.get(6)?;
    let edited_at: Option<String> = row.get(9)?;
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        body: row.get(3)?,
        attachment: attachment_from(row.get(4)?, row.get(5)?),
        sent_at: parse_ts(sent_at, 6)?,
        is_read: row.get(7)?,
        edited: row.get(8)?,
        edited_at: edited_at.map(|v| parse_ts(v, 9)).transpose()?,
    })
}

/// Columns: id, group_id, sender_id, body, attachment_url, attachment_kind,
/// sent_at, read_by, edited, edited_at
pub fn group_message_from_row(row: &Row<'_>) -> rusqlite::Result<GroupMessage> {
    let sent_at: String = row.get(6)?;
    let read_by: String = row.get(7)?;
    let edited_at: Option<String> = row.get(9)?;
    Ok(GroupMessage {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        attachment: attachment_from(row.get(4)?, row.get(5)?),
        sent_at: parse_ts(sent_at, 6)?,
        read_by: serde_json::from_str(&read_by).unwrap_or_default(),
        edited: row.get(8)?,
        edited_at: edited_at.map(|v| parse_ts(v, 9)).transpose()?,
    })
}

/// Columns: id, name, description, creator_id, avatar_url, created_at.
/// Members are joined in separately by the caller.
pub fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    let created_at: String = row.get(5)?;
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        creator_id: row.get(3)?,
        members: Vec::new(),
        avatar_url: row.get(4)?,
        created_at: parse_ts(created_at, 5)?,
    })
}

/// Columns: id, display_name, avatar_url
pub fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
    })
}
