//! Message store and conversation aggregation.
//!
//! Every function here takes a `&Connection` and runs synchronously;
//! handlers call them through `tokio::task::spawn_blocking`. The messages
//! tables are the single source of truth — conversation and group summaries
//! are recomputed from them on every read.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use lavoro_shared::{
    Attachment, Contact, ConversationSummary, Group, GroupMessage, GroupSummary, Message,
};

use crate::db::models;
use crate::error::ApiError;

/// Maximum message body length (chars).
pub const MAX_BODY_LENGTH: usize = 4000;

const MESSAGE_COLS: &str = "id, sender_id, receiver_id, body, attachment_url, \
                            attachment_kind, sent_at, is_read, edited, edited_at";
const GROUP_MESSAGE_COLS: &str = "id, group_id, sender_id, body, attachment_url, \
                                  attachment_kind, sent_at, read_by, edited, edited_at";
const GROUP_COLS: &str = "id, name, description, creator_id, avatar_url, created_at";

// --- Contacts ---

/// Upsert a contact record mirrored from the identity service.
pub fn upsert_contact(conn: &Connection, contact: &Contact) -> Result<(), ApiError> {
    if contact.id.trim().is_empty() || contact.display_name.trim().is_empty() {
        return Err(ApiError::Validation(
            "contact id and display_name are required".to_string(),
        ));
    }
    conn.execute(
        "INSERT INTO users (id, display_name, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             avatar_url = excluded.avatar_url",
        params![
            contact.id,
            contact.display_name,
            contact.avatar_url,
            models::now_rfc3339()
        ],
    )?;
    Ok(())
}

/// All addressable users except the requester, sorted by display name.
pub fn list_contacts(conn: &Connection, user_id: &str) -> Result<Vec<Contact>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, avatar_url FROM users
         WHERE id != ?1
         ORDER BY display_name ASC, id ASC",
    )?;
    let contacts = stmt
        .query_map(params![user_id], models::contact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contacts)
}

/// Look up a contact, falling back to a placeholder when the identity
/// service has not synced the user yet. Aggregation must not fail on an
/// unknown counterpart.
fn contact_or_placeholder(conn: &Connection, id: &str) -> Result<Contact, ApiError> {
    let found = conn
        .query_row(
            "SELECT id, display_name, avatar_url FROM users WHERE id = ?1",
            params![id],
            models::contact_from_row,
        )
        .optional()?;
    Ok(found.unwrap_or_else(|| Contact {
        id: id.to_string(),
        display_name: id.to_string(),
        avatar_url: None,
    }))
}

// --- Direct messages ---

fn validate_body(body: &str, attachment: &Option<Attachment>) -> Result<String, ApiError> {
    let body = body.trim().to_string();
    if body.is_empty() && attachment.is_none() {
        return Err(ApiError::Validation(
            "message requires a body or an attachment".to_string(),
        ));
    }
    if body.len() > MAX_BODY_LENGTH {
        return Err(ApiError::Validation(format!(
            "message body exceeds {MAX_BODY_LENGTH} characters"
        )));
    }
    Ok(body)
}

/// Server-assigned send time: strictly later than the previous message of
/// the thread, so per-conversation order stays meaningful under rapid
/// sends and even if the clock steps backwards. MAX() yields one row
/// containing NULL for an empty thread.
fn next_sent_at(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<String> {
    let last: Option<String> = conn.query_row(sql, params, |row| row.get(0))?;
    let now = models::now_rfc3339();
    Ok(match last {
        Some(last) if last >= now => models::instant_after(&last),
        _ => now,
    })
}

/// Store a direct message. Fails with Validation when the body is empty
/// with no attachment or when sender and receiver coincide.
pub fn insert_direct_message(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
    body: &str,
    attachment: Option<Attachment>,
) -> Result<Message, ApiError> {
    if sender_id == receiver_id {
        return Err(ApiError::Validation(
            "sender and receiver must differ".to_string(),
        ));
    }
    let body = validate_body(body, &attachment)?;

    let sent_at = next_sent_at(
        conn,
        "SELECT MAX(sent_at) FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)",
        params![sender_id, receiver_id],
    )?;

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages (id, sender_id, receiver_id, body, attachment_url,
                               attachment_kind, sent_at, is_read, edited)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0)",
        params![
            id,
            sender_id,
            receiver_id,
            body,
            attachment.as_ref().map(|a| a.url.clone()),
            attachment.as_ref().map(|a| a.kind.clone()),
            sent_at,
        ],
    )?;

    get_direct_message(conn, &id)
}

pub fn get_direct_message(conn: &Connection, id: &str) -> Result<Message, ApiError> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
        params![id],
        models::message_from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::NotFound(format!("message {id}")))
}

/// All messages between the pair in ascending sent_at order. Marks the
/// messages addressed to `user_id` as read first (the fetch is the
/// "conversation opened" signal).
pub fn conversation_between(
    conn: &Connection,
    user_id: &str,
    other_id: &str,
) -> Result<Vec<Message>, ApiError> {
    mark_conversation_read(conn, user_id, other_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY sent_at ASC, id ASC"
    ))?;
    let messages = stmt
        .query_map(params![user_id, other_id], models::message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Batch-update is_read on the underlying rows, not just a summary.
pub fn mark_conversation_read(
    conn: &Connection,
    user_id: &str,
    other_id: &str,
) -> Result<usize, ApiError> {
    let updated = conn.execute(
        "UPDATE messages SET is_read = 1
         WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
        params![user_id, other_id],
    )?;
    Ok(updated)
}

/// Edit a direct message. Only the original sender may edit.
pub fn edit_direct_message(
    conn: &Connection,
    id: &str,
    requester_id: &str,
    new_body: &str,
) -> Result<Message, ApiError> {
    let message = get_direct_message(conn, id)?;
    if message.sender_id != requester_id {
        return Err(ApiError::Authorization(
            "only the sender can edit a message".to_string(),
        ));
    }
    let new_body = validate_body(new_body, &message.attachment)?;

    conn.execute(
        "UPDATE messages SET body = ?2, edited = 1, edited_at = ?3 WHERE id = ?1",
        params![id, new_body, models::now_rfc3339()],
    )?;
    get_direct_message(conn, id)
}

/// Delete a direct message. Only the original sender may delete. Returns
/// the removed record so the caller can mirror the deletion to connected
/// clients.
pub fn delete_direct_message(
    conn: &Connection,
    id: &str,
    requester_id: &str,
) -> Result<Message, ApiError> {
    let message = get_direct_message(conn, id)?;
    if message.sender_id != requester_id {
        return Err(ApiError::Authorization(
            "only the sender can delete a message".to_string(),
        ));
    }
    conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
    Ok(message)
}

// --- Conversation aggregation ---

/// Per-user conversation summaries: last message and unread count per
/// counterpart, recency-descending, counterpart id as the deterministic
/// tiebreak. Only counterparts with at least one real message appear.
pub fn list_conversations(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM messages
         WHERE sender_id = ?1 OR receiver_id = ?1
         ORDER BY sent_at ASC, id ASC"
    ))?;
    let messages = stmt
        .query_map(params![user_id], models::message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    // Ascending scan: the last message seen per counterpart wins.
    let mut threads: HashMap<String, (Message, u32)> = HashMap::new();
    for message in messages {
        let counterpart = if message.sender_id == user_id {
            message.receiver_id.clone()
        } else {
            message.sender_id.clone()
        };
        let unread_increment =
            u32::from(message.receiver_id == user_id && !message.is_read);
        match threads.get_mut(&counterpart) {
            Some((last, unread)) => {
                *last = message;
                *unread += unread_increment;
            }
            None => {
                threads.insert(counterpart, (message, unread_increment));
            }
        }
    }

    let mut summaries = Vec::with_capacity(threads.len());
    for (counterpart_id, (last_message, unread_count)) in threads {
        summaries.push(ConversationSummary {
            counterpart: contact_or_placeholder(conn, &counterpart_id)?,
            last_message,
            unread_count,
        });
    }
    summaries.sort_by(|a, b| {
        b.last_message
            .sent_at
            .cmp(&a.last_message.sent_at)
            .then_with(|| a.counterpart.id.cmp(&b.counterpart.id))
    });
    Ok(summaries)
}

// --- Groups ---

/// Create a group. The creator is always a member.
pub fn create_group(
    conn: &Connection,
    name: &str,
    description: Option<String>,
    creator_id: &str,
    members: &[String],
    avatar_url: Option<String>,
) -> Result<Group, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("group name is required".to_string()));
    }

    let mut member_set: Vec<String> = members.to_vec();
    if !member_set.iter().any(|m| m == creator_id) {
        member_set.push(creator_id.to_string());
    }
    member_set.sort();
    member_set.dedup();
    if member_set.is_empty() {
        return Err(ApiError::Validation("group needs members".to_string()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = models::now_rfc3339();
    conn.execute(
        "INSERT INTO groups (id, name, description, creator_id, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, name, description, creator_id, avatar_url, now],
    )?;
    for member in &member_set {
        conn.execute(
            "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![id, member, now],
        )?;
    }

    get_group(conn, &id)
}

pub fn get_group(conn: &Connection, group_id: &str) -> Result<Group, ApiError> {
    let mut group = conn
        .query_row(
            &format!("SELECT {GROUP_COLS} FROM groups WHERE id = ?1"),
            params![group_id],
            models::group_from_row,
        )
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("group {group_id}")))?;
    group.members = group_member_ids(conn, group_id)?;
    Ok(group)
}

fn group_member_ids(conn: &Connection, group_id: &str) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id ASC",
    )?;
    let members = stmt
        .query_map(params![group_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

pub fn is_member(conn: &Connection, group_id: &str, user_id: &str) -> Result<bool, ApiError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn require_member(conn: &Connection, group_id: &str, user_id: &str) -> Result<(), ApiError> {
    if !is_member(conn, group_id, user_id)? {
        return Err(ApiError::Authorization(format!(
            "user {user_id} is not a member of the group"
        )));
    }
    Ok(())
}

/// Add a user to a group. Only existing members may add.
pub fn add_group_member(
    conn: &Connection,
    group_id: &str,
    requester_id: &str,
    user_id: &str,
) -> Result<Group, ApiError> {
    get_group(conn, group_id)?;
    require_member(conn, group_id, requester_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![group_id, user_id, models::now_rfc3339()],
    )?;
    get_group(conn, group_id)
}

/// Remove a user from a group. The creator cannot be removed; members can
/// remove themselves, the creator can remove anyone else.
pub fn remove_group_member(
    conn: &Connection,
    group_id: &str,
    requester_id: &str,
    user_id: &str,
) -> Result<Group, ApiError> {
    let group = get_group(conn, group_id)?;
    require_member(conn, group_id, requester_id)?;
    if user_id == group.creator_id {
        return Err(ApiError::Validation(
            "the group creator cannot be removed".to_string(),
        ));
    }
    if requester_id != user_id && requester_id != group.creator_id {
        return Err(ApiError::Authorization(
            "only the creator can remove other members".to_string(),
        ));
    }
    conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id],
    )?;
    get_group(conn, group_id)
}

// --- Group messages ---

/// Store a group message. Fails with Authorization when the sender is not
/// a member at send time.
pub fn insert_group_message(
    conn: &Connection,
    group_id: &str,
    sender_id: &str,
    body: &str,
    attachment: Option<Attachment>,
) -> Result<GroupMessage, ApiError> {
    get_group(conn, group_id)?;
    require_member(conn, group_id, sender_id)?;
    let body = validate_body(body, &attachment)?;

    let sent_at = next_sent_at(
        conn,
        "SELECT MAX(sent_at) FROM group_messages WHERE group_id = ?1",
        params![group_id],
    )?;

    let id = uuid::Uuid::new_v4().to_string();
    // The sender has read their own message.
    let read_by = serde_json::to_string(&[sender_id])
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    conn.execute(
        "INSERT INTO group_messages (id, group_id, sender_id, body, attachment_url,
                                     attachment_kind, sent_at, read_by, edited)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            id,
            group_id,
            sender_id,
            body,
            attachment.as_ref().map(|a| a.url.clone()),
            attachment.as_ref().map(|a| a.kind.clone()),
            sent_at,
            read_by,
        ],
    )?;

    get_group_message(conn, &id)
}

pub fn get_group_message(conn: &Connection, id: &str) -> Result<GroupMessage, ApiError> {
    conn.query_row(
        &format!("SELECT {GROUP_MESSAGE_COLS} FROM group_messages WHERE id = ?1"),
        params![id],
        models::group_message_from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::NotFound(format!("group message {id}")))
}

/// Group history in ascending sent_at order, members only. The requester
/// is appended to read_by of every fetched message.
pub fn group_messages(
    conn: &Connection,
    group_id: &str,
    requester_id: &str,
) -> Result<Vec<GroupMessage>, ApiError> {
    get_group(conn, group_id)?;
    require_member(conn, group_id, requester_id)?;
    mark_group_read(conn, group_id, requester_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_MESSAGE_COLS} FROM group_messages
         WHERE group_id = ?1
         ORDER BY sent_at ASC, id ASC"
    ))?;
    let messages = stmt
        .query_map(params![group_id], models::group_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

fn mark_group_read(
    conn: &Connection,
    group_id: &str,
    user_id: &str,
) -> Result<(), ApiError> {
    let mut stmt =
        conn.prepare("SELECT id, read_by FROM group_messages WHERE group_id = ?1")?;
    let rows = stmt
        .query_map(params![group_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, read_by_json) in rows {
        let mut read_by: Vec<String> = serde_json::from_str(&read_by_json).unwrap_or_default();
        if !read_by.iter().any(|r| r == user_id) {
            read_by.push(user_id.to_string());
            let updated = serde_json::to_string(&read_by)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            conn.execute(
                "UPDATE group_messages SET read_by = ?2 WHERE id = ?1",
                params![id, updated],
            )?;
        }
    }
    Ok(())
}

/// Edit a group message. Only the original sender may edit.
pub fn edit_group_message(
    conn: &Connection,
    id: &str,
    requester_id: &str,
    new_body: &str,
) -> Result<GroupMessage, ApiError> {
    let message = get_group_message(conn, id)?;
    if message.sender_id != requester_id {
        return Err(ApiError::Authorization(
            "only the sender can edit a group message".to_string(),
        ));
    }
    let new_body = validate_body(new_body, &message.attachment)?;
    conn.execute(
        "UPDATE group_messages SET body = ?2, edited = 1, edited_at = ?3 WHERE id = ?1",
        params![id, new_body, models::now_rfc3339()],
    )?;
    get_group_message(conn, id)
}

/// Delete a group message. Allowed for the sender and for the group
/// creator.
pub fn delete_group_message(
    conn: &Connection,
    id: &str,
    requester_id: &str,
) -> Result<GroupMessage, ApiError> {
    let message = get_group_message(conn, id)?;
    let group = get_group(conn, &message.group_id)?;
    if message.sender_id != requester_id && group.creator_id != requester_id {
        return Err(ApiError::Authorization(
            "only the sender or the group creator can delete a group message".to_string(),
        ));
    }
    conn.execute("DELETE FROM group_messages WHERE id = ?1", params![id])?;
    Ok(message)
}

// --- Group aggregation ---

/// Per-user group summaries with the same recency ordering as direct
/// conversations; a group with no messages sorts by creation time.
pub fn list_groups(conn: &Connection, user_id: &str) -> Result<Vec<GroupSummary>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_COLS} FROM groups g
         WHERE EXISTS (SELECT 1 FROM group_members m
                       WHERE m.group_id = g.id AND m.user_id = ?1)"
    ))?;
    let groups = stmt
        .query_map(params![user_id], models::group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut summaries = Vec::with_capacity(groups.len());
    for mut group in groups {
        group.members = group_member_ids(conn, &group.id)?;

        let last_message = conn
            .query_row(
                &format!(
                    "SELECT {GROUP_MESSAGE_COLS} FROM group_messages
                     WHERE group_id = ?1
                     ORDER BY sent_at DESC, id DESC LIMIT 1"
                ),
                params![group.id],
                models::group_message_from_row,
            )
            .optional()?;

        let unread_count = group_unread_count(conn, &group.id, user_id)?;
        summaries.push(GroupSummary {
            group,
            last_message,
            unread_count,
        });
    }

    summaries.sort_by(|a, b| {
        b.recency()
            .cmp(&a.recency())
            .then_with(|| a.group.id.cmp(&b.group.id))
    });
    Ok(summaries)
}

fn group_unread_count(
    conn: &Connection,
    group_id: &str,
    user_id: &str,
) -> Result<u32, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT sender_id, read_by FROM group_messages WHERE group_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![group_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let unread = rows
        .iter()
        .filter(|(sender, read_by_json)| {
            if sender == user_id {
                return false;
            }
            let read_by: Vec<String> = serde_json::from_str(read_by_json).unwrap_or_default();
            !read_by.iter().any(|r| r == user_id)
        })
        .count();
    Ok(unread as u32)
}
