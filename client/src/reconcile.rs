//! Optimistic entries and duplicate-free merging.
//!
//! A send appends a local entry tagged with a `temp_` identifier before
//! the server confirms anything. The server later echoes the canonical
//! record back — possibly twice (socket event and REST response), possibly
//! out of order. Merging is keyed by canonical id, or by matching a
//! `temp_` entry with the same sender and body inside a bounded time
//! window; arrival order is never assumed.
//!
//! Everything here is pure and transport-independent.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use lavoro_shared::{Attachment, ConversationSummary, GroupMessage, GroupSummary, Message};

/// Prefix marking locally generated temporary identifiers.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// How long a temporary entry is eligible to be matched against a server
/// echo with the same sender and body.
pub const MATCH_WINDOW_SECS: i64 = 60;

/// Generate a temporary identifier for an optimistic entry.
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Outcome of merging one incoming record into the local set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record was new and has been appended.
    Inserted,
    /// The record replaced a matching optimistic entry.
    ReplacedOptimistic,
    /// The record's id was already present; nothing changed.
    Duplicate,
}

/// Common shape of direct and group messages for merging purposes.
pub trait ThreadEntry {
    fn id(&self) -> &str;
    fn sender_id(&self) -> &str;
    fn body(&self) -> &str;
    fn sent_at(&self) -> DateTime<Utc>;
}

impl ThreadEntry for Message {
    fn id(&self) -> &str {
        &self.id
    }
    fn sender_id(&self) -> &str {
        &self.sender_id
    }
    fn body(&self) -> &str {
        &self.body
    }
    fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }
}

impl ThreadEntry for GroupMessage {
    fn id(&self) -> &str {
        &self.id
    }
    fn sender_id(&self) -> &str {
        &self.sender_id
    }
    fn body(&self) -> &str {
        &self.body
    }
    fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }
}

/// Build an optimistic direct message stamped with local time.
pub fn optimistic_direct(
    sender_id: &str,
    receiver_id: &str,
    body: &str,
    attachment: Option<Attachment>,
    now: DateTime<Utc>,
) -> Message {
    Message {
        id: temp_id(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        body: body.to_string(),
        attachment,
        sent_at: now,
        is_read: false,
        edited: false,
        edited_at: None,
    }
}

/// Build an optimistic group message stamped with local time.
pub fn optimistic_group(
    group_id: &str,
    sender_id: &str,
    body: &str,
    attachment: Option<Attachment>,
    now: DateTime<Utc>,
) -> GroupMessage {
    GroupMessage {
        id: temp_id(),
        group_id: group_id.to_string(),
        sender_id: sender_id.to_string(),
        body: body.to_string(),
        attachment,
        sent_at: now,
        read_by: vec![sender_id.to_string()],
        edited: false,
        edited_at: None,
    }
}

fn matches_optimistic<T: ThreadEntry>(entry: &T, incoming: &T, now: DateTime<Utc>) -> bool {
    is_temp_id(entry.id())
        && entry.sender_id() == incoming.sender_id()
        && entry.body() == incoming.body()
        && now.signed_duration_since(entry.sent_at()) < Duration::seconds(MATCH_WINDOW_SECS)
}

/// Merge one incoming record into the local set without producing
/// duplicates, then restore display order.
pub fn merge_entry<T: ThreadEntry>(
    entries: &mut Vec<T>,
    incoming: T,
    now: DateTime<Utc>,
) -> MergeOutcome {
    if entries.iter().any(|e| e.id() == incoming.id()) {
        return MergeOutcome::Duplicate;
    }

    let outcome = if let Some(pos) = entries
        .iter()
        .position(|e| matches_optimistic(e, &incoming, now))
    {
        entries[pos] = incoming;
        MergeOutcome::ReplacedOptimistic
    } else {
        entries.push(incoming);
        MergeOutcome::Inserted
    };

    sort_entries(entries);
    outcome
}

/// Reconcile the local set against an authoritative server fetch.
///
/// The canonical list wins: local canonical entries missing from it were
/// deleted elsewhere. Optimistic entries still inside the match window are
/// carried over (their confirmation may simply not have landed yet); the
/// merge heuristic collapses them if the fetch already contains the echo.
pub fn merge_history<T: ThreadEntry>(
    entries: &mut Vec<T>,
    canonical: Vec<T>,
    now: DateTime<Utc>,
) {
    let mut merged = canonical;
    sort_entries(&mut merged);

    let local = std::mem::take(entries);
    for entry in local {
        let pending = is_temp_id(entry.id())
            && now.signed_duration_since(entry.sent_at()) < Duration::seconds(MATCH_WINDOW_SECS);
        if !pending {
            continue;
        }
        // The fetch may already contain this send's canonical echo; the
        // optimistic-match heuristic only looks from incoming to set, so
        // check the reverse direction here before carrying the entry over.
        let confirmed = merged.iter().any(|m| {
            !is_temp_id(m.id()) && m.sender_id() == entry.sender_id() && m.body() == entry.body()
        });
        if !confirmed {
            merge_entry(&mut merged, entry, now);
        }
    }

    *entries = merged;
}

/// Replace the entry with the same id. Returns false when it is absent
/// (e.g. the edit raced a delete).
pub fn apply_edit<T: ThreadEntry>(entries: &mut Vec<T>, updated: T) -> bool {
    match entries.iter().position(|e| e.id() == updated.id()) {
        Some(pos) => {
            entries[pos] = updated;
            sort_entries(entries);
            true
        }
        None => false,
    }
}

/// Remove the entry with the given id, if present.
pub fn apply_delete<T: ThreadEntry>(entries: &mut Vec<T>, id: &str) {
    entries.retain(|e| e.id() != id);
}

/// Display order: ascending sent_at, id as the deterministic tiebreak.
/// Clients order by timestamp, never by event arrival.
pub fn sort_entries<T: ThreadEntry>(entries: &mut [T]) {
    entries.sort_by(|a, b| {
        a.sent_at()
            .cmp(&b.sent_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

/// Sidebar order: last-message recency descending, counterpart id tiebreak.
pub fn sort_conversations(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| {
        b.last_message
            .sent_at
            .cmp(&a.last_message.sent_at)
            .then_with(|| a.counterpart.id.cmp(&b.counterpart.id))
    });
}

/// Same recency rule over group last-message (or creation) time.
pub fn sort_groups(summaries: &mut [GroupSummary]) {
    summaries.sort_by(|a, b| {
        b.recency()
            .cmp(&a.recency())
            .then_with(|| a.group.id.cmp(&b.group.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn canonical(id: &str, sender: &str, body: &str, sent: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            receiver_id: "bob".to_string(),
            body: body.to_string(),
            attachment: None,
            sent_at: sent,
            is_read: false,
            edited: false,
            edited_at: None,
        }
    }

    #[test]
    fn echo_replaces_optimistic_entry_within_window() {
        let now = at(30);
        let mut set = vec![optimistic_direct("alice", "bob", "hello", None, at(0))];

        let outcome = merge_entry(&mut set, canonical("m1", "alice", "hello", at(1)), now);
        assert_eq!(outcome, MergeOutcome::ReplacedOptimistic);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].id, "m1");
    }

    #[test]
    fn echo_outside_window_is_appended_not_matched() {
        let now = at(120);
        let mut set = vec![optimistic_direct("alice", "bob", "hello", None, at(0))];

        let outcome = merge_entry(&mut set, canonical("m1", "alice", "hello", at(90)), now);
        assert_eq!(outcome, MergeOutcome::Inserted);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn repeated_canonical_id_is_a_duplicate() {
        let now = at(10);
        let mut set = Vec::new();
        merge_entry(&mut set, canonical("m1", "alice", "hello", at(1)), now);
        let outcome = merge_entry(&mut set, canonical("m1", "alice", "hello", at(1)), now);
        assert_eq!(outcome, MergeOutcome::Duplicate);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn double_echo_rest_then_socket_yields_one_message() {
        // REST confirmation and socket event carry the same canonical id;
        // whichever lands second must be a no-op.
        let now = at(5);
        let mut set = vec![optimistic_direct("alice", "bob", "hi", None, at(0))];

        merge_entry(&mut set, canonical("m9", "alice", "hi", at(1)), now);
        merge_entry(&mut set, canonical("m9", "alice", "hi", at(1)), now);

        assert_eq!(set.len(), 1);
        assert_eq!(set[0].id, "m9");
    }

    #[test]
    fn merge_keeps_timestamp_order_not_arrival_order() {
        let now = at(10);
        let mut set = Vec::new();
        merge_entry(&mut set, canonical("m2", "bob", "second", at(5)), now);
        merge_entry(&mut set, canonical("m1", "alice", "first", at(1)), now);

        let bodies: Vec<&str> = set.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn history_merge_is_authoritative_but_keeps_pending_sends() {
        let now = at(10);
        let mut set = vec![
            canonical("m1", "alice", "kept", at(1)),
            canonical("m2", "alice", "deleted elsewhere", at(2)),
            optimistic_direct("alice", "bob", "pending", None, at(9)),
        ];

        // Server fetch no longer contains m2.
        merge_history(&mut set, vec![canonical("m1", "alice", "kept", at(1))], now);

        let ids: Vec<&str> = set.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "m1");
        assert!(is_temp_id(ids[1]));
    }

    #[test]
    fn history_merge_collapses_confirmed_optimistic_entries() {
        let now = at(10);
        let mut set = vec![optimistic_direct("alice", "bob", "hello", None, at(0))];

        merge_history(&mut set, vec![canonical("m1", "alice", "hello", at(1))], now);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].id, "m1");
    }

    #[test]
    fn periodic_refetch_never_duplicates_a_confirmed_send() {
        // A pending optimistic entry plus a refetch that already carries
        // its echo, applied on several consecutive ticks.
        let mut set = vec![optimistic_direct("alice", "bob", "hello", None, at(0))];
        let fetch = vec![canonical("m1", "alice", "hello", at(1))];

        for tick in 1..=3 {
            merge_history(&mut set, fetch.clone(), at(tick * 5));
            assert_eq!(set.len(), 1, "duplicate after tick {tick}");
            assert_eq!(set[0].id, "m1");
        }
    }

    #[test]
    fn edit_and_delete_apply_by_id() {
        let now = at(10);
        let mut set = Vec::new();
        merge_entry(&mut set, canonical("m1", "alice", "hello", at(1)), now);

        let mut edited = canonical("m1", "alice", "hello!", at(1));
        edited.edited = true;
        assert!(apply_edit(&mut set, edited));
        assert_eq!(set[0].body, "hello!");
        assert!(set[0].edited);

        apply_delete(&mut set, "m1");
        assert!(set.is_empty());
        // Deleting again is harmless.
        apply_delete(&mut set, "m1");
    }

    #[test]
    fn conversation_sort_is_recency_descending_with_id_tiebreak() {
        use lavoro_shared::Contact;

        let summary = |id: &str, sent: DateTime<Utc>| ConversationSummary {
            counterpart: Contact {
                id: id.to_string(),
                display_name: id.to_string(),
                avatar_url: None,
            },
            last_message: canonical("m", "alice", "x", sent),
            unread_count: 0,
        };

        let mut summaries = vec![
            summary("carol", at(1)),
            summary("bob", at(5)),
            summary("anna", at(5)),
        ];
        sort_conversations(&mut summaries);
        let order: Vec<&str> = summaries.iter().map(|s| s.counterpart.id.as_str()).collect();
        assert_eq!(order, vec!["anna", "bob", "carol"]);
    }
}
