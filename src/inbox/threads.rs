use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::inbox::message::{InboxMessage, Participant};
use crate::viewer::Viewer;

/// Messages sharing a thread key, oldest first. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    key: String,
    messages: Vec<InboxMessage>,
}

impl Thread {
    fn new(key: String, messages: Vec<InboxMessage>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self { key, messages })
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn messages(&self) -> &[InboxMessage] {
        &self.messages
    }

    pub fn subject(&self) -> &str {
        &self.messages[0].subject
    }

    pub fn last_message(&self) -> &InboxMessage {
        &self.messages[self.messages.len() - 1]
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message().created_at
    }

    pub fn is_unread_for(&self, viewer: &Viewer) -> bool {
        self.messages.iter().any(|message| message.is_unread_for(viewer))
    }

    pub fn unread_count(&self, viewer: &Viewer) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_unread_for(viewer))
            .count()
    }

    /// The other side of the conversation from `participant_id`'s point of view.
    pub fn counterpart(&self, participant_id: &str) -> Option<&Participant> {
        self.messages.iter().find_map(|message| {
            if message.sender.id != participant_id {
                Some(&message.sender)
            } else if message.recipient.id != participant_id {
                Some(&message.recipient)
            } else {
                None
            }
        })
    }

    /// Sets the viewer's read flag on every message addressed to them and
    /// returns the ids that changed. A second call changes nothing.
    pub fn mark_read(&mut self, viewer: &Viewer) -> Vec<String> {
        let mut changed = Vec::new();
        for message in &mut self.messages {
            if message.is_unread_for(viewer) {
                message.read.set(viewer.role, true);
                changed.push(message.id.clone());
            }
        }
        changed
    }

    pub fn push(&mut self, message: InboxMessage) {
        self.messages.push(message);
        self.messages.sort_by_key(|message| message.created_at);
    }
}

/// Groups messages by thread key, each group sorted oldest first.
pub fn group_by_thread(messages: Vec<InboxMessage>) -> HashMap<String, Vec<InboxMessage>> {
    let mut groups: HashMap<String, Vec<InboxMessage>> = HashMap::new();
    for message in messages {
        groups
            .entry(message.thread_key().to_string())
            .or_default()
            .push(message);
    }
    for messages in groups.values_mut() {
        messages.sort_by_key(|message| message.created_at);
    }
    groups
}

/// Most recently active thread first. Equal activity falls back to key order.
pub fn order_threads(groups: HashMap<String, Vec<InboxMessage>>) -> Vec<Thread> {
    let mut threads: Vec<Thread> = groups
        .into_iter()
        .filter_map(|(key, messages)| Thread::new(key, messages))
        .collect();
    threads.sort_by(|a, b| {
        b.last_activity()
            .cmp(&a.last_activity())
            .then_with(|| a.key.cmp(&b.key))
    });
    threads
}

pub fn build_threads(messages: Vec<InboxMessage>) -> Vec<Thread> {
    order_threads(group_by_thread(messages))
}

/// Marks the thread with `thread_key` read for the viewer. Returns the ids of
/// messages whose flag changed, empty when the thread is unknown.
pub fn mark_thread_read(threads: &mut [Thread], thread_key: &str, viewer: &Viewer) -> Vec<String> {
    threads
        .iter_mut()
        .find(|thread| thread.key == thread_key)
        .map(|thread| thread.mark_read(viewer))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::message::{MessageKind, ParticipantRole, ReadFlags};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn participant(id: &str, role: ParticipantRole) -> Participant {
        Participant {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.com", id),
            role,
        }
    }

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap() + Duration::days(n)
    }

    fn to_parent(id: &str, thread_id: Option<&str>, created_at: DateTime<Utc>) -> InboxMessage {
        InboxMessage {
            id: id.to_string(),
            thread_id: thread_id.map(String::from),
            kind: MessageKind::General,
            subject: format!("Subject {}", id),
            body: String::new(),
            sender: participant("admin-1", ParticipantRole::Admin),
            recipient: participant("parent-1", ParticipantRole::Parent),
            created_at,
            read: ReadFlags::default(),
        }
    }

    fn to_admin(id: &str, thread_id: Option<&str>, created_at: DateTime<Utc>) -> InboxMessage {
        InboxMessage {
            sender: participant("parent-1", ParticipantRole::Parent),
            recipient: participant("admin-1", ParticipantRole::Admin),
            read: ReadFlags::read_by(ParticipantRole::Parent),
            ..to_parent(id, thread_id, created_at)
        }
    }

    fn parent() -> Viewer {
        Viewer::new("parent-1", ParticipantRole::Parent)
    }

    fn admin() -> Viewer {
        Viewer::new("admin-1", ParticipantRole::Admin)
    }

    fn ids(messages: &[InboxMessage]) -> Vec<&str> {
        messages.iter().map(|message| message.id.as_str()).collect()
    }

    #[test]
    fn groups_messages_by_thread_id_or_own_id() {
        let messages = vec![
            to_parent("m3", Some("t1"), day(3)),
            to_parent("m9", None, day(2)),
            to_parent("m1", Some("t1"), day(1)),
            to_admin("m2", Some("t1"), day(2)),
        ];

        let groups = group_by_thread(messages);

        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups["t1"]), vec!["m1", "m2", "m3"]);
        assert_eq!(ids(&groups["m9"]), vec!["m9"]);
    }

    #[test]
    fn threads_are_ordered_by_latest_message() {
        let messages = vec![
            to_parent("a", None, day(1)),
            to_parent("c", None, day(3)),
            to_parent("b", None, day(2)),
        ];

        let threads = build_threads(messages);

        let activity: Vec<DateTime<Utc>> = threads.iter().map(Thread::last_activity).collect();
        assert_eq!(activity, vec![day(3), day(2), day(1)]);
    }

    #[test]
    fn late_reply_moves_thread_to_top() {
        let messages = vec![
            to_parent("old-root", None, day(1)),
            to_parent("new-root", None, day(5)),
            to_admin("reply", Some("old-root"), day(6)),
        ];

        let threads = build_threads(messages);

        assert_eq!(threads[0].key(), "old-root");
        assert_eq!(threads[0].subject(), "Subject old-root");
        assert_eq!(threads[1].key(), "new-root");
    }

    #[test]
    fn thread_is_unread_when_a_message_to_viewer_is_unread() {
        let threads = build_threads(vec![
            to_parent("m1", Some("t1"), day(1)),
            to_admin("m2", Some("t1"), day(2)),
        ]);

        assert!(threads[0].is_unread_for(&parent()));
        assert_eq!(threads[0].unread_count(&parent()), 1);
        assert!(threads[0].is_unread_for(&admin()));
    }

    #[test]
    fn own_messages_do_not_make_thread_unread() {
        let threads = build_threads(vec![to_admin("m1", None, day(1))]);

        assert!(!threads[0].is_unread_for(&parent()));
    }

    #[test]
    fn marking_read_is_idempotent() {
        let mut once = build_threads(vec![
            to_parent("m1", Some("t1"), day(1)),
            to_admin("m2", Some("t1"), day(2)),
            to_parent("m3", Some("t1"), day(3)),
        ]);
        let mut twice = once.clone();

        let changed = mark_thread_read(&mut once, "t1", &parent());
        mark_thread_read(&mut twice, "t1", &parent());
        let changed_again = mark_thread_read(&mut twice, "t1", &parent());

        assert_eq!(changed, vec!["m1".to_string(), "m3".to_string()]);
        assert!(changed_again.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn marking_read_for_parent_leaves_admin_flag_alone() {
        let mut threads = build_threads(vec![
            to_parent("m1", Some("t1"), day(1)),
            to_admin("m2", Some("t1"), day(2)),
        ]);

        mark_thread_read(&mut threads, "t1", &parent());

        assert!(!threads[0].is_unread_for(&parent()));
        assert!(threads[0].is_unread_for(&admin()));
        assert!(!threads[0].messages()[0].read.is_read_by(ParticipantRole::Admin));
    }

    #[test]
    fn marking_unknown_thread_changes_nothing() {
        let mut threads = build_threads(vec![to_parent("m1", None, day(1))]);

        assert!(mark_thread_read(&mut threads, "missing", &parent()).is_empty());
        assert!(threads[0].is_unread_for(&parent()));
    }

    #[test]
    fn counterpart_is_the_other_participant() {
        let threads = build_threads(vec![to_parent("m1", None, day(1))]);

        let other = threads[0].counterpart("parent-1").unwrap();

        assert_eq!(other.id, "admin-1");
    }

    #[test]
    fn pushed_message_keeps_chronological_order() {
        let mut threads = build_threads(vec![to_parent("m1", Some("t1"), day(3))]);

        threads[0].push(to_admin("m0", Some("t1"), day(1)));

        assert_eq!(ids(threads[0].messages()), vec!["m0", "m1"]);
        assert_eq!(threads[0].last_activity(), day(3));
    }
}
