//! Reconciliation of pushed and polled messages for one conversation.
//!
//! Messages reach a conversation over two channels with no ordering between
//! them: frames pushed over the socket and the history polled over REST. The
//! [`Timeline`] keeps the last polled history as the authoritative base, holds
//! pushed messages the base has not confirmed yet, and merges both by
//! `message_id` into one list sorted by `sent_at`.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::message::Message;

/// Merge two message lists into one, keeping each `message_id` once.
///
/// On duplicate ids the entry from `base` wins. The result is sorted by
/// `sent_at` ascending; the sort is stable, so messages with equal timestamps
/// keep their input order (`base` first).
pub fn merge_messages(base: &[Message], pushed: &[Message]) -> Vec<Message> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(base.len() + pushed.len());
    let mut merged: Vec<Message> = Vec::with_capacity(base.len() + pushed.len());

    for msg in base.iter().chain(pushed) {
        if ids.insert(msg.message_id.as_str()) {
            merged.push(msg.clone());
        }
    }

    merged.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
    merged
}

/// The merged message timeline of the conversation with `counterpart`.
#[derive(Debug, Clone)]
pub struct Timeline {
    counterpart: String,
    /// Last polled history
    base: Vec<Message>,
    /// Pushed messages not yet confirmed by a poll
    pushed: Vec<Message>,
    /// Read receipts received for messages sent to the counterpart. Never
    /// pruned; lives as long as the open conversation.
    read_marks: HashMap<String, DateTime<Utc>>,
    merged: Vec<Message>,
    /// Every id that has been part of the merged timeline. Never pruned;
    /// lives as long as the open conversation.
    seen: HashSet<String>,
}

impl Timeline {
    pub fn new(counterpart: impl Into<String>) -> Self {
        Self {
            counterpart: counterpart.into(),
            base: Vec::new(),
            pushed: Vec::new(),
            read_marks: HashMap::new(),
            merged: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn counterpart(&self) -> &str {
        &self.counterpart
    }

    pub fn messages(&self) -> &[Message] {
        &self.merged
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.merged.iter().any(|m| m.message_id == message_id)
    }

    /// Add a pushed message. Messages outside this conversation and ids
    /// already present are ignored.
    ///
    /// Returns the ids of unread counterpart messages observed for the first
    /// time.
    pub fn ingest_push(&mut self, msg: Message) -> Vec<String> {
        if !msg.involves(&self.counterpart) {
            return Vec::new();
        }
        if self.contains(&msg.message_id) {
            return Vec::new();
        }
        self.pushed.push(msg);
        self.rebuild();
        self.take_newly_observed()
    }

    /// Replace the polled history. Pushed messages the new history contains
    /// are dropped from the push buffer; the rest stay merged in.
    ///
    /// Returns the ids of unread counterpart messages observed for the first
    /// time.
    pub fn replace_base(&mut self, mut history: Vec<Message>) -> Vec<String> {
        history.retain(|m| m.involves(&self.counterpart));
        let confirmed: HashSet<&str> = history.iter().map(|m| m.message_id.as_str()).collect();
        self.pushed
            .retain(|m| !confirmed.contains(m.message_id.as_str()));
        self.base = history;
        self.rebuild();
        self.take_newly_observed()
    }

    /// Record that the counterpart read `message_ids` at `read_at`.
    ///
    /// Only messages sent to the counterpart are affected. Marks for ids not
    /// yet in the timeline are kept and applied once they arrive. Returns how
    /// many messages changed.
    pub fn apply_read_receipt(&mut self, message_ids: &[String], read_at: DateTime<Utc>) -> usize {
        for id in message_ids {
            self.read_marks.entry(id.clone()).or_insert(read_at);
        }
        let before = self.merged.iter().filter(|m| m.is_read).count();
        self.rebuild();
        let after = self.merged.iter().filter(|m| m.is_read).count();
        after.saturating_sub(before)
    }

    /// Make `message_ids` eligible to be reported as newly observed again.
    pub fn forget_seen(&mut self, message_ids: &[String]) {
        for id in message_ids {
            self.seen.remove(id);
        }
    }

    fn rebuild(&mut self) {
        let mut merged = merge_messages(&self.base, &self.pushed);
        for msg in &mut merged {
            if msg.is_read || msg.receiver_id != self.counterpart {
                continue;
            }
            if let Some(read_at) = self.read_marks.get(&msg.message_id) {
                msg.is_read = true;
                msg.read_at = Some(*read_at);
            }
        }
        self.merged = merged;
    }

    fn take_newly_observed(&mut self) -> Vec<String> {
        let mut fresh = Vec::new();
        for msg in &self.merged {
            if !self.seen.insert(msg.message_id.clone()) {
                continue;
            }
            if msg.sender_id == self.counterpart && !msg.is_read {
                fresh.push(msg.message_id.clone());
            }
        }
        fresh
    }
}
