use std::collections::HashSet;

use crate::frame::PresenceStatus;

/// Users currently online, as last reported by `presence` frames.
///
/// There is no expiry: an entry is only as fresh as the last frame seen for
/// that user.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: HashSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, user_id: &str, status: PresenceStatus) {
        match status {
            PresenceStatus::Online => self.set_online(user_id),
            PresenceStatus::Offline => self.set_offline(user_id),
        }
    }

    pub fn set_online(&mut self, user_id: &str) {
        if !self.online.contains(user_id) {
            self.online.insert(user_id.to_string());
        }
    }

    pub fn set_offline(&mut self, user_id: &str) {
        self.online.remove(user_id);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }
}
