use std::collections::HashMap;

/// Who is typing to this user. A missing entry means "not typing".
///
/// Inbound `typing` frames are applied as-is; debouncing is the sender's job.
#[derive(Debug, Default, Clone)]
pub struct TypingTracker {
    typing: HashMap<String, bool>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, user_id: &str, is_typing: bool) {
        if is_typing {
            self.typing.insert(user_id.to_string(), true);
        } else {
            self.typing.remove(user_id);
        }
    }

    pub fn is_typing(&self, user_id: &str) -> bool {
        self.typing.get(user_id).copied().unwrap_or(false)
    }

    pub fn typing_users(&self) -> impl Iterator<Item = &str> {
        self.typing.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.typing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.typing.is_empty()
    }

    pub fn clear(&mut self) {
        self.typing.clear();
    }
}
