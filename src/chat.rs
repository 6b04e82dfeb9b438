use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// Stable handle to a message in the log. Holders may request updates
/// through it but the log remains sole owner of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId(u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
}

/// Ordered, append-only log of displayed messages. At most one message is
/// "open" (still streaming) at a time; appending anything closes the
/// previous open message first.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    open: Option<MessageId>,
    next_id: u64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a new message. An assistant message starts open (eligible for
    /// in-place updates); a user message is closed from the start.
    pub fn append(&mut self, role: ChatRole, content: impl Into<String>) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id,
            role,
            content: content.into(),
        });
        self.open = match role {
            ChatRole::Assistant => Some(id),
            ChatRole::User => None,
        };
        id
    }

    /// Append an assistant message that is never updated afterwards
    /// (errors, notices).
    pub fn append_closed(&mut self, role: ChatRole, content: impl Into<String>) -> MessageId {
        let id = self.append(role, content);
        self.open = None;
        id
    }

    /// Replace the content of the open message. A stale handle (message
    /// already closed, or log reset since) is a logged no-op so late
    /// fragments from a finished turn cannot corrupt the log.
    pub fn update(&mut self, id: MessageId, content: impl Into<String>) {
        if self.open != Some(id) {
            tracing::debug!(message = %id, "ignoring update to closed message");
            return;
        }
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.content = content.into();
        }
    }

    /// Seal the open message; further updates through its handle are no-ops.
    pub fn close(&mut self, id: MessageId) {
        if self.open == Some(id) {
            self.open = None;
        }
    }

    /// Drop every message and the open handle. The welcome state renders
    /// whenever the log is empty.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assistant_opens_then_update_replaces_content() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Assistant, "po");
        log.update(id, "pod1");
        assert_eq!(log.messages()[0].content, "pod1");
    }

    #[test]
    fn update_after_close_is_noop() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Assistant, "done");
        log.close(id);
        log.update(id, "clobbered");
        assert_eq!(log.messages()[0].content, "done");
    }

    #[test]
    fn user_append_closes_open_assistant_message() {
        let mut log = ChatLog::new();
        let open = log.append(ChatRole::Assistant, "streaming");
        log.append(ChatRole::User, "next question");
        log.update(open, "late fragment");
        assert_eq!(log.messages()[0].content, "streaming");
    }

    #[test]
    fn at_most_one_open_message() {
        let mut log = ChatLog::new();
        let first = log.append(ChatRole::Assistant, "one");
        let second = log.append(ChatRole::Assistant, "two");
        log.update(first, "stale");
        log.update(second, "fresh");
        assert_eq!(log.messages()[0].content, "one");
        assert_eq!(log.messages()[1].content, "fresh");
    }

    #[test]
    fn reset_clears_messages_and_open_handle() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Assistant, "bye");
        log.reset();
        assert!(log.is_empty());
        log.update(id, "ghost");
        assert!(log.is_empty());
    }
}
