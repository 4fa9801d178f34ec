use shared::{
    domain::{Message, MessageId, Nickname},
    protocol::ServerEvent,
};

use crate::{error::CommandError, surface::CommandSurface};

/// State of one open conversation, owned by whoever opened it.
///
/// Messages are kept in chronological order. The session ends when it is
/// consumed by [`ConversationSession::close`].
#[derive(Debug)]
pub struct ConversationSession {
    me: Nickname,
    peer: Nickname,
    messages: Vec<Message>,
}

impl ConversationSession {
    pub(crate) fn new(me: Nickname, peer: Nickname, messages: Vec<Message>) -> Self {
        let mut session = Self {
            me,
            peer,
            messages: Vec::new(),
        };
        session.replace(messages);
        session
    }

    pub fn peer(&self) -> &Nickname {
        &self.peer
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.id)
    }

    pub async fn send(
        &mut self,
        surface: &CommandSurface,
        text: &str,
        reply: Option<MessageId>,
    ) -> Result<&Message, CommandError> {
        let message = surface
            .deliver_message(self.peer.as_str(), text, reply)
            .await?;
        let id = message.id;
        self.insert(message);
        self.messages
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| CommandError::Storage("conversation lost a sent message".into()))
    }

    /// Applies a pushed event. Returns whether the history changed; events for
    /// other conversations and already-known messages are ignored.
    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        let ServerEvent::MessageReceived { recipient, message } = event else {
            return false;
        };
        let ours = (message.sender.same_account(&self.peer) && recipient.same_account(&self.me))
            || (message.sender.same_account(&self.me) && recipient.same_account(&self.peer));
        if !ours {
            return false;
        }
        self.insert(message.clone())
    }

    pub async fn refresh(&mut self, surface: &CommandSurface) -> Result<(), CommandError> {
        let history = surface.conversation_history(self.peer.as_str()).await?;
        self.replace(history);
        Ok(())
    }

    /// Ends the session and hands back its history.
    pub fn close(self) -> Vec<Message> {
        self.messages
    }

    fn replace(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        self.messages = messages;
    }

    fn insert(&mut self, message: Message) -> bool {
        match self.messages.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => false,
            Err(idx) => {
                self.messages.insert(idx, message);
                true
            }
        }
    }
}
