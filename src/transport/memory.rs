//! In-memory transport that records everything it is asked to deliver.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use super::{ArtifactRef, ChatId, ChatTransport, Keyboard, MessageRef, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text {
        message: MessageRef,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Image {
        message: MessageRef,
        artifact: ArtifactRef,
        caption: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        message: MessageRef,
        text: String,
        keyboard: Option<Keyboard>,
    },
}

impl Outbound {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Outbound::Text { message, .. }
            | Outbound::Image { message, .. }
            | Outbound::Edit { message, .. } => message.chat_id,
        }
    }

    /// Message text, or the caption of an image.
    pub fn body(&self) -> &str {
        match self {
            Outbound::Text { text, .. } | Outbound::Edit { text, .. } => text,
            Outbound::Image { caption, .. } => caption,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Outbound::Text { keyboard, .. }
            | Outbound::Image { keyboard, .. }
            | Outbound::Edit { keyboard, .. } => keyboard.as_ref(),
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    outbound: Vec<Outbound>,
    next_id: i64,
    unreachable: HashSet<ChatId>,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<Recorded>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `chat_id` fail, as if the user blocked the bot.
    pub fn make_unreachable(&self, chat_id: ChatId) {
        self.recorded().unreachable.insert(chat_id);
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.recorded().outbound.clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<Outbound> {
        self.recorded()
            .outbound
            .iter()
            .filter(|o| o.chat_id() == chat_id)
            .cloned()
            .collect()
    }

    pub fn last_to(&self, chat_id: ChatId) -> Option<Outbound> {
        self.recorded()
            .outbound
            .iter()
            .rev()
            .find(|o| o.chat_id() == chat_id)
            .cloned()
    }

    pub fn images_to(&self, chat_id: ChatId) -> Vec<Outbound> {
        self.sent_to(chat_id)
            .into_iter()
            .filter(|o| matches!(o, Outbound::Image { .. }))
            .collect()
    }

    pub fn edits(&self) -> Vec<Outbound> {
        self.recorded()
            .outbound
            .iter()
            .filter(|o| matches!(o, Outbound::Edit { .. }))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.recorded().outbound.clear();
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, chat_id: ChatId, build: impl FnOnce(MessageRef) -> Outbound) -> Result<MessageRef, TransportError> {
        let mut state = self.recorded();
        if state.unreachable.contains(&chat_id) {
            return Err(TransportError::Rejected {
                chat_id,
                reason: "bot was blocked by the user".to_string(),
            });
        }
        state.next_id += 1;
        let message = MessageRef {
            chat_id,
            message_id: state.next_id,
        };
        state.outbound.push(build(message));
        Ok(message)
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        self.record(chat_id, |message| Outbound::Text {
            message,
            text: text.to_string(),
            keyboard,
        })
    }

    async fn send_image(
        &self,
        chat_id: ChatId,
        artifact: &ArtifactRef,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        self.record(chat_id, |message| Outbound::Image {
            message,
            artifact: artifact.clone(),
            caption: caption.to_string(),
            keyboard,
        })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        self.record(message.chat_id, |_| Outbound::Edit {
            message,
            text: text.to_string(),
            keyboard,
        })
        .map(|_| ())
    }
}
