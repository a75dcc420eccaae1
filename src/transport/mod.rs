//! Chat transport seam.
//!
//! The core only needs to send text, send an image and edit an earlier
//! message. [`Notifier`] wraps any [`ChatTransport`] with a timeout and turns
//! every failure into a log line, so delivery problems never reach the
//! workflow or the approval path.

pub mod console;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::registry::UserId;

pub use console::ConsoleTransport;
pub use memory::{MemoryTransport, Outbound};

pub type ChatId = i64;

/// Address of a message we sent, needed to edit it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Opaque reference to an uploaded file, e.g. a photo file id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub callback: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback: callback.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "rows", rename_all = "snake_case")]
pub enum Keyboard {
    /// Buttons attached to the message; pressing one sends its callback.
    Inline(Vec<Vec<Button>>),
    /// Replacement keyboard; pressing a key sends its label as text.
    Reply(Vec<Vec<String>>),
    /// Remove buttons from the message.
    Remove,
}

impl Keyboard {
    /// Callback payloads carried by an inline keyboard.
    pub fn callbacks(&self) -> Vec<&str> {
        match self {
            Keyboard::Inline(rows) => rows
                .iter()
                .flatten()
                .map(|button| button.callback.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("chat {chat_id} did not accept the message: {reason}")]
    Rejected { chat_id: ChatId, reason: String },
    #[error("transport timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("transport i/o error: {0}")]
    Io(String),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError>;

    async fn send_image(
        &self,
        chat_id: ChatId,
        artifact: &ArtifactRef,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError>;

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;
}

/// One inbound update from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub from: Sender,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Text { text: String },
    Command { name: String },
    Image { artifact: ArtifactRef },
    Button {
        callback: String,
        /// Message the pressed button was attached to.
        #[serde(default)]
        message_id: Option<i64>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Text { .. } => "text",
            EventKind::Command { .. } => "command",
            EventKind::Image { .. } => "image",
            EventKind::Button { .. } => "button",
        }
    }
}

impl InboundEvent {
    /// The message a button press came from, if known.
    pub fn origin(&self) -> Option<MessageRef> {
        match &self.kind {
            EventKind::Button {
                message_id: Some(message_id),
                ..
            } => Some(MessageRef {
                chat_id: self.chat_id,
                message_id: *message_id,
            }),
            _ => None,
        }
    }
}

/// Fire-and-forget delivery on top of a [`ChatTransport`].
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChatTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub async fn text(&self, chat_id: ChatId, text: &str, keyboard: Option<Keyboard>) -> Option<MessageRef> {
        let sent = self
            .bounded(self.transport.send_text(chat_id, text, keyboard))
            .await;
        self.settle("send_text", chat_id, sent)
    }

    pub async fn image(
        &self,
        chat_id: ChatId,
        artifact: &ArtifactRef,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> Option<MessageRef> {
        let sent = self
            .bounded(self.transport.send_image(chat_id, artifact, caption, keyboard))
            .await;
        self.settle("send_image", chat_id, sent)
    }

    pub async fn edit(&self, message: MessageRef, text: &str, keyboard: Option<Keyboard>) -> bool {
        let edited = self
            .bounded(self.transport.edit_message(message, text, keyboard))
            .await;
        self.settle("edit_message", message.chat_id, edited).is_some()
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    fn settle<T>(&self, operation: &'static str, chat_id: ChatId, result: Result<T, TransportError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(operation, chat_id, error = %e, "Notification failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_inbound_json_lines() {
        let line = r#"{"chat_id":5,"from":{"id":5,"display_name":"Mya","handle":"mya"},"type":"button","callback":"plan:level1","message_id":42}"#;
        let event: InboundEvent = serde_json::from_str(line).unwrap();

        assert_eq!(event.from.handle.as_deref(), Some("mya"));
        assert_eq!(
            event.kind,
            EventKind::Button {
                callback: "plan:level1".to_string(),
                message_id: Some(42)
            }
        );
        assert_eq!(
            event.origin(),
            Some(MessageRef {
                chat_id: 5,
                message_id: 42
            })
        );
    }

    #[test]
    fn image_events_carry_the_artifact() {
        let line = r#"{"chat_id":1,"from":{"id":1},"type":"image","artifact":"file-abc"}"#;
        let event: InboundEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Image {
                artifact: ArtifactRef::new("file-abc")
            }
        );
        assert_eq!(event.from.display_name, "");
    }

    #[tokio::test]
    async fn notifier_swallows_transport_failures() {
        let mut transport = MockChatTransport::new();
        transport.expect_send_text().times(1).returning(|chat_id, _, _| {
            Err(TransportError::Rejected {
                chat_id,
                reason: "blocked".to_string(),
            })
        });

        let notifier = Notifier::new(Arc::new(transport), Duration::from_secs(1));
        assert_eq!(notifier.text(9, "hello", None).await, None);
    }

    struct StalledTransport;

    #[async_trait]
    impl ChatTransport for StalledTransport {
        async fn send_text(&self, _: ChatId, _: &str, _: Option<Keyboard>) -> Result<MessageRef, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TransportError::Io("unreachable".to_string()))
        }

        async fn send_image(
            &self,
            _: ChatId,
            _: &ArtifactRef,
            _: &str,
            _: Option<Keyboard>,
        ) -> Result<MessageRef, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TransportError::Io("unreachable".to_string()))
        }

        async fn edit_message(&self, _: MessageRef, _: &str, _: Option<Keyboard>) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn notifier_gives_up_after_its_timeout() {
        let notifier = Notifier::new(Arc::new(StalledTransport), Duration::from_millis(100));
        let message = MessageRef {
            chat_id: 1,
            message_id: 1,
        };
        assert!(!notifier.edit(message, "done", Some(Keyboard::Remove)).await);
        assert_eq!(notifier.text(1, "hi", None).await, None);
    }
}
