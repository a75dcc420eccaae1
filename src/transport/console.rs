// Line-oriented transport: every outbound message becomes one JSON object on
// stdout, so the bot can sit behind any adapter that speaks JSON lines.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ArtifactRef, ChatId, ChatTransport, Keyboard, MessageRef, TransportError};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Line<'a> {
    SendText {
        chat_id: ChatId,
        message_id: i64,
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        keyboard: Option<Keyboard>,
    },
    SendImage {
        chat_id: ChatId,
        message_id: i64,
        artifact: &'a ArtifactRef,
        caption: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        keyboard: Option<Keyboard>,
    },
    EditMessage {
        chat_id: ChatId,
        message_id: i64,
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        keyboard: Option<Keyboard>,
    },
}

pub struct ConsoleTransport<W = Stdout> {
    out: Mutex<W>,
    next_id: AtomicI64,
}

impl ConsoleTransport<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> ConsoleTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn allocate(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn emit(&self, line: &Line<'_>) -> Result<(), TransportError> {
        let mut bytes = serde_json::to_vec(line).map_err(|e| TransportError::Io(e.to_string()))?;
        bytes.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&bytes)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        out.flush().await.map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChatTransport for ConsoleTransport<W> {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        let message_id = self.allocate();
        self.emit(&Line::SendText {
            chat_id,
            message_id,
            text,
            keyboard,
        })
        .await?;
        debug!(chat_id, message_id, "Text sent");
        Ok(MessageRef { chat_id, message_id })
    }

    async fn send_image(
        &self,
        chat_id: ChatId,
        artifact: &ArtifactRef,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        let message_id = self.allocate();
        self.emit(&Line::SendImage {
            chat_id,
            message_id,
            artifact,
            caption,
            keyboard,
        })
        .await?;
        debug!(chat_id, message_id, "Image sent");
        Ok(MessageRef { chat_id, message_id })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        self.emit(&Line::EditMessage {
            chat_id: message.chat_id,
            message_id: message.message_id,
            text,
            keyboard,
        })
        .await
    }
}
