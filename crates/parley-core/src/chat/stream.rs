//! Streaming responder.
//!
//! Emits [`StreamFrame`]s over an mpsc channel that the HTTP layer turns into
//! SSE. The finished answer is re-sliced into small chunks with a short pause
//! between them, so clients keep their typing effect even though the model
//! call itself was non-streaming.
//!
//! Frame invariants: `start` first and once, at most one `error`, `end` last
//! and exactly once. `end` is also sent from `Drop` when a code path returns
//! without ending, so every exit path terminates the stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use parley_types::chat::StreamFrame;
use parley_types::config::StreamingConfig;
use parley_types::tool::ToolsSummary;

pub struct StreamingResponder {
    tx: mpsc::Sender<StreamFrame>,
    message_id: String,
    chunk_chars: usize,
    chunk_delay: Duration,
    started: bool,
    errored: bool,
    ended: bool,
}

impl StreamingResponder {
    /// Create a responder and the receiving end of its frame channel.
    pub fn channel(
        message_id: impl Into<String>,
        config: &StreamingConfig,
    ) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let responder = Self {
            tx,
            message_id: message_id.into(),
            chunk_chars: config.chunk_chars.max(1),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
            started: false,
            errored: false,
            ended: false,
        };
        (responder, rx)
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    async fn send(&self, frame: StreamFrame) {
        if self.tx.send(frame).await.is_err() {
            debug!(message_id = %self.message_id, "Client went away, dropping frame");
        }
    }

    pub async fn start(&mut self) {
        if self.started || self.ended {
            return;
        }
        self.started = true;
        self.send(StreamFrame::Start {
            message_id: self.message_id.clone(),
        })
        .await;
    }

    pub async fn tools(&mut self, summary: ToolsSummary) {
        if self.ended || summary.count == 0 {
            return;
        }
        self.start().await;
        self.send(StreamFrame::Tools { data: summary }).await;
    }

    /// Emit `text` as consecutive token frames of `chunk_chars` characters.
    pub async fn tokens(&mut self, text: &str) {
        if self.ended {
            return;
        }
        self.start().await;
        let chunks = chunk_text(text, self.chunk_chars);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            self.send(StreamFrame::Token { data: chunk }).await;
            if i < last && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }
    }

    /// Emit the terminal error frame. Only the first call has an effect.
    pub async fn error(&mut self, message: impl Into<String>) {
        if self.ended || self.errored {
            return;
        }
        self.start().await;
        self.errored = true;
        self.send(StreamFrame::Error {
            data: message.into(),
        })
        .await;
    }

    pub async fn end(&mut self) {
        if self.ended {
            return;
        }
        self.start().await;
        self.ended = true;
        self.send(StreamFrame::End {
            message_id: self.message_id.clone(),
        })
        .await;
    }
}

impl Drop for StreamingResponder {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let end = StreamFrame::End {
            message_id: self.message_id.clone(),
        };
        if let Err(TrySendError::Full(frame)) = self.tx.try_send(end) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let tx = self.tx.clone();
                handle.spawn(async move {
                    let _ = tx.send(frame).await;
                });
            }
        }
    }
}

/// Split `text` into chunks of at most `size` characters (not bytes).
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamingConfig {
        StreamingConfig {
            chunk_chars: 5,
            chunk_delay_ms: 0,
            channel_capacity: 64,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_chunk_text_is_char_safe() {
        assert_eq!(chunk_text("Bonjour à tous", 5), vec!["Bonjo", "ur à ", "tous"]);
        assert!(chunk_text("", 5).is_empty());
        assert_eq!(chunk_text("日本語テキスト", 3).concat(), "日本語テキスト");
    }

    #[tokio::test]
    async fn test_happy_path_frame_order() {
        let (mut responder, rx) = StreamingResponder::channel("m1", &config());
        responder.start().await;
        responder.tokens("Hello world").await;
        responder.end().await;
        drop(responder);

        let frames = drain(rx).await;
        let kinds: Vec<&str> = frames.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, ["start", "token", "token", "token", "end"]);
        let text: String = frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Token { data } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn test_drop_sends_end_exactly_once() {
        let (mut responder, rx) = StreamingResponder::channel("m1", &config());
        responder.start().await;
        responder.error("boom").await;
        responder.error("second error is ignored").await;
        drop(responder);

        let frames = drain(rx).await;
        let kinds: Vec<&str> = frames.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, ["start", "error", "end"]);
    }

    #[tokio::test]
    async fn test_frames_after_end_are_ignored() {
        let (mut responder, rx) = StreamingResponder::channel("m1", &config());
        responder.end().await;
        responder.tokens("late").await;
        responder.end().await;
        drop(responder);

        let kinds: Vec<&str> = drain(rx).await.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, ["start", "end"]);
    }

    #[tokio::test]
    async fn test_closed_client_does_not_panic() {
        let (mut responder, rx) = StreamingResponder::channel("m1", &config());
        drop(rx);
        responder.start().await;
        responder.tokens("nobody listens").await;
        responder.end().await;
    }
}
