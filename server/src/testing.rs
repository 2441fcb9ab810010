//! Helpers shared by unit tests.

use crate::dictionary::WordProvider;
use futures::channel::mpsc;
use futures_util::SinkExt;
use shared::{PackedWord, ServerMessage};
use std::collections::HashSet;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client_manager::FrameSink;

/// Dictionary with a fixed target. The target is always a known word.
pub struct FixedWords {
    target: PackedWord,
    known: HashSet<PackedWord>,
}

impl FixedWords {
    pub fn new(target: &str, others: &[&str]) -> Self {
        let target = PackedWord::pack(target);
        let mut known: HashSet<PackedWord> = others.iter().map(|w| PackedWord::pack(w)).collect();
        known.insert(target);
        Self { target, known }
    }
}

impl WordProvider for FixedWords {
    fn next_target(&self) -> PackedWord {
        self.target
    }

    fn is_known(&self, word: PackedWord) -> bool {
        !word.is_none() && self.known.contains(&word)
    }
}

/// In-memory sink standing in for a socket, plus the receiving end.
pub fn channel_sink() -> (FrameSink, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded();
    let sink = tx.sink_map_err(|_| tungstenite::Error::ConnectionClosed);
    (Box::pin(sink), rx)
}

/// Decodes every binary frame received so far.
pub fn drain_messages(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(message)) = rx.try_next() {
        if let Message::Binary(frame) = message {
            messages.push(ServerMessage::decode(&frame).expect("server sent a malformed frame"));
        }
    }
    messages
}
