//! Message sinks that receive build status lines.
//!
//! A sink is fire-and-forget: it accepts arbitrary text, returns nothing and
//! must never fail the build that reports into it. Delivery problems (a
//! closed channel, an unwritable file) are swallowed by the sink itself.

use std::sync::mpsc::Sender;

use parking_lot::Mutex;

/// Receiver of human-readable status and error messages.
pub trait MessageSink: Send + Sync {
    /// Report one message.
    fn message(&self, text: &str);
}

impl<F> MessageSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn message(&self, text: &str) {
        self(text)
    }
}

/// Sink that forwards each message over an `mpsc` channel.
///
/// Useful when the host drains messages on its own thread (e.g. a UI
/// event loop). Messages sent after the receiver is gone are dropped.
pub struct ChannelSink {
    sender: Sender<String>,
}

impl ChannelSink {
    pub fn new(sender: Sender<String>) -> Self {
        Self { sender }
    }
}

impl MessageSink for ChannelSink {
    fn message(&self, text: &str) {
        let _ = self.sender.send(text.to_string());
    }
}

/// Sink that keeps every message in memory, in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all messages received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl MessageSink for RecordingSink {
    fn message(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}

/// Sink that writes messages to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn message(&self, text: &str) {
        tracing::info!(target: "sbk::build", "{}", text);
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn message(&self, _text: &str) {}
}
