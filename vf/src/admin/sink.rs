//! Where manager output for the administrator goes

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Receives text the manager prints for the administrator
#[async_trait]
pub trait AdminSink: Send + Sync {
    async fn print_on_admin_interface(&self, text: String);

    /// A closed sink may be replaced by a new administrator
    fn is_open(&self) -> bool {
        true
    }
}

/// Prints straight to stdout; used when the console runs in the manager process
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl AdminSink for ConsoleSink {
    async fn print_on_admin_interface(&self, text: String) {
        println!("{}", text);
    }
}

/// Forwards text over a channel, e.g. to a remote admin connection
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AdminSink for ChannelSink {
    async fn print_on_admin_interface(&self, text: String) {
        if self.tx.send(text).await.is_err() {
            debug!("ChannelSink: receiver gone, dropping output");
        }
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Keeps everything printed; for tests and headless managers
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }
}

#[async_trait]
impl AdminSink for MemorySink {
    async fn print_on_admin_interface(&self, text: String) {
        self.lines.lock().await.push(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_closes_with_receiver() {
        let (sink, mut rx) = ChannelSink::new(4);
        assert!(sink.is_open());
        sink.print_on_admin_interface("hello".to_string()).await;
        assert_eq!(rx.recv().await.unwrap(), "hello");
        drop(rx);
        assert!(!sink.is_open());
        sink.print_on_admin_interface("lost".to_string()).await;
    }

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.print_on_admin_interface("a".to_string()).await;
        sink.print_on_admin_interface("b".to_string()).await;
        assert_eq!(sink.lines().await, vec!["a", "b"]);
    }
}
