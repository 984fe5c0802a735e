//! Nullable network: capture outbound frames instead of writing a socket.

use serde_json::Value;
use tokio::sync::mpsc;

/// The receiving end of a connection's outbound queue.
///
/// Hand the paired sender to the code under test in place of a socket
/// writer, then inspect what it "sent".
pub struct NullNetwork {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl NullNetwork {
    /// A connected (sender, capture) pair.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// All frames sent so far, removed from the queue.
    pub fn sent(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// All frames sent so far, decoded as JSON. Undecodable frames are skipped.
    pub fn sent_messages(&mut self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter_map(|frame| serde_json::from_slice(&frame).ok())
            .collect()
    }

    /// Wait for the next frame; `None` once every sender is gone.
    pub async fn next_message(&mut self) -> Option<Value> {
        loop {
            let frame = self.rx.recv().await?;
            if let Ok(value) = serde_json::from_slice(&frame) {
                return Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_frames_in_order() {
        let (tx, mut net) = NullNetwork::channel(8);
        tx.send(br#"{"type":"a"}"#.to_vec()).await.unwrap();
        tx.send(b"not json".to_vec()).await.unwrap();
        tx.send(br#"{"type":"b"}"#.to_vec()).await.unwrap();

        let types: Vec<String> = net
            .sent_messages()
            .iter()
            .map(|m| m["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["a", "b"]);
        assert!(net.sent().is_empty());
    }
}
