//! In-memory transport for tests.
//!
//! Scriptable double for the [`Transport`] trait: connect attempts can be made
//! to fail, writes can be recorded and failed, and device lines can be
//! injected from the test body. Cloning shares the underlying state, so a test
//! can keep a handle while the client owns the boxed transport.

use super::Transport;
use crate::error::{AppResult, SliderError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct MockInner {
    connected: bool,
    connect_attempts: u32,
    /// Pre-scripted failures consumed front-to-back; empty means success.
    connect_failures: VecDeque<String>,
    fail_writes: bool,
    auto_ack: bool,
    writes: Vec<Vec<u8>>,
    line_tx: Option<mpsc::UnboundedSender<String>>,
}

/// Scriptable in-memory transport.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap()
    }

    /// Make the next `n` connect attempts fail with a canned message.
    pub fn fail_next_connects(&self, n: usize) {
        let mut inner = self.lock();
        for _ in 0..n {
            inner
                .connect_failures
                .push_back("connection refused".to_string());
        }
    }

    /// When enabled, every newline-terminated write is answered with `ok`.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.lock().auto_ack = enabled;
    }

    pub fn set_fail_writes(&self, enabled: bool) {
        self.lock().fail_writes = enabled;
    }

    /// Push a device line to the registered reader.
    pub fn inject_line(&self, line: &str) {
        let tx = self.lock().line_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(line.to_string());
        }
    }

    /// Simulate the link dropping out from under the client.
    pub fn drop_connection(&self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.line_tx = None;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Complete command lines written so far, newline stripped.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.ends_with(b"\n"))
            .map(|w| String::from_utf8_lossy(w).trim_end().to_string())
            .collect()
    }

    /// Single raw bytes written without a terminator (real-time commands).
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.len() == 1)
            .map(|w| w[0])
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn set_line_sender(&mut self, tx: mpsc::UnboundedSender<String>) {
        self.lock().line_tx = Some(tx);
    }

    async fn connect(&mut self, _address: &str) -> AppResult<()> {
        let mut inner = self.lock();
        inner.connect_attempts += 1;
        if let Some(msg) = inner.connect_failures.pop_front() {
            return Err(SliderError::Transport(msg));
        }
        inner.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn write(&mut self, bytes: &[u8]) -> bool {
        let (ack_tx, is_command) = {
            let mut inner = self.lock();
            if !inner.connected || inner.fail_writes {
                return false;
            }
            inner.writes.push(bytes.to_vec());
            let is_command = bytes.ends_with(b"\n");
            let tx = if inner.auto_ack && is_command {
                inner.line_tx.clone()
            } else {
                None
            };
            (tx, is_command)
        };
        if let (Some(tx), true) = (ack_tx, is_command) {
            let _ = tx.send("ok".to_string());
        }
        true
    }

    async fn close(&mut self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.line_tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_script() {
        let mock = MockTransport::new();
        mock.fail_next_connects(1);
        let mut boxed: Box<dyn Transport> = Box::new(mock.clone());
        assert!(boxed.connect("dev0").await.is_err());
        assert!(boxed.connect("dev0").await.is_ok());
        assert_eq!(mock.connect_attempts(), 2);
        assert!(mock.is_connected());
    }

    #[tokio::test]
    async fn test_auto_ack_answers_command_lines() {
        let mut mock = MockTransport::new();
        mock.set_auto_ack(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        mock.set_line_sender(tx);
        assert!(mock.connect("dev0").await.is_ok());

        assert!(mock.write(b"$H\n").await);
        assert_eq!(rx.recv().await.as_deref(), Some("ok"));

        // Real-time bytes are not acknowledged.
        assert!(mock.write(&[b'?']).await);
        assert!(rx.try_recv().is_err());
        assert_eq!(mock.realtime_bytes(), vec![b'?']);
        assert_eq!(mock.sent_lines(), vec!["$H".to_string()]);
    }
}
