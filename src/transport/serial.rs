//! Serial transport over `tokio-serial`.
//!
//! GRBL boards typically enumerate as a USB CDC serial device at 115200 baud.
//! The read half is pumped by a background task that splits the stream into
//! lines and forwards them to the client; the write half stays with the
//! transport for direct writes.

use super::Transport;
use crate::error::AppResult;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Default GRBL baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

pub struct SerialTransport {
    baud_rate: u32,
    connected: Arc<AtomicBool>,
    line_tx: Option<mpsc::UnboundedSender<String>>,
    writer: Option<WriteHalf<SerialStream>>,
    read_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            connected: Arc::new(AtomicBool::new(false)),
            line_tx: None,
            writer: None,
            read_task: None,
        }
    }

    fn spawn_read_loop(
        &self,
        reader: ReadHalf<SerialStream>,
        tx: mpsc::UnboundedSender<String>,
    ) -> JoinHandle<()> {
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        // GRBL terminates with \r\n; next_line strips only \n.
                        if tx.send(line.trim_end_matches('\r').to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Serial stream reached EOF");
                        break;
                    }
                    Err(e) => {
                        warn!("Serial read error: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            // Dropping tx signals the client that the link is gone.
        })
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn set_line_sender(&mut self, tx: mpsc::UnboundedSender<String>) {
        self.line_tx = Some(tx);
    }

    async fn connect(&mut self, address: &str) -> AppResult<()> {
        self.close().await;

        let stream = tokio_serial::new(address, self.baud_rate).open_native_async()?;
        let (reader, writer) = tokio::io::split(stream);
        self.writer = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        if let Some(tx) = self.line_tx.take() {
            self.read_task = Some(self.spawn_read_loop(reader, tx));
        }

        debug!("Serial port '{}' opened at {} baud", address, self.baud_rate);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&mut self, bytes: &[u8]) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        if writer.write_all(bytes).await.is_err() {
            return false;
        }
        writer.flush().await.is_ok()
    }

    async fn close(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}
