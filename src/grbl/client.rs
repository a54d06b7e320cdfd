//! Actor-based GRBL protocol client.
//!
//! All connection state, the pending-acknowledgment queue, and the transport
//! itself are owned by a single client task. Every mutation goes through its
//! mailbox, so the three independent timing sources (inbound device lines,
//! the reconnect watchdog, user commands) serialize on one writer and never
//! race on shared state.
//!
//! The protocol is strictly half-duplex for command lines: each blocking send
//! enqueues exactly one completion slot, and each `ok`/`error` line resolves
//! exactly one slot in FIFO order. Real-time control bytes bypass the queue
//! entirely and are written the moment the mailbox delivers them.

use crate::grbl::status::{ConnectionState, GrblStatus};
use crate::grbl::{RT_HOLD, RT_JOG_CANCEL, RT_RESUME, RT_SOFT_RESET, RT_STATUS};
use crate::settings::SettingsStore;
use crate::transport::Transport;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Default number of immediate connect attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Default wait between failed connect attempts.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_millis(1500);

/// Asynchronous notifications from the client.
#[derive(Clone, Debug)]
pub enum GrblEvent {
    /// Connection lifecycle transition.
    Connection(ConnectionState),
    /// Parsed `<...>` status frame.
    Status(GrblStatus),
    /// The controller acknowledged a command.
    Ok,
    /// Protocol or transport error text.
    Error(String),
    /// The controller raised an alarm.
    Alarm(String),
    /// Any other non-blank line from the controller.
    State(String),
}

enum ClientCommand {
    Connect {
        address: String,
        attempts: u32,
        backoff: Duration,
    },
    /// Single watchdog-initiated attempt against the last-used address.
    Reconnect,
    Disconnect,
    SendBlocking {
        line: String,
        done: oneshot::Sender<bool>,
    },
    SendRaw {
        line: String,
    },
    Realtime(u8),
}

/// Format a GRBL relative jog line: `$J=G91 G21 F<feed> <AXIS><delta>`.
pub fn jog_command(axis: char, delta_mm: f64, feed: u32) -> String {
    format!(
        "$J=G91 G21 F{} {}{:.4}",
        feed.max(1),
        axis.to_ascii_uppercase(),
        delta_mm
    )
}

fn has_prefix_ignore_case(line: &str, prefix: &str) -> bool {
    line.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Handle to the client task. Cheap to clone; all clones address the same
/// connection.
#[derive(Clone)]
pub struct GrblClient {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<GrblEvent>,
    watchdog: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl GrblClient {
    /// Spawn the client task around a transport. The returned handle is the
    /// only way to reach the connection.
    pub fn spawn(transport: Box<dyn Transport>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);

        let task = ClientTask {
            transport,
            line_rx: None,
            pending: VecDeque::new(),
            state_tx,
            events: events.clone(),
            last_address: None,
        };
        tokio::spawn(task.run(cmd_rx));

        Self {
            cmd_tx,
            state_rx,
            events,
            watchdog: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect with the default retry policy (3 attempts, 1.5 s backoff).
    pub fn connect(&self, address: &str) {
        self.connect_with_retries(address, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF);
    }

    /// Connect with an explicit retry policy. Non-blocking: progress is
    /// reported through events and the connection-state watch.
    pub fn connect_with_retries(&self, address: &str, attempts: u32, backoff: Duration) {
        let _ = self.cmd_tx.send(ClientCommand::Connect {
            address: address.to_string(),
            attempts,
            backoff,
        });
    }

    /// Tear the connection down. Idempotent; resolves any in-flight blocking
    /// command to failure.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect);
    }

    /// Send one command line and suspend until the controller acknowledges it.
    /// Returns `false` when disconnected, on `error` replies, and on any
    /// transport failure.
    pub async fn send_blocking(&self, line: &str) -> bool {
        let (done, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ClientCommand::SendBlocking {
                line: line.to_string(),
                done,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Best-effort send with no acknowledgment tracking; errors are swallowed.
    pub fn send_fire_and_forget(&self, line: &str) {
        let _ = self.cmd_tx.send(ClientCommand::SendRaw {
            line: line.to_string(),
        });
    }

    /// Write a single real-time control byte, bypassing the command queue.
    pub fn send_realtime(&self, byte: u8) {
        let _ = self.cmd_tx.send(ClientCommand::Realtime(byte));
    }

    /// Request a `<...>` status report (`?`).
    pub fn query_status(&self) {
        self.send_realtime(RT_STATUS);
    }

    /// Feed hold (`!`).
    pub fn hold(&self) {
        self.send_realtime(RT_HOLD);
    }

    /// Cycle start / resume (`~`).
    pub fn resume(&self) {
        self.send_realtime(RT_RESUME);
    }

    /// Soft reset (Ctrl-X).
    pub fn soft_reset(&self) {
        self.send_realtime(RT_SOFT_RESET);
    }

    /// Cancel an in-progress jog.
    pub fn cancel_jog(&self) {
        self.send_realtime(RT_JOG_CANCEL);
    }

    /// Send one relative jog and wait for the acknowledgment.
    pub async fn send_jog(&self, axis: char, delta_mm: f64, feed: u32) -> bool {
        self.send_blocking(&jog_command(axis, delta_mm, feed)).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to client notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<GrblEvent> {
        self.events.subscribe()
    }

    /// Watch channel mirroring the connection state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the link is usable, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if rx.borrow_and_update().is_connected() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Start (or restart) the background reconnect watchdog. While
    /// auto-reconnect is enabled and the link is down, one reconnect attempt
    /// is made to the last-used address every `reconnect_secs` seconds. A
    /// settings change takes effect immediately, cancelling any wait in
    /// progress.
    pub fn start_watchdog(&self, settings: &SettingsStore) {
        let mut slot = self.watchdog_slot();
        if let Some(task) = slot.take() {
            task.abort();
        }
        *slot = Some(tokio::spawn(watchdog_loop(
            self.cmd_tx.downgrade(),
            self.state_rx.clone(),
            settings.auto_reconnect_watch(),
            settings.reconnect_secs_watch(),
        )));
    }

    /// Start the watchdog only if none is active.
    pub fn ensure_watchdog(&self, settings: &SettingsStore) {
        {
            let slot = self.watchdog_slot();
            if slot.as_ref().is_some_and(|task| !task.is_finished()) {
                return;
            }
        }
        self.start_watchdog(settings);
    }

    /// Cancel the watchdog. Safe when none is running.
    pub fn stop_watchdog(&self) {
        if let Some(task) = self.watchdog_slot().take() {
            task.abort();
        }
    }

    fn watchdog_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn watchdog_loop(
    cmd_tx: mpsc::WeakUnboundedSender<ClientCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    mut auto_rx: watch::Receiver<bool>,
    mut secs_rx: watch::Receiver<u64>,
) {
    loop {
        let enabled = *auto_rx.borrow_and_update();
        let secs = (*secs_rx.borrow_and_update()).clamp(2, 30);

        if !enabled {
            // Park until either input changes.
            tokio::select! {
                changed = auto_rx.changed() => if changed.is_err() { return; },
                changed = secs_rx.changed() => if changed.is_err() { return; },
            }
            continue;
        }

        if !state_rx.borrow().is_connected() {
            let Some(tx) = cmd_tx.upgrade() else {
                return;
            };
            debug!("Watchdog requesting reconnect");
            if tx.send(ClientCommand::Reconnect).is_err() {
                return;
            }
        }

        // A settings change supersedes the remaining wait.
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(secs)) => {}
            changed = auto_rx.changed() => if changed.is_err() { return; },
            changed = secs_rx.changed() => if changed.is_err() { return; },
        }
    }
}

enum Wake {
    Cmd(Option<ClientCommand>),
    Line(Option<String>),
}

struct ClientTask {
    transport: Box<dyn Transport>,
    line_rx: Option<mpsc::UnboundedReceiver<String>>,
    pending: VecDeque<oneshot::Sender<bool>>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<GrblEvent>,
    last_address: Option<String>,
}

impl ClientTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>) {
        loop {
            let wake = match self.line_rx.as_mut() {
                Some(lines) => tokio::select! {
                    cmd = cmd_rx.recv() => Wake::Cmd(cmd),
                    line = lines.recv() => Wake::Line(line),
                },
                None => Wake::Cmd(cmd_rx.recv().await),
            };

            match wake {
                Wake::Cmd(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Cmd(None) => break,
                Wake::Line(Some(line)) => self.handle_line(&line),
                Wake::Line(None) => {
                    warn!("GRBL read stream ended, forcing disconnect");
                    self.disconnect().await;
                }
            }
        }
        self.disconnect().await;
    }

    async fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Connect {
                address,
                attempts,
                backoff,
            } => self.connect(address, attempts, backoff).await,
            ClientCommand::Reconnect => {
                if !self.state_tx.borrow().is_connected() {
                    if let Some(address) = self.last_address.clone() {
                        info!("Watchdog reconnecting to {}", address);
                        self.connect(address, 1, DEFAULT_CONNECT_BACKOFF).await;
                    }
                }
            }
            ClientCommand::Disconnect => self.disconnect().await,
            ClientCommand::SendBlocking { line, done } => self.send_blocking(line, done).await,
            ClientCommand::SendRaw { line } => self.send_raw(line).await,
            ClientCommand::Realtime(byte) => self.send_realtime(byte).await,
        }
    }

    async fn connect(&mut self, address: String, attempts: u32, backoff: Duration) {
        // Any prior connection is torn down first.
        self.disconnect().await;
        self.last_address = Some(address.clone());
        self.set_state(ConnectionState::Connecting);

        let attempts = attempts.max(1);
        let mut last_err = String::new();
        for attempt in 1..=attempts {
            let (tx, rx) = mpsc::unbounded_channel();
            self.transport.set_line_sender(tx);
            match self.transport.connect(&address).await {
                Ok(()) => {
                    self.line_rx = Some(rx);
                    self.set_state(ConnectionState::Connected);
                    info!("GRBL connected to {}", address);
                    return;
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!(
                        "Connect attempt {}/{} to {} failed: {}",
                        attempt, attempts, address, last_err
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        error!("GRBL connect failed: {}", last_err);
        let _ = self.events.send(GrblEvent::Error(last_err));
    }

    async fn disconnect(&mut self) {
        self.transport.close().await;
        self.line_rx = None;
        self.drain_pending();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn send_blocking(&mut self, line: String, done: oneshot::Sender<bool>) {
        if !self.state_tx.borrow().is_connected() {
            let _ = done.send(false);
            return;
        }
        let payload = format!("{}\n", line.trim_end());
        if self.transport.write(payload.as_bytes()).await {
            self.pending.push_back(done);
        } else {
            let _ = done.send(false);
            error!("Failed to write command: {}", line);
            let _ = self
                .events
                .send(GrblEvent::Error(format!("write failed: {}", line)));
            self.disconnect().await;
        }
    }

    async fn send_raw(&mut self, line: String) {
        if !self.state_tx.borrow().is_connected() {
            return;
        }
        let payload = format!("{}\n", line.trim_end());
        if !self.transport.write(payload.as_bytes()).await {
            debug!("Fire-and-forget write failed: {}", line);
        }
    }

    async fn send_realtime(&mut self, byte: u8) {
        if !self.state_tx.borrow().is_connected() {
            return;
        }
        if !self.transport.write(&[byte]).await {
            error!("Failed to write real-time byte 0x{:02X}", byte);
            let _ = self
                .events
                .send(GrblEvent::Error("real-time write failed".to_string()));
            self.disconnect().await;
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line == "ok" {
            let _ = self.events.send(GrblEvent::Ok);
            // A spurious ok with nothing outstanding is discarded.
            if let Some(done) = self.pending.pop_front() {
                let _ = done.send(true);
            }
        } else if has_prefix_ignore_case(line, "error") {
            warn!("GRBL error reply: {}", line);
            let _ = self.events.send(GrblEvent::Error(line.to_string()));
            if let Some(done) = self.pending.pop_front() {
                let _ = done.send(false);
            }
        } else if has_prefix_ignore_case(line, "ALARM") {
            warn!("GRBL alarm: {}", line);
            self.set_state(ConnectionState::Alarm);
            let _ = self.events.send(GrblEvent::Alarm(line.to_string()));
        } else if line.starts_with('<') {
            let status = GrblStatus::parse(line);
            // The alarm latch clears once the controller reports a
            // non-alarm machine state.
            if *self.state_tx.borrow() == ConnectionState::Alarm
                && !status.state.eq_ignore_ascii_case("alarm")
            {
                self.set_state(ConnectionState::Connected);
            }
            let _ = self.events.send(GrblEvent::Status(status));
        } else if !line.is_empty() {
            let _ = self.events.send(GrblEvent::State(line.to_string()));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            let _ = self.state_tx.send(state);
            let _ = self.events.send(GrblEvent::Connection(state));
        }
    }

    fn drain_pending(&mut self) {
        while let Some(done) = self.pending.pop_front() {
            let _ = done.send(false);
        }
    }
}
