//! Connection lifecycle glue.
//!
//! A session owns the settings store, lazily brings up at most one protocol
//! client for the configured device, and hands the scene runner a provider
//! that always resolves the current client. Offline mode short-circuits
//! connection attempts entirely.

use crate::error::{AppResult, SliderError};
use crate::grbl::{GrblClient, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF};
use crate::scenes::{ClientProvider, ScenesRunner};
use crate::settings::SettingsStore;
use crate::transport::Transport;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Upper bound on waiting for the retry ladder to produce a connection.
const CONNECT_WAIT: Duration = Duration::from_secs(10);

/// Builds a fresh transport for each connection attempt cycle.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

pub struct SliderSession {
    settings: SettingsStore,
    transport_factory: TransportFactory,
    client_slot: Arc<Mutex<Option<GrblClient>>>,
    runner: Arc<ScenesRunner>,
}

impl SliderSession {
    pub fn new(settings: SettingsStore, transport_factory: TransportFactory) -> Self {
        let client_slot: Arc<Mutex<Option<GrblClient>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&client_slot);
        let provider: ClientProvider = Arc::new(move || {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .filter(|client| client.is_connected())
                .cloned()
        });
        let runner = Arc::new(ScenesRunner::new(settings.clone(), provider));
        Self {
            settings,
            transport_factory,
            client_slot,
            runner,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn runner(&self) -> Arc<ScenesRunner> {
        Arc::clone(&self.runner)
    }

    pub fn current_client(&self) -> Option<GrblClient> {
        self.client_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve a connected client, reusing the live one or dialing the
    /// configured address. `Ok(None)` means offline mode or a missing
    /// address suppressed the attempt.
    pub async fn ensure_connected(&self) -> AppResult<Option<GrblClient>> {
        if self.settings.offline_mode() {
            debug!("Offline mode: skipping connection");
            return Ok(None);
        }
        let address = self.settings.device_address();
        if address.trim().is_empty() {
            warn!("No device address configured");
            return Ok(None);
        }

        if let Some(client) = self.current_client() {
            if client.is_connected() {
                client.ensure_watchdog(&self.settings);
                return Ok(Some(client));
            }
        }

        info!("Connecting to {}", address);
        let client = GrblClient::spawn((self.transport_factory)());
        client.connect_with_retries(&address, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF);
        if !client.wait_connected(CONNECT_WAIT).await {
            return Err(SliderError::Transport(format!(
                "unable to reach {}",
                address
            )));
        }
        client.start_watchdog(&self.settings);
        *self
            .client_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(client.clone());
        Ok(Some(client))
    }

    /// Tear down the active client, if any.
    pub fn disconnect(&self) {
        let taken = self
            .client_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = taken {
            client.stop_watchdog();
            client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn mock_session(offline: bool, address: &str) -> (SliderSession, MockTransport) {
        let settings = SettingsStore::default();
        settings.set_offline_mode(offline);
        settings.save_device("slider", address);
        let mock = MockTransport::new();
        mock.set_auto_ack(true);
        let factory_mock = mock.clone();
        let session = SliderSession::new(
            settings,
            Arc::new(move || Box::new(factory_mock.clone()) as Box<dyn Transport>),
        );
        (session, mock)
    }

    #[tokio::test]
    async fn test_offline_mode_skips_connection() {
        let (session, mock) = mock_session(true, "AA:BB");
        let client = session.ensure_connected().await.unwrap();
        assert!(client.is_none());
        assert_eq!(mock.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_blank_address_yields_no_client() {
        let (session, mock) = mock_session(false, "  ");
        assert!(session.ensure_connected().await.unwrap().is_none());
        assert_eq!(mock.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let (session, mock) = mock_session(false, "AA:BB");
        let first = session.ensure_connected().await.unwrap().unwrap();
        let second = session.ensure_connected().await.unwrap().unwrap();
        assert!(first.is_connected());
        assert!(second.is_connected());
        assert_eq!(mock.connect_attempts(), 1);
        session.disconnect();
    }
}
