//! Runtime settings for the slider controller.
//!
//! Two layers, mirroring how the rest of the crate consumes configuration:
//!
//! - [`Settings`] is the serde-backed snapshot loaded once at startup from an
//!   optional TOML file (plus `SLIDELAPSE_*` environment overrides) via the
//!   `config` crate.
//! - [`SettingsStore`] holds the *live* values. Every field sits behind a
//!   `tokio::sync::watch` channel so long-running tasks (most importantly the
//!   reconnect watchdog) observe changes immediately instead of reading a
//!   stale copy. Setters apply the same clamping rules the firmware limits
//!   require, so out-of-range values never reach the motion layer.

use crate::error::AppResult;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Startup settings snapshot, deserialized from file/environment.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Display name of the paired controller.
    pub device_name: String,
    /// Transport address of the controller (serial port path or MAC).
    pub device_address: String,
    /// Default jog step in mm.
    pub default_step_mm: f64,
    /// Default feed rate in mm/min.
    pub default_feed: u32,
    /// Default motion axis ("X", "Y" or "Z").
    pub axis_default: String,
    /// Maximum slider travel in mm.
    pub max_travel_mm: f64,
    /// Maximum feed rate in mm/min.
    pub max_feed: u32,
    /// When true, no commands are sent to the device.
    pub offline_mode: bool,
    /// Enable the background reconnect watchdog.
    pub auto_reconnect: bool,
    /// Watchdog reconnect interval in seconds.
    pub reconnect_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            device_address: String::new(),
            default_step_mm: 1.0,
            default_feed: 300,
            axis_default: "X".to_string(),
            max_travel_mm: 400.0,
            max_feed: 1500,
            offline_mode: false,
            auto_reconnect: true,
            reconnect_secs: 5,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, with `SLIDELAPSE_*`
    /// environment variables taking precedence. Missing keys fall back to
    /// defaults.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix("SLIDELAPSE"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

struct StoreInner {
    device_name: watch::Sender<String>,
    device_address: watch::Sender<String>,
    default_step_mm: watch::Sender<f64>,
    default_feed: watch::Sender<u32>,
    axis_default: watch::Sender<char>,
    max_travel_mm: watch::Sender<f64>,
    max_feed: watch::Sender<u32>,
    offline_mode: watch::Sender<bool>,
    auto_reconnect: watch::Sender<bool>,
    reconnect_secs: watch::Sender<u64>,
}

/// Live settings store. Cheap to clone, all clones share the same values.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

fn first_axis_char(axis: &str) -> char {
    axis.trim()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('X')
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        let max_feed = settings.max_feed.max(1);
        let inner = StoreInner {
            device_name: watch::channel(settings.device_name).0,
            device_address: watch::channel(settings.device_address).0,
            default_step_mm: watch::channel(settings.default_step_mm.max(0.001)).0,
            default_feed: watch::channel(settings.default_feed.clamp(1, max_feed)).0,
            axis_default: watch::channel(first_axis_char(&settings.axis_default)).0,
            max_travel_mm: watch::channel(settings.max_travel_mm.max(0.1)).0,
            max_feed: watch::channel(max_feed).0,
            offline_mode: watch::channel(settings.offline_mode).0,
            auto_reconnect: watch::channel(settings.auto_reconnect).0,
            reconnect_secs: watch::channel(settings.reconnect_secs.clamp(2, 30)).0,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn device_name(&self) -> String {
        self.inner.device_name.borrow().clone()
    }

    pub fn device_address(&self) -> String {
        self.inner.device_address.borrow().clone()
    }

    pub fn default_step_mm(&self) -> f64 {
        *self.inner.default_step_mm.borrow()
    }

    pub fn default_feed(&self) -> u32 {
        *self.inner.default_feed.borrow()
    }

    pub fn axis_default(&self) -> char {
        *self.inner.axis_default.borrow()
    }

    pub fn max_travel_mm(&self) -> f64 {
        *self.inner.max_travel_mm.borrow()
    }

    pub fn max_feed(&self) -> u32 {
        *self.inner.max_feed.borrow()
    }

    pub fn offline_mode(&self) -> bool {
        *self.inner.offline_mode.borrow()
    }

    pub fn auto_reconnect(&self) -> bool {
        *self.inner.auto_reconnect.borrow()
    }

    pub fn reconnect_secs(&self) -> u64 {
        *self.inner.reconnect_secs.borrow()
    }

    /// Watch channel for the auto-reconnect flag (watchdog input).
    pub fn auto_reconnect_watch(&self) -> watch::Receiver<bool> {
        self.inner.auto_reconnect.subscribe()
    }

    /// Watch channel for the reconnect interval (watchdog input).
    pub fn reconnect_secs_watch(&self) -> watch::Receiver<u64> {
        self.inner.reconnect_secs.subscribe()
    }

    pub fn save_device(&self, name: &str, address: &str) {
        self.inner.device_name.send_replace(name.to_string());
        self.inner.device_address.send_replace(address.to_string());
    }

    pub fn save_defaults(&self, step_mm: f64, feed: u32) {
        let max_feed = self.max_feed();
        self.inner.default_step_mm.send_replace(step_mm.max(0.001));
        self.inner.default_feed.send_replace(feed.clamp(1, max_feed));
    }

    pub fn save_axis(&self, axis: &str) {
        self.inner.axis_default.send_replace(first_axis_char(axis));
    }

    pub fn save_max_travel_mm(&self, value: f64) {
        self.inner.max_travel_mm.send_replace(value.max(0.1));
    }

    pub fn save_max_feed(&self, value: u32) {
        let max_feed = value.max(1);
        self.inner.max_feed.send_replace(max_feed);
        // Default feed must stay within the new ceiling.
        let default_feed = self.default_feed();
        self.inner.default_feed.send_replace(default_feed.clamp(1, max_feed));
    }

    pub fn set_offline_mode(&self, enabled: bool) {
        self.inner.offline_mode.send_replace(enabled);
    }

    pub fn save_reconnect(&self, enabled: bool, seconds: u64) {
        self.inner.auto_reconnect.send_replace(enabled);
        self.inner.reconnect_secs.send_replace(seconds.clamp(2, 30));
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = SettingsStore::default();
        assert_eq!(store.axis_default(), 'X');
        assert_eq!(store.max_feed(), 1500);
        assert!((store.max_travel_mm() - 400.0).abs() < f64::EPSILON);
        assert!(store.auto_reconnect());
        assert_eq!(store.reconnect_secs(), 5);
        assert!(!store.offline_mode());
    }

    #[test]
    fn test_setters_clamp() {
        let store = SettingsStore::default();

        store.save_defaults(0.0, 9000);
        assert!((store.default_step_mm() - 0.001).abs() < f64::EPSILON);
        assert_eq!(store.default_feed(), 1500);

        store.save_max_travel_mm(-5.0);
        assert!((store.max_travel_mm() - 0.1).abs() < f64::EPSILON);

        store.save_reconnect(true, 500);
        assert_eq!(store.reconnect_secs(), 30);
        store.save_reconnect(true, 0);
        assert_eq!(store.reconnect_secs(), 2);
    }

    #[test]
    fn test_max_feed_reclamps_default_feed() {
        let store = SettingsStore::default();
        store.save_defaults(1.0, 800);
        store.save_max_feed(500);
        assert_eq!(store.default_feed(), 500);
    }

    #[test]
    fn test_axis_normalization() {
        let store = SettingsStore::default();
        store.save_axis("y");
        assert_eq!(store.axis_default(), 'Y');
        store.save_axis("");
        assert_eq!(store.axis_default(), 'X');
    }
}
