//! Paced preset execution.
//!
//! The runner turns a scene plan into a sequence of incremental jogs through
//! the protocol client, tracking cumulative travel so a run can never walk
//! the carriage past the configured ceiling. Travel accounting commits only
//! after a jog is acknowledged; a failed step leaves the counter untouched.

use crate::grbl::GrblClient;
use crate::scenes::plan::{resolve_axis, MotionLimits, ScenePlan, MIN_STEP_MM};
use crate::scenes::template::SceneTemplate;
use crate::settings::SettingsStore;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

/// Cancellation granularity for settle/interval waits.
const CANCEL_TICK: Duration = Duration::from_millis(200);

/// Why a move was refused or a run terminated early.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum MoveError {
    #[error("offline mode is enabled")]
    Offline,
    #[error("no active GRBL client")]
    NoClient,
    #[error("travel limit of {0} mm reached")]
    TravelLimit(f64),
    #[error("jog command transmission failed")]
    SendFailed,
}

/// One completed step out of the planned total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub index: u32,
    pub total: u32,
}

/// Notifications emitted during a preset run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SceneEvent {
    Progress(Progress),
    Failed(MoveError),
    Finished,
}

/// Supplies the current protocol client, if any. Runs may outlive a single
/// connection, so the runner re-resolves the client instead of holding one.
pub type ClientProvider = Arc<dyn Fn() -> Option<GrblClient> + Send + Sync>;

pub struct ScenesRunner {
    settings: SettingsStore,
    client_provider: ClientProvider,
    /// Cumulative mm moved since the last reset.
    progressed_mm: Mutex<f64>,
    stop_tx: watch::Sender<bool>,
}

impl ScenesRunner {
    pub fn new(settings: SettingsStore, client_provider: ClientProvider) -> Self {
        Self {
            settings,
            client_provider,
            progressed_mm: Mutex::new(0.0),
            stop_tx: watch::channel(false).0,
        }
    }

    /// Zero the traveled-distance counter.
    pub async fn reset_progress(&self) {
        *self.progressed_mm.lock().await = 0.0;
    }

    /// Cumulative travel of the current run, in mm.
    pub async fn traveled_mm(&self) -> f64 {
        *self.progressed_mm.lock().await
    }

    /// Request the current run to stop. Takes effect within one cancellation
    /// tick, not only at the next interval boundary.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Execute a preset to completion, early failure, or stop request.
    ///
    /// Progress/failure is reported through `events`. The first shot needs no
    /// preceding move, so `Progress(1, shots)` is emitted immediately.
    pub async fn run_preset(&self, template: &SceneTemplate, events: mpsc::UnboundedSender<SceneEvent>) {
        if (self.client_provider)().is_none() {
            warn!("No active GRBL client for preset '{}'", template.id);
            let _ = events.send(SceneEvent::Failed(MoveError::NoClient));
            return;
        }
        if self.settings.offline_mode() {
            info!("Offline mode: preset '{}' sends no motion", template.id);
            let _ = events.send(SceneEvent::Failed(MoveError::Offline));
            return;
        }

        let limits = MotionLimits::from_settings(&self.settings);
        let plan = ScenePlan::compute(template, &limits);
        self.reset_progress().await;
        let _ = self.stop_tx.send(false);
        let mut stop_rx = self.stop_tx.subscribe();

        info!(
            "Preset '{}': shots={} step={:.3}mm axis={} feed={}",
            template.title, plan.shots, plan.step_mm, plan.axis, plan.feed
        );

        let _ = events.send(SceneEvent::Progress(Progress {
            index: 1,
            total: plan.shots,
        }));

        for index in 2..=plan.shots {
            match self
                .jog_step(plan.axis, plan.step_mm, plan.feed, limits.max_travel_mm)
                .await
            {
                Ok(()) => {
                    if !sleep_sliced(plan.settle, &mut stop_rx).await {
                        return;
                    }
                    let _ = events.send(SceneEvent::Progress(Progress {
                        index,
                        total: plan.shots,
                    }));
                    if !sleep_sliced(plan.interval, &mut stop_rx).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Preset '{}' step {} aborted: {}", template.id, index, e);
                    let _ = events.send(SceneEvent::Failed(e));
                    return;
                }
            }
        }

        let _ = events.send(SceneEvent::Finished);
    }

    /// Ad hoc single move using a template's step and feed, sharing the
    /// limit-check/commit logic with preset runs.
    pub async fn move_once(&self, template: &SceneTemplate) -> Result<(), MoveError> {
        if (self.client_provider)().is_none() {
            return Err(MoveError::NoClient);
        }
        if self.settings.offline_mode() {
            return Err(MoveError::Offline);
        }
        let limits = MotionLimits::from_settings(&self.settings);
        let axis = resolve_axis(template.axis, limits.default_axis);
        let feed = template.feed_mm_min.clamp(1, limits.max_feed.max(1));
        self.jog_step(axis, template.step_mm_per_shot, feed, limits.max_travel_mm)
            .await
    }

    /// The atomic unit of motion: check the travel ceiling, dispatch one
    /// relative jog, and commit the traveled distance only once the send is
    /// acknowledged. A failing call never mutates the counter.
    async fn jog_step(
        &self,
        axis: char,
        step_mm: f64,
        feed: u32,
        max_travel_mm: f64,
    ) -> Result<(), MoveError> {
        let step = step_mm.max(MIN_STEP_MM);
        let mut traveled = self.progressed_mm.lock().await;
        let candidate = *traveled + step;
        if candidate > max_travel_mm {
            return Err(MoveError::TravelLimit(max_travel_mm));
        }
        let client = (self.client_provider)().ok_or(MoveError::NoClient)?;
        if !client.send_jog(axis, step, feed).await {
            return Err(MoveError::SendFailed);
        }
        *traveled = candidate;
        Ok(())
    }
}

/// Sleep in short slices, returning `false` as soon as a stop is requested.
pub(crate) async fn sleep_sliced(total: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if *stop.borrow() {
            return false;
        }
        let tick = remaining.min(CANCEL_TICK);
        tokio::select! {
            () = tokio::time::sleep(tick) => {
                remaining = remaining.saturating_sub(tick);
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return false;
                }
            }
        }
    }
    !*stop.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsStore;

    fn offline_runner(offline: bool) -> ScenesRunner {
        let settings = SettingsStore::default();
        settings.set_offline_mode(offline);
        ScenesRunner::new(settings, Arc::new(|| None))
    }

    fn test_template() -> SceneTemplate {
        SceneTemplate {
            id: "test",
            title: "Test",
            description: "",
            interval_secs: 1,
            duration_mins: 1,
            step_mm_per_shot: 1.0,
            axis: "X",
            move_before_shot: true,
            settle_ms: 0,
            feed_mm_min: 300,
        }
    }

    #[tokio::test]
    async fn test_move_once_requires_client() {
        let runner = offline_runner(false);
        let err = runner.move_once(&test_template()).await;
        assert_eq!(err, Err(MoveError::NoClient));
        assert_eq!(runner.traveled_mm().await, 0.0);
    }

    #[tokio::test]
    async fn test_run_preset_reports_no_client() {
        let runner = offline_runner(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        runner.run_preset(&test_template(), tx).await;
        assert_eq!(rx.recv().await, Some(SceneEvent::Failed(MoveError::NoClient)));
    }

    #[tokio::test]
    async fn test_sleep_sliced_observes_stop() {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let completed = sleep_sliced(Duration::from_secs(30), &mut stop_rx).await;
            (completed, start.elapsed())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = stop_tx.send(true);
        #[allow(clippy::unwrap_used)]
        let (completed, elapsed) = waiter.await.unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(1));
    }
}
