//! Capture-loop coordination.
//!
//! The controller paces frame captures at a fixed interval and delegates
//! motion to a hook around each shot. Capture failures are logged and the
//! loop continues; motion failures are the hook's concern. Stop requests
//! take effect within one cancellation slice rather than waiting out the
//! full interval.

use crate::error::AppResult;
use crate::scenes::runner::sleep_sliced;
use crate::scenes::{ScenesRunner, SceneTemplate};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Initial settle before the first frame, letting the rig damp out after
/// whatever positioned it.
const INITIAL_SETTLE: Duration = Duration::from_millis(200);

/// Sink for captured frames. Implementations decide what a "frame" is
/// (camera trigger, file write, network push).
#[async_trait]
pub trait FrameCapture: Send + Sync {
    async fn capture(&self, frame_name: &str) -> AppResult<()>;
}

/// Motion performed around each shot. Indices are 1-based.
#[async_trait]
pub trait MotionHook: Send + Sync {
    async fn before_shot(&self, index: u32);
    async fn after_shot(&self, index: u32);
}

/// Hook that advances the slider one scene step per frame.
///
/// With `move_before_shot` the carriage moves ahead of every frame except
/// the first; otherwise it moves after each frame. Move failures are logged
/// and swallowed so a travel-limit stop does not kill the capture loop.
pub struct SceneMotionHook {
    runner: Arc<ScenesRunner>,
    template: SceneTemplate,
}

impl SceneMotionHook {
    pub fn new(runner: Arc<ScenesRunner>, template: SceneTemplate) -> Self {
        Self { runner, template }
    }

    async fn step(&self, index: u32) {
        if let Err(e) = self.runner.move_once(&self.template).await {
            warn!("Slider move for frame {} skipped: {}", index, e);
        }
    }
}

#[async_trait]
impl MotionHook for SceneMotionHook {
    async fn before_shot(&self, index: u32) {
        if self.template.move_before_shot && index > 1 {
            self.step(index).await;
        }
    }

    async fn after_shot(&self, index: u32) {
        if !self.template.move_before_shot {
            self.step(index).await;
        }
    }
}

/// No-op hook for capture-only sessions.
pub struct NullMotionHook;

#[async_trait]
impl MotionHook for NullMotionHook {
    async fn before_shot(&self, _index: u32) {}
    async fn after_shot(&self, _index: u32) {}
}

pub struct TimelapseController {
    capture: Arc<dyn FrameCapture>,
    hook: Arc<dyn MotionHook>,
    label: String,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    shots_taken: Arc<AtomicU32>,
}

impl TimelapseController {
    pub fn new(capture: Arc<dyn FrameCapture>, hook: Arc<dyn MotionHook>, label: &str) -> Self {
        Self {
            capture,
            hook,
            label: label.to_owned(),
            stop_tx: watch::channel(false).0,
            task: Mutex::new(None),
            shots_taken: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Frames captured since the last `start`.
    pub fn shots_taken(&self) -> u32 {
        self.shots_taken.load(Ordering::Relaxed)
    }

    /// Begin a capture loop. A no-op while one is already running or when
    /// the interval is zero. With `total_shots` of `None` the loop runs
    /// until `stop`.
    pub async fn start(&self, interval: Duration, total_shots: Option<u32>) {
        if interval.is_zero() {
            warn!("Timelapse '{}' not started: zero interval", self.label);
            return;
        }
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Timelapse already running, start ignored");
            return;
        }

        let _ = self.stop_tx.send(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let capture = Arc::clone(&self.capture);
        let hook = Arc::clone(&self.hook);
        let label = self.label.clone();
        let shots = Arc::clone(&self.shots_taken);
        shots.store(0, Ordering::Relaxed);

        info!(
            "Timelapse '{}': interval={:?} shots={}",
            label,
            interval,
            total_shots.map_or_else(|| "unbounded".into(), |n| n.to_string())
        );

        let handle = tokio::spawn(async move {
            if !sleep_sliced(INITIAL_SETTLE, &mut stop_rx).await {
                return;
            }
            let mut index: u32 = 0;
            loop {
                index += 1;
                hook.before_shot(index).await;

                let frame_name = format!(
                    "{}_{}.jpg",
                    label,
                    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
                );
                match capture.capture(&frame_name).await {
                    Ok(()) => {
                        shots.fetch_add(1, Ordering::Relaxed);
                        debug!("Captured frame {} as {}", index, frame_name);
                    }
                    Err(e) => warn!("Frame {} capture failed: {}", index, e),
                }

                hook.after_shot(index).await;

                if total_shots.is_some_and(|total| index >= total) {
                    info!("Timelapse '{}' completed {} frames", label, index);
                    return;
                }
                if !sleep_sliced(interval, &mut stop_rx).await {
                    info!("Timelapse '{}' stopped after {} frames", label, index);
                    return;
                }
            }
        });
        *task = Some(handle);
    }

    /// Wait for a bounded loop to run to completion.
    pub async fn join(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Signal the loop to stop and wait for the task to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Stop and release the loop task. Alias kept separate from `stop` so a
    /// session teardown path reads as final.
    pub async fn shutdown(&self) {
        self.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SliderError;
    use std::sync::Mutex as StdMutex;

    struct RecordingCapture {
        names: StdMutex<Vec<String>>,
        fail_every: Option<u32>,
        count: AtomicU32,
    }

    impl RecordingCapture {
        fn new(fail_every: Option<u32>) -> Self {
            Self {
                names: StdMutex::new(Vec::new()),
                fail_every,
                count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameCapture for RecordingCapture {
        async fn capture(&self, frame_name: &str) -> AppResult<()> {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every.is_some_and(|every| n % every == 0) {
                return Err(SliderError::Transport("shutter jam".into()));
            }
            self.names.lock().unwrap().push(frame_name.to_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bounded_run_captures_exact_count() {
        let capture = Arc::new(RecordingCapture::new(None));
        let ctl = TimelapseController::new(capture.clone(), Arc::new(NullMotionHook), "bench");
        ctl.start(Duration::from_millis(10), Some(3)).await;
        ctl.join().await;
        assert_eq!(ctl.shots_taken(), 3);
        let names = capture.names.lock().unwrap();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("bench_"));
        assert!(names[0].ends_with(".jpg"));
    }

    #[tokio::test]
    async fn test_capture_failure_does_not_stop_loop() {
        let capture = Arc::new(RecordingCapture::new(Some(2)));
        let ctl = TimelapseController::new(capture.clone(), Arc::new(NullMotionHook), "flaky");
        ctl.start(Duration::from_millis(10), Some(4)).await;
        ctl.join().await;
        // Frames 2 and 4 fail; the loop still walks all four slots.
        assert_eq!(ctl.shots_taken(), 2);
    }

    #[tokio::test]
    async fn test_zero_interval_start_is_ignored() {
        let capture = Arc::new(RecordingCapture::new(None));
        let ctl = TimelapseController::new(capture.clone(), Arc::new(NullMotionHook), "idle");
        ctl.start(Duration::ZERO, Some(1)).await;
        ctl.join().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ctl.shots_taken(), 0);
        assert!(capture.names.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_interval() {
        let capture = Arc::new(RecordingCapture::new(None));
        let ctl = TimelapseController::new(capture, Arc::new(NullMotionHook), "long");
        ctl.start(Duration::from_secs(600), None).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let start = tokio::time::Instant::now();
        ctl.stop().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(ctl.shots_taken(), 1);
    }

    struct OrderedHook {
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl MotionHook for OrderedHook {
        async fn before_shot(&self, index: u32) {
            self.log.lock().unwrap().push(format!("before {}", index));
        }
        async fn after_shot(&self, index: u32) {
            self.log.lock().unwrap().push(format!("after {}", index));
        }
    }

    #[tokio::test]
    async fn test_hook_brackets_every_frame() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let hook = Arc::new(OrderedHook { log: log.clone() });
        let capture = Arc::new(RecordingCapture::new(None));
        let ctl = TimelapseController::new(capture, hook, "hooked");
        ctl.start(Duration::from_millis(5), Some(2)).await;
        ctl.join().await;
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["before 1", "after 1", "before 2", "after 2"]);
    }
}
