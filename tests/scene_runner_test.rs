use slidelapse::grbl::GrblClient;
use slidelapse::scenes::{MoveError, SceneEvent, SceneTemplate, ScenesRunner};
use slidelapse::settings::SettingsStore;
use slidelapse::transport::MockTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn template(interval_secs: u32, duration_mins: u32, step: f64) -> SceneTemplate {
    SceneTemplate {
        id: "bench",
        title: "Bench",
        description: "",
        interval_secs,
        duration_mins,
        step_mm_per_shot: step,
        axis: "X",
        move_before_shot: true,
        settle_ms: 0,
        feed_mm_min: 800,
    }
}

async fn runner_with_client(settings: SettingsStore) -> (Arc<ScenesRunner>, MockTransport) {
    let mock = MockTransport::new();
    mock.set_auto_ack(true);
    let client = GrblClient::spawn(Box::new(mock.clone()));
    client.connect_with_retries("mock0", 1, Duration::from_millis(10));
    assert!(client.wait_connected(Duration::from_secs(2)).await);

    let runner = Arc::new(ScenesRunner::new(
        settings,
        Arc::new(move || Some(client.clone())),
    ));
    (runner, mock)
}

async fn collect_events(mut rx: mpsc::UnboundedReceiver<SceneEvent>) -> Vec<SceneEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_preset_run_caps_travel_and_redistributes_step() {
    let settings = SettingsStore::default();
    settings.save_max_travel_mm(12.0);
    let (runner, mock) = runner_with_client(settings).await;

    // 4 shots (60 s / 15 s) at 5 mm would want 15 mm; the 12 mm ceiling
    // redistributes the step to 4 mm.
    let template = template(15, 1, 5.0);

    let (tx, rx) = mpsc::unbounded_channel();
    runner.run_preset(&template, tx).await;
    let events = collect_events(rx).await;

    assert_eq!(events.first(), Some(&SceneEvent::Progress(slidelapse::scenes::Progress { index: 1, total: 4 })));
    assert_eq!(events.last(), Some(&SceneEvent::Finished));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SceneEvent::Progress(_)))
            .count(),
        4
    );

    let lines = mock.sent_lines();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert_eq!(line, "$J=G91 G21 F800 X4.0000");
    }
    assert!((runner.traveled_mm().await - 12.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_send_failure_aborts_run_without_advancing_travel() {
    let settings = SettingsStore::default();
    let (runner, mock) = runner_with_client(settings).await;
    mock.set_fail_writes(true);

    let (tx, rx) = mpsc::unbounded_channel();
    runner.run_preset(&template(15, 1, 5.0), tx).await;
    let events = collect_events(rx).await;

    assert_eq!(events.last(), Some(&SceneEvent::Failed(MoveError::SendFailed)));
    assert_eq!(runner.traveled_mm().await, 0.0);
}

#[tokio::test]
async fn test_move_once_respects_travel_limit() {
    let settings = SettingsStore::default();
    settings.save_max_travel_mm(4.0);
    let (runner, _mock) = runner_with_client(settings).await;

    // A 5 mm step cannot fit; the counter must not move.
    let big = template(15, 1, 5.0);
    assert_eq!(
        runner.move_once(&big).await,
        Err(MoveError::TravelLimit(4.0))
    );
    assert_eq!(runner.traveled_mm().await, 0.0);

    // Two 2 mm steps fit exactly, the third is refused.
    let small = template(15, 1, 2.0);
    assert_eq!(runner.move_once(&small).await, Ok(()));
    assert_eq!(runner.move_once(&small).await, Ok(()));
    assert_eq!(
        runner.move_once(&small).await,
        Err(MoveError::TravelLimit(4.0))
    );
    assert!((runner.traveled_mm().await - 4.0).abs() < 1e-9);

    runner.reset_progress().await;
    assert_eq!(runner.move_once(&small).await, Ok(()));
}

#[tokio::test]
async fn test_offline_mode_blocks_motion() {
    let settings = SettingsStore::default();
    settings.set_offline_mode(true);
    let (runner, mock) = runner_with_client(settings).await;

    assert_eq!(
        runner.move_once(&template(15, 1, 1.0)).await,
        Err(MoveError::Offline)
    );

    let (tx, rx) = mpsc::unbounded_channel();
    runner.run_preset(&template(15, 1, 1.0), tx).await;
    assert_eq!(
        collect_events(rx).await,
        vec![SceneEvent::Failed(MoveError::Offline)]
    );
    assert!(mock.sent_lines().is_empty());
}

#[tokio::test]
async fn test_stop_interrupts_interval_wait() {
    let settings = SettingsStore::default();
    let (runner, _mock) = runner_with_client(settings).await;

    // 30 s interval: without prompt cancellation this test would hang.
    let template = template(30, 10, 1.0);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run_preset(&template, tx).await })
    };

    // First progress arrives immediately; stop during the interval wait.
    assert!(matches!(rx.recv().await, Some(SceneEvent::Progress(_))));
    tokio::time::sleep(Duration::from_millis(100)).await;
    runner.stop();
    tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .unwrap()
        .unwrap();
}
