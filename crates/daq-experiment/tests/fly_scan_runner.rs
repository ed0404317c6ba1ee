use std::sync::Arc;
use std::time::Duration;

use daq_core::capabilities::Stageable;
use daq_core::error::FlyScanError;
use daq_core::experiment::document::Document;
use daq_driver_mock::{
    detector_signals, MockAreaDetector, MockMode, MockScanController, ScanBehavior,
};
use daq_experiment::flyer::{FlyScanCoordinator, FlyerSignals, ScanState};
use daq_experiment::plans::{FlyScanRequest, FlyScanRunner, FlyScanTimeouts};
use serde_json::json;
use tokio::sync::mpsc;

fn timeouts() -> FlyScanTimeouts {
    FlyScanTimeouts {
        settle: Duration::from_secs(1),
        start: Duration::from_millis(200),
        complete: Duration::from_secs(2),
    }
}

fn runner(controller: MockScanController) -> (Arc<MockAreaDetector>, FlyScanRunner) {
    let detector = Arc::new(MockAreaDetector::default());
    let flyer = FlyScanCoordinator::new(
        "flyer",
        Arc::new(controller),
        detector.clone(),
        FlyerSignals::hxn(),
    );
    (detector, FlyScanRunner::new(flyer, timeouts()))
}

fn drain(rx: &mut mpsc::Receiver<Document>) -> Vec<Document> {
    let mut docs = Vec::new();
    while let Ok(doc) = rx.try_recv() {
        docs.push(doc);
    }
    docs
}

#[tokio::test]
async fn test_fly_scan_emits_documents_in_order() {
    let (detector, runner) = runner(MockScanController::new());
    let mut rx = runner.subscribe();

    let request = FlyScanRequest::new((0.0, 0.1, 5), (0.0, 0.2, 3), 0.01)
        .with_trigger_rate(5.0)
        .with_metadata("sample", "Au foil");
    let summary = runner.run(request).await.unwrap();
    assert_eq!(summary.num_events, 15);

    let docs = drain(&mut rx);
    let kinds: Vec<&str> = docs.iter().map(Document::kind).collect();
    let mut expected = vec!["start", "descriptor", "resource"];
    expected.extend(std::iter::repeat("datum").take(15));
    expected.extend(std::iter::repeat("event").take(15));
    expected.push("stop");
    assert_eq!(kinds, expected);

    let Document::Start(start) = &docs[0] else {
        panic!("expected start");
    };
    assert_eq!(start.uid, summary.run_uid);
    assert_eq!(start.plan_type, "fly_scan");
    assert_eq!(start.plan_args["nx"], "5");
    assert_eq!(start.metadata["sample"], "Au foil");

    let Document::Descriptor(descriptor) = &docs[1] else {
        panic!("expected descriptor");
    };
    assert_eq!(descriptor.name, "primary");
    assert_eq!(descriptor.data_keys["x"].shape, vec![5]);
    assert_eq!(descriptor.data_keys["y"].shape, vec![3]);

    let Document::Resource(resource) = &docs[2] else {
        panic!("expected resource");
    };
    assert_eq!(resource.run_start.as_deref(), Some(summary.run_uid.as_str()));

    let events: Vec<_> = docs
        .iter()
        .filter_map(|doc| match doc {
            Document::Event(event) => Some(event),
            _ => None,
        })
        .collect();
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq_num, i as u64 + 1);
        assert_eq!(event.descriptor_uid, descriptor.uid);
        assert_eq!(event.data["image"], json!(format!("{}/{}", resource.uid, i)));
        assert!(!event.filled["image"]);
    }

    let Document::Stop(stop) = docs.last().unwrap() else {
        panic!("expected stop");
    };
    assert_eq!(stop.exit_status, "success");
    assert_eq!(stop.num_events, 15);

    // Detector was configured for the run and disarmed afterwards
    assert_eq!(detector.peek(detector_signals::ACQUIRE_TIME), Some(json!(0.01)));
    assert_eq!(detector.peek(detector_signals::NUM_IMAGES), Some(json!(15)));
    assert_eq!(detector.peek(detector_signals::ACQUIRE), Some(json!(0)));
    assert!(!detector.is_staged().await.unwrap());
    assert_eq!(runner.state().await, ScanState::Idle);
}

#[tokio::test]
async fn test_fly_scan_with_realistic_timing() {
    let controller = MockScanController::builder()
        .mode(MockMode::Realistic)
        .build();
    let (_detector, runner) = runner(controller);

    // 8 points at 400 Hz hold the raster for 20ms
    let request = FlyScanRequest::new((-1.0, 1.0, 4), (0.0, 1.0, 2), 0.002).with_trigger_rate(400.0);
    let summary = runner.run(request).await.unwrap();
    assert_eq!(summary.num_events, 8);
}

#[tokio::test]
async fn test_scan_that_never_starts_still_unstages() {
    let controller = MockScanController::builder()
        .behavior(ScanBehavior::NeverStart)
        .build();
    let (detector, runner) = runner(controller);
    let mut rx = runner.subscribe();

    let err = runner
        .run(FlyScanRequest::new((0.0, 1.0, 2), (0.0, 1.0, 2), 0.01))
        .await
        .unwrap_err();
    assert!(matches!(err, FlyScanError::ScanNeverStarted(_)), "{err}");

    let docs = drain(&mut rx);
    let kinds: Vec<&str> = docs.iter().map(Document::kind).collect();
    assert_eq!(kinds, vec!["start", "stop"]);
    let Document::Stop(stop) = &docs[1] else {
        panic!("expected stop");
    };
    assert_eq!(stop.exit_status, "fail");
    assert!(stop.reason.contains("did not start"));

    assert!(!detector.is_staged().await.unwrap());
    assert_eq!(runner.state().await, ScanState::Idle);
}

#[tokio::test]
async fn test_scan_that_never_completes_still_unstages() {
    let controller = MockScanController::builder()
        .behavior(ScanBehavior::NeverStop)
        .build();
    let detector = Arc::new(MockAreaDetector::default());
    let flyer = FlyScanCoordinator::new(
        "flyer",
        Arc::new(controller),
        detector.clone(),
        FlyerSignals::hxn(),
    );
    let runner = FlyScanRunner::new(
        flyer,
        FlyScanTimeouts {
            complete: Duration::from_millis(100),
            ..timeouts()
        },
    );

    let err = runner
        .run(FlyScanRequest::new((0.0, 1.0, 2), (0.0, 1.0, 1), 0.01))
        .await
        .unwrap_err();
    assert!(matches!(err, FlyScanError::ScanNeverCompleted(_)), "{err}");
    assert!(!detector.is_staged().await.unwrap());
}

#[tokio::test]
async fn test_invalid_request_emits_nothing() {
    let (detector, runner) = runner(MockScanController::new());
    let mut rx = runner.subscribe();

    let err = runner
        .run(FlyScanRequest::new((0.0, 1.0, 0), (0.0, 1.0, 2), 0.01))
        .await
        .unwrap_err();
    assert!(matches!(err, FlyScanError::InvalidTrajectory(_)));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(detector.stage_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_raster_reaches_concurrent_subscriber() {
    let (_detector, runner) = runner(MockScanController::new());
    let mut rx = runner.subscribe();

    // Drains while the run is emitting, pausing now and then
    let consumer = tokio::spawn(async move {
        let (mut total, mut datums, mut events) = (0usize, 0usize, 0usize);
        let mut last = None;
        while let Some(doc) = rx.recv().await {
            total += 1;
            match &doc {
                Document::Datum(_) => datums += 1,
                Document::Event(event) => {
                    events += 1;
                    assert_eq!(event.seq_num, events as u64);
                }
                _ => {}
            }
            if total % 256 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            last = Some(doc);
        }
        (total, datums, events, last)
    });

    let request = FlyScanRequest::new((0.0, 1.0, 50), (0.0, 1.0, 40), 0.01);
    let summary = runner.run(request).await.unwrap();
    assert_eq!(summary.num_events, 2000);
    drop(runner);

    let (total, datums, events, last) = consumer.await.unwrap();
    assert_eq!(datums, 2000);
    assert_eq!(events, 2000);
    assert_eq!(total, 2 * 2000 + 4);
    assert!(matches!(last, Some(Document::Stop(ref stop)) if stop.num_events == 2000));
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_runs() {
    let (_detector, runner) = runner(MockScanController::new());
    let rx = runner.subscribe();
    drop(rx);
    let mut live = runner.subscribe();

    let request = FlyScanRequest::new((0.0, 1.0, 4), (0.0, 1.0, 3), 0.01);
    let summary = runner.run(request).await.unwrap();
    assert_eq!(summary.num_events, 12);
    assert_eq!(drain(&mut live).len(), 2 * 12 + 4);
    assert!(format!("{runner:?}").contains("subscribers: 1"));
}

#[tokio::test]
async fn test_cancelled_run_unstages_detector() {
    let controller = MockScanController::builder()
        .behavior(ScanBehavior::NeverStart)
        .build();
    let detector = Arc::new(MockAreaDetector::default());
    let flyer = FlyScanCoordinator::new(
        "flyer",
        Arc::new(controller),
        detector.clone(),
        FlyerSignals::hxn(),
    );
    let runner = FlyScanRunner::new(
        flyer,
        FlyScanTimeouts {
            start: Duration::from_secs(60),
            ..timeouts()
        },
    );

    // Caller gives up while kickoff is pending
    let request = FlyScanRequest::new((0.0, 1.0, 2), (0.0, 1.0, 2), 0.01);
    let abandoned = tokio::time::timeout(Duration::from_millis(200), runner.run(request)).await;
    assert!(abandoned.is_err());

    // Waits for the teardown, which holds the flyer until it is done
    assert_eq!(runner.state().await, ScanState::Idle);
    assert!(!detector.is_staged().await.unwrap());
    assert_eq!(detector.peek(detector_signals::ACQUIRE), Some(json!(0)));
    assert_eq!(detector.stage_count(), 1);
    assert_eq!(detector.unstage_count(), 1);
}

#[tokio::test]
async fn test_runner_recovers_flyer_left_staged() {
    let detector = Arc::new(MockAreaDetector::default());
    let mut flyer = FlyScanCoordinator::new(
        "flyer",
        Arc::new(MockScanController::new()),
        detector.clone(),
        FlyerSignals::hxn(),
    );
    flyer.stage().await.unwrap();
    let runner = FlyScanRunner::new(flyer, timeouts());
    assert_eq!(runner.state().await, ScanState::Staged);

    let summary = runner
        .run(FlyScanRequest::new((0.0, 1.0, 2), (0.0, 1.0, 2), 0.01))
        .await
        .unwrap();
    assert_eq!(summary.num_events, 4);
    assert_eq!(detector.stage_count(), 2);
    assert_eq!(detector.unstage_count(), 2);
    assert_eq!(runner.state().await, ScanState::Idle);
}
