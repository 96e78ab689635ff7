//! Full-session test: virtual PLC against the capture driver with the
//! simulated camera, over an in-memory duplex link.

use std::time::Duration;

use tokio::sync::watch;

use plc_capture::drivers::{CaptureDriver, CaptureDriverConfig};
use plc_capture::link::Link;
use plc_capture::progress::ProgressEvent;
use plc_capture::LayerPlan;
use sim::{SimCamera, VirtualPlc};

#[tokio::test]
async fn virtual_plc_completes_a_session_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let plan = LayerPlan::new(vec![1, 2]).unwrap();

    let mut config = CaptureDriverConfig {
        output_root: root.path().to_path_buf(),
        layer_plan: plan.clone(),
        settle_delay_ms: 1,
        verify_interval_ms: 5,
        ..CaptureDriverConfig::default()
    };
    config.serial.read_timeout_ms = 50;

    let (controller_end, plc_end) = tokio::io::duplex(1024);
    let (_shutdown, shutdown_rx) = watch::channel(false);

    let mut driver = CaptureDriver::attach(
        Link::from_stream(controller_end),
        config,
        SimCamera::new(),
        shutdown_rx,
    );
    let mut progress = driver.subscribe_progress();
    driver.start_session().await.unwrap();
    let driver = tokio::spawn(driver.run());

    let plc = VirtualPlc::new(plan).with_ack_timeout(Duration::from_secs(5));
    let report = plc.run(plc_end).await.unwrap();

    assert_eq!(report.dones, 3);
    assert_eq!(report.errors, 0);

    let summary = driver.await.unwrap().unwrap();
    assert_eq!(summary.total_captured, 3);
    assert_eq!(summary.batch_dir, Some(root.path().join("Batch_1")));

    let batch = root.path().join("Batch_1");
    assert!(batch.join("Layer_1").join("image_1.jpg").is_file());
    assert!(batch.join("Layer_2").join("image_2.jpg").is_file());
    assert!(batch.join("Layer_2").join("image_3.jpg").is_file());

    // Progress stream saw every capture and the session close-out.
    let mut captured = 0;
    let mut finished = false;
    while let Ok(event) = progress.try_recv() {
        match event {
            ProgressEvent::ImageCaptured { .. } => captured += 1,
            ProgressEvent::SessionFinished { total_captured } => {
                finished = true;
                assert_eq!(total_captured, 3);
            }
            _ => {}
        }
    }
    assert_eq!(captured, 3);
    assert!(finished);
}
