mod common;

use common::{StubChannel, StubSmu, pixels};
use heliotrack::config::TrackerConfig;
use heliotrack::tracker::MpptCore;
use std::collections::BTreeMap;
use std::time::Instant;

#[tokio::test]
async fn snaith_run_decomposes_into_soaks_and_descent() {
    let mut channels = BTreeMap::new();
    channels.insert(0, StubChannel::pv(0.65, 0.02));
    let (smu, _state) = StubSmu::new(channels);
    let mut core = MpptCore::new(Box::new(smu), 0.1, None);

    let cfg = TrackerConfig {
        duration_s: 1.0,
        algorithm: "snaith://10:0.002:-1:2:0.1:0.1:0.01".to_string(),
        snaith_pre_soak_s: 0.3,
        snaith_post_soak_s: 0.2,
        ..TrackerConfig::default()
    };

    let started = Instant::now();
    let output = core
        .launch_tracker(&cfg, &pixels(&[0]), None)
        .await
        .unwrap();
    let elapsed = started.elapsed().as_secs_f64();

    // Total wall time is the full budget: pre-soak and post-soak come out
    // of it, they are not added on top (within one iteration of slack)
    assert!(elapsed >= 0.95, "run ended early: {:.3} s", elapsed);
    assert!(elapsed <= 1.4, "run overran: {:.3} s", elapsed);

    // Soaks and descent all contributed measurements
    let trace = &output.traces[&0];
    assert!(trace.len() > 10);

    // Finalization wrote the last operating point back into the reference
    assert!(core.reference(0).and_then(|r| r.vmpp).is_some());
    assert!(core.reference(0).and_then(|r| r.impp).is_some());
}

#[tokio::test]
async fn plain_gd_run_honors_duration_budget() {
    let mut channels = BTreeMap::new();
    channels.insert(0, StubChannel::pv(0.65, 0.02));
    let (smu, _state) = StubSmu::new(channels);
    let mut core = MpptCore::new(Box::new(smu), 0.1, None);

    let cfg = TrackerConfig {
        duration_s: 0.4,
        algorithm: "gd://10:0.002:-1:2:0.1:0.1:0.01".to_string(),
        ..TrackerConfig::default()
    };

    let started = Instant::now();
    core.launch_tracker(&cfg, &pixels(&[0]), None)
        .await
        .unwrap();
    let elapsed = started.elapsed().as_secs_f64();

    assert!(elapsed >= 0.38, "run ended early: {:.3} s", elapsed);
    assert!(elapsed <= 0.8, "run overran: {:.3} s", elapsed);
}
