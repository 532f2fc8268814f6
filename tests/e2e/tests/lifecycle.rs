//! Termination scenarios across the kernel, miner and device tiers

use netsim_e2e::*;
use netsim_kernel::{ApplicationSpec, DeviceRole, PortKind, SimulationBuilder};
use netsim_types::ActorState;
use serde_json::json;
use std::time::{Duration, Instant};

#[test_log::test]
fn test_devices_spread_over_miners_all_stop() {
    let mut config = test_config();
    config.miners = 2;
    let labels = ["d0", "d1", "d2", "d3"];
    let mut builder = line(config, PortKind::Classic, &labels).unwrap();
    for label in labels {
        builder
            .add_application(label, ApplicationSpec::new("work", |app| {
                app.dump(json!({ "device": app.device().label }));
                Ok(())
            }))
            .unwrap();
    }

    let simulation = builder.build().unwrap();
    let mut per_miner = std::collections::BTreeMap::new();
    for miner in simulation.placement().values() {
        *per_miner.entry(miner.clone()).or_insert(0) += 1;
    }
    assert_eq!(per_miner.values().copied().collect::<Vec<_>>(), vec![2, 2]);

    let result = run_bounded(simulation, Duration::from_secs(20)).unwrap();
    assert_all_stopped(&result, &labels).unwrap();
    assert!(!result.timed_out);
    for label in labels {
        assert_eq!(result.channel(label, "work").len(), 1);
        let device = device_log(&result, label).unwrap();
        assert_eq!(device["reason"], json!("AllApplicationsExited"));
        assert_eq!(device["socket_clean"], json!(true));
        assert_eq!(device["applications"]["work"], json!(ActorState::Finished));
    }
}

#[test_log::test]
fn test_unresponsive_application_is_detached_after_deadline() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder
        .add_application(
            "a",
            unresponsive("stuck", Duration::from_secs(5)).with_deadline(Duration::from_millis(200)),
        )
        .unwrap();

    let started = Instant::now();
    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    let device = device_log(&result, "a").unwrap();
    assert_eq!(device["detached"], json!(1));
    assert_eq!(device["applications"]["stuck"], json!(ActorState::Terminated));
    assert_all_stopped(&result, &["a", "b"]).unwrap();
}

#[test_log::test]
fn test_unresponsive_application_holds_back_end_across_miners() {
    let mut config = test_config();
    config.miners = 2;
    let labels = ["d0", "d1", "d2", "d3"];
    let deadline = Duration::from_millis(400);
    let mut builder = line(config, PortKind::Classic, &labels).unwrap();
    let stuck = unresponsive("stuck", Duration::from_secs(3)).with_deadline(deadline);
    builder.add_application("d0", stuck).unwrap();
    for label in &labels[1..] {
        builder
            .add_application(*label, ApplicationSpec::new("work", |app| {
                app.dump(json!({ "device": app.device().label }));
                Ok(())
            }))
            .unwrap();
    }

    let started = Instant::now();
    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    // The kernel waits for the stuck device, not for the thread it detached
    assert!(started.elapsed() >= deadline);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!result.timed_out);
    assert_all_stopped(&result, &labels).unwrap();

    let stuck = device_log(&result, "d0").unwrap();
    assert_eq!(stuck["detached"], json!(1));
    assert_eq!(stuck["applications"]["stuck"], json!(ActorState::Terminated));
    let stuck_end = stuck["ended_after_ms"].as_u64().unwrap();
    assert!(stuck_end >= deadline.as_millis() as u64);

    for label in &labels[1..] {
        let device = device_log(&result, label).unwrap();
        assert_eq!(device["reason"], json!("AllApplicationsExited"));
        assert_eq!(device["detached"], json!(0));
        assert!(device["ended_after_ms"].as_u64().unwrap() < stuck_end);
    }
}

#[test_log::test]
fn test_relay_device_ends_on_shutdown() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "relay", "c"]).unwrap();
    builder.add_application("a", sender("c", vec![json!("via relay")])).unwrap();
    builder
        .add_application("c", receiver(1, Duration::from_secs(5)))
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    assert_eq!(received(&result, "c", RECEIVER).len(), 1);
    let relay = device_log(&result, "relay").unwrap();
    assert_eq!(relay["reason"], json!("Shutdown"));
    let history = relay["history"].as_array().unwrap();
    assert!(history.contains(&json!("Terminated")));
    assert_all_stopped(&result, &["a", "relay", "c"]).unwrap();
}

#[test_log::test]
fn test_application_can_end_its_device() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder
        .add_application("a", ApplicationSpec::new("quitter", |app| {
            app.end_device();
            Ok(())
        }))
        .unwrap();
    builder.add_application("a", patient("waiter")).unwrap();

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    let device = device_log(&result, "a").unwrap();
    assert_eq!(device["reason"], json!("Requested"));
    assert_eq!(device["detached"], json!(0));
}

#[test_log::test]
fn test_simulation_timeout_shuts_everything_down() {
    let mut config = test_config();
    config.timing.simulation_timeout_ms = 300;
    let mut builder = line(config, PortKind::Classic, &["a", "b"]).unwrap();
    builder.add_application("a", patient("forever")).unwrap();
    builder.add_application("b", patient("forever")).unwrap();

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    assert!(result.timed_out);
    for label in ["a", "b"] {
        let device = device_log(&result, label).unwrap();
        assert_eq!(device["reason"], json!("Shutdown"));
        assert_eq!(device["detached"], json!(0));
    }
    assert_all_stopped(&result, &["a", "b"]).unwrap();
}

#[test_log::test]
fn test_network_without_workload_ends_immediately() {
    let mut builder = SimulationBuilder::new(test_config());
    builder.add_device("a", DeviceRole::Ordinary).unwrap();
    builder.add_device("b", DeviceRole::Ordinary).unwrap();
    builder.add_channel(PortKind::Quantum, "a", "b", 2.5).unwrap();

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    assert!(!result.timed_out);
    assert_all_stopped(&result, &["a", "b"]).unwrap();
}
