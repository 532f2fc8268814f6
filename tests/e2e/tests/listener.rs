//! Traffic listener scenarios

use netsim_e2e::*;
use crossbeam_channel::Receiver;
use netsim_kernel::{ListenerDecision, Observation, PortKind};
use serde_json::json;
use std::thread::JoinHandle;
use std::time::Duration;

/// Decide every observation the same way until the tap goes quiet
fn judge(rx: Receiver<Observation>, decision: ListenerDecision) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut seen = 0;
        while let Ok(observation) = rx.recv_timeout(Duration::from_secs(2)) {
            assert!(observation.is_interrupting());
            seen += 1;
            observation.decide(decision);
        }
        seen
    })
}

#[test_log::test]
fn test_interrupting_listener_can_drop_traffic() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder.add_application("a", sender("b", vec![json!("secret")])).unwrap();
    builder
        .add_application("b", receiver(1, Duration::from_millis(500)))
        .unwrap();
    let observations = builder.observe("b", true).unwrap();
    let judge = judge(observations, ListenerDecision::Drop);

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    assert!(received(&result, "b", RECEIVER).is_empty());
    assert_eq!(judge.join().unwrap(), 1);
    let device = device_log(&result, "b").unwrap();
    assert_eq!(device["dropped"], json!(1));
}

#[test_log::test]
fn test_released_traffic_reaches_the_application() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder.add_application("a", sender("b", vec![json!("public")])).unwrap();
    builder
        .add_application("b", receiver(1, Duration::from_secs(5)))
        .unwrap();
    let observations = builder.observe("b", true).unwrap();
    let judge = judge(observations, ListenerDecision::Release);

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    let packets = received(&result, "b", RECEIVER);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0]["payload"], json!("public"));
    assert_eq!(judge.join().unwrap(), 1);
}
